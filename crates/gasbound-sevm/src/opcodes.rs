// SPDX-License-Identifier: AGPL-3.0

//! EVM opcode interpreter
//!
//! Executes one instruction against a [`SymbolicState`] and reports its gas
//! as a [`GasExpr`]. Control transfers are returned to the caller, which
//! owns forking and jump resolution.

use gasbound_cfg::opcodes::*;
use gasbound_cfg::{Node, Opcode};
use gasbound_constants::*;
use gasbound_exceptions::{GasboundException, GasboundResult};
use gasbound_expr::{BinaryOp, CmpOp, Expr, GasExpr, TernaryOp, UnaryOp, VariableRegistry};
use gasbound_logs::{warn_once, ErrorCode};
use num_bigint::BigUint;

use crate::state::{concrete_word_range, key_suffix, SymbolicState};

/// How control leaves an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Continue,
    Jump { target: Expr },
    /// `condition` holds exactly when the jump is taken
    Branch { target: Expr, condition: Expr },
    Halt,
}

/// Result of [`Interpreter::apply`]
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: SymbolicState,
    pub gas: GasExpr,
    pub control: Control,
}

/// Fixed tariff of an instruction, excluding dynamic parts
pub fn tariff(op: u8) -> u64 {
    match op {
        OP_STOP | OP_RETURN | OP_REVERT | OP_INVALID => GAS_ZERO,
        OP_JUMPDEST => GAS_JUMPDEST,
        OP_ADDRESS | OP_ORIGIN | OP_CALLER | OP_CALLVALUE | OP_CALLDATASIZE | OP_CODESIZE
        | OP_GASPRICE | OP_RETURNDATASIZE | OP_COINBASE | OP_TIMESTAMP | OP_NUMBER
        | OP_DIFFICULTY | OP_GASLIMIT | OP_CHAINID | OP_BASEFEE | OP_POP | OP_PC | OP_MSIZE
        | OP_GAS | OP_PUSH0 => GAS_BASE,
        OP_ADD | OP_SUB | OP_NOT | OP_LT | OP_GT | OP_SLT | OP_SGT | OP_EQ | OP_ISZERO
        | OP_AND | OP_OR | OP_XOR | OP_BYTE | OP_SHL | OP_SHR | OP_SAR | OP_CALLDATALOAD
        | OP_MLOAD | OP_MSTORE | OP_MSTORE8 => GAS_VERYLOW,
        OP_PUSH1..=OP_PUSH32 | OP_DUP1..=OP_DUP16 | OP_SWAP1..=OP_SWAP16 => GAS_VERYLOW,
        OP_MUL | OP_DIV | OP_SDIV | OP_MOD | OP_SMOD | OP_SIGNEXTEND | OP_SELFBALANCE => GAS_LOW,
        OP_ADDMOD | OP_MULMOD | OP_JUMP => GAS_MID,
        OP_JUMPI => GAS_HIGH,
        OP_BALANCE => GAS_BALANCE,
        OP_EXTCODESIZE | OP_EXTCODEHASH | OP_EXTCODECOPY => GAS_EXTCODE,
        OP_BLOCKHASH => GAS_BLOCKHASH,
        OP_SLOAD => GAS_SLOAD,
        OP_CALLDATACOPY | OP_CODECOPY | OP_RETURNDATACOPY => GAS_COPY,
        OP_SHA3 => GAS_SHA3,
        OP_EXP => GAS_EXP,
        OP_LOG0..=OP_LOG4 => GAS_LOG,
        OP_SELFDESTRUCT => GAS_SELFDESTRUCT,
        OP_CALL | OP_CALLCODE | OP_DELEGATECALL | OP_STATICCALL => GAS_CALL,
        OP_CREATE | OP_CREATE2 => GAS_CREATE,
        _ => UNMODELED_GAS,
    }
}

/// Name of the input variable read by an environment instruction
fn environment_name(op: u8) -> Option<&'static str> {
    Some(match op {
        OP_ADDRESS => "address",
        OP_ORIGIN => "origin",
        OP_CALLER => "caller",
        OP_CALLVALUE => "callvalue",
        OP_CALLDATASIZE => "calldatasize",
        OP_CODESIZE => "codesize",
        OP_GASPRICE => "gasprice",
        OP_RETURNDATASIZE => "returndatasize",
        OP_COINBASE => "coinbase",
        OP_TIMESTAMP => "timestamp",
        OP_NUMBER => "number",
        OP_DIFFICULTY => "prevrandao",
        OP_GASLIMIT => "gaslimit",
        OP_CHAINID => "chainid",
        OP_SELFBALANCE => "selfbalance",
        OP_BASEFEE => "basefee",
        _ => return None,
    })
}

fn binary_op(op: u8) -> Option<BinaryOp> {
    Some(match op {
        OP_ADD => BinaryOp::Add,
        OP_MUL => BinaryOp::Mul,
        OP_SUB => BinaryOp::Sub,
        OP_DIV => BinaryOp::Div,
        OP_SDIV => BinaryOp::SDiv,
        OP_MOD => BinaryOp::Mod,
        OP_SMOD => BinaryOp::SMod,
        OP_EXP => BinaryOp::Exp,
        OP_SIGNEXTEND => BinaryOp::SignExtend,
        OP_AND => BinaryOp::And,
        OP_OR => BinaryOp::Or,
        OP_XOR => BinaryOp::Xor,
        OP_BYTE => BinaryOp::Byte,
        OP_SHL => BinaryOp::Shl,
        OP_SHR => BinaryOp::Shr,
        OP_SAR => BinaryOp::Sar,
        _ => return None,
    })
}

fn compare_op(op: u8) -> Option<CmpOp> {
    Some(match op {
        OP_LT => CmpOp::Ult,
        OP_GT => CmpOp::Ugt,
        OP_SLT => CmpOp::Slt,
        OP_SGT => CmpOp::Sgt,
        OP_EQ => CmpOp::Eq,
        _ => return None,
    })
}

/// Bytes of the exponent that `EXP` is charged for
fn exponent_bytes(exponent: &Expr) -> u64 {
    match exponent.as_word() {
        Some(value) => (value.bits() + 7) / 8,
        None => WORD_SIZE as u64,
    }
}

/// Gas and final state of one node
#[derive(Debug, Clone)]
pub struct NodeRun {
    pub state: SymbolicState,
    pub gas: GasExpr,
    pub control: Control,
}

pub struct Interpreter<'r> {
    registry: &'r mut VariableRegistry,
}

impl<'r> Interpreter<'r> {
    pub fn new(registry: &'r mut VariableRegistry) -> Self {
        Self { registry }
    }

    /// Execute `opcode` on a copy of `state`
    pub fn apply(&mut self, state: &SymbolicState, opcode: &Opcode) -> GasboundResult<Transition> {
        let mut next = state.clone();
        let (gas, control) = self.execute(&mut next, opcode)?;
        Ok(Transition {
            state: next,
            gas,
            control,
        })
    }

    /// Execute every instruction of `node`, stopping early at a halt
    pub fn run_node(&mut self, state: &SymbolicState, node: &Node) -> GasboundResult<NodeRun> {
        let mut current = state.clone();
        let mut gas = GasExpr::zero();
        let mut control = Control::Continue;
        for opcode in &node.opcodes {
            let (cost, next) = self.execute(&mut current, opcode)?;
            gas.add_assign(&cost);
            control = next;
            if control != Control::Continue {
                break;
            }
        }
        Ok(NodeRun {
            state: current,
            gas,
            control,
        })
    }

    fn input(&mut self, name: &str) -> Expr {
        self.registry.var(name)
    }

    /// Execute `opcode` in place
    pub fn execute(
        &mut self,
        state: &mut SymbolicState,
        opcode: &Opcode,
    ) -> GasboundResult<(GasExpr, Control)> {
        let op = opcode.op;
        let pc = opcode.pc;
        let fixed = GasExpr::constant(tariff(op));

        if let Some(bop) = binary_op(op) {
            let args = state.pop_n(2, opcode)?;
            let gas = if op == OP_EXP {
                GasExpr::constant(GAS_EXP + GAS_EXP_BYTE * exponent_bytes(&args[1]))
            } else {
                fixed
            };
            let [a, b]: [Expr; 2] = to_array(args)?;
            state.push(Expr::binary(bop, a, b), pc)?;
            return Ok((gas, Control::Continue));
        }
        if let Some(cmp) = compare_op(op) {
            let [a, b]: [Expr; 2] = to_array(state.pop_n(2, opcode)?)?;
            state.push(Expr::bool_to_word(Expr::cmp(cmp, a, b)), pc)?;
            return Ok((fixed, Control::Continue));
        }
        if let Some(name) = environment_name(op) {
            let value = self.input(name);
            state.push(value, pc)?;
            return Ok((fixed, Control::Continue));
        }

        match op {
            // 0x00: STOP, 0xfe: INVALID
            OP_STOP | OP_INVALID => Ok((fixed, Control::Halt)),

            // 0x08, 0x09: ADDMOD, MULMOD
            OP_ADDMOD | OP_MULMOD => {
                let [a, b, n]: [Expr; 3] = to_array(state.pop_n(3, opcode)?)?;
                let top = if op == OP_ADDMOD {
                    TernaryOp::AddMod
                } else {
                    TernaryOp::MulMod
                };
                state.push(Expr::ternary(top, a, b, n), pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x15: ISZERO
            OP_ISZERO => {
                let a = state.pop(opcode)?;
                state.push(Expr::is_zero(a), pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x19: NOT
            OP_NOT => {
                let a = state.pop(opcode)?;
                state.push(Expr::unary(UnaryOp::Not, a), pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x20: SHA3
            OP_SHA3 => {
                let [offset, size]: [Expr; 2] = to_array(state.pop_n(2, opcode)?)?;
                let hash = match concrete_word_range(&offset, &size) {
                    Some(addresses) => Expr::keccak(
                        addresses
                            .iter()
                            .map(|a| state.mload(a, self.registry))
                            .collect(),
                    ),
                    None => self.input(&format!(
                        "sha3_{}_{}",
                        key_suffix(&offset),
                        key_suffix(&size)
                    )),
                };
                state.push(hash, pc)?;
                Ok((GasExpr::words(GAS_SHA3, GAS_SHA3_WORD, size), Control::Continue))
            }

            // 0x31, 0x3b, 0x3f, 0x40: keyed environment reads
            OP_BALANCE | OP_EXTCODESIZE | OP_EXTCODEHASH | OP_BLOCKHASH => {
                let key = state.pop(opcode)?;
                let prefix = match op {
                    OP_BALANCE => "balance",
                    OP_EXTCODESIZE => "extcodesize",
                    OP_EXTCODEHASH => "extcodehash",
                    _ => "blockhash",
                };
                let value = self.input(&format!("{}_{}", prefix, key_suffix(&key)));
                state.push(value, pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x35: CALLDATALOAD
            OP_CALLDATALOAD => {
                let offset = state.pop(opcode)?;
                let value = self.input(&format!("calldata_{}", key_suffix(&offset)));
                state.push(value, pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x37, 0x39, 0x3e: copies into memory are charged but not tracked
            OP_CALLDATACOPY | OP_CODECOPY | OP_RETURNDATACOPY => {
                let [_, _, size]: [Expr; 3] = to_array(state.pop_n(3, opcode)?)?;
                Ok((GasExpr::words(GAS_COPY, GAS_COPY_WORD, size), Control::Continue))
            }

            // 0x3c: EXTCODECOPY
            OP_EXTCODECOPY => {
                let [_, _, _, size]: [Expr; 4] = to_array(state.pop_n(4, opcode)?)?;
                Ok((
                    GasExpr::words(GAS_EXTCODE, GAS_COPY_WORD, size),
                    Control::Continue,
                ))
            }

            // 0x50: POP
            OP_POP => {
                state.pop(opcode)?;
                Ok((fixed, Control::Continue))
            }

            // 0x51: MLOAD
            OP_MLOAD => {
                let address = state.pop(opcode)?;
                let value = state.mload(&address, self.registry);
                state.push(value, pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x52, 0x53: MSTORE, MSTORE8
            OP_MSTORE | OP_MSTORE8 => {
                let [address, value]: [Expr; 2] = to_array(state.pop_n(2, opcode)?)?;
                if op == OP_MSTORE {
                    state.mstore(address, value);
                } else {
                    state.mstore8(address, value);
                }
                Ok((fixed, Control::Continue))
            }

            // 0x54: SLOAD
            OP_SLOAD => {
                let key = state.pop(opcode)?;
                let value = state.sload(&key, self.registry);
                state.push(value, pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x55: SSTORE
            OP_SSTORE => {
                let [key, value]: [Expr; 2] = to_array(state.pop_n(2, opcode)?)?;
                let is_reset = Expr::cmp(CmpOp::Eq, value.clone(), Expr::word(0));
                state.sstore(key, value);
                Ok((
                    GasExpr::select(is_reset, GAS_SSTORE_RESET, GAS_SSTORE_SET),
                    Control::Continue,
                ))
            }

            // 0x56: JUMP
            OP_JUMP => {
                let target = state.pop(opcode)?;
                Ok((fixed, Control::Jump { target }))
            }

            // 0x57: JUMPI
            OP_JUMPI => {
                let [target, condition]: [Expr; 2] = to_array(state.pop_n(2, opcode)?)?;
                Ok((
                    fixed,
                    Control::Branch {
                        target,
                        condition: Expr::truthy(condition),
                    },
                ))
            }

            // 0x58: PC
            OP_PC => {
                state.push(Expr::word(pc as u64), pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x59, 0x5a: MSIZE and GAS depend on where they execute
            OP_MSIZE | OP_GAS => {
                let prefix = if op == OP_MSIZE { "msize" } else { "gas" };
                let value = self.input(&format!("{}_{}", prefix, pc));
                state.push(value, pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x5b: JUMPDEST
            OP_JUMPDEST => Ok((fixed, Control::Continue)),

            // 0x5f..0x7f: PUSH0..PUSH32
            OP_PUSH0..=OP_PUSH32 => {
                let value = opcode.operand.clone().unwrap_or_else(|| BigUint::from(0u8));
                state.push(Expr::from_biguint(value), pc)?;
                Ok((fixed, Control::Continue))
            }

            // 0x80..0x8f: DUP1..DUP16
            OP_DUP1..=OP_DUP16 => {
                state.dup((op - OP_DUP1 + 1) as usize, opcode)?;
                Ok((fixed, Control::Continue))
            }

            // 0x90..0x9f: SWAP1..SWAP16
            OP_SWAP1..=OP_SWAP16 => {
                state.swap((op - OP_SWAP1 + 1) as usize, opcode)?;
                Ok((fixed, Control::Continue))
            }

            // 0xa0..0xa4: LOG0..LOG4
            OP_LOG0..=OP_LOG4 => {
                let topics = (op - OP_LOG0) as u64;
                let args = state.pop_n(2 + topics as usize, opcode)?;
                let size = args[1].clone();
                Ok((
                    GasExpr::bytes(GAS_LOG + GAS_LOG_TOPIC * topics, GAS_LOG_DATA, size),
                    Control::Continue,
                ))
            }

            // 0xf3, 0xfd: RETURN, REVERT
            OP_RETURN | OP_REVERT => {
                state.pop_n(2, opcode)?;
                Ok((fixed, Control::Halt))
            }

            // 0xff: SELFDESTRUCT
            OP_SELFDESTRUCT => {
                state.pop(opcode)?;
                Ok((fixed, Control::Halt))
            }

            _ if is_known(op) => self.unmodeled(state, opcode),

            _ => {
                warn_once(
                    ErrorCode::UnsupportedOpcode,
                    &format!("unknown instruction {}: treated as INVALID", opcode.mnemonic()),
                );
                Ok((GasExpr::zero(), Control::Halt))
            }
        }
    }

    /// Calls and creates: consume the arguments, return an unknown result
    fn unmodeled(
        &mut self,
        state: &mut SymbolicState,
        opcode: &Opcode,
    ) -> GasboundResult<(GasExpr, Control)> {
        let mnemonic = opcode.mnemonic();
        warn_once(
            ErrorCode::UnsupportedOpcode,
            &format!("{} is not modeled: result approximated by a fresh value", mnemonic),
        );
        let (pops, pushes) = stack_arity(opcode.op);
        state.pop_n(pops, opcode)?;
        for _ in 0..pushes {
            let value = self.input(&format!(
                "unmodeled_{}_{}",
                mnemonic.to_lowercase(),
                opcode.pc
            ));
            state.push(value, opcode.pc)?;
        }
        Ok((GasExpr::constant(tariff(opcode.op)), Control::Continue))
    }
}

fn to_array<const N: usize>(items: Vec<Expr>) -> GasboundResult<[Expr; N]> {
    items
        .try_into()
        .map_err(|_| GasboundException::Internal("operand count mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gasbound_cfg::parse_listing;
    use gasbound_expr::ExprKind;

    fn run(listing: &str) -> (SymbolicState, GasExpr, Control, VariableRegistry) {
        let mut registry = VariableRegistry::new();
        let opcodes = parse_listing(listing).unwrap();
        let mut state = SymbolicState::new();
        let mut gas = GasExpr::zero();
        let mut control = Control::Continue;
        {
            let mut interpreter = Interpreter::new(&mut registry);
            for opcode in &opcodes {
                let (cost, next) = interpreter.execute(&mut state, opcode).unwrap();
                gas.add_assign(&cost);
                control = next;
            }
        }
        (state, gas, control, registry)
    }

    #[test]
    fn test_arithmetic_folds() {
        let (state, gas, control, _) = run("0: PUSH1 0x03\n2: PUSH1 0x04\n4: SUB\n5: STOP");
        // SUB computes top - second
        assert_eq!(state.stack, vec![Expr::word(1)]);
        assert_eq!(gas.as_constant(), Some(3 + 3 + 3));
        assert_eq!(control, Control::Halt);
    }

    #[test]
    fn test_comparison_pushes_boolean_word() {
        let (state, _, _, _) = run("0: CALLER\n1: PUSH1 0x0a\n3: LT");
        match state.stack[0].kind() {
            ExprKind::Ite(cond, _, _) => {
                assert_eq!(cond.to_string(), "(10 < caller)");
            }
            other => panic!("expected ite, got {:?}", other),
        }
    }

    #[test]
    fn test_jumpi_condition() {
        let (_, gas, control, _) =
            run("0: CALLVALUE\n1: ISZERO\n2: PUSH1 0x08\n4: JUMPI");
        assert_eq!(gas.as_constant(), Some(2 + 3 + 3 + 10));
        match control {
            Control::Branch { target, condition } => {
                assert_eq!(target, Expr::word(8));
                assert_eq!(condition.to_string(), "(callvalue == 0)");
            }
            other => panic!("expected branch, got {:?}", other),
        }
    }

    #[test]
    fn test_sstore_gas_depends_on_value() {
        let (_, gas, _, _) = run("0: CALLER\n1: PUSH1 0x00\n3: SSTORE");
        assert!(!gas.is_constant());
        let (_, zero, _, _) = run("0: PUSH1 0x00\n2: PUSH1 0x00\n4: SSTORE");
        assert_eq!(zero.as_constant(), Some(3 + 3 + GAS_SSTORE_RESET));
        let (_, set, _, _) = run("0: PUSH1 0x01\n2: PUSH1 0x00\n4: SSTORE");
        assert_eq!(set.as_constant(), Some(3 + 3 + GAS_SSTORE_SET));
    }

    #[test]
    fn test_storage_roundtrip_within_path() {
        let (state, _, _, _) =
            run("0: PUSH1 0x2a\n2: PUSH1 0x01\n4: SSTORE\n5: PUSH1 0x01\n7: SLOAD");
        assert_eq!(state.stack, vec![Expr::word(42)]);
    }

    #[test]
    fn test_sha3_of_concrete_memory() {
        let (state, gas, _, _) =
            run("0: PUSH1 0x00\n2: PUSH1 0x00\n4: MSTORE\n5: PUSH1 0x20\n7: PUSH1 0x00\n9: SHA3");
        assert!(state.stack[0].is_concrete());
        assert_eq!(gas.as_constant(), Some(3 * 5 + GAS_SHA3 + GAS_SHA3_WORD));
    }

    #[test]
    fn test_symbolic_copy_size() {
        let (_, gas, _, _) =
            run("0: CALLDATASIZE\n1: PUSH1 0x00\n3: PUSH1 0x00\n5: CALLDATACOPY");
        assert_eq!(gas.constant, 2 + 3 + 3 + GAS_COPY);
        assert_eq!(gas.variables(), vec!["calldatasize".to_string()]);
    }

    #[test]
    fn test_exp_gas() {
        let (_, gas, _, _) = run("0: PUSH2 0x0100\n3: PUSH1 0x02\n5: EXP");
        assert_eq!(gas.as_constant(), Some(3 + 3 + GAS_EXP + 2 * GAS_EXP_BYTE));
        let (_, symbolic, _, _) = run("0: CALLER\n1: PUSH1 0x02\n3: EXP");
        assert_eq!(
            symbolic.as_constant(),
            Some(2 + 3 + GAS_EXP + 32 * GAS_EXP_BYTE)
        );
    }

    #[test]
    fn test_log_gas() {
        let (_, gas, _, _) =
            run("0: PUSH1 0x01\n2: PUSH1 0x40\n4: PUSH1 0x00\n6: LOG1");
        assert_eq!(
            gas.as_constant(),
            Some(9 + GAS_LOG + GAS_LOG_TOPIC + 64 * GAS_LOG_DATA)
        );
    }

    #[test]
    fn test_unmodeled_call() {
        let listing = (0..7)
            .map(|i| format!("{}: PUSH1 0x00", i * 2))
            .chain(std::iter::once("14: CALL".to_string()))
            .collect::<Vec<_>>()
            .join("\n");
        let (state, gas, control, registry) = run(&listing);
        assert_eq!(state.stack.len(), 1);
        assert_eq!(state.stack[0].var_name(), Some("unmodeled_call_14"));
        assert!(registry.contains("unmodeled_call_14"));
        assert_eq!(gas.as_constant(), Some(7 * 3 + GAS_CALL));
        assert_eq!(control, Control::Continue);
    }

    #[test]
    fn test_stack_underflow() {
        let mut registry = VariableRegistry::new();
        let mut interpreter = Interpreter::new(&mut registry);
        let state = SymbolicState::new();
        let err = interpreter
            .apply(&state, &Opcode::new(5, OP_ADD, None))
            .unwrap_err();
        assert!(matches!(err, GasboundException::StackUnderflow { pc: 5, .. }));
    }

    #[test]
    fn test_apply_leaves_input_untouched() {
        let mut registry = VariableRegistry::new();
        let mut interpreter = Interpreter::new(&mut registry);
        let state = SymbolicState::new();
        let push = Opcode::new(0, OP_PUSH1, Some(BigUint::from(1u8)));
        let transition = interpreter.apply(&state, &push).unwrap();
        assert!(state.stack.is_empty());
        assert_eq!(transition.state.stack, vec![Expr::word(1)]);
        assert_eq!(transition.gas.as_constant(), Some(GAS_VERYLOW));
    }

    #[test]
    fn test_calldata_names() {
        let (state, _, _, _) = run("0: PUSH1 0x04\n2: CALLDATALOAD");
        assert_eq!(state.stack[0].var_name(), Some("calldata_4"));
    }
}
