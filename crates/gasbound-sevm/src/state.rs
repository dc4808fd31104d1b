// SPDX-License-Identifier: AGPL-3.0

//! Symbolic machine state
//!
//! Stack, memory and storage hold [`Expr`] values. Memory is word-addressed
//! by the address expression itself: two accesses hit the same cell only
//! when their address expressions are structurally equal.

use gasbound_cfg::Opcode;
use gasbound_constants::{MAX_STACK_DEPTH, WORD_SIZE};
use gasbound_exceptions::{GasboundException, GasboundResult};
use gasbound_expr::eval::{negate, normalize};
use gasbound_expr::{BinaryOp, Expr, VariableRegistry};
use indexmap::IndexMap;
use num_bigint::BigUint;
use num_traits::Zero;
use std::fmt;

/// Stable name suffix for a value used as a key: the decimal value when
/// concrete, the structural hash otherwise.
pub fn key_suffix(key: &Expr) -> String {
    match key.as_word() {
        Some(value) => value.to_string(),
        None => format!("{:016x}", key.hash_value()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolicState {
    pub stack: Vec<Expr>,
    pub memory: IndexMap<Expr, Expr>,
    pub storage: IndexMap<Expr, Expr>,
}

impl SymbolicState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `StackUnderflow` unless `needed` items are available
    pub fn require(&self, needed: usize, opcode: &Opcode) -> GasboundResult<()> {
        if self.stack.len() < needed {
            return Err(GasboundException::StackUnderflow {
                pc: opcode.pc,
                mnemonic: opcode.mnemonic(),
                needed,
                available: self.stack.len(),
            });
        }
        Ok(())
    }

    pub fn push(&mut self, value: Expr, pc: usize) -> GasboundResult<()> {
        if self.stack.len() >= MAX_STACK_DEPTH {
            return Err(GasboundException::StackOverflow(pc));
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self, opcode: &Opcode) -> GasboundResult<Expr> {
        self.require(1, opcode)?;
        self.stack
            .pop()
            .ok_or_else(|| GasboundException::Internal("stack emptied after check".to_string()))
    }

    /// Pop `n` items, top of stack first
    pub fn pop_n(&mut self, n: usize, opcode: &Opcode) -> GasboundResult<Vec<Expr>> {
        self.require(n, opcode)?;
        let at = self.stack.len() - n;
        let mut items = self.stack.split_off(at);
        items.reverse();
        Ok(items)
    }

    /// `DUPn`: copy the n-th item (1-based from the top)
    pub fn dup(&mut self, n: usize, opcode: &Opcode) -> GasboundResult<()> {
        self.require(n, opcode)?;
        let value = self.stack[self.stack.len() - n].clone();
        self.push(value, opcode.pc)
    }

    /// `SWAPn`: exchange the top with the (n+1)-th item
    pub fn swap(&mut self, n: usize, opcode: &Opcode) -> GasboundResult<()> {
        self.require(n + 1, opcode)?;
        let top = self.stack.len() - 1;
        self.stack.swap(top, top - n);
        Ok(())
    }

    /// Word at `address`. Untouched concrete cells read zero; untouched
    /// symbolic cells read a named unknown.
    pub fn mload(&self, address: &Expr, registry: &mut VariableRegistry) -> Expr {
        if let Some(value) = self.memory.get(address) {
            return value.clone();
        }
        if address.is_concrete() {
            Expr::word(0)
        } else {
            registry.var(&format!("mem_{}", key_suffix(address)))
        }
    }

    pub fn mstore(&mut self, address: Expr, value: Expr) {
        self.memory.insert(address, value);
    }

    /// Single-byte store, modeled as a word whose top byte is `value`
    pub fn mstore8(&mut self, address: Expr, value: Expr) {
        let byte = Expr::binary(BinaryOp::And, value, Expr::word(0xff));
        let word = Expr::binary(BinaryOp::Shl, Expr::word(248), byte);
        self.memory.insert(address, word);
    }

    pub fn sload(&self, key: &Expr, registry: &mut VariableRegistry) -> Expr {
        match self.storage.get(key) {
            Some(value) => value.clone(),
            None => registry.var(&format!("storage_{}", key_suffix(key))),
        }
    }

    pub fn sstore(&mut self, key: Expr, value: Expr) {
        self.storage.insert(key, value);
    }

    /// State at a loop header after `counter` completed iterations.
    ///
    /// `self` is the state after the second header occurrence and `first`
    /// the one after the first. Cells advancing by a constant stride become
    /// `first + stride * counter`; other changed cells become named
    /// unknowns tied to the header tag.
    pub fn widen(
        &self,
        first: &SymbolicState,
        counter: &Expr,
        tag: usize,
        registry: &mut VariableRegistry,
    ) -> SymbolicState {
        let mut widened = self.clone();

        for (index, value) in widened.stack.iter_mut().enumerate() {
            if let Some(before) = first.stack.get(index) {
                *value = widen_value(before, value, counter, registry, || {
                    format!("loop_{}_stack_{}", tag, index)
                });
            }
        }
        for (address, value) in widened.memory.iter_mut() {
            if let Some(before) = first.memory.get(address) {
                *value = widen_value(before, value, counter, registry, || {
                    format!("loop_{}_mem_{}", tag, key_suffix(address))
                });
            }
        }
        for (key, value) in widened.storage.iter_mut() {
            if let Some(before) = first.storage.get(key) {
                *value = widen_value(before, value, counter, registry, || {
                    format!("loop_{}_storage_{}", tag, key_suffix(key))
                });
            }
        }
        widened
    }
}

fn widen_value(
    before: &Expr,
    after: &Expr,
    counter: &Expr,
    registry: &mut VariableRegistry,
    name: impl FnOnce() -> String,
) -> Expr {
    if before == after {
        return after.clone();
    }
    let (base_before, offset_before) = before.linear_form();
    let (base_after, offset_after) = after.linear_form();
    if base_before == base_after {
        let stride = normalize(offset_after + negate(&offset_before));
        if !stride.is_zero() {
            let step = Expr::binary(BinaryOp::Mul, counter.clone(), Expr::from_biguint(stride));
            return Expr::binary(BinaryOp::Add, before.clone(), step);
        }
    }
    registry.var(&name())
}

impl fmt::Display for SymbolicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack: [")?;
        for (i, item) in self.stack.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        writeln!(f, "]")?;
        writeln!(f, "memory:")?;
        for (address, value) in &self.memory {
            writeln!(f, "    [{}] = {}", address, value)?;
        }
        writeln!(f, "storage:")?;
        for (key, value) in &self.storage {
            writeln!(f, "    [{}] = {}", key, value)?;
        }
        Ok(())
    }
}

/// Words of memory covered by `[offset, offset + size)` when both are
/// concrete and the range is word aligned in length.
pub fn concrete_word_range(offset: &Expr, size: &Expr) -> Option<Vec<Expr>> {
    let start = offset.as_word()?;
    let size = size.as_usize()?;
    if size % WORD_SIZE != 0 {
        return None;
    }
    Some(
        (0..size / WORD_SIZE)
            .map(|i| Expr::from_biguint(start + BigUint::from(i * WORD_SIZE)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gasbound_cfg::opcodes::{OP_ADD, OP_DUP1, OP_SWAP1};

    fn op(code: u8) -> Opcode {
        Opcode::new(7, code, None)
    }

    #[test]
    fn test_pop_n_order_and_underflow() {
        let mut state = SymbolicState::new();
        state.push(Expr::word(1), 0).unwrap();
        state.push(Expr::word(2), 0).unwrap();
        let items = state.pop_n(2, &op(OP_ADD)).unwrap();
        assert_eq!(items, vec![Expr::word(2), Expr::word(1)]);

        let err = state.pop_n(2, &op(OP_ADD)).unwrap_err();
        assert_eq!(
            err,
            GasboundException::StackUnderflow {
                pc: 7,
                mnemonic: "ADD".to_string(),
                needed: 2,
                available: 0,
            }
        );
    }

    #[test]
    fn test_dup_swap() {
        let mut state = SymbolicState::new();
        state.push(Expr::word(1), 0).unwrap();
        state.push(Expr::word(2), 0).unwrap();
        state.dup(2, &op(OP_DUP1 + 1)).unwrap();
        assert_eq!(state.stack, vec![Expr::word(1), Expr::word(2), Expr::word(1)]);
        state.swap(2, &op(OP_SWAP1 + 1)).unwrap();
        assert_eq!(state.stack, vec![Expr::word(1), Expr::word(2), Expr::word(1)]);
        state.swap(1, &op(OP_SWAP1)).unwrap();
        assert_eq!(state.stack, vec![Expr::word(1), Expr::word(1), Expr::word(2)]);
    }

    #[test]
    fn test_stack_overflow() {
        let mut state = SymbolicState::new();
        for _ in 0..MAX_STACK_DEPTH {
            state.push(Expr::word(0), 3).unwrap();
        }
        assert_eq!(
            state.push(Expr::word(0), 3),
            Err(GasboundException::StackOverflow(3))
        );
    }

    #[test]
    fn test_memory_defaults() {
        let mut registry = VariableRegistry::new();
        let mut state = SymbolicState::new();
        assert_eq!(state.mload(&Expr::word(64), &mut registry), Expr::word(0));

        let x = registry.var("x");
        let unknown = state.mload(&x, &mut registry);
        assert!(unknown.var_name().unwrap().starts_with("mem_"));
        assert!(unknown.ptr_eq(&state.mload(&x, &mut registry)));

        state.mstore(x.clone(), Expr::word(5));
        assert_eq!(state.mload(&x, &mut registry), Expr::word(5));
    }

    #[test]
    fn test_mstore8_top_byte() {
        let mut registry = VariableRegistry::new();
        let mut state = SymbolicState::new();
        state.mstore8(Expr::word(0), Expr::word(0x1ff));
        let word = state.mload(&Expr::word(0), &mut registry);
        assert_eq!(word, Expr::from_biguint(BigUint::from(0xffu32) << 248));
    }

    #[test]
    fn test_storage_names() {
        let mut registry = VariableRegistry::new();
        let mut state = SymbolicState::new();
        let slot = state.sload(&Expr::word(3), &mut registry);
        assert_eq!(slot.var_name(), Some("storage_3"));
        state.sstore(Expr::word(3), Expr::word(9));
        assert_eq!(state.sload(&Expr::word(3), &mut registry), Expr::word(9));
    }

    #[test]
    fn test_widen_linear_and_unknown() {
        let mut registry = VariableRegistry::new();
        let counter = registry.var("loop_2");
        let n = registry.var("n");

        let mut first = SymbolicState::new();
        first.stack = vec![Expr::word(0), n.clone(), Expr::word(7)];
        let mut second = SymbolicState::new();
        second.stack = vec![Expr::word(1), n.clone(), Expr::word(3)];

        let widened = second.widen(&first, &counter, 2, &mut registry);
        assert_eq!(widened.stack[0], counter);
        assert_eq!(widened.stack[1], n);
        // 7 -> 3 is a constant stride modulo 2^256
        let at_one = widened.stack[2].substitute(&|name: &str| {
            (name == "loop_2").then(|| Expr::word(1))
        });
        assert_eq!(at_one, Expr::word(3));
    }

    #[test]
    fn test_widen_nonlinear_becomes_named_unknown() {
        let mut registry = VariableRegistry::new();
        let counter = registry.var("loop_5");
        let x = registry.var("x");

        let mut first = SymbolicState::new();
        first.stack = vec![x.clone()];
        let mut second = SymbolicState::new();
        second.stack = vec![Expr::binary(BinaryOp::Mul, x, Expr::word(2))];

        let widened = second.widen(&first, &counter, 5, &mut registry);
        assert_eq!(widened.stack[0].var_name(), Some("loop_5_stack_0"));
    }

    #[test]
    fn test_concrete_word_range() {
        let words = concrete_word_range(&Expr::word(32), &Expr::word(64)).unwrap();
        assert_eq!(words, vec![Expr::word(32), Expr::word(64)]);
        assert!(concrete_word_range(&Expr::word(0), &Expr::word(33)).is_none());
    }
}
