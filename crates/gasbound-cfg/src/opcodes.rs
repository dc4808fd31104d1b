// SPDX-License-Identifier: AGPL-3.0

//! EVM opcode table

use lazy_static::lazy_static;
use std::collections::HashMap;

pub const OP_STOP: u8 = 0x00;
pub const OP_ADD: u8 = 0x01;
pub const OP_MUL: u8 = 0x02;
pub const OP_SUB: u8 = 0x03;
pub const OP_DIV: u8 = 0x04;
pub const OP_SDIV: u8 = 0x05;
pub const OP_MOD: u8 = 0x06;
pub const OP_SMOD: u8 = 0x07;
pub const OP_ADDMOD: u8 = 0x08;
pub const OP_MULMOD: u8 = 0x09;
pub const OP_EXP: u8 = 0x0a;
pub const OP_SIGNEXTEND: u8 = 0x0b;
pub const OP_LT: u8 = 0x10;
pub const OP_GT: u8 = 0x11;
pub const OP_SLT: u8 = 0x12;
pub const OP_SGT: u8 = 0x13;
pub const OP_EQ: u8 = 0x14;
pub const OP_ISZERO: u8 = 0x15;
pub const OP_AND: u8 = 0x16;
pub const OP_OR: u8 = 0x17;
pub const OP_XOR: u8 = 0x18;
pub const OP_NOT: u8 = 0x19;
pub const OP_BYTE: u8 = 0x1a;
pub const OP_SHL: u8 = 0x1b;
pub const OP_SHR: u8 = 0x1c;
pub const OP_SAR: u8 = 0x1d;
pub const OP_SHA3: u8 = 0x20;
pub const OP_ADDRESS: u8 = 0x30;
pub const OP_BALANCE: u8 = 0x31;
pub const OP_ORIGIN: u8 = 0x32;
pub const OP_CALLER: u8 = 0x33;
pub const OP_CALLVALUE: u8 = 0x34;
pub const OP_CALLDATALOAD: u8 = 0x35;
pub const OP_CALLDATASIZE: u8 = 0x36;
pub const OP_CALLDATACOPY: u8 = 0x37;
pub const OP_CODESIZE: u8 = 0x38;
pub const OP_CODECOPY: u8 = 0x39;
pub const OP_GASPRICE: u8 = 0x3a;
pub const OP_EXTCODESIZE: u8 = 0x3b;
pub const OP_EXTCODECOPY: u8 = 0x3c;
pub const OP_RETURNDATASIZE: u8 = 0x3d;
pub const OP_RETURNDATACOPY: u8 = 0x3e;
pub const OP_EXTCODEHASH: u8 = 0x3f;
pub const OP_BLOCKHASH: u8 = 0x40;
pub const OP_COINBASE: u8 = 0x41;
pub const OP_TIMESTAMP: u8 = 0x42;
pub const OP_NUMBER: u8 = 0x43;
pub const OP_DIFFICULTY: u8 = 0x44;
pub const OP_GASLIMIT: u8 = 0x45;
pub const OP_CHAINID: u8 = 0x46;
pub const OP_SELFBALANCE: u8 = 0x47;
pub const OP_BASEFEE: u8 = 0x48;
pub const OP_POP: u8 = 0x50;
pub const OP_MLOAD: u8 = 0x51;
pub const OP_MSTORE: u8 = 0x52;
pub const OP_MSTORE8: u8 = 0x53;
pub const OP_SLOAD: u8 = 0x54;
pub const OP_SSTORE: u8 = 0x55;
pub const OP_JUMP: u8 = 0x56;
pub const OP_JUMPI: u8 = 0x57;
pub const OP_PC: u8 = 0x58;
pub const OP_MSIZE: u8 = 0x59;
pub const OP_GAS: u8 = 0x5a;
pub const OP_JUMPDEST: u8 = 0x5b;
pub const OP_PUSH0: u8 = 0x5f;
pub const OP_PUSH1: u8 = 0x60;
pub const OP_PUSH32: u8 = 0x7f;
pub const OP_DUP1: u8 = 0x80;
pub const OP_DUP16: u8 = 0x8f;
pub const OP_SWAP1: u8 = 0x90;
pub const OP_SWAP16: u8 = 0x9f;
pub const OP_LOG0: u8 = 0xa0;
pub const OP_LOG4: u8 = 0xa4;
pub const OP_CREATE: u8 = 0xf0;
pub const OP_CALL: u8 = 0xf1;
pub const OP_CALLCODE: u8 = 0xf2;
pub const OP_RETURN: u8 = 0xf3;
pub const OP_DELEGATECALL: u8 = 0xf4;
pub const OP_CREATE2: u8 = 0xf5;
pub const OP_STATICCALL: u8 = 0xfa;
pub const OP_REVERT: u8 = 0xfd;
pub const OP_INVALID: u8 = 0xfe;
pub const OP_SELFDESTRUCT: u8 = 0xff;

// Opcode groups
pub const HALTING_OPCODES: &[u8] = &[OP_STOP, OP_RETURN, OP_REVERT, OP_INVALID, OP_SELFDESTRUCT];

/// Returns the mnemonic for an opcode
pub fn mnemonic(opcode: u8) -> String {
    let name = match opcode {
        OP_STOP => "STOP",
        OP_ADD => "ADD",
        OP_MUL => "MUL",
        OP_SUB => "SUB",
        OP_DIV => "DIV",
        OP_SDIV => "SDIV",
        OP_MOD => "MOD",
        OP_SMOD => "SMOD",
        OP_ADDMOD => "ADDMOD",
        OP_MULMOD => "MULMOD",
        OP_EXP => "EXP",
        OP_SIGNEXTEND => "SIGNEXTEND",
        OP_LT => "LT",
        OP_GT => "GT",
        OP_SLT => "SLT",
        OP_SGT => "SGT",
        OP_EQ => "EQ",
        OP_ISZERO => "ISZERO",
        OP_AND => "AND",
        OP_OR => "OR",
        OP_XOR => "XOR",
        OP_NOT => "NOT",
        OP_BYTE => "BYTE",
        OP_SHL => "SHL",
        OP_SHR => "SHR",
        OP_SAR => "SAR",
        OP_SHA3 => "SHA3",
        OP_ADDRESS => "ADDRESS",
        OP_BALANCE => "BALANCE",
        OP_ORIGIN => "ORIGIN",
        OP_CALLER => "CALLER",
        OP_CALLVALUE => "CALLVALUE",
        OP_CALLDATALOAD => "CALLDATALOAD",
        OP_CALLDATASIZE => "CALLDATASIZE",
        OP_CALLDATACOPY => "CALLDATACOPY",
        OP_CODESIZE => "CODESIZE",
        OP_CODECOPY => "CODECOPY",
        OP_GASPRICE => "GASPRICE",
        OP_EXTCODESIZE => "EXTCODESIZE",
        OP_EXTCODECOPY => "EXTCODECOPY",
        OP_RETURNDATASIZE => "RETURNDATASIZE",
        OP_RETURNDATACOPY => "RETURNDATACOPY",
        OP_EXTCODEHASH => "EXTCODEHASH",
        OP_BLOCKHASH => "BLOCKHASH",
        OP_COINBASE => "COINBASE",
        OP_TIMESTAMP => "TIMESTAMP",
        OP_NUMBER => "NUMBER",
        OP_DIFFICULTY => "DIFFICULTY",
        OP_GASLIMIT => "GASLIMIT",
        OP_CHAINID => "CHAINID",
        OP_SELFBALANCE => "SELFBALANCE",
        OP_BASEFEE => "BASEFEE",
        OP_POP => "POP",
        OP_MLOAD => "MLOAD",
        OP_MSTORE => "MSTORE",
        OP_MSTORE8 => "MSTORE8",
        OP_SLOAD => "SLOAD",
        OP_SSTORE => "SSTORE",
        OP_JUMP => "JUMP",
        OP_JUMPI => "JUMPI",
        OP_PC => "PC",
        OP_MSIZE => "MSIZE",
        OP_GAS => "GAS",
        OP_JUMPDEST => "JUMPDEST",
        OP_PUSH0 => "PUSH0",
        OP_PUSH1..=OP_PUSH32 => return format!("PUSH{}", opcode - OP_PUSH0),
        OP_DUP1..=OP_DUP16 => return format!("DUP{}", opcode - OP_DUP1 + 1),
        OP_SWAP1..=OP_SWAP16 => return format!("SWAP{}", opcode - OP_SWAP1 + 1),
        OP_LOG0..=OP_LOG4 => return format!("LOG{}", opcode - OP_LOG0),
        OP_CREATE => "CREATE",
        OP_CALL => "CALL",
        OP_CALLCODE => "CALLCODE",
        OP_RETURN => "RETURN",
        OP_DELEGATECALL => "DELEGATECALL",
        OP_CREATE2 => "CREATE2",
        OP_STATICCALL => "STATICCALL",
        OP_REVERT => "REVERT",
        OP_INVALID => "INVALID",
        OP_SELFDESTRUCT => "SELFDESTRUCT",
        _ => return format!("UNKNOWN_0x{:02x}", opcode),
    };
    name.to_string()
}

lazy_static! {
    static ref MNEMONIC_TO_OPCODE: HashMap<String, u8> = {
        let mut table = HashMap::new();
        for opcode in 0..=u8::MAX {
            let name = mnemonic(opcode);
            if !name.starts_with("UNKNOWN") {
                table.insert(name, opcode);
            }
        }
        // Aliases emitted by newer compilers
        table.insert("KECCAK256".to_string(), OP_SHA3);
        table.insert("PREVRANDAO".to_string(), OP_DIFFICULTY);
        table
    };
}

/// Reverse of [`mnemonic`]; also accepts `KECCAK256` and `PREVRANDAO`
pub fn opcode_from_mnemonic(name: &str) -> Option<u8> {
    MNEMONIC_TO_OPCODE.get(&name.to_ascii_uppercase()).copied()
}

pub fn is_known(opcode: u8) -> bool {
    !mnemonic(opcode).starts_with("UNKNOWN")
}

pub fn is_push(opcode: u8) -> bool {
    (OP_PUSH0..=OP_PUSH32).contains(&opcode)
}

/// Number of immediate bytes following the opcode
pub fn push_size(opcode: u8) -> usize {
    if (OP_PUSH1..=OP_PUSH32).contains(&opcode) {
        (opcode - OP_PUSH0) as usize
    } else {
        0
    }
}

/// Returns the length of an instruction with the given opcode
pub fn insn_len(opcode: u8) -> usize {
    1 + push_size(opcode)
}

pub fn is_halting(opcode: u8) -> bool {
    HALTING_OPCODES.contains(&opcode) || !is_known(opcode)
}

/// Whether the opcode ends a basic block
pub fn ends_block(opcode: u8) -> bool {
    opcode == OP_JUMP || opcode == OP_JUMPI || is_halting(opcode)
}

/// Stack items consumed and produced
pub fn stack_arity(opcode: u8) -> (usize, usize) {
    match opcode {
        OP_STOP | OP_JUMPDEST | OP_INVALID => (0, 0),
        OP_ADD | OP_MUL | OP_SUB | OP_DIV | OP_SDIV | OP_MOD | OP_SMOD | OP_EXP
        | OP_SIGNEXTEND | OP_LT | OP_GT | OP_SLT | OP_SGT | OP_EQ | OP_AND | OP_OR | OP_XOR
        | OP_BYTE | OP_SHL | OP_SHR | OP_SAR | OP_SHA3 => (2, 1),
        OP_ADDMOD | OP_MULMOD => (3, 1),
        OP_ISZERO | OP_NOT | OP_BALANCE | OP_CALLDATALOAD | OP_EXTCODESIZE | OP_EXTCODEHASH
        | OP_BLOCKHASH | OP_MLOAD | OP_SLOAD => (1, 1),
        OP_ADDRESS | OP_ORIGIN | OP_CALLER | OP_CALLVALUE | OP_CALLDATASIZE | OP_CODESIZE
        | OP_GASPRICE | OP_RETURNDATASIZE | OP_COINBASE | OP_TIMESTAMP | OP_NUMBER
        | OP_DIFFICULTY | OP_GASLIMIT | OP_CHAINID | OP_SELFBALANCE | OP_BASEFEE | OP_PC
        | OP_MSIZE | OP_GAS => (0, 1),
        OP_CALLDATACOPY | OP_CODECOPY | OP_RETURNDATACOPY => (3, 0),
        OP_EXTCODECOPY => (4, 0),
        OP_POP | OP_JUMP | OP_SELFDESTRUCT => (1, 0),
        OP_MSTORE | OP_MSTORE8 | OP_SSTORE | OP_JUMPI | OP_RETURN | OP_REVERT => (2, 0),
        OP_PUSH0..=OP_PUSH32 => (0, 1),
        OP_DUP1..=OP_DUP16 => {
            let n = (opcode - OP_DUP1 + 1) as usize;
            (n, n + 1)
        }
        OP_SWAP1..=OP_SWAP16 => {
            let n = (opcode - OP_SWAP1 + 2) as usize;
            (n, n)
        }
        OP_LOG0..=OP_LOG4 => (2 + (opcode - OP_LOG0) as usize, 0),
        OP_CREATE => (3, 1),
        OP_CREATE2 => (4, 1),
        OP_CALL | OP_CALLCODE => (7, 1),
        OP_DELEGATECALL | OP_STATICCALL => (6, 1),
        _ => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insn_len() {
        assert_eq!(insn_len(OP_STOP), 1);
        assert_eq!(insn_len(OP_PUSH0), 1);
        assert_eq!(insn_len(OP_PUSH1), 2);
        assert_eq!(insn_len(OP_PUSH32), 33);
    }

    #[test]
    fn test_mnemonic_roundtrip() {
        for opcode in 0..=u8::MAX {
            if is_known(opcode) {
                assert_eq!(opcode_from_mnemonic(&mnemonic(opcode)), Some(opcode));
            }
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!(opcode_from_mnemonic("KECCAK256"), Some(OP_SHA3));
        assert_eq!(opcode_from_mnemonic("push2"), Some(OP_PUSH1 + 1));
        assert_eq!(opcode_from_mnemonic("BOGUS"), None);
    }

    #[test]
    fn test_stack_arity() {
        assert_eq!(stack_arity(OP_ADD), (2, 1));
        assert_eq!(stack_arity(OP_DUP1), (1, 2));
        assert_eq!(stack_arity(OP_SWAP1), (2, 2));
        assert_eq!(stack_arity(OP_LOG0 + 2), (4, 0));
        assert_eq!(stack_arity(OP_CALL), (7, 1));
    }

    #[test]
    fn test_block_enders() {
        assert!(ends_block(OP_JUMP));
        assert!(ends_block(OP_JUMPI));
        assert!(ends_block(OP_REVERT));
        assert!(ends_block(0x0c));
        assert!(!ends_block(OP_JUMPDEST));
        assert!(!ends_block(OP_ADD));
    }
}
