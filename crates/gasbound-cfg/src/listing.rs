// SPDX-License-Identifier: AGPL-3.0

//! Opcode listings
//!
//! Three front ends produce the same [`Opcode`] sequence: the textual
//! `<offset>: <MNEMONIC> [<operand>]` listing, the whitespace-separated
//! token stream printed by `solc --opcodes`, and raw runtime bytecode.

use gasbound_constants::LISTING_OFFSET_WIDTH;
use gasbound_exceptions::{GasboundException, GasboundResult};
use lazy_static::lazy_static;
use num_bigint::BigUint;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::opcodes::{
    insn_len, is_known, mnemonic, opcode_from_mnemonic, push_size, OP_INVALID, OP_JUMP,
    OP_STOP,
};

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Opcode {
    pub pc: usize,
    pub op: u8,
    #[serde(serialize_with = "serialize_operand")]
    pub operand: Option<BigUint>,
}

fn serialize_operand<S: serde::Serializer>(
    operand: &Option<BigUint>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match operand {
        Some(value) => serializer.serialize_some(&format!("0x{:x}", value)),
        None => serializer.serialize_none(),
    }
}

impl Opcode {
    pub fn new(pc: usize, op: u8, operand: Option<BigUint>) -> Self {
        Self { pc, op, operand }
    }

    pub fn mnemonic(&self) -> String {
        mnemonic(self.op)
    }

    /// Offset of the following instruction
    pub fn next_pc(&self) -> usize {
        self.pc + insn_len(self.op)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0width$}: {}",
            self.pc,
            self.mnemonic(),
            width = LISTING_OFFSET_WIDTH
        )?;
        if let Some(operand) = &self.operand {
            write!(f, " 0x{:x}", operand)?;
        }
        Ok(())
    }
}

lazy_static! {
    static ref LISTING_LINE: Regex =
        Regex::new(r"^\s*(\d+)\s*:\s*([A-Za-z][A-Za-z0-9]*)(?:\s+(?:0x)?([0-9a-fA-F]+))?\s*$")
            .expect("listing regex is valid");
}

fn parse_hex_operand(digits: &str) -> Option<BigUint> {
    BigUint::parse_bytes(digits.as_bytes(), 16)
}

/// Parse a `<offset>: <MNEMONIC> [<hex operand>]` listing
pub fn parse_listing(text: &str) -> GasboundResult<Vec<Opcode>> {
    let mut opcodes = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let parse_error = |message: String| GasboundException::Parse {
            line: line_no,
            message,
        };

        let captures = LISTING_LINE
            .captures(line)
            .ok_or_else(|| parse_error(format!("malformed line {:?}", line.trim())))?;

        let pc: usize = captures[1]
            .parse()
            .map_err(|e| parse_error(format!("bad offset: {}", e)))?;
        let name = &captures[2];
        let op = opcode_from_mnemonic(name)
            .ok_or_else(|| parse_error(format!("unknown mnemonic {}", name)))?;

        let operand = match (captures.get(3), push_size(op)) {
            (Some(digits), n) if n > 0 => Some(
                parse_hex_operand(digits.as_str())
                    .ok_or_else(|| parse_error(format!("bad operand {}", digits.as_str())))?,
            ),
            (None, n) if n > 0 => return Err(parse_error(format!("{} needs an operand", name))),
            (Some(digits), _) => {
                return Err(parse_error(format!(
                    "{} takes no operand, got {}",
                    name,
                    digits.as_str()
                )))
            }
            (None, _) => None,
        };

        opcodes.push(Opcode::new(pc, op, operand));
    }

    Ok(opcodes)
}

/// Canonical listing text, one instruction per line
pub fn render_listing(opcodes: &[Opcode]) -> String {
    opcodes
        .iter()
        .map(|op| op.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert `solc --opcodes` output into opcodes.
///
/// Skips the constructor by starting at the second `PUSH1 0x80` when
/// there is one, and stops at a `STOP` that directly follows a `JUMP`,
/// which marks the end of the runtime code before the metadata.
pub fn normalize_solc_opcodes(raw: &str) -> GasboundResult<Vec<Opcode>> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();

    let is_free_memory_pointer =
        |i: usize| tokens[i] == "PUSH1" && tokens.get(i + 1).is_some_and(|t| *t == "0x80");
    let start = (1..tokens.len())
        .find(|&i| is_free_memory_pointer(i))
        .unwrap_or(0);

    let mut opcodes = Vec::new();
    let mut pc = 0usize;
    let mut previous: Option<u8> = None;
    let mut index = start;

    while index < tokens.len() {
        let token = tokens[index];
        let op = match opcode_from_mnemonic(token) {
            Some(op) => op,
            None => match token.strip_prefix("0x").and_then(|h| u8::from_str_radix(h, 16).ok()) {
                Some(byte) => byte,
                None => {
                    tracing::debug!("treating unknown solc token {:?} as INVALID", token);
                    OP_INVALID
                }
            },
        };
        index += 1;

        let operand = if push_size(op) > 0 {
            let digits = tokens.get(index).ok_or_else(|| GasboundException::Parse {
                line: 1,
                message: format!("{} at pc {} has no operand", token, pc),
            })?;
            index += 1;
            let value = parse_hex_operand(digits.trim_start_matches("0x")).ok_or_else(|| {
                GasboundException::Parse {
                    line: 1,
                    message: format!("bad operand {} at pc {}", digits, pc),
                }
            })?;
            Some(value)
        } else {
            None
        };

        opcodes.push(Opcode::new(pc, op, operand));
        pc += insn_len(op);

        if op == OP_STOP && previous == Some(OP_JUMP) {
            break;
        }
        previous = Some(op);
    }

    Ok(opcodes)
}

/// Decode raw runtime bytecode. A PUSH cut short by the end of the code
/// is zero-padded on the right.
pub fn disassemble(hexcode: &str) -> GasboundResult<Vec<Opcode>> {
    let stripped = hexcode.trim();
    let stripped = stripped.strip_prefix("0x").unwrap_or(stripped);
    let bytes = hex::decode(stripped).map_err(|e| GasboundException::Parse {
        line: 1,
        message: format!("invalid hex: {}", e),
    })?;

    let mut opcodes = Vec::new();
    let mut pc = 0;
    while pc < bytes.len() {
        let op = bytes[pc];
        let size = push_size(op);
        let operand = if size > 0 {
            let mut immediate = vec![0u8; size];
            let available = &bytes[(pc + 1).min(bytes.len())..(pc + 1 + size).min(bytes.len())];
            immediate[..available.len()].copy_from_slice(available);
            Some(BigUint::from_bytes_be(&immediate))
        } else {
            None
        };
        if !is_known(op) {
            tracing::trace!("undefined opcode 0x{:02x} at pc {}", op, pc);
        }
        opcodes.push(Opcode::new(pc, op, operand));
        pc += insn_len(op);
    }

    Ok(opcodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::{OP_ADD, OP_JUMPDEST, OP_PUSH1, OP_PUSH0};

    #[test]
    fn test_parse_listing() {
        let text = "000000: PUSH1 0x80\n000002: PUSH1 0x40\n\n000004: MSTORE\n";
        let opcodes = parse_listing(text).unwrap();
        assert_eq!(opcodes.len(), 3);
        assert_eq!(opcodes[0].op, OP_PUSH1);
        assert_eq!(opcodes[0].operand, Some(BigUint::from(0x80u32)));
        assert_eq!(opcodes[2].pc, 4);
        assert_eq!(opcodes[2].operand, None);
    }

    #[test]
    fn test_parse_listing_errors() {
        let err = parse_listing("000000: PUSH1 0x80\n000002: FROB\n").unwrap_err();
        assert!(matches!(err, GasboundException::Parse { line: 2, .. }));

        let err = parse_listing("000000: PUSH2\n").unwrap_err();
        assert!(err.to_string().contains("needs an operand"));

        let err = parse_listing("000000: ADD 0x01\n").unwrap_err();
        assert!(err.to_string().contains("takes no operand"));

        assert!(parse_listing("garbage").is_err());
    }

    #[test]
    fn test_render_listing() {
        let opcodes = vec![
            Opcode::new(0, OP_PUSH1, Some(BigUint::from(0x0au32))),
            Opcode::new(2, OP_JUMPDEST, None),
            Opcode::new(3, OP_PUSH0, None),
        ];
        let text = render_listing(&opcodes);
        assert_eq!(text, "000000: PUSH1 0xa\n000002: JUMPDEST\n000003: PUSH0");
        assert_eq!(parse_listing(&text).unwrap(), opcodes);
    }

    #[test]
    fn test_normalize_solc_opcodes() {
        let raw = "PUSH1 0x80 PUSH1 0x40 MSTORE CODECOPY RETURN INVALID \
                   PUSH1 0x80 PUSH1 0x40 MSTORE PUSH1 0x0a JUMP STOP LOG1 PUSH6 0x627a7a723058";
        let opcodes = normalize_solc_opcodes(raw).unwrap();
        let rendered: Vec<String> = opcodes.iter().map(|o| o.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "000000: PUSH1 0x80",
                "000002: PUSH1 0x40",
                "000004: MSTORE",
                "000005: PUSH1 0xa",
                "000007: JUMP",
                "000008: STOP",
            ]
        );
    }

    #[test]
    fn test_normalize_without_constructor() {
        let opcodes = normalize_solc_opcodes("PUSH1 0x01 PUSH1 0x02 ADD").unwrap();
        assert_eq!(opcodes.len(), 3);
        assert_eq!(opcodes[2].op, OP_ADD);
        assert_eq!(opcodes[2].pc, 4);
    }

    #[test]
    fn test_disassemble() {
        let opcodes = disassemble("0x6001600201").unwrap();
        assert_eq!(opcodes.len(), 3);
        assert_eq!(opcodes[1].operand, Some(BigUint::from(2u8)));
        assert_eq!(opcodes[2].op, OP_ADD);
        assert_eq!(opcodes[2].pc, 4);
    }

    #[test]
    fn test_disassemble_truncated_push() {
        let opcodes = disassemble("61ff").unwrap();
        assert_eq!(opcodes.len(), 1);
        assert_eq!(opcodes[0].operand, Some(BigUint::from(0xff00u32)));
        assert!(disassemble("zz").is_err());
    }
}
