// SPDX-License-Identifier: AGPL-3.0

//! Opcode decoding and control-flow graph construction

pub mod graph;
pub mod listing;
pub mod opcodes;

pub use graph::{Cfg, CfgSummary, Node};
pub use listing::{disassemble, normalize_solc_opcodes, parse_listing, render_listing, Opcode};
