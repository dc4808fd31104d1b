// SPDX-License-Identifier: AGPL-3.0

//! Basic blocks and the control-flow graph
//!
//! A block starts at offset 0, at every `JUMPDEST`, and right after every
//! block-ending instruction. Its tag is its start offset. Static jump edges
//! are recovered when a `PUSHn` immediately precedes `JUMP`/`JUMPI` and
//! names a `JUMPDEST` block; targets computed at run time are left to the
//! explorer.

use gasbound_exceptions::{GasboundException, GasboundResult};
use indexmap::{IndexMap, IndexSet};
use num_traits::ToPrimitive;
use serde::Serialize;
use std::fmt;

use crate::listing::Opcode;
use crate::opcodes::{ends_block, is_halting, is_push, OP_JUMP, OP_JUMPDEST, OP_JUMPI};

/// Basic block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub tag: usize,
    pub opcodes: Vec<Opcode>,
    /// Statically known jump target, for blocks ending in `JUMP`/`JUMPI`
    pub jump_target: Option<usize>,
    /// Next block in program order, when control can fall into it
    pub fallthrough: Option<usize>,
}

impl Node {
    pub fn new(tag: usize, opcodes: Vec<Opcode>) -> Self {
        Self {
            tag,
            opcodes,
            jump_target: None,
            fallthrough: None,
        }
    }

    pub fn last_op(&self) -> Option<u8> {
        self.opcodes.last().map(|o| o.op)
    }

    pub fn is_jumpdest(&self) -> bool {
        self.opcodes.first().is_some_and(|o| o.op == OP_JUMPDEST)
    }

    pub fn ends_with_jumpi(&self) -> bool {
        self.last_op() == Some(OP_JUMPI)
    }

    /// Jump target first, then fall-through
    pub fn successors(&self) -> Vec<usize> {
        let mut successors = Vec::with_capacity(2);
        if let Some(target) = self.jump_target {
            successors.push(target);
        }
        if let Some(next) = self.fallthrough {
            if !successors.contains(&next) {
                successors.push(next);
            }
        }
        successors
    }
}

/// Node, edge and instruction counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CfgSummary {
    pub nodes: usize,
    pub edges: usize,
    pub instructions: usize,
}

impl fmt::Display for CfgSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} edges, {} instructions",
            self.nodes, self.edges, self.instructions
        )
    }
}

/// Control-flow graph keyed by node tag
#[derive(Debug, Clone, Default)]
pub struct Cfg {
    nodes: IndexMap<usize, Node>,
    jumpdests: IndexSet<usize>,
}

impl Cfg {
    /// Assemble a graph from ready-made nodes. Edges are taken from each
    /// node's `jump_target` and `fallthrough`; both must name existing tags.
    pub fn new(nodes: Vec<Node>) -> GasboundResult<Self> {
        let mut map = IndexMap::with_capacity(nodes.len());
        for node in nodes {
            let tag = node.tag;
            if map.insert(tag, node).is_some() {
                return Err(GasboundException::Internal(format!(
                    "duplicate node tag {}",
                    tag
                )));
            }
        }
        for node in map.values() {
            for successor in node.successors() {
                if !map.contains_key(&successor) {
                    return Err(GasboundException::Internal(format!(
                        "edge {} -> {} leads to a missing node",
                        node.tag, successor
                    )));
                }
            }
        }
        let jumpdests = map
            .values()
            .filter(|n| n.is_jumpdest())
            .map(|n| n.tag)
            .collect();
        Ok(Self {
            nodes: map,
            jumpdests,
        })
    }

    /// Split opcodes into basic blocks and recover static edges
    pub fn from_opcodes(opcodes: &[Opcode]) -> GasboundResult<Self> {
        if opcodes.is_empty() {
            return Err(GasboundException::Parse {
                line: 0,
                message: "empty opcode listing".to_string(),
            });
        }

        let mut blocks: Vec<Vec<Opcode>> = Vec::new();
        let mut current: Vec<Opcode> = Vec::new();
        for opcode in opcodes {
            if opcode.op == OP_JUMPDEST && !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            current.push(opcode.clone());
            if ends_block(opcode.op) {
                blocks.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            blocks.push(current);
        }

        let jumpdests: IndexSet<usize> = blocks
            .iter()
            .filter(|b| b[0].op == OP_JUMPDEST)
            .map(|b| b[0].pc)
            .collect();

        let starts: Vec<usize> = blocks.iter().map(|b| b[0].pc).collect();
        let mut nodes = IndexMap::with_capacity(blocks.len());
        for (index, block) in blocks.into_iter().enumerate() {
            let tag = block[0].pc;
            let mut node = Node::new(tag, block);
            let last = node.opcodes[node.opcodes.len() - 1].op;

            if last == OP_JUMP || last == OP_JUMPI {
                node.jump_target = static_jump_target(&node.opcodes)
                    .filter(|target| jumpdests.contains(target));
            }
            if last != OP_JUMP && !is_halting(last) {
                node.fallthrough = starts.get(index + 1).copied();
            }
            nodes.insert(tag, node);
        }

        Ok(Self { nodes, jumpdests })
    }

    pub fn entry(&self) -> Option<usize> {
        self.nodes.keys().next().copied()
    }

    pub fn node(&self, tag: usize) -> Option<&Node> {
        self.nodes.get(&tag)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn is_jumpdest(&self, target: usize) -> bool {
        self.jumpdests.contains(&target)
    }

    pub fn edges(&self) -> Vec<(usize, usize)> {
        self.nodes
            .values()
            .flat_map(|n| n.successors().into_iter().map(move |s| (n.tag, s)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn summary(&self) -> CfgSummary {
        CfgSummary {
            nodes: self.nodes.len(),
            edges: self.edges().len(),
            instructions: self.nodes.values().map(|n| n.opcodes.len()).sum(),
        }
    }
}

/// Target pushed by the instruction right before a trailing jump
fn static_jump_target(opcodes: &[Opcode]) -> Option<usize> {
    if opcodes.len() < 2 {
        return None;
    }
    let push = &opcodes[opcodes.len() - 2];
    if !is_push(push.op) {
        return None;
    }
    push.operand.as_ref().and_then(|v| v.to_usize())
}
