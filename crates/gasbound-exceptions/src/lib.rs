// SPDX-License-Identifier: AGPL-3.0

//! Gas analysis exceptions
//!
//! Failures raised while exploring paths, synthesizing loop formulas and
//! driving the solver. Most of them only end the current path; see
//! [`GasboundException::is_path_local`].

use thiserror::Error;

/// Reasons a loop could not be summarized by a closed-form formula
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopSynthesisError {
    /// Snapshots of the same loop header compare with different operators
    #[error("Operators are not the same across iterations: {first} vs {other}")]
    OperatorMismatch { first: String, other: String },

    /// Neither operand follows a recognizable progression
    #[error("Unrecognized loop guard shape: {0}")]
    UnrecognizedShape(String),

    /// The varying operand does not change by a constant stride
    #[error("Loop guard operand does not advance by a constant stride")]
    NonConstantStride,

    /// Both operands are the same in every snapshot
    #[error("Loop guard does not change across iterations: {0}")]
    ConstantGuard(String),

    /// Fewer than two occurrences of the loop header were observed
    #[error("Only {0} occurrence(s) of the loop header in the path")]
    TooFewIterations(usize),

    /// The re-entered node does not end with a conditional branch
    #[error("Loop header {0} has no branch condition")]
    MissingGuard(usize),

    /// The guard is wrapped in more nested conditionals than allowed
    #[error("Loop guard nesting exceeds depth {0}")]
    NestingTooDeep(usize),
}

/// Main error type for the gas analysis
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GasboundException {
    #[error("Stack underflow at pc {pc} ({mnemonic}): needs {needed}, has {available}")]
    StackUnderflow {
        pc: usize,
        mnemonic: String,
        needed: usize,
        available: usize,
    },

    #[error("Stack overflow at pc {0}")]
    StackOverflow(usize),

    #[error("Loop synthesis failure: {0}")]
    LoopSynthesis(#[from] LoopSynthesisError),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Exploration limit exceeded: {0}")]
    ExplorationLimit(String),

    #[error("Invalid jump destination {target:#x} at pc {pc}")]
    InvalidJump { pc: usize, target: usize },

    #[error("Unresolved symbolic jump at pc {pc}")]
    UnresolvedJump { pc: usize },

    #[error("Ranking function error: {0}")]
    Ranking(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GasboundException {
    /// Whether this failure is confined to the path that raised it.
    ///
    /// Parse errors and internal invariant violations halt the whole run;
    /// everything else drops or reclassifies a single path.
    pub fn is_path_local(&self) -> bool {
        !matches!(self, Self::Parse { .. } | Self::Internal(_))
    }

    /// Short, stable label used to group dropped paths in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StackUnderflow { .. } => "stack-underflow",
            Self::StackOverflow(_) => "stack-overflow",
            Self::LoopSynthesis(_) => "loop-synthesis",
            Self::Solver(_) => "solver-error",
            Self::ExplorationLimit(_) => "exploration-limit",
            Self::InvalidJump { .. } => "invalid-jump",
            Self::UnresolvedJump { .. } => "unresolved-jump",
            Self::Ranking(_) => "ranking",
            Self::Parse { .. } => "parse-error",
            Self::Internal(_) => "internal-error",
        }
    }
}

/// Result type for gas analysis operations
pub type GasboundResult<T> = Result<T, GasboundException>;
