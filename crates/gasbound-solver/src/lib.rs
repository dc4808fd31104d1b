// SPDX-License-Identifier: AGPL-3.0

//! SMT backend
//!
//! Lowers path constraints and gas expressions to z3 and runs the
//! gas-bound search. Every path gets its own [`GasSolver`]; nothing here
//! is shared between paths.

pub mod lower;
pub mod search;

pub use lower::{biguint_to_bv, bv_to_biguint, Lowered, Lowering};
pub use search::{GasSolver, SearchOutcome, SearchStatus, SolverScope};
pub use z3::{Config as Z3Config, Context, SatResult};

/// Fresh z3 context with default settings
pub fn new_context() -> Context {
    Context::new(&Z3Config::new())
}
