// SPDX-License-Identifier: AGPL-3.0

//! Symbolic expressions, gas expressions and models
//!
//! Everything here is independent of the SMT backend: expressions are
//! lowered to the solver in `gasbound-solver`, and models come back as
//! plain [`Model`] maps.

pub mod eval;
pub mod expr;
pub mod gas;
pub mod model;
pub mod registry;

pub use eval::{evaluate, Value};
pub use expr::{BinaryOp, CmpOp, Expr, ExprKind, Sort, TernaryOp, UnaryOp};
pub use gas::{GasExpr, GasTerm};
pub use model::Model;
pub use registry::{VarId, VariableRegistry};
