// SPDX-License-Identifier: AGPL-3.0

//! Closed-form loop guards
//!
//! Each occurrence of a loop header contributes one snapshot: the branch
//! predicate under which the path stays in the loop. Snapshots are reduced
//! to `(operator, left, right)` and the varying operand is extrapolated to
//! iteration `k`.

use gasbound_constants::MAX_UNWRAP_DEPTH;
use gasbound_exceptions::LoopSynthesisError;
use gasbound_expr::eval::{negate, normalize};
use gasbound_expr::{BinaryOp, CmpOp, Expr, ExprKind};
use num_bigint::BigUint;
use std::fmt;

/// A comparison guard split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardShape {
    pub op: CmpOp,
    pub left: Expr,
    pub right: Expr,
}

impl GuardShape {
    pub fn to_expr(&self) -> Expr {
        Expr::cmp(self.op, self.left.clone(), self.right.clone())
    }
}

impl fmt::Display for GuardShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

/// Operand that changes between iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormulaKind {
    /// `op(left, right)` with one side advancing by `stride` per iteration
    Linear { varying: Side, stride: BigUint },
    /// Guard alternating between two observed conditions
    Periodic,
}

/// Loop guard as a function of the iteration counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopFormula {
    pub kind: FormulaKind,
    pub counter: Expr,
    /// Decomposed guard of the first snapshot
    pub first: GuardShape,
    /// Guard evaluated after `counter` iterations
    pub guard: Expr,
}

impl LoopFormula {
    /// Guard with the counter replaced by `iteration`
    pub fn at(&self, iteration: Expr) -> Expr {
        let name = self.counter.var_name().map(str::to_string);
        self.guard
            .substitute(&|var: &str| (Some(var) == name.as_deref()).then(|| iteration.clone()))
    }

    /// Holds while the counter is within the iterations actually run:
    /// the guard before the last completed iteration.
    pub fn stay_constraint(&self) -> Expr {
        match self.kind {
            FormulaKind::Linear { .. } => {
                let previous = Expr::binary(BinaryOp::Sub, self.counter.clone(), Expr::word(1));
                self.at(previous)
            }
            FormulaKind::Periodic => self.guard.clone(),
        }
    }

    /// The guard fails after the last iteration. Periodic guards have no
    /// exit condition in closed form.
    pub fn exit_constraint(&self) -> Option<Expr> {
        match self.kind {
            FormulaKind::Linear { .. } => Some(Expr::not(self.guard.clone())),
            FormulaKind::Periodic => None,
        }
    }
}

/// Reduce a predicate to a single comparison, unwrapping boolean words,
/// negations and nested conditionals.
pub fn decompose(predicate: &Expr) -> Result<GuardShape, LoopSynthesisError> {
    let mut current = predicate.clone();
    let mut negated = false;

    for _ in 0..MAX_UNWRAP_DEPTH {
        let next = match current.kind() {
            ExprKind::Not(inner) => {
                negated = !negated;
                inner.clone()
            }
            ExprKind::Ite(cond, then, otherwise) => {
                match (then.as_bool_literal(), otherwise.as_bool_literal()) {
                    (Some(true), Some(false)) => cond.clone(),
                    (Some(false), Some(true)) => {
                        negated = !negated;
                        cond.clone()
                    }
                    _ => return Err(LoopSynthesisError::UnrecognizedShape(current.to_string())),
                }
            }
            ExprKind::Cmp(op, left, right) => match unwrap_word_test(*op, left, right) {
                Some((inner, flips)) => {
                    if flips {
                        negated = !negated;
                    }
                    inner
                }
                None => {
                    let op = if negated { op.negate() } else { *op };
                    return Ok(GuardShape {
                        op,
                        left: left.clone(),
                        right: right.clone(),
                    });
                }
            },
            _ => return Err(LoopSynthesisError::UnrecognizedShape(current.to_string())),
        };
        current = next;
    }
    Err(LoopSynthesisError::NestingTooDeep(MAX_UNWRAP_DEPTH))
}

/// `ite(c, 1, 0) != 0` is `c`; `ite(c, 1, 0) == 0` is `not c`. Returns the
/// inner condition and whether it appears negated.
fn unwrap_word_test(op: CmpOp, left: &Expr, right: &Expr) -> Option<(Expr, bool)> {
    let (word, zero) = if right.as_u64() == Some(0) {
        (left, right)
    } else {
        (right, left)
    };
    if zero.as_u64() != Some(0) {
        return None;
    }
    let ExprKind::Ite(cond, then, otherwise) = word.kind() else {
        return None;
    };
    let polarity = match (then.as_u64(), otherwise.as_u64()) {
        (Some(1), Some(0)) => false,
        (Some(0), Some(1)) => true,
        _ => return None,
    };
    match op {
        CmpOp::Ne => Some((cond.clone(), polarity)),
        CmpOp::Eq => Some((cond.clone(), !polarity)),
        _ => None,
    }
}

/// Whether more snapshots could still let synthesis succeed
pub fn is_retryable(err: &LoopSynthesisError) -> bool {
    matches!(
        err,
        LoopSynthesisError::UnrecognizedShape(_)
            | LoopSynthesisError::NonConstantStride
            | LoopSynthesisError::TooFewIterations(_)
    )
}

/// Synthesize the guard formula from ordered snapshots of one header.
///
/// Two snapshots suffice for a linear guard; a period-2 guard needs three.
/// Snapshots past the third are ignored.
pub fn synthesize(snapshots: &[Expr], counter: &Expr) -> Result<LoopFormula, LoopSynthesisError> {
    if snapshots.len() < 2 {
        return Err(LoopSynthesisError::TooFewIterations(snapshots.len()));
    }
    let shapes = snapshots
        .iter()
        .take(3)
        .map(decompose)
        .collect::<Result<Vec<_>, _>>()?;

    let first = &shapes[0];
    if let Some(other) = shapes.iter().find(|s| s.op != first.op) {
        return Err(LoopSynthesisError::OperatorMismatch {
            first: first.op.to_string(),
            other: other.op.to_string(),
        });
    }

    if shapes.len() == 3
        && shapes[0] == shapes[2]
        && shapes[0] != shapes[1]
    {
        return Ok(LoopFormula {
            kind: FormulaKind::Periodic,
            counter: counter.clone(),
            first: first.clone(),
            guard: Expr::or(vec![shapes[0].to_expr(), shapes[1].to_expr()]),
        });
    }

    let left_fixed = shapes.iter().all(|s| s.left == first.left);
    let right_fixed = shapes.iter().all(|s| s.right == first.right);
    let (varying, values): (Side, Vec<&Expr>) = match (left_fixed, right_fixed) {
        (true, false) => (Side::Right, shapes.iter().map(|s| &s.right).collect()),
        (false, true) => (Side::Left, shapes.iter().map(|s| &s.left).collect()),
        (true, true) => return Err(LoopSynthesisError::ConstantGuard(first.to_string())),
        (false, false) => return Err(LoopSynthesisError::UnrecognizedShape(first.to_string())),
    };

    let stride = constant_stride(&values)?;
    let start = values[0].clone();
    let advanced = Expr::binary(
        BinaryOp::Add,
        start,
        Expr::binary(
            BinaryOp::Mul,
            counter.clone(),
            Expr::from_biguint(stride.clone()),
        ),
    );
    let guard = match varying {
        Side::Left => Expr::cmp(first.op, advanced, first.right.clone()),
        Side::Right => Expr::cmp(first.op, first.left.clone(), advanced),
    };

    Ok(LoopFormula {
        kind: FormulaKind::Linear { varying, stride },
        counter: counter.clone(),
        first: first.clone(),
        guard,
    })
}

/// Common difference of consecutive values sharing one base
fn constant_stride(values: &[&Expr]) -> Result<BigUint, LoopSynthesisError> {
    let forms: Vec<(Option<Expr>, BigUint)> = values.iter().map(|v| v.linear_form()).collect();
    let base = &forms[0].0;
    if forms.iter().any(|(b, _)| b != base) {
        return Err(LoopSynthesisError::NonConstantStride);
    }
    let step = |pair: &[(Option<Expr>, BigUint)]| normalize(&pair[1].1 + negate(&pair[0].1));
    let stride = step(&forms[0..2]);
    if forms.windows(2).any(|pair| step(pair) != stride) {
        return Err(LoopSynthesisError::NonConstantStride);
    }
    Ok(stride)
}
