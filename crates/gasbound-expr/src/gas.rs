// SPDX-License-Identifier: AGPL-3.0

//! Symbolic gas expressions
//!
//! Gas is kept as a constant plus a list of symbolic terms. Every term is
//! non-negative by construction, so the whole expression is too.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use std::fmt;

use crate::expr::Expr;
use crate::model::Model;
use gasbound_constants::WORD_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasTerm {
    /// `coeff * ceil(size / 32)`
    Words { coeff: u64, size: Expr },
    /// `coeff * size`
    Bytes { coeff: u64, size: Expr },
    /// `then` when `cond` holds, `otherwise` when not
    Select {
        cond: Expr,
        then: u64,
        otherwise: u64,
    },
    /// `counter * body`, the summarized cost of a loop
    Scaled { counter: Expr, body: Box<GasExpr> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GasExpr {
    pub constant: u64,
    pub terms: Vec<GasTerm>,
}

fn words_for(size: &BigUint) -> BigUint {
    (size + BigUint::from(WORD_SIZE - 1)) / BigUint::from(WORD_SIZE)
}

impl GasExpr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(gas: u64) -> Self {
        Self {
            constant: gas,
            terms: Vec::new(),
        }
    }

    /// `base + coeff * ceil(size / 32)`
    pub fn words(base: u64, coeff: u64, size: Expr) -> Self {
        if let Some(size) = size.as_word() {
            if let Some(words) = words_for(size).to_u64() {
                if let Some(cost) = words.checked_mul(coeff).and_then(|c| c.checked_add(base)) {
                    return Self::constant(cost);
                }
            }
        }
        Self {
            constant: base,
            terms: vec![GasTerm::Words { coeff, size }],
        }
    }

    /// `base + coeff * size`
    pub fn bytes(base: u64, coeff: u64, size: Expr) -> Self {
        if let Some(cost) = size
            .as_u64()
            .and_then(|s| s.checked_mul(coeff))
            .and_then(|c| c.checked_add(base))
        {
            return Self::constant(cost);
        }
        Self {
            constant: base,
            terms: vec![GasTerm::Bytes { coeff, size }],
        }
    }

    pub fn select(cond: Expr, then: u64, otherwise: u64) -> Self {
        match cond.concrete_bool() {
            Some(true) => Self::constant(then),
            Some(false) => Self::constant(otherwise),
            None if then == otherwise => Self::constant(then),
            None => Self {
                constant: 0,
                terms: vec![GasTerm::Select {
                    cond,
                    then,
                    otherwise,
                }],
            },
        }
    }

    /// `counter * body`
    pub fn scaled(counter: Expr, body: GasExpr) -> Self {
        if body.is_zero() {
            return Self::zero();
        }
        if let (Some(count), Some(per_iteration)) = (counter.as_u64(), body.as_constant()) {
            if let Some(total) = count.checked_mul(per_iteration) {
                return Self::constant(total);
            }
        }
        Self {
            constant: 0,
            terms: vec![GasTerm::Scaled {
                counter,
                body: Box::new(body),
            }],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.constant == 0 && self.terms.is_empty()
    }

    pub fn as_constant(&self) -> Option<u64> {
        self.terms.is_empty().then_some(self.constant)
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn add_assign(&mut self, other: &GasExpr) {
        self.constant = self.constant.saturating_add(other.constant);
        self.terms.extend(other.terms.iter().cloned());
    }

    pub fn plus(mut self, other: &GasExpr) -> Self {
        self.add_assign(other);
        self
    }

    /// Remove `other` from `self`.
    ///
    /// Every term of `other` must occur structurally in `self` and the
    /// constant part must not go negative; otherwise `None`.
    pub fn checked_sub(&self, other: &GasExpr) -> Option<GasExpr> {
        let mut terms = self.terms.clone();
        for term in &other.terms {
            let position = terms.iter().position(|t| t == term)?;
            terms.remove(position);
        }
        Some(GasExpr {
            constant: self.constant.checked_sub(other.constant)?,
            terms,
        })
    }

    /// Loop counters and inputs the expression depends on
    pub fn variables(&self) -> Vec<String> {
        let mut names = indexmap::IndexSet::new();
        for term in &self.terms {
            match term {
                GasTerm::Words { size, .. } | GasTerm::Bytes { size, .. } => {
                    names.extend(size.variables().iter().map(|n| n.to_string()))
                }
                GasTerm::Select { cond, .. } => {
                    names.extend(cond.variables().iter().map(|n| n.to_string()))
                }
                GasTerm::Scaled { counter, body } => {
                    names.extend(counter.variables().iter().map(|n| n.to_string()));
                    names.extend(body.variables());
                }
            }
        }
        names.into_iter().collect()
    }

    /// Concrete gas under `model`
    pub fn evaluate(&self, model: &Model) -> BigUint {
        let mut total = BigUint::from(self.constant);
        for term in &self.terms {
            total += match term {
                GasTerm::Words { coeff, size } => {
                    let size = model.eval_word(size).unwrap_or_default();
                    words_for(&size) * BigUint::from(*coeff)
                }
                GasTerm::Bytes { coeff, size } => {
                    model.eval_word(size).unwrap_or_default() * BigUint::from(*coeff)
                }
                GasTerm::Select {
                    cond,
                    then,
                    otherwise,
                } => match model.eval_bool(cond) {
                    Some(true) => BigUint::from(*then),
                    Some(false) => BigUint::from(*otherwise),
                    None => BigUint::from((*then).max(*otherwise)),
                },
                GasTerm::Scaled { counter, body } => {
                    let count = model.eval_word(counter).unwrap_or_else(BigUint::zero);
                    count * body.evaluate(model)
                }
            };
        }
        total
    }
}

impl From<u64> for GasExpr {
    fn from(gas: u64) -> Self {
        Self::constant(gas)
    }
}

impl fmt::Display for GasTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GasTerm::Words { coeff, size } => write!(f, "{}*words({})", coeff, size),
            GasTerm::Bytes { coeff, size } => write!(f, "{}*{}", coeff, size),
            GasTerm::Select {
                cond,
                then,
                otherwise,
            } => write!(f, "ite({}, {}, {})", cond, then, otherwise),
            GasTerm::Scaled { counter, body } => write!(f, "{}*({})", counter, body),
        }
    }
}

impl fmt::Display for GasExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constant)?;
        for term in &self.terms {
            write!(f, " + {}", term)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CmpOp;
    use crate::registry::VariableRegistry;

    #[test]
    fn test_concrete_words_fold() {
        assert_eq!(GasExpr::words(30, 6, Expr::word(64)).as_constant(), Some(42));
        assert_eq!(GasExpr::words(3, 3, Expr::word(33)).as_constant(), Some(9));
        assert_eq!(GasExpr::bytes(375, 8, Expr::word(2)).as_constant(), Some(391));
    }

    #[test]
    fn test_symbolic_select() {
        let mut registry = VariableRegistry::new();
        let v = registry.var("v");
        let cond = Expr::cmp(CmpOp::Eq, v, Expr::word(0));
        let gas = GasExpr::select(cond, 5000, 20000);
        assert!(!gas.is_constant());

        let mut model = Model::new();
        model.insert("v", BigUint::from(1u8));
        assert_eq!(gas.evaluate(&model), BigUint::from(20000u32));
    }

    #[test]
    fn test_checked_sub_removes_terms() {
        let mut registry = VariableRegistry::new();
        let size = registry.var("size");
        let mut gas = GasExpr::constant(10);
        let copy = GasExpr::words(3, 3, size);
        gas.add_assign(&copy);

        let rest = gas.checked_sub(&copy).unwrap();
        assert_eq!(rest, GasExpr::constant(7));
        assert!(GasExpr::constant(2).checked_sub(&GasExpr::constant(3)).is_none());
        assert!(GasExpr::constant(10).checked_sub(&copy).is_none());
    }

    #[test]
    fn test_scaled_by_counter() {
        let mut registry = VariableRegistry::new();
        let k = registry.var("loop_2");
        let gas = GasExpr::constant(30).plus(&GasExpr::scaled(k, GasExpr::constant(50)));

        let mut model = Model::new();
        model.insert("loop_2", BigUint::from(10u8));
        assert_eq!(gas.evaluate(&model), BigUint::from(530u32));
        assert_eq!(gas.variables(), vec!["loop_2".to_string()]);
        assert_eq!(gas.to_string(), "30 + loop_2*(50)");
    }

    #[test]
    fn test_scaled_concrete_counter_folds() {
        let gas = GasExpr::scaled(Expr::word(4), GasExpr::constant(25));
        assert_eq!(gas.as_constant(), Some(100));
    }
}
