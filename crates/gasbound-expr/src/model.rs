// SPDX-License-Identifier: AGPL-3.0

//! Solver models as plain name/value maps

use indexmap::IndexMap;
use num_bigint::BigUint;
use serde::{Serialize, Serializer};
use std::fmt;

use crate::eval::{self, Value};
use crate::expr::Expr;

/// Concrete assignment of variables; absent variables read as zero
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    values: IndexMap<String, BigUint>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: BigUint) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&BigUint> {
        self.values.get(name)
    }

    pub fn value_or_zero(&self, name: &str) -> BigUint {
        self.values.get(name).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BigUint)> {
        self.values.iter()
    }

    pub fn evaluate(&self, expr: &Expr) -> Option<Value> {
        eval::evaluate(expr, &|name: &str| Some(self.value_or_zero(name)))
    }

    pub fn eval_word(&self, expr: &Expr) -> Option<BigUint> {
        self.evaluate(expr).and_then(|v| v.as_word().cloned())
    }

    pub fn eval_bool(&self, expr: &Expr) -> Option<bool> {
        self.evaluate(expr).and_then(|v| v.as_bool())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in entries {
            writeln!(f, "    {} = 0x{:x} ({})", name, value, value)?;
        }
        Ok(())
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.values
                .iter()
                .map(|(name, value)| (name, format!("0x{:x}", value))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VariableRegistry;

    #[test]
    fn test_absent_reads_zero() {
        let mut registry = VariableRegistry::new();
        let x = registry.var("x");
        let y = registry.var("y");
        let mut model = Model::new();
        model.insert("x", BigUint::from(5u8));

        let sum = x.add(y);
        assert_eq!(model.eval_word(&sum), Some(BigUint::from(5u8)));
    }

    #[test]
    fn test_eval_bool() {
        let mut registry = VariableRegistry::new();
        let k = registry.var("k");
        let mut model = Model::new();
        model.insert("k", BigUint::from(10u8));

        let guard = Expr::cmp(crate::CmpOp::Ult, k, Expr::word(10));
        assert_eq!(model.eval_bool(&guard), Some(false));
        assert_eq!(model.eval_word(&guard), None);
    }

    #[test]
    fn test_display_sorted() {
        let mut model = Model::new();
        model.insert("b", BigUint::from(1u8));
        model.insert("a", BigUint::from(255u8));
        let text = model.to_string();
        assert!(text.find("a = 0xff").unwrap() < text.find("b = 0x1").unwrap());
    }
}
