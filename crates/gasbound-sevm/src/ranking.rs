// SPDX-License-Identifier: AGPL-3.0

//! Constraint-automaton description of a summarized loop, for external
//! termination provers. Written out, never read back.

use gasbound_exceptions::{GasboundException, GasboundResult};
use gasbound_expr::{CmpOp, Expr};
use serde::Serialize;

use crate::loop_formula::{FormulaKind, LoopFormula};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingContext {
    pub header: usize,
    pub counter: String,
    pub vars: Vec<String>,
    /// `left op right` in terms of the counter
    pub guard: String,
    /// Negation of `guard`
    pub exit: String,
}

fn render_comparison(op: CmpOp, left: &Expr, right: &Expr) -> String {
    format!("{} {} {}", left, op.symbol(), right)
}

impl RankingContext {
    /// Only unsigned order comparisons of a linear guard are accepted
    pub fn new(header: usize, formula: &LoopFormula) -> GasboundResult<Self> {
        if formula.kind == FormulaKind::Periodic {
            return Err(GasboundException::Ranking(format!(
                "loop at {} alternates between two guards",
                header
            )));
        }
        let counter = formula
            .counter
            .var_name()
            .ok_or_else(|| GasboundException::Ranking("loop counter is not a variable".into()))?
            .to_string();
        let (op, left, right) = match formula.guard.kind() {
            gasbound_expr::ExprKind::Cmp(op, left, right) => (*op, left, right),
            _ => {
                return Err(GasboundException::Ranking(format!(
                    "guard {} is not a comparison",
                    formula.guard
                )))
            }
        };
        if !matches!(op, CmpOp::Ult | CmpOp::Ule | CmpOp::Ugt | CmpOp::Uge) {
            return Err(GasboundException::Ranking(format!(
                "unsupported guard operator {}",
                op
            )));
        }

        let mut vars = vec![counter.clone()];
        for name in formula.guard.variables() {
            if *name != *counter {
                vars.push(name.to_string());
            }
        }

        Ok(Self {
            header,
            counter,
            vars,
            guard: render_comparison(op, left, right),
            exit: render_comparison(op.negate(), left, right),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.fc", self.header)
    }

    fn updates(&self, step: bool) -> Vec<String> {
        self.vars
            .iter()
            .map(|v| {
                if step && *v == self.counter {
                    format!("{}' = {} + 1", v, v)
                } else {
                    format!("{}' = {}", v, v)
                }
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let primed: Vec<String> = self.vars.iter().map(|v| format!("{}'", v)).collect();
        let mut stay = vec![self.guard.clone()];
        stay.extend(self.updates(true));
        let mut leave = vec![self.exit.clone()];
        leave.extend(self.updates(false));

        format!(
            "{{
    vars: [{}],
    pvars: [{}],
    initnode: n0,
    nodes: {{}},
    transitions: [
        {{
            source: n0,
            target: n0,
            name: t0,
            constraints: [{}]
        }},
        {{
            source: n0,
            target: n1,
            name: t1,
            constraints: [{}]
        }},
    ]
}}
",
            self.vars.join(", "),
            primed.join(", "),
            stay.join(", "),
            leave.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_formula::synthesize;
    use gasbound_expr::VariableRegistry;

    #[test]
    fn test_render_symbolic_bound() {
        let mut registry = VariableRegistry::new();
        let k = registry.var("loop_2");
        let n = registry.var("calldata_4");
        let formula = synthesize(
            &[
                Expr::cmp(CmpOp::Ult, Expr::word(0), n.clone()),
                Expr::cmp(CmpOp::Ult, Expr::word(1), n),
            ],
            &k,
        )
        .unwrap();
        let ranking = RankingContext::new(2, &formula).unwrap();
        assert_eq!(ranking.vars, vec!["loop_2", "calldata_4"]);
        assert_eq!(ranking.file_name(), "2.fc");

        let text = ranking.render();
        assert!(text.contains("vars: [loop_2, calldata_4]"));
        assert!(text.contains("pvars: [loop_2', calldata_4']"));
        assert!(text.contains(
            "constraints: [loop_2 < calldata_4, loop_2' = loop_2 + 1, calldata_4' = calldata_4]"
        ));
        assert!(text.contains(
            "constraints: [loop_2 >= calldata_4, loop_2' = loop_2, calldata_4' = calldata_4]"
        ));
        assert!(text.contains("initnode: n0"));
    }

    #[test]
    fn test_rejects_equality_guard() {
        let mut registry = VariableRegistry::new();
        let k = registry.var("loop_4");
        let formula = synthesize(
            &[
                Expr::cmp(CmpOp::Ne, Expr::word(0), Expr::word(8)),
                Expr::cmp(CmpOp::Ne, Expr::word(1), Expr::word(8)),
            ],
            &k,
        )
        .unwrap();
        assert!(matches!(
            RankingContext::new(4, &formula),
            Err(GasboundException::Ranking(_))
        ));
    }

    #[test]
    fn test_rejects_periodic_guard() {
        let mut registry = VariableRegistry::new();
        let k = registry.var("loop_4");
        let x = registry.var("x");
        let a = Expr::cmp(CmpOp::Ult, x.clone(), Expr::word(1));
        let b = Expr::cmp(CmpOp::Ult, x, Expr::word(2));
        let formula = synthesize(&[a.clone(), b, a], &k).unwrap();
        assert!(RankingContext::new(4, &formula).is_err());
    }
}
