// SPDX-License-Identifier: AGPL-3.0

//! Execution paths with constraint and gas tracking
//!
//! A path records one [`PathStep`] per visited node. Nodes themselves stay
//! immutable; the state after the node, its gas and its branch predicate
//! belong to the step, so the same tag can be visited several times.

use gasbound_config::AnalysisConfig;
use gasbound_exceptions::{GasboundException, GasboundResult, LoopSynthesisError};
use gasbound_expr::{CmpOp, Expr, GasExpr, Model, VariableRegistry};
use num_traits::ToPrimitive;

use crate::loop_formula::{is_retryable, synthesize, LoopFormula};
use crate::state::SymbolicState;

/// One visit of a node
#[derive(Debug, Clone)]
pub struct PathStep {
    pub tag: usize,
    pub gas: GasExpr,
    /// `JUMPI` predicate for taking the jump, when the node ends in one
    pub branch: Option<Expr>,
    /// Which side of `branch` this path followed
    pub taken: Option<bool>,
    /// State after the node
    pub state: SymbolicState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConstraint {
    pub expr: Expr,
    /// Index of the step whose branch produced this constraint; `None` for
    /// constraints introduced by loop summaries
    pub origin: Option<usize>,
}

/// A loop replaced by its closed form
#[derive(Debug, Clone)]
pub struct LoopSummary {
    pub header: usize,
    pub counter: Expr,
    /// Step index of the first header occurrence
    pub first: usize,
    /// Step index of the second header occurrence, now the path's anchor
    pub second: usize,
    /// Branch side of the header that stays in the loop
    pub stay_taken: bool,
    /// Gas of one iteration, header included
    pub per_iteration: GasExpr,
    pub formula: LoopFormula,
    /// `counter < loop_bound`
    pub cap: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Summarized,
    /// Synthesis needs another occurrence of the header
    Unrolling,
}

#[derive(Debug, Clone, Default)]
pub struct Path {
    pub steps: Vec<PathStep>,
    pub constraints: Vec<PathConstraint>,
    pub gas: GasExpr,
    pub loops: Vec<LoopSummary>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> Vec<usize> {
        self.steps.iter().map(|s| s.tag).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last_state(&self) -> Option<&SymbolicState> {
        self.steps.last().map(|s| &s.state)
    }

    pub fn push_step(&mut self, step: PathStep) {
        self.gas.add_assign(&step.gas);
        self.steps.push(step);
    }

    /// Record the side taken at the last step's branch
    pub fn set_taken(&mut self, taken: bool) {
        if let Some(step) = self.steps.last_mut() {
            step.taken = Some(taken);
        }
    }

    pub fn add_constraint(&mut self, expr: Expr, origin: Option<usize>) {
        if expr.concrete_bool() == Some(true) {
            return;
        }
        self.constraints.push(PathConstraint { expr, origin });
    }

    pub fn constraint_exprs(&self) -> Vec<Expr> {
        self.constraints.iter().map(|c| c.expr.clone()).collect()
    }

    /// Path constraints without the upper bounds of the loop counters
    pub fn uncapped_constraint_exprs(&self) -> Vec<Expr> {
        self.constraints
            .iter()
            .filter(|c| !self.loops.iter().any(|l| l.cap == c.expr))
            .map(|c| c.expr.clone())
            .collect()
    }

    /// Step indices at which `tag` was visited
    pub fn occurrences(&self, tag: usize) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.tag == tag)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn loop_counters(&self) -> Vec<&Expr> {
        self.loops.iter().map(|l| &l.counter).collect()
    }

    /// A recurrence of `tag` that encloses an already summarized loop, or
    /// revisits a summarized header
    pub fn is_nested(&self, tag: usize) -> bool {
        let Some(&first) = self.occurrences(tag).first() else {
            return false;
        };
        self.loops
            .iter()
            .any(|l| l.header == tag || first < l.second)
    }

    /// Replace the walked iterations of the loop headed by `tag` with a
    /// closed form over a fresh counter.
    ///
    /// The path is cut back to the second occurrence of the header; the
    /// gas of the first iteration and of the cut tail is removed and
    /// `counter * iteration` added instead. Constraints of the header
    /// snapshots and of the cut tail are replaced by the formula's stay
    /// condition, `counter >= 1` and the cap `counter < loop_bound`.
    pub fn summarize_loop(
        &mut self,
        tag: usize,
        registry: &mut VariableRegistry,
        config: &AnalysisConfig,
    ) -> GasboundResult<LoopStatus> {
        let occurrences = self.occurrences(tag);
        if occurrences.len() < 2 {
            return Err(LoopSynthesisError::TooFewIterations(occurrences.len()).into());
        }
        let (first, second) = (occurrences[0], occurrences[1]);
        let stay_taken = self.steps[first]
            .taken
            .ok_or(LoopSynthesisError::MissingGuard(tag))?;

        let mut snapshots = Vec::with_capacity(occurrences.len());
        for &index in &occurrences {
            let branch = self.steps[index]
                .branch
                .clone()
                .ok_or(LoopSynthesisError::MissingGuard(tag))?;
            snapshots.push(if stay_taken { branch } else { Expr::not(branch) });
        }

        let counter = registry.var(&format!("loop_{}", tag));
        let formula = match synthesize(&snapshots, &counter) {
            Ok(formula) => formula,
            Err(err) if is_retryable(&err) && occurrences.len() < config.max_unroll => {
                tracing::debug!("loop at {}: {}; unrolling further", tag, err);
                return Ok(LoopStatus::Unrolling);
            }
            Err(err) => return Err(err.into()),
        };

        let tail = self.steps.split_off(second + 1);
        let mut removed = GasExpr::zero();
        for step in &tail {
            removed.add_assign(&step.gas);
        }
        let mut per_iteration = GasExpr::zero();
        for step in &self.steps[first..second] {
            per_iteration.add_assign(&step.gas);
        }
        removed.add_assign(&per_iteration);
        self.gas = self.gas.checked_sub(&removed).ok_or_else(|| {
            GasboundException::Internal(format!(
                "loop at {}: iteration gas {} exceeds path gas {}",
                tag, removed, self.gas
            ))
        })?;
        self.gas
            .add_assign(&GasExpr::scaled(counter.clone(), per_iteration.clone()));

        self.constraints.retain(|c| match c.origin {
            Some(origin) => origin <= second && !occurrences.contains(&origin),
            None => true,
        });
        self.add_constraint(formula.stay_constraint(), None);
        let cap = Expr::cmp(
            CmpOp::Ult,
            counter.clone(),
            Expr::from_biguint(config.loop_bound.into()),
        );
        self.add_constraint(Expr::cmp(CmpOp::Uge, counter.clone(), Expr::word(1)), None);
        self.add_constraint(cap.clone(), None);

        let widened = self.steps[second]
            .state
            .widen(&self.steps[first].state, &counter, tag, registry);
        self.steps[second].state = widened;
        self.steps[second].taken = None;

        tracing::debug!(
            "loop at {} summarized: guard {}, {} per iteration",
            tag,
            formula.guard,
            per_iteration
        );
        self.loops.push(LoopSummary {
            header: tag,
            counter,
            first,
            second,
            stay_taken,
            per_iteration,
            formula,
            cap,
        });
        Ok(LoopStatus::Summarized)
    }

    /// Node sequence with every summarized loop body repeated as many
    /// times as `model` assigns to its counter
    pub fn replay_tags(&self, model: &Model) -> GasboundResult<Vec<usize>> {
        let mut tags = Vec::with_capacity(self.steps.len());
        let mut index = 0;
        for summary in &self.loops {
            tags.extend(self.steps[index..summary.first].iter().map(|s| s.tag));
            let iterations = model
                .eval_word(&summary.counter)
                .unwrap_or_default()
                .to_usize()
                .ok_or_else(|| {
                    GasboundException::ExplorationLimit(format!(
                        "loop at {} iterates beyond the replay range",
                        summary.header
                    ))
                })?;
            let body: Vec<usize> = self.steps[summary.first..summary.second]
                .iter()
                .map(|s| s.tag)
                .collect();
            for _ in 0..iterations {
                tags.extend_from_slice(&body);
            }
            index = summary.second;
        }
        tags.extend(self.steps[index..].iter().map(|s| s.tag));
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn step(tag: usize, gas: u64, branch: Option<Expr>, taken: Option<bool>) -> PathStep {
        PathStep {
            tag,
            gas: GasExpr::constant(gas),
            branch,
            taken,
            state: SymbolicState::new(),
        }
    }

    fn lt(a: u64, b: u64) -> Expr {
        Expr::cmp(CmpOp::Ult, Expr::word(a), Expr::word(b))
    }

    /// prefix(0) -> header(2) -> body(11) -> header(2)
    fn counting_path() -> Path {
        let mut path = Path::new();
        path.push_step(step(0, 3, None, None));
        // Jump taken leaves the loop, so staying is the negation
        path.push_step(step(2, 26, Some(Expr::not(lt(0, 10))), Some(false)));
        path.add_constraint(lt(0, 10), Some(1));
        path.push_step(step(11, 24, None, None));
        path.push_step(step(2, 26, Some(Expr::not(lt(1, 10))), None));
        path
    }

    #[test]
    fn test_summarize_counting_loop() {
        let mut registry = VariableRegistry::new();
        let config = AnalysisConfig::default();
        let mut path = counting_path();
        assert_eq!(path.gas.as_constant(), Some(79));

        let status = path.summarize_loop(2, &mut registry, &config).unwrap();
        assert_eq!(status, LoopStatus::Summarized);
        assert_eq!(path.tags(), vec![0, 2, 11, 2]);

        let summary = &path.loops[0];
        assert_eq!(summary.per_iteration.as_constant(), Some(50));
        assert!(!summary.stay_taken);
        assert_eq!(summary.counter.var_name(), Some("loop_2"));

        // 3 + 26 + 50 * k
        let mut model = Model::new();
        model.insert("loop_2", BigUint::from(10u8));
        assert_eq!(path.gas.evaluate(&model), BigUint::from(529u32));

        // The header snapshot constraint is gone, loop constraints are in
        assert!(path.constraints.iter().all(|c| c.origin.is_none()));
        assert_eq!(path.constraints.len(), 3);
        assert_eq!(
            summary.cap,
            Expr::cmp(CmpOp::Ult, summary.counter.clone(), Expr::word(1024))
        );
        let uncapped = path.uncapped_constraint_exprs();
        assert_eq!(uncapped.len(), 2);
        assert!(!uncapped.contains(&summary.cap));
        let exit = path.loops[0].formula.exit_constraint().unwrap();
        assert_eq!(
            exit,
            Expr::cmp(CmpOp::Uge, summary.counter.clone(), Expr::word(10))
        );
    }

    #[test]
    fn test_replay_repeats_body() {
        let mut registry = VariableRegistry::new();
        let mut path = counting_path();
        path.summarize_loop(2, &mut registry, &AnalysisConfig::default())
            .unwrap();
        path.push_step(step(20, 1, None, None));

        let mut model = Model::new();
        model.insert("loop_2", BigUint::from(3u8));
        assert_eq!(
            path.replay_tags(&model).unwrap(),
            vec![0, 2, 11, 2, 11, 2, 11, 2, 20]
        );
    }

    #[test]
    fn test_truncates_tail_after_unrolling() {
        let mut registry = VariableRegistry::new();
        let mut path = Path::new();
        let x = registry.var("x");
        let guard = |i: u64| {
            Expr::cmp(
                CmpOp::Ult,
                Expr::binary(gasbound_expr::BinaryOp::Mul, x.clone(), Expr::word(i + 1)),
                Expr::word(100),
            )
        };
        path.push_step(step(2, 10, Some(guard(0)), Some(true)));
        path.add_constraint(guard(0), Some(0));
        path.push_step(step(5, 5, None, None));
        path.push_step(step(2, 10, Some(guard(1)), Some(true)));
        path.add_constraint(guard(1), Some(2));
        path.push_step(step(5, 5, None, None));

        // x*1, x*2 share no base: not linear yet
        let config = AnalysisConfig::default();
        assert_eq!(
            path.summarize_loop(2, &mut registry, &config).unwrap(),
            LoopStatus::Unrolling
        );

        path.push_step(step(2, 10, Some(guard(0)), None));
        // guard(0), guard(1), guard(0) is a period-2 pattern
        assert_eq!(
            path.summarize_loop(2, &mut registry, &config).unwrap(),
            LoopStatus::Summarized
        );
        assert_eq!(path.tags(), vec![2, 5, 2]);
        assert_eq!(path.loops[0].per_iteration.as_constant(), Some(15));
        assert_eq!(path.loops[0].formula.exit_constraint(), None);
        assert!(path.constraints.iter().all(|c| c.origin.is_none()));

        let mut model = Model::new();
        model.insert("loop_2", BigUint::from(4u8));
        assert_eq!(path.gas.evaluate(&model), BigUint::from(10 + 15 * 4u32));
    }

    #[test]
    fn test_operator_mismatch_is_hard_failure() {
        let mut registry = VariableRegistry::new();
        let x = registry.var("calldata_4");
        let y = registry.var("calldata_36");
        let mut path = Path::new();
        path.push_step(step(
            2,
            10,
            Some(Expr::cmp(CmpOp::Ult, x.clone(), y.clone())),
            Some(true),
        ));
        path.push_step(step(2, 10, Some(Expr::cmp(CmpOp::Ugt, x, y)), None));
        let err = path
            .summarize_loop(2, &mut registry, &AnalysisConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), "loop-synthesis");
    }

    #[test]
    fn test_missing_guard() {
        let mut registry = VariableRegistry::new();
        let mut path = Path::new();
        path.push_step(step(4, 1, None, None));
        path.push_step(step(4, 1, None, None));
        assert_eq!(
            path.summarize_loop(4, &mut registry, &AnalysisConfig::default()),
            Err(LoopSynthesisError::MissingGuard(4).into())
        );
    }

    #[test]
    fn test_nesting_detection() {
        let mut registry = VariableRegistry::new();
        let mut path = Path::new();
        // outer header 1, inner loop at 3
        path.push_step(step(1, 1, Some(lt(0, 5)), Some(true)));
        path.push_step(step(3, 1, Some(lt(0, 5)), Some(true)));
        path.push_step(step(4, 1, None, None));
        path.push_step(step(3, 1, Some(lt(1, 5)), None));
        path.summarize_loop(3, &mut registry, &AnalysisConfig::default())
            .unwrap();
        assert!(!path.is_nested(9));
        path.push_step(step(1, 1, Some(lt(1, 5)), None));
        assert!(path.is_nested(1));
        assert!(path.is_nested(3));
    }

    #[test]
    fn test_trivial_constraints_are_skipped() {
        let mut path = Path::new();
        path.add_constraint(Expr::bool(true), Some(0));
        path.add_constraint(lt(1, 2), Some(0));
        assert!(path.constraints.is_empty());
    }
}
