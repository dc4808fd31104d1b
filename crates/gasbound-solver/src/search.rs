// SPDX-License-Identifier: AGPL-3.0

//! Iterative-deepening search for the maximal satisfiable gas

use gasbound_config::AnalysisConfig;
use gasbound_exceptions::{GasboundException, GasboundResult};
use gasbound_expr::{Expr, GasExpr, Model};
use serde::Serialize;
use z3::ast::{Ast, Int, BV};
use z3::{Context, Params, SatResult, Solver};

use crate::lower::{bv_to_biguint, Lowering};

/// Backtracking point on a solver, popped on every exit path
pub struct SolverScope<'a, 'ctx> {
    solver: &'a Solver<'ctx>,
}

impl<'a, 'ctx> SolverScope<'a, 'ctx> {
    pub fn new(solver: &'a Solver<'ctx>) -> Self {
        solver.push();
        Self { solver }
    }
}

impl Drop for SolverScope<'_, '_> {
    fn drop(&mut self) {
        self.solver.pop(1);
    }
}

/// Why the search stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchStatus {
    /// An unsatisfiable threshold was found
    Converged,
    /// A check timed out or returned unknown
    TimedOut,
    /// The round ceiling was reached while still satisfiable
    RoundLimit,
}

/// Result of [`GasSolver::solve_max_gas`]
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// `None` when no input realizes gas above the starting threshold
    pub model: Option<Model>,
    /// Highest threshold known to be exceeded
    pub threshold: Option<u64>,
    pub rounds: usize,
    pub status: SearchStatus,
}

/// A path's constraints and gas, asserted once on a dedicated solver
pub struct GasSolver<'ctx> {
    ctx: &'ctx Context,
    solver: Solver<'ctx>,
    lowering: Lowering<'ctx>,
    gas: Int<'ctx>,
    names: Vec<String>,
}

/// Variable names in first-occurrence order across constraints and gas
fn ordered_names(constraints: &[Expr], gas: &GasExpr) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !names.contains(&name) {
            names.push(name);
        }
    };
    for constraint in constraints {
        for name in constraint.variables() {
            push(name.to_string());
        }
    }
    for name in gas.variables() {
        push(name);
    }
    names
}

impl<'ctx> GasSolver<'ctx> {
    pub fn new(
        ctx: &'ctx Context,
        constraints: &[Expr],
        gas: &GasExpr,
        timeout_ms: u32,
    ) -> GasboundResult<Self> {
        let solver = Solver::new(ctx);
        let mut params = Params::new(ctx);
        params.set_u32("timeout", timeout_ms);
        solver.set_params(&params);

        let mut lowering = Lowering::new(ctx);
        for constraint in constraints {
            solver.assert(&lowering.boolean(constraint)?);
        }
        let gas_term = lowering.gas(gas)?;

        Ok(Self {
            ctx,
            solver,
            lowering,
            gas: gas_term,
            names: ordered_names(constraints, gas),
        })
    }

    /// Satisfiability of the path constraints alone
    pub fn check(&self) -> SatResult {
        self.solver.check()
    }

    /// Satisfiability of the path constraints, with a model when sat
    pub fn check_model(&self) -> (SatResult, Option<Model>) {
        match self.solver.check() {
            SatResult::Sat => (SatResult::Sat, self.extract_model()),
            other => (other, None),
        }
    }

    /// Satisfiability with `extra` assumed in a temporary scope
    pub fn check_with(&mut self, extra: &Expr) -> GasboundResult<SatResult> {
        let assumption = self.lowering.boolean(extra)?;
        let _scope = SolverScope::new(&self.solver);
        self.solver.assert(&assumption);
        Ok(self.solver.check())
    }

    /// Satisfiability of `gas > threshold`, with the model when sat
    pub fn check_above(&self, threshold: u64) -> (SatResult, Option<Model>) {
        let _scope = SolverScope::new(&self.solver);
        self.solver
            .assert(&self.gas.gt(&Int::from_u64(self.ctx, threshold)));
        match self.solver.check() {
            SatResult::Sat => (SatResult::Sat, self.extract_model()),
            other => (other, None),
        }
    }

    fn extract_model(&self) -> Option<Model> {
        let z3_model = self.solver.get_model()?;
        let mut model = Model::new();
        let lowered: Vec<(&String, &BV<'ctx>)> = self.lowering.variables().collect();
        for name in &self.names {
            let value = lowered
                .iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, bv)| z3_model.eval(*bv, true))
                .and_then(|v| bv_to_biguint(&v))
                .unwrap_or_default();
            model.insert(name.clone(), value);
        }
        Some(model)
    }

    /// Raise the threshold by `gas_step` while `gas > threshold` stays
    /// satisfiable, then back off one step for the final model.
    ///
    /// A timeout keeps the last model. A final check that turns unsat
    /// after an earlier sat at the same threshold is a solver error.
    pub fn solve_max_gas(&self, config: &AnalysisConfig) -> GasboundResult<SearchOutcome> {
        let mut threshold = config.lower_bound;
        let mut best: Option<(u64, Model)> = None;
        let mut rounds = 0;

        let status = loop {
            if rounds >= config.max_search_rounds {
                break SearchStatus::RoundLimit;
            }
            rounds += 1;

            match self.check_above(threshold) {
                (SatResult::Sat, Some(model)) => {
                    tracing::trace!("gas > {} is satisfiable", threshold);
                    best = Some((threshold, model));
                    match threshold.checked_add(config.gas_step) {
                        Some(next) => threshold = next,
                        None => break SearchStatus::RoundLimit,
                    }
                }
                (SatResult::Sat, None) => {
                    return Err(GasboundException::Solver(format!(
                        "no model for satisfiable threshold {}",
                        threshold
                    )))
                }
                (SatResult::Unsat, _) => break SearchStatus::Converged,
                (SatResult::Unknown, _) => {
                    tracing::debug!("gas check at {} returned unknown", threshold);
                    break SearchStatus::TimedOut;
                }
            }
        };

        if status == SearchStatus::Converged {
            if let Some((previous, _)) = &best {
                let previous = *previous;
                rounds += 1;
                match self.check_above(previous) {
                    (SatResult::Sat, Some(model)) => best = Some((previous, model)),
                    (SatResult::Unsat, _) => {
                        return Err(GasboundException::Solver(format!(
                            "gas > {} became unsatisfiable after being satisfiable",
                            previous
                        )))
                    }
                    _ => tracing::debug!("final check at {} inconclusive", previous),
                }
            }
        }

        Ok(SearchOutcome {
            threshold: best.as_ref().map(|(t, _)| *t),
            model: best.map(|(_, m)| m),
            rounds,
            status,
        })
    }
}
