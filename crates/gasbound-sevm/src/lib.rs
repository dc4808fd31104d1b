// SPDX-License-Identifier: AGPL-3.0

//! Symbolic gas exploration
//!
//! Walks a [`Cfg`] depth first, one node per step, keeping every path's
//! symbolic state, constraints and gas. Re-entered branch nodes are
//! summarized as loops over a bounded counter. Halted paths are then
//! handed to the solver to find their maximal gas and classified as
//! `CONSTANT`, `BOUND` or `UNBOUND`.

use gasbound_cfg::{Cfg, Node};
use gasbound_config::AnalysisConfig;
use gasbound_exceptions::{GasboundException, GasboundResult};
use gasbound_expr::{CmpOp, Expr, Model, VariableRegistry};
use gasbound_logs::{warn_code, ErrorCode};
use gasbound_solver::{GasSolver, SearchStatus};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use z3::{Context, SatResult};

pub mod loop_formula;
pub mod opcodes;
pub mod path;
pub mod ranking;
pub mod state;
pub mod worklist;

pub use loop_formula::{decompose, synthesize, FormulaKind, GuardShape, LoopFormula, Side};
pub use opcodes::{tariff, Control, Interpreter, NodeRun, Transition};
pub use path::{LoopStatus, LoopSummary, Path, PathConstraint, PathStep};
pub use ranking::RankingContext;
pub use state::SymbolicState;
pub use worklist::Worklist;

/// Gas classification of a solved path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GasClass {
    /// No symbolic term in the path's gas
    Constant,
    /// Loops are bounded below the counter ceiling
    Bound,
    /// Gas grows with an input, or the search did not converge
    Unbound,
}

impl fmt::Display for GasClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GasClass::Constant => "CONSTANT",
            GasClass::Bound => "BOUND",
            GasClass::Unbound => "UNBOUND",
        };
        write!(f, "{}", name)
    }
}

fn serialize_biguint<S: serde::Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn serialize_opt_biguint<S: serde::Serializer>(
    value: &Option<BigUint>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.serialize_some(&value.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum PathOutcome {
    Solved {
        class: GasClass,
        /// Gas of the path replayed under `model`
        #[serde(serialize_with = "serialize_biguint")]
        gas: BigUint,
        /// Highest search threshold known to be exceeded
        threshold: Option<u64>,
        search: SearchStatus,
        model: Model,
    },
    /// The constraints admit no input
    Infeasible,
    /// Not solved: exploration limit or nested loop
    Unbound { reason: String },
}

impl PathOutcome {
    pub fn class(&self) -> Option<GasClass> {
        match self {
            PathOutcome::Solved { class, .. } => Some(*class),
            PathOutcome::Infeasible => None,
            PathOutcome::Unbound { .. } => Some(GasClass::Unbound),
        }
    }

    pub fn gas(&self) -> Option<&BigUint> {
        match self {
            PathOutcome::Solved { gas, .. } => Some(gas),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    pub header: usize,
    pub counter: String,
    pub guard: String,
    pub per_iteration: String,
    /// Absent when the guard has no ranking form
    pub ranking: Option<RankingContext>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathReport {
    pub id: usize,
    pub tags: Vec<usize>,
    pub constraints: Vec<String>,
    pub gas_expr: String,
    pub loops: Vec<LoopReport>,
    #[serde(flatten)]
    pub outcome: PathOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct DroppedPath {
    pub tags: Vec<usize>,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExplorationReport {
    pub paths: Vec<PathReport>,
    pub dropped: Vec<DroppedPath>,
    /// Maximum replayed gas over solved paths
    #[serde(serialize_with = "serialize_opt_biguint")]
    pub max_gas: Option<BigUint>,
}

impl ExplorationReport {
    /// Dropped paths grouped by error kind
    pub fn dropped_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for dropped in &self.dropped {
            *counts.entry(dropped.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, class: GasClass) -> usize {
        self.paths
            .iter()
            .filter(|p| p.outcome.class() == Some(class))
            .count()
    }

    pub fn infeasible(&self) -> usize {
        self.paths
            .iter()
            .filter(|p| matches!(p.outcome, PathOutcome::Infeasible))
            .count()
    }
}

/// Why a path stopped growing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEnd {
    Halted,
    Limit(String),
    Nested(String),
}

struct Frame {
    path: Path,
    tag: usize,
}

enum Advance {
    Open(Frame),
    Finished(Path, PathEnd),
    Dropped(Path, GasboundException),
}

/// Explored paths, before solving
#[derive(Debug, Default)]
pub struct Exploration {
    pub finished: Vec<(Path, PathEnd)>,
    pub dropped: Vec<(Path, GasboundException)>,
}

pub struct Explorer<'a> {
    cfg: &'a Cfg,
    config: &'a AnalysisConfig,
    registry: VariableRegistry,
}

impl<'a> Explorer<'a> {
    pub fn new(cfg: &'a Cfg, config: &'a AnalysisConfig) -> Self {
        Self {
            cfg,
            config,
            registry: VariableRegistry::new(),
        }
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    /// Walk every path from the entry node until it halts, hits a limit or
    /// fails
    pub fn explore(&mut self) -> GasboundResult<Exploration> {
        let mut exploration = Exploration::default();
        let Some(entry) = self.cfg.entry() else {
            return Ok(exploration);
        };

        let mut worklist = Worklist::new(self.config.max_paths);
        let root = Frame {
            path: Path::new(),
            tag: entry,
        };
        if let Err(root) = worklist.push(root) {
            exploration
                .finished
                .push((root.path, PathEnd::Limit("path limit is zero".into())));
        }

        while let Some(frame) = worklist.pop() {
            let mut continued = false;
            for advance in self.step(frame)? {
                match advance {
                    Advance::Open(frame) if !continued => {
                        continued = true;
                        worklist.resume(frame);
                    }
                    Advance::Open(frame) => {
                        if let Err(frame) = worklist.push(frame) {
                            tracing::debug!("path limit reached at node {}", frame.tag);
                            worklist.mark_completed();
                            exploration.finished.push((
                                frame.path,
                                PathEnd::Limit(format!(
                                    "path limit {} reached",
                                    self.config.max_paths
                                )),
                            ));
                        }
                    }
                    Advance::Finished(path, end) => {
                        worklist.mark_completed();
                        exploration.finished.push((path, end));
                    }
                    Advance::Dropped(path, err) => {
                        worklist.mark_completed();
                        tracing::debug!("path {:?} dropped: {}", path.tags(), err);
                        exploration.dropped.push((path, err));
                    }
                }
            }
        }

        tracing::info!(
            "explored {} paths ({} finished, {} dropped)",
            worklist.completed(),
            exploration.finished.len(),
            exploration.dropped.len()
        );
        Ok(exploration)
    }

    fn step(&mut self, frame: Frame) -> GasboundResult<Vec<Advance>> {
        let Frame { mut path, tag } = frame;
        let cfg = self.cfg;
        let node = cfg.node(tag).ok_or_else(|| {
            GasboundException::Internal(format!("path enters unknown node {}", tag))
        })?;

        if path.len() >= self.config.max_depth {
            let reason = format!("depth {} reached before node {}", path.len(), tag);
            return Ok(vec![Advance::Finished(path, PathEnd::Limit(reason))]);
        }

        let start = path.last_state().cloned().unwrap_or_default();
        let run = match Interpreter::new(&mut self.registry).run_node(&start, node) {
            Ok(run) => run,
            Err(err) if err.is_path_local() => return Ok(vec![Advance::Dropped(path, err)]),
            Err(err) => return Err(err),
        };
        let NodeRun {
            state,
            gas,
            control,
        } = run;
        let branch = match &control {
            Control::Branch { condition, .. } => Some(condition.clone()),
            _ => None,
        };
        path.push_step(PathStep {
            tag,
            gas,
            branch,
            taken: None,
            state,
        });

        let advance = match control {
            Control::Halt => Advance::Finished(path, PathEnd::Halted),
            Control::Continue => match node.fallthrough {
                Some(next) => Advance::Open(Frame { path, tag: next }),
                None => Advance::Finished(path, PathEnd::Halted),
            },
            Control::Jump { target } => match self.resolve(node, &target) {
                Ok(next) => Advance::Open(Frame { path, tag: next }),
                Err(err) => Advance::Dropped(path, err),
            },
            Control::Branch { target, condition } => {
                return self.branch(path, node, target, condition)
            }
        };
        Ok(vec![advance])
    }

    fn branch(
        &mut self,
        mut path: Path,
        node: &Node,
        target: Expr,
        condition: Expr,
    ) -> GasboundResult<Vec<Advance>> {
        let tag = node.tag;
        if path.occurrences(tag).len() >= 2 {
            if path.is_nested(tag) {
                let reason = format!("loop at {} encloses another loop", tag);
                return Ok(vec![Advance::Finished(path, PathEnd::Nested(reason))]);
            }
            match path.summarize_loop(tag, &mut self.registry, self.config) {
                Ok(LoopStatus::Summarized) => return Ok(vec![self.leave_loop(path, node, &target)]),
                Ok(LoopStatus::Unrolling) => {}
                Err(err) if err.is_path_local() => {
                    log_snapshots(&path, tag, &err);
                    return Ok(vec![Advance::Dropped(path, err)]);
                }
                Err(err) => return Err(err),
            }
        }

        let index = path.len() - 1;
        let mut advances = Vec::with_capacity(2);
        for (taken, guard) in [(true, condition.clone()), (false, Expr::not(condition))] {
            if guard.concrete_bool() == Some(false) {
                continue;
            }
            let mut child = path.clone();
            child.set_taken(taken);
            child.add_constraint(guard, Some(index));
            let advance = if taken {
                match self.resolve(node, &target) {
                    Ok(next) => Advance::Open(Frame {
                        path: child,
                        tag: next,
                    }),
                    Err(err) => Advance::Dropped(child, err),
                }
            } else {
                match node.fallthrough {
                    Some(next) => Advance::Open(Frame {
                        path: child,
                        tag: next,
                    }),
                    None => Advance::Finished(child, PathEnd::Halted),
                }
            };
            advances.push(advance);
        }
        Ok(advances)
    }

    /// Continue a summarized path on the exit side of its loop header
    fn leave_loop(&mut self, mut path: Path, node: &Node, target: &Expr) -> Advance {
        let Some(summary) = path.loops.last() else {
            let err = GasboundException::Internal(format!("loop at {} has no summary", node.tag));
            return Advance::Dropped(path, err);
        };
        let exit_taken = !summary.stay_taken;
        let exit = summary.formula.exit_constraint();

        path.set_taken(exit_taken);
        if let Some(exit) = exit {
            path.add_constraint(exit, None);
        }
        let next = if exit_taken {
            match self.resolve(node, target) {
                Ok(next) => Some(next),
                Err(err) => return Advance::Dropped(path, err),
            }
        } else {
            node.fallthrough
        };
        match next {
            Some(tag) => Advance::Open(Frame { path, tag }),
            None => Advance::Finished(path, PathEnd::Halted),
        }
    }

    /// Concrete targets must be `JUMPDEST` nodes; symbolic ones fall back
    /// to the node's static edge
    fn resolve(&self, node: &Node, target: &Expr) -> GasboundResult<usize> {
        let pc = node.opcodes.last().map(|o| o.pc).unwrap_or(node.tag);
        match target.as_word() {
            Some(value) => {
                let target = value.to_usize().unwrap_or(usize::MAX);
                if self.cfg.is_jumpdest(target) {
                    Ok(target)
                } else {
                    Err(GasboundException::InvalidJump { pc, target })
                }
            }
            None => match node.jump_target {
                Some(target) => Ok(target),
                None => {
                    warn_code(
                        ErrorCode::UnresolvedJump,
                        &format!("symbolic jump target {} at pc {}", target, pc),
                    );
                    Err(GasboundException::UnresolvedJump { pc })
                }
            },
        }
    }

    /// Solve every finished path and collect the report
    pub fn run(&mut self, ctx: &Context) -> GasboundResult<ExplorationReport> {
        let exploration = self.explore()?;
        let mut report = ExplorationReport::default();

        for (path, err) in exploration.dropped {
            report.dropped.push(DroppedPath {
                tags: path.tags(),
                kind: err.kind(),
                reason: err.to_string(),
            });
        }

        for (path, end) in exploration.finished {
            let outcome = match end {
                PathEnd::Halted => match self.solve(ctx, &path) {
                    Ok(outcome) => outcome,
                    Err(err) if err.is_path_local() => {
                        warn_code(ErrorCode::SolverError, &err.to_string());
                        report.dropped.push(DroppedPath {
                            tags: path.tags(),
                            kind: err.kind(),
                            reason: err.to_string(),
                        });
                        continue;
                    }
                    Err(err) => return Err(err),
                },
                PathEnd::Limit(reason) => {
                    warn_code(ErrorCode::ExplorationLimit, &reason);
                    PathOutcome::Unbound { reason }
                }
                PathEnd::Nested(reason) => PathOutcome::Unbound { reason },
            };

            if let Some(gas) = outcome.gas() {
                if report.max_gas.as_ref().map_or(true, |max| gas > max) {
                    report.max_gas = Some(gas.clone());
                }
            }
            let id = report.paths.len();
            report.paths.push(PathReport {
                id,
                tags: path.tags(),
                constraints: path
                    .constraints
                    .iter()
                    .map(|c| c.expr.to_string())
                    .collect(),
                gas_expr: path.gas.to_string(),
                loops: path.loops.iter().map(loop_report).collect(),
                outcome,
            });
        }
        Ok(report)
    }

    fn solve(&mut self, ctx: &Context, path: &Path) -> GasboundResult<PathOutcome> {
        let constraints = path.constraint_exprs();
        let mut solver = GasSolver::new(
            ctx,
            &constraints,
            &path.gas,
            self.config.solver_timeout_ms,
        )?;

        let (feasibility, base_model) = solver.check_model();
        if feasibility == SatResult::Unsat {
            return self.solve_beyond_bound(ctx, path);
        }

        let search = solver.solve_max_gas(self.config)?;
        let model = match (search.model, base_model) {
            (Some(model), _) | (None, Some(model)) => model,
            (None, None) => {
                return Ok(PathOutcome::Unbound {
                    reason: "solver could not decide the path constraints".into(),
                })
            }
        };

        let class = if search.status == SearchStatus::RoundLimit {
            GasClass::Unbound
        } else if path.gas.is_constant() {
            GasClass::Constant
        } else {
            let ceiling = Expr::from_biguint(BigUint::from(self.config.loop_bound.saturating_sub(1)));
            let mut saturated = false;
            for counter in path.loop_counters() {
                let at_ceiling = Expr::cmp(CmpOp::Eq, counter.clone(), ceiling.clone());
                if solver.check_with(&at_ceiling)? == SatResult::Sat {
                    tracing::debug!("{} can reach the loop bound", counter);
                    saturated = true;
                    break;
                }
            }
            if saturated {
                GasClass::Unbound
            } else {
                GasClass::Bound
            }
        };

        let gas = match self.replay_gas(path, &model) {
            Ok(gas) => gas,
            Err(err) => {
                tracing::warn!("replay of {:?} failed: {}", path.tags(), err);
                path.gas.evaluate(&model)
            }
        };
        tracing::debug!("path {:?}: {} gas, {}", path.tags(), gas, class);

        Ok(PathOutcome::Solved {
            class,
            gas,
            threshold: search.threshold,
            search: search.status,
            model,
        })
    }

    /// An unsat path whose loops need at least `loop_bound` iterations is
    /// solved without the counter caps and classified `UNBOUND`. Its gas is
    /// the summarized expression under the model, without replay.
    fn solve_beyond_bound(&self, ctx: &Context, path: &Path) -> GasboundResult<PathOutcome> {
        if path.loops.is_empty() {
            return Ok(PathOutcome::Infeasible);
        }
        let constraints = path.uncapped_constraint_exprs();
        let solver = GasSolver::new(
            ctx,
            &constraints,
            &path.gas,
            self.config.solver_timeout_ms,
        )?;
        let (feasibility, base_model) = solver.check_model();
        if feasibility == SatResult::Unsat {
            return Ok(PathOutcome::Infeasible);
        }

        let headers: Vec<String> = path.loops.iter().map(|l| l.header.to_string()).collect();
        warn_code(
            ErrorCode::ExplorationLimit,
            &format!(
                "loop at {} exceeds loop bound {}",
                headers.join(", "),
                self.config.loop_bound
            ),
        );

        let search = solver.solve_max_gas(self.config)?;
        let Some(model) = search.model.or(base_model) else {
            return Ok(PathOutcome::Unbound {
                reason: format!("loop at {} exceeds loop bound", headers.join(", ")),
            });
        };
        let gas = path.gas.evaluate(&model);
        tracing::debug!("path {:?}: {} gas beyond the loop bound", path.tags(), gas);

        Ok(PathOutcome::Solved {
            class: GasClass::Unbound,
            gas,
            threshold: search.threshold,
            search: search.status,
            model,
        })
    }

    /// Re-execute the path with loop bodies repeated as the model says and
    /// evaluate each node's gas under the model
    fn replay_gas(&mut self, path: &Path, model: &Model) -> GasboundResult<BigUint> {
        let cfg = self.cfg;
        let mut interpreter = Interpreter::new(&mut self.registry);
        let mut state = SymbolicState::new();
        let mut total = BigUint::zero();
        for tag in path.replay_tags(model)? {
            let node = cfg.node(tag).ok_or_else(|| {
                GasboundException::Internal(format!("replay enters unknown node {}", tag))
            })?;
            let run = interpreter.run_node(&state, node)?;
            total += run.gas.evaluate(model);
            state = run.state;
        }
        Ok(total)
    }
}

fn loop_report(summary: &LoopSummary) -> LoopReport {
    let ranking = match RankingContext::new(summary.header, &summary.formula) {
        Ok(ranking) => Some(ranking),
        Err(err) => {
            warn_code(ErrorCode::RankingFunction, &err.to_string());
            None
        }
    };
    LoopReport {
        header: summary.header,
        counter: summary.counter.to_string(),
        guard: summary.formula.guard.to_string(),
        per_iteration: summary.per_iteration.to_string(),
        ranking,
    }
}

/// Dump every header occurrence of a loop that could not be summarized
fn log_snapshots(path: &Path, tag: usize, err: &GasboundException) {
    warn_code(
        ErrorCode::LoopSynthesis,
        &format!("loop at {} not summarized: {}", tag, err),
    );
    for (iteration, index) in path.occurrences(tag).into_iter().enumerate() {
        let step = &path.steps[index];
        let guard = step
            .branch
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_else(|| "-".to_string());
        tracing::error!(
            "  iteration {} (step {}): guard {}\n{}",
            iteration,
            index,
            guard,
            step.state
        );
    }
}

/// Explore `cfg`, solve every halted path and report
pub fn analyze(cfg: &Cfg, config: &AnalysisConfig) -> GasboundResult<ExplorationReport> {
    let ctx = gasbound_solver::new_context();
    Explorer::new(cfg, config).run(&ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gasbound_cfg::parse_listing;

    fn cfg(listing: &str) -> Cfg {
        Cfg::from_opcodes(&parse_listing(listing).unwrap()).unwrap()
    }

    #[test]
    fn test_branch_forks_both_sides() {
        let cfg = cfg("0: CALLVALUE
1: PUSH1 0x06
3: JUMPI
4: PUSH0
5: STOP
6: JUMPDEST
7: STOP
");
        let config = AnalysisConfig::default();
        let mut explorer = Explorer::new(&cfg, &config);
        let exploration = explorer.explore().unwrap();
        assert!(exploration.dropped.is_empty());

        let mut tags: Vec<Vec<usize>> = exploration
            .finished
            .iter()
            .map(|(p, _)| p.tags())
            .collect();
        tags.sort();
        assert_eq!(tags, vec![vec![0, 4], vec![0, 6]]);
        for (path, end) in &exploration.finished {
            assert_eq!(*end, PathEnd::Halted);
            assert_eq!(path.constraints.len(), 1);
            assert_eq!(path.constraints[0].origin, Some(0));
        }
    }

    #[test]
    fn test_concrete_branch_is_not_forked() {
        let cfg = cfg("0: PUSH1 0x01
2: PUSH1 0x06
4: JUMPI
5: STOP
6: JUMPDEST
7: STOP
");
        let config = AnalysisConfig::default();
        let exploration = Explorer::new(&cfg, &config).explore().unwrap();
        assert_eq!(exploration.finished.len(), 1);
        assert_eq!(exploration.finished[0].0.tags(), vec![0, 6]);
        assert!(exploration.finished[0].0.constraints.is_empty());
    }

    #[test]
    fn test_invalid_jump_drops_path() {
        let cfg = cfg("0: PUSH1 0x05
2: JUMP
3: STOP
");
        let config = AnalysisConfig::default();
        let exploration = Explorer::new(&cfg, &config).explore().unwrap();
        assert!(exploration.finished.is_empty());
        assert_eq!(
            exploration.dropped[0].1,
            GasboundException::InvalidJump { pc: 2, target: 5 }
        );
    }

    #[test]
    fn test_stack_underflow_drops_path() {
        let cfg = cfg("0: ADD
1: STOP
");
        let config = AnalysisConfig::default();
        let report = analyze(&cfg, &config).unwrap();
        assert!(report.paths.is_empty());
        assert_eq!(report.dropped_counts().get("stack-underflow"), Some(&1));
    }

    #[test]
    fn test_depth_limit_ends_path() {
        // JUMPDEST loop without a guard: walked until the depth ceiling
        let cfg = cfg("0: JUMPDEST
1: PUSH1 0x00
3: JUMP
");
        let config = AnalysisConfig {
            max_depth: 5,
            ..AnalysisConfig::default()
        };
        let report = analyze(&cfg, &config).unwrap();
        assert_eq!(report.paths.len(), 1);
        assert_eq!(report.paths[0].tags.len(), 5);
        assert!(matches!(
            report.paths[0].outcome,
            PathOutcome::Unbound { .. }
        ));
    }

    #[test]
    fn test_path_limit_ends_forks() {
        let cfg = cfg("0: CALLVALUE
1: PUSH1 0x06
3: JUMPI
4: PUSH0
5: STOP
6: JUMPDEST
7: STOP
");
        let config = AnalysisConfig {
            max_paths: 1,
            ..AnalysisConfig::default()
        };
        let report = analyze(&cfg, &config).unwrap();
        assert_eq!(report.paths.len(), 2);
        assert_eq!(report.count(GasClass::Unbound), 1);
        assert_eq!(report.count(GasClass::Constant), 1);
    }

    #[test]
    fn test_class_display() {
        assert_eq!(GasClass::Constant.to_string(), "CONSTANT");
        assert_eq!(GasClass::Bound.to_string(), "BOUND");
        assert_eq!(GasClass::Unbound.to_string(), "UNBOUND");
    }
}
