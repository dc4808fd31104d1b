// SPDX-License-Identifier: AGPL-3.0

use gasbound_config::AnalysisConfig;
use gasbound_expr::{BinaryOp, CmpOp, Expr, GasExpr, VariableRegistry};
use gasbound_solver::{new_context, GasSolver, SatResult, SearchStatus};
use num_bigint::BigUint;

fn loop_gas(registry: &mut VariableRegistry) -> (Vec<Expr>, GasExpr) {
    let k = registry.var("loop_2");
    let constraints = vec![
        Expr::cmp(CmpOp::Uge, k.clone(), Expr::word(1)),
        Expr::cmp(CmpOp::Ult, k.clone(), Expr::word(1024)),
    ];
    let gas = GasExpr::constant(30).plus(&GasExpr::scaled(k, GasExpr::constant(50)));
    (constraints, gas)
}

#[test]
fn test_constant_gas_converges() {
    let ctx = new_context();
    let solver = GasSolver::new(&ctx, &[], &GasExpr::constant(29), 10_000).unwrap();
    let outcome = solver.solve_max_gas(&AnalysisConfig::default()).unwrap();

    assert_eq!(outcome.status, SearchStatus::Converged);
    assert_eq!(outcome.threshold, Some(0));
    assert!(outcome.model.is_some());
}

#[test]
fn test_loop_gas_search() {
    let ctx = new_context();
    let mut registry = VariableRegistry::new();
    let (constraints, gas) = loop_gas(&mut registry);

    let solver = GasSolver::new(&ctx, &constraints, &gas, 10_000).unwrap();
    let outcome = solver.solve_max_gas(&AnalysisConfig::default()).unwrap();

    assert_eq!(outcome.status, SearchStatus::Converged);
    assert_eq!(outcome.threshold, Some(50_000));
    let model = outcome.model.unwrap();
    assert!(gas.evaluate(&model) > BigUint::from(50_000u32));
    assert!(gas.evaluate(&model) <= BigUint::from(30 + 50 * 1023u32));
}

#[test]
fn test_search_is_monotone() {
    let ctx = new_context();
    let mut registry = VariableRegistry::new();
    let (constraints, gas) = loop_gas(&mut registry);
    let solver = GasSolver::new(&ctx, &constraints, &gas, 10_000).unwrap();

    let mut first_unsat = None;
    for threshold in (0..100_000u64).step_by(7_500) {
        let (result, _) = solver.check_above(threshold);
        match result {
            SatResult::Sat => assert!(first_unsat.is_none(), "sat above an unsat threshold"),
            SatResult::Unsat => {
                first_unsat.get_or_insert(threshold);
            }
            SatResult::Unknown => panic!("unexpected unknown"),
        }
    }
    assert!(first_unsat.is_some());
}

#[test]
fn test_infeasible_path_has_no_model() {
    let ctx = new_context();
    let mut registry = VariableRegistry::new();
    let x = registry.var("x");
    let constraints = vec![
        Expr::cmp(CmpOp::Ult, x.clone(), Expr::word(5)),
        Expr::cmp(CmpOp::Ugt, x, Expr::word(10)),
    ];
    let solver = GasSolver::new(&ctx, &constraints, &GasExpr::constant(100), 10_000).unwrap();
    assert_eq!(solver.check(), SatResult::Unsat);

    let outcome = solver.solve_max_gas(&AnalysisConfig::default()).unwrap();
    assert!(outcome.model.is_none());
    assert_eq!(outcome.threshold, None);
}

#[test]
fn test_round_limit_keeps_last_model() {
    let ctx = new_context();
    let mut registry = VariableRegistry::new();
    let (constraints, gas) = loop_gas(&mut registry);
    let config = AnalysisConfig {
        gas_step: 1,
        max_search_rounds: 3,
        ..AnalysisConfig::default()
    };

    let solver = GasSolver::new(&ctx, &constraints, &gas, 10_000).unwrap();
    let outcome = solver.solve_max_gas(&config).unwrap();
    assert_eq!(outcome.status, SearchStatus::RoundLimit);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(outcome.threshold, Some(2));
    assert!(outcome.model.is_some());
}

#[test]
fn test_check_with_restores_scope() {
    let ctx = new_context();
    let mut registry = VariableRegistry::new();
    let x = registry.var("x");
    let constraints = vec![Expr::cmp(CmpOp::Ult, x.clone(), Expr::word(5))];
    let mut solver = GasSolver::new(&ctx, &constraints, &GasExpr::constant(1), 10_000).unwrap();

    let contradiction = Expr::cmp(CmpOp::Eq, x, Expr::word(7));
    assert_eq!(solver.check_with(&contradiction).unwrap(), SatResult::Unsat);
    assert_eq!(solver.check(), SatResult::Sat);
}

#[test]
fn test_division_by_zero_is_zero() {
    let ctx = new_context();
    let mut registry = VariableRegistry::new();
    let x = registry.var("x");
    let quotient = Expr::binary(BinaryOp::Div, x, Expr::word(0));
    let mut solver = GasSolver::new(&ctx, &[], &GasExpr::constant(1), 10_000).unwrap();

    let nonzero = Expr::cmp(CmpOp::Ne, quotient, Expr::word(0));
    assert_eq!(solver.check_with(&nonzero).unwrap(), SatResult::Unsat);
}

#[test]
fn test_wide_model_values() {
    let ctx = new_context();
    let mut registry = VariableRegistry::new();
    let x = registry.var("x");
    let big = BigUint::from(1u8) << 255;
    let constraints = vec![Expr::cmp(CmpOp::Eq, x, Expr::from_biguint(big.clone()))];

    let solver = GasSolver::new(&ctx, &constraints, &GasExpr::constant(5), 10_000).unwrap();
    let (result, model) = solver.check_above(0);
    assert_eq!(result, SatResult::Sat);
    assert_eq!(model.unwrap().get("x"), Some(&big));
}

#[test]
fn test_zero_gas_path_still_has_model() {
    let ctx = new_context();
    let mut registry = VariableRegistry::new();
    let x = registry.var("calldata_0");
    let constraints = vec![Expr::cmp(CmpOp::Eq, x, Expr::word(7))];
    let solver = GasSolver::new(&ctx, &constraints, &GasExpr::zero(), 10_000).unwrap();

    let outcome = solver.solve_max_gas(&AnalysisConfig::default()).unwrap();
    assert!(outcome.model.is_none());

    let (result, model) = solver.check_model();
    assert_eq!(result, SatResult::Sat);
    assert_eq!(
        model.unwrap().get("calldata_0"),
        Some(&BigUint::from(7u8))
    );
}
