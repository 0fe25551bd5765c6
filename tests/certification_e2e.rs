//! End-to-end certification runs against the in-memory reference engine.

mod common;

use std::sync::Arc;

use engine_cert_harness::core::config::HarnessConfig;
use engine_cert_harness::engine::{EngineFaults, MemoryEngine};
use engine_cert_harness::scenario::isolation::IsolationScenario;
use engine_cert_harness::scenario::ledger::{Invoice, PostOutcome, post_invoice};
use engine_cert_harness::scenario::{ScenarioContext, ScenarioState, drive};
use engine_cert_harness::scorecard::{Category, Gate, GateResult, Grade, Scorecard};

fn gate(card: &Scorecard, id: Gate) -> &GateResult {
    card.gate_results
        .iter()
        .find(|g| g.id == id)
        .expect("every gate is reported")
}

fn assert_tripped(card: &Scorecard, id: Gate) {
    let result = gate(card, id);
    assert!(!result.pass, "{id:?} should fail: {result:?}");
    assert!(
        result.observed_value.is_some_and(|v| v > 0.0),
        "{id:?} should have positive evidence: {result:?}"
    );
}

fn faulted(configure: impl FnOnce(&mut EngineFaults)) -> EngineFaults {
    let mut faults = EngineFaults::default();
    configure(&mut faults);
    faults
}

// ──────────────────── full runs ────────────────────

#[test]
fn reference_engine_passes_full_certification() {
    let mut config = HarnessConfig::default();
    config.run.seed = 42;
    let card = common::certify(&config, EngineFaults::default(), &[]);

    assert_eq!(card.scenario_scores.len(), 10);
    for result in &card.gate_results {
        assert!(result.pass, "{result:?}");
    }
    assert!(card.overall.gate_pass);
    assert!(
        card.overall.score_0_100 >= config.run.pass_threshold,
        "{}",
        card.summary_line()
    );
    assert!(card.overall.pass);
    assert_ne!(card.overall.grade, Grade::F);
    assert_eq!(card.exit_code(), 0);
    for (id, score) in &card.scenario_scores {
        assert_eq!(score.state, ScenarioState::Passed, "{id}: {:?}", score.error);
    }
    assert!(card.usage.calls > 0);
}

#[test]
fn same_seed_gives_same_fixtures_and_verdicts() {
    let config = common::small_config(2024);
    let selection = ["isolation", "ranking", "temporal", "policy"];
    let a = common::certify(&config, EngineFaults::default(), &selection);
    let b = common::certify(&config, EngineFaults::default(), &selection);

    let verdicts = |card: &Scorecard| {
        card.gate_results
            .iter()
            .map(|g| (g.id, g.pass, g.observed_value))
            .collect::<Vec<_>>()
    };
    assert_eq!(verdicts(&a), verdicts(&b));

    let quality = |card: &Scorecard| {
        card.metric_scores
            .iter()
            .filter(|m| m.category == Category::Quality)
            .map(|m| (m.name.clone(), m.observed))
            .collect::<Vec<_>>()
    };
    assert_eq!(quality(&a), quality(&b));
    assert_eq!(a.run_meta.config_hash, b.run_meta.config_hash);
}

#[test]
fn different_seeds_change_the_config_hash() {
    let a = common::small_config(1);
    let b = common::small_config(2);
    assert_ne!(a.stable_hash().unwrap(), b.stable_hash().unwrap());
}

// ──────────────────── injected faults ────────────────────

#[test]
fn namespace_leak_trips_g1() {
    let faults = faulted(|f| f.leak_across_namespaces = true);
    let card = common::certify(&common::small_config(3), faults, &["isolation"]);
    assert_tripped(&card, Gate::Leakage);
    assert_eq!(card.overall.grade, Grade::F);
    assert_eq!(card.exit_code(), 4);
}

#[test]
fn partial_rollback_trips_g2() {
    let faults = faulted(|f| f.partial_rollback = true);
    let card = common::certify(&common::small_config(3), faults, &["atomicity"]);
    assert_tripped(&card, Gate::Atomicity);
}

#[test]
fn blind_transaction_reads_trip_g2_and_g3() {
    let faults = faulted(|f| f.blind_transaction_reads = true);
    let card = common::certify(&common::small_config(3), faults, &["atomicity", "ledger"]);
    assert_tripped(&card, Gate::Atomicity);
    assert_tripped(&card, Gate::DoublePost);
}

#[test]
fn stale_time_travel_trips_g4() {
    let faults = faulted(|f| f.stale_time_travel = true);
    let card = common::certify(&common::small_config(3), faults, &["temporal"]);
    assert_tripped(&card, Gate::TimeTravel);
}

#[test]
fn lost_unflushed_writes_trip_g5() {
    let faults = faulted(|f| f.lose_unflushed_writes = true);
    let card = common::certify(&common::small_config(3), faults, &["crash_recovery"]);
    assert_tripped(&card, Gate::CrashConsistency);
}

#[test]
fn unexplained_denies_trip_g7() {
    let faults = faulted(|f| f.unexplained_denies = true);
    let card = common::certify(&common::small_config(3), faults, &["policy"]);
    assert_tripped(&card, Gate::SchemaValidation);
}

#[test]
fn a_single_fault_fails_an_otherwise_clean_run() {
    let mut config = HarnessConfig::default();
    config.run.seed = 42;
    let faults = faulted(|f| f.unexplained_denies = true);
    let card = common::certify(&config, faults, &[]);
    let failed: Vec<Gate> = card.failed_gates().iter().map(|g| g.id).collect();
    assert_eq!(failed, vec![Gate::SchemaValidation]);
    assert!(!card.overall.pass);
    assert_eq!(card.overall.grade, Grade::F);
}

// ──────────────────── scenario contracts ────────────────────

#[test]
fn three_tenants_of_ten_documents_never_leak() {
    let env = common::run_env(Arc::new(MemoryEngine::new()), 9);
    let report = drive(IsolationScenario::with_shape(3, 10), &env);
    assert!(report.passed(), "{:?}", report.metrics.notes);
    assert_eq!(report.metrics.counter("leakage_count"), Some(0));
    assert_eq!(report.trace.last(), Some(&ScenarioState::TornDown));
    let tenants = report
        .metrics
        .mutations
        .iter()
        .filter(|m| m.operation == "create_namespace")
        .count();
    assert_eq!(tenants, 3);
    assert_eq!(report.metrics.audit_coverage(), Some(1.0));
}

#[test]
fn reposting_an_invoice_is_idempotent() {
    let env = common::run_env(Arc::new(MemoryEngine::new()), 9);
    let mut ctx = ScenarioContext::new("ledger", env);
    let handle = ctx.create_namespace("books").unwrap();
    let invoice = Invoice {
        id: "INV-00042".into(),
        vendor: "globex".into(),
        amount_cents: 12_500,
    };

    assert_eq!(
        post_invoice(&mut ctx, &handle, &invoice, 0).unwrap(),
        PostOutcome::Posted
    );
    assert_eq!(
        post_invoice(&mut ctx, &handle, &invoice, 1).unwrap(),
        PostOutcome::Duplicate
    );
    assert_eq!(handle.scan_prefix("entry/INV-00042/").unwrap().len(), 1);
    ctx.release_namespaces().unwrap();
}

#[test]
fn gates_tolerate_nothing() {
    let faults = faulted(|f| f.leak_across_namespaces = true);
    let card = common::certify(&common::small_config(5), faults, &["isolation"]);
    let g1 = gate(&card, Gate::Leakage);
    assert_eq!(g1.threshold, 0.0);
    // Quality credit does not rescue a failed gate.
    assert!(!card.overall.pass);
    assert!(card.summary_line().starts_with("FAIL"));
    assert!(card.summary_line().contains("G1"));
}
