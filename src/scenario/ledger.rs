//! Idempotent invoice posting.
//!
//! Each post runs in a transaction that first looks up the invoice's
//! idempotency key. Every attempt writes its entry under a distinct key, so
//! an engine that lets a retry through leaves a second durable entry behind
//! where verification can count it.

use std::collections::BTreeMap;

use rand::Rng;

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::{HarnessError, Result};
use crate::engine::NamespaceHandle;
use crate::generator::SyntheticGenerator;
use crate::generator::rng::substream;
use crate::metrics::ScenarioMetrics;

/// Invoices posted a second time, from the front of the list.
const REPOSTED: usize = 10;
const MAX_RETRIES: u32 = 3;
const VENDORS: &[&str] = &["acme", "globex", "initech", "umbrella", "hooli"];

/// Invoice posting is idempotent.
#[derive(Debug, Clone, Default)]
pub struct LedgerScenario;

/// An invoice to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    /// Idempotency key.
    pub id: String,
    /// Vendor the invoice is from.
    pub vendor: String,
    /// Amount in cents.
    pub amount_cents: u64,
}

impl Invoice {
    fn record_key(&self) -> String {
        format!("invoice/{}", self.id)
    }

    fn idempotency_key(&self) -> String {
        format!("posted/{}", self.id)
    }

    fn entry_prefix(&self) -> String {
        format!("entry/{}/", self.id)
    }
}

/// Result of one posting attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// The entry was written.
    Posted,
    /// The idempotency key was already present; nothing written.
    Duplicate,
    /// Conflicts outlasted the retry budget.
    Aborted,
}

/// Post one invoice. `attempt` makes the entry key unique per call.
pub fn post_invoice(
    ctx: &mut ScenarioContext,
    handle: &NamespaceHandle,
    invoice: &Invoice,
    attempt: usize,
) -> Result<PostOutcome> {
    let entry_key = format!("{}{attempt:06}", invoice.entry_prefix());
    let entry = format!("{}|{}|{}", invoice.id, invoice.vendor, invoice.amount_cents);
    for _ in 0..=MAX_RETRIES {
        let txn = handle.begin()?;
        if handle.txn_get(txn, &invoice.idempotency_key())?.is_some() {
            ctx.mutate("rollback", &txn.to_string(), || handle.rollback(txn))?;
            return Ok(PostOutcome::Duplicate);
        }
        handle.txn_put(txn, &invoice.idempotency_key(), entry_key.as_bytes())?;
        handle.txn_put(txn, &entry_key, entry.as_bytes())?;
        match ctx.mutate_raw("post", &invoice.id, || handle.commit(txn)) {
            Ok(()) => return Ok(PostOutcome::Posted),
            Err(err) if err.is_conflict() => ctx.metrics().incr("ledger_conflicts", 1),
            Err(err) => return Err(HarnessError::engine("commit", err)),
        }
    }
    Ok(PostOutcome::Aborted)
}

/// Invoices and how often each is reposted.
#[derive(Debug, Clone)]
pub struct LedgerFixtures {
    /// Invoices in posting order.
    pub invoices: Vec<Invoice>,
    /// Extra attempts per invoice.
    pub reposts: usize,
}

/// The ledger namespace and the posting plan.
#[derive(Debug)]
pub struct LedgerWorkingSet {
    handle: NamespaceHandle,
    invoices: Vec<Invoice>,
    reposts: usize,
}

/// Every posting attempt and its outcome.
#[derive(Debug, Clone, Default)]
pub struct LedgerResults {
    /// `(invoice id, outcome)` in attempt order.
    pub attempts: Vec<(String, PostOutcome)>,
    /// Durable entries per invoice id, read back after all posts.
    pub durable: BTreeMap<String, usize>,
}

impl Scenario for LedgerScenario {
    type Fixtures = LedgerFixtures;
    type WorkingSet = LedgerWorkingSet;
    type RawResults = LedgerResults;

    fn id(&self) -> &'static str {
        "ledger"
    }

    fn description(&self) -> &'static str {
        "idempotent invoice posting; a re-post must never create a second entry"
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams) -> Result<Self::Fixtures> {
        let invoices = (0..scale.invoices)
            .map(|i| {
                let mut rng = substream(generator.seed(), "invoice", &[i as u64]);
                Invoice {
                    id: format!("INV-{i:05}"),
                    vendor: VENDORS[rng.random_range(0..VENDORS.len())].to_string(),
                    amount_cents: rng.random_range(1_000..5_000_000),
                }
            })
            .collect::<Vec<_>>();
        Ok(LedgerFixtures {
            reposts: REPOSTED.min(invoices.len()),
            invoices,
        })
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let handle = ctx.create_namespace("books")?;
        for invoice in &fixtures.invoices {
            let key = invoice.record_key();
            let body = format!("{}|{}", invoice.vendor, invoice.amount_cents);
            ctx.mutate("put", &key, || handle.put(&key, body.as_bytes()))?;
        }
        Ok(LedgerWorkingSet {
            handle,
            invoices: fixtures.invoices.clone(),
            reposts: fixtures.reposts,
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let mut out = LedgerResults::default();
        let replays = ws.invoices.iter().take(ws.reposts);
        for (attempt, invoice) in ws.invoices.iter().chain(replays).enumerate() {
            ctx.check_deadline()?;
            let outcome = post_invoice(ctx, &ws.handle, invoice, attempt)?;
            out.attempts.push((invoice.id.clone(), outcome));
        }
        for invoice in &ws.invoices {
            let entries = ws.handle.scan_prefix(&invoice.entry_prefix())?;
            out.durable.insert(invoice.id.clone(), entries.len());
        }
        Ok(out)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        metrics.observe("double_post_count");
        metrics.observe("duplicate_post_attempts");

        for (_, outcome) in &raw.attempts {
            match outcome {
                PostOutcome::Posted => metrics.incr("ledger_posts", 1),
                PostOutcome::Duplicate => metrics.incr("duplicate_post_attempts", 1),
                PostOutcome::Aborted => metrics.incr("ledger_aborts", 1),
            }
        }

        let mut missing = 0_u64;
        for invoice in &fixtures.invoices {
            let count = raw.durable.get(&invoice.id).copied().unwrap_or(0);
            if count > 1 {
                metrics.incr("double_post_count", (count - 1) as u64);
                metrics.note(format!("{} posted {count} times", invoice.id));
            }
            if count == 0 {
                missing += 1;
            }
        }
        metrics.incr("ledger_missing_entries", missing);
        let entries: usize = raw.durable.values().sum();
        metrics.flag("ledger_matches_invoices", entries == fixtures.invoices.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::engine::{EngineFaults, MemoryEngine};
    use crate::scenario::drive;
    use crate::scenario::testing::{env_with_engine, test_env};

    fn invoice() -> Invoice {
        Invoice {
            id: "INV-00001".into(),
            vendor: "acme".into(),
            amount_cents: 4_200,
        }
    }

    #[test]
    fn second_post_is_a_duplicate_and_leaves_one_entry() {
        let mut ctx = ScenarioContext::new("ledger", test_env(Duration::from_secs(10)));
        let handle = ctx.create_namespace("books").unwrap();
        let inv = invoice();
        assert_eq!(post_invoice(&mut ctx, &handle, &inv, 0).unwrap(), PostOutcome::Posted);
        assert_eq!(post_invoice(&mut ctx, &handle, &inv, 1).unwrap(), PostOutcome::Duplicate);
        assert_eq!(handle.scan_prefix(&inv.entry_prefix()).unwrap().len(), 1);
    }

    #[test]
    fn clean_run_has_no_double_posts() {
        let report = drive(LedgerScenario, &test_env(Duration::from_secs(30)));
        assert!(report.passed(), "{:?}", report.metrics.notes);
        let m = &report.metrics;
        assert_eq!(m.counter("double_post_count"), Some(0));
        assert_eq!(m.counter("duplicate_post_attempts"), Some(REPOSTED as u64));
        assert_eq!(m.counter("ledger_missing_entries"), Some(0));
        assert_eq!(m.flags.get("ledger_matches_invoices"), Some(&true));
        assert_eq!(m.audit_coverage(), Some(1.0));
    }

    #[test]
    fn blind_reads_let_duplicates_through() {
        let engine = Arc::new(MemoryEngine::with_faults(EngineFaults {
            blind_transaction_reads: true,
            ..EngineFaults::default()
        }));
        let report = drive(LedgerScenario, &env_with_engine(engine, Duration::from_secs(30)));
        assert!(!report.passed());
        assert_eq!(report.metrics.counter("double_post_count"), Some(REPOSTED as u64));
    }
}
