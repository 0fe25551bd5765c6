//! Multi-key transactions: committed writes become visible together,
//! rolled-back writes never do, and conflicting pairs resolve by retry.

#![allow(clippy::cast_precision_loss)]

use rand::Rng;

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::{HarnessError, Result};
use crate::engine::{NamespaceHandle, TxnId};
use crate::generator::SyntheticGenerator;
use crate::generator::rng::substream;
use crate::metrics::ScenarioMetrics;

/// Retries a conflicting transaction gets before it counts as aborted.
const MAX_RETRIES: u32 = 3;
/// One in this many transaction pairs writes a shared key.
const CONFLICT_EVERY: usize = 10;
const READ_BACK_KEYS: usize = 8;

type Writes = Vec<(String, String)>;

/// Transactions are all-or-nothing and conflicts are detected.
#[derive(Debug, Clone, Default)]
pub struct AtomicityScenario;

/// One planned transaction.
#[derive(Debug, Clone)]
pub struct TxnPlan {
    /// Plan index.
    pub id: usize,
    /// Keys and values it stages.
    pub writes: Writes,
    /// Abort by rollback after this many writes.
    pub abort_after: Option<usize>,
}

/// Two transactions started together; one may conflict with the other.
#[derive(Debug, Clone)]
pub struct ConflictPair {
    /// Pair index.
    pub id: usize,
    /// Writes of the transaction that commits first.
    pub first: Writes,
    /// Writes of the transaction that commits second.
    pub second: Writes,
    /// Whether both write a shared key.
    pub overlapping: bool,
}

/// Plans, pairs and the baseline they read.
#[derive(Debug, Clone)]
pub struct AtomicityFixtures {
    /// Single transactions.
    pub plans: Vec<TxnPlan>,
    /// Concurrent pairs.
    pub pairs: Vec<ConflictPair>,
    /// Committed before any transaction starts; transactions must read them.
    pub baseline: Writes,
}

/// Namespace and plans, ready to run.
#[derive(Debug)]
pub struct AtomicityWorkingSet {
    handle: NamespaceHandle,
    plans: Vec<TxnPlan>,
    pairs: Vec<ConflictPair>,
    baseline_keys: Vec<String>,
}

/// What a single transaction left behind.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// Plan index.
    pub id: usize,
    /// Whether the commit was acknowledged.
    pub committed: bool,
    /// Values read back per staged key.
    pub visible: Vec<Option<String>>,
}

/// What a concurrent pair left behind.
#[derive(Debug, Clone)]
pub struct PairOutcome {
    /// Pair index.
    pub id: usize,
    /// Whether the first commit was acknowledged.
    pub first_committed: bool,
    /// Whether the second commit was acknowledged.
    pub second_committed: bool,
    /// The first side's keys, read back after both sides finished.
    pub visible_first: Vec<Option<String>>,
    /// The second side's keys, read back after both sides finished.
    pub visible_second: Vec<Option<String>>,
}

/// Everything the transactions observed.
#[derive(Debug, Clone, Default)]
pub struct AtomicityResults {
    /// Per plan.
    pub plans: Vec<PlanOutcome>,
    /// Per pair.
    pub pairs: Vec<PairOutcome>,
    /// Baseline keys read inside a transaction.
    pub reads_in_txn: Vec<(String, Option<String>)>,
    /// Commit calls issued.
    pub commits_attempted: u64,
    /// Commits refused with a conflict.
    pub conflicts: u64,
    /// Retries after a conflict.
    pub retries: u64,
    /// Transactions rolled back.
    pub aborted: u64,
    /// Transactions begun.
    pub transactions: u64,
}

fn text(bytes: Option<Vec<u8>>) -> Option<String> {
    bytes.map(|b| String::from_utf8_lossy(&b).into_owned())
}

fn read_back(handle: &NamespaceHandle, writes: &Writes) -> Result<Vec<Option<String>>> {
    writes
        .iter()
        .map(|(key, _)| handle.get(key).map(text))
        .collect()
}

fn stage(handle: &NamespaceHandle, txn: TxnId, writes: &[(String, String)]) -> Result<()> {
    for (key, value) in writes {
        handle.txn_put(txn, key, value.as_bytes())?;
    }
    Ok(())
}

impl AtomicityScenario {
    /// Commit through the audit trail; conflicts come back as `Ok(false)`.
    fn commit(
        ctx: &mut ScenarioContext,
        handle: &NamespaceHandle,
        txn: TxnId,
        out: &mut AtomicityResults,
    ) -> Result<bool> {
        out.commits_attempted += 1;
        let id = ctx.metrics().mutation("commit", &txn.to_string());
        let result = ctx.timed("txn_commit", || handle.commit(txn));
        match result {
            Ok(()) => {
                ctx.metrics().audit(id, "ok");
                Ok(true)
            }
            Err(err) if err.is_conflict() => {
                ctx.metrics().audit(id, "conflict");
                out.conflicts += 1;
                Ok(false)
            }
            Err(err) => Err(HarnessError::engine("commit", err)),
        }
    }

    /// Re-run a conflicted write set until it commits or retries run out.
    fn retry(
        ctx: &mut ScenarioContext,
        handle: &NamespaceHandle,
        writes: &Writes,
        out: &mut AtomicityResults,
    ) -> Result<bool> {
        for _ in 0..MAX_RETRIES {
            out.retries += 1;
            let txn = handle.begin()?;
            stage(handle, txn, writes)?;
            if Self::commit(ctx, handle, txn, out)? {
                return Ok(true);
            }
        }
        out.aborted += 1;
        Ok(false)
    }
}

impl Scenario for AtomicityScenario {
    type Fixtures = AtomicityFixtures;
    type WorkingSet = AtomicityWorkingSet;
    type RawResults = AtomicityResults;

    fn id(&self) -> &'static str {
        "atomicity"
    }

    fn description(&self) -> &'static str {
        "multi-key transactions are all-or-nothing; conflicting pairs retry"
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn fixtures(&self, generator: &SyntheticGenerator, scale: &ScaleParams) -> Result<Self::Fixtures> {
        let seed = generator.seed();
        let plans = (0..scale.transactions)
            .map(|id| {
                let mut rng = substream(seed, "atomicity-plan", &[id as u64]);
                let width = rng.random_range(3..=5_usize);
                let writes = (0..width)
                    .map(|j| {
                        (
                            format!("acct/{id:04}/{j}"),
                            format!("v{id}-{j}-{:08x}", rng.random::<u32>()),
                        )
                    })
                    .collect();
                let abort_after = (id % 3 == 2).then(|| rng.random_range(1..width));
                TxnPlan {
                    id,
                    writes,
                    abort_after,
                }
            })
            .collect();

        let pairs = (0..(scale.transactions / 4).max(1))
            .map(|id| {
                let overlapping = id % CONFLICT_EVERY == 0;
                let mut first = vec![(format!("pair/{id:04}/a"), format!("a{id}"))];
                let mut second = vec![(format!("pair/{id:04}/b"), format!("b{id}"))];
                if overlapping {
                    first.push((format!("pair/{id:04}/shared"), format!("a{id}")));
                    second.push((format!("pair/{id:04}/shared"), format!("b{id}")));
                }
                ConflictPair {
                    id,
                    first,
                    second,
                    overlapping,
                }
            })
            .collect();

        let baseline = (0..READ_BACK_KEYS)
            .map(|i| (format!("base/{i:02}"), format!("base-{seed}-{i}")))
            .collect();

        Ok(AtomicityFixtures {
            plans,
            pairs,
            baseline,
        })
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let handle = ctx.create_namespace("main")?;
        for (key, value) in &fixtures.baseline {
            ctx.mutate("put", key, || handle.put(key, value.as_bytes()))?;
        }
        Ok(AtomicityWorkingSet {
            handle,
            plans: fixtures.plans.clone(),
            pairs: fixtures.pairs.clone(),
            baseline_keys: fixtures.baseline.iter().map(|(k, _)| k.clone()).collect(),
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let handle = &ws.handle;
        let mut out = AtomicityResults::default();

        let reader = handle.begin()?;
        for key in &ws.baseline_keys {
            let value = handle.txn_get(reader, key)?;
            out.reads_in_txn.push((key.clone(), text(value)));
        }
        ctx.mutate("rollback", &reader.to_string(), || handle.rollback(reader))?;

        for plan in &ws.plans {
            ctx.check_deadline()?;
            let txn = handle.begin()?;
            let committed = if let Some(n) = plan.abort_after {
                stage(handle, txn, &plan.writes[..n.min(plan.writes.len())])?;
                ctx.mutate("rollback", &txn.to_string(), || handle.rollback(txn))?;
                ctx.metrics().incr("txn_forced_rollbacks", 1);
                false
            } else {
                out.transactions += 1;
                stage(handle, txn, &plan.writes)?;
                Self::commit(ctx, handle, txn, &mut out)?
                    || Self::retry(ctx, handle, &plan.writes, &mut out)?
            };
            out.plans.push(PlanOutcome {
                id: plan.id,
                committed,
                visible: read_back(handle, &plan.writes)?,
            });
        }

        for pair in &ws.pairs {
            ctx.check_deadline()?;
            out.transactions += 2;
            let first = handle.begin()?;
            let second = handle.begin()?;
            stage(handle, first, &pair.first)?;
            stage(handle, second, &pair.second)?;
            let first_committed = Self::commit(ctx, handle, first, &mut out)?
                || Self::retry(ctx, handle, &pair.first, &mut out)?;
            let second_committed = Self::commit(ctx, handle, second, &mut out)?
                || Self::retry(ctx, handle, &pair.second, &mut out)?;
            out.pairs.push(PairOutcome {
                id: pair.id,
                first_committed,
                second_committed,
                visible_first: read_back(handle, &pair.first)?,
                visible_second: read_back(handle, &pair.second)?,
            });
        }
        Ok(out)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        metrics.observe("atomicity_failures");

        for (key, seen) in &raw.reads_in_txn {
            let expected = fixtures.baseline.iter().find(|(k, _)| k == key).map(|(_, v)| v);
            if seen.as_ref() != expected {
                metrics.incr("atomicity_failures", 1);
                metrics.note(format!("transaction did not read committed {key}"));
            }
        }

        for outcome in &raw.plans {
            let Some(plan) = fixtures.plans.iter().find(|p| p.id == outcome.id) else {
                continue;
            };
            let intact = if outcome.committed {
                plan.writes
                    .iter()
                    .zip(&outcome.visible)
                    .all(|((_, want), got)| got.as_deref() == Some(want.as_str()))
            } else {
                outcome.visible.iter().all(Option::is_none)
            };
            if !intact {
                metrics.incr("atomicity_failures", 1);
                metrics.note(format!(
                    "txn plan {} ({}) left partial state",
                    plan.id,
                    if outcome.committed { "committed" } else { "rolled back" }
                ));
            }
        }

        for outcome in &raw.pairs {
            let Some(pair) = fixtures.pairs.iter().find(|p| p.id == outcome.id) else {
                continue;
            };
            if !pair_consistent(pair, outcome) {
                metrics.incr("atomicity_failures", 1);
                metrics.note(format!("txn pair {} is inconsistent", pair.id));
            }
        }

        let transactions = raw.transactions.max(1) as f64;
        metrics.incr("txn_conflicts", raw.conflicts);
        metrics.incr("txn_retries", raw.retries);
        metrics.incr("txn_aborts", raw.aborted);
        metrics.measured("txn_abort_rate", raw.aborted as f64 / transactions);
        metrics.measured(
            "conflict_rate",
            raw.conflicts as f64 / raw.commits_attempted.max(1) as f64,
        );
        let avg_retries = if raw.conflicts == 0 {
            0.0
        } else {
            raw.retries as f64 / raw.conflicts as f64
        };
        metrics.measured("avg_retries_on_conflict", avg_retries);
        Ok(())
    }
}

/// Committed sides are fully visible; the later committer owns shared keys.
fn pair_consistent(pair: &ConflictPair, outcome: &PairOutcome) -> bool {
    let second_owns = outcome.second_committed;
    let first_owns = outcome.first_committed && !second_owns;
    side_consistent(&pair.first, &outcome.visible_first, outcome.first_committed, first_owns)
        && side_consistent(&pair.second, &outcome.visible_second, second_owns, second_owns)
}

fn side_consistent(writes: &Writes, visible: &[Option<String>], committed: bool, owns_shared: bool) -> bool {
    writes.iter().zip(visible).all(|((key, want), got)| {
        let shared = key.ends_with("/shared");
        if shared && !owns_shared {
            true
        } else if committed {
            got.as_deref() == Some(want.as_str())
        } else {
            shared || got.is_none()
        }
    })
}
