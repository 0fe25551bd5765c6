//! Scenario scheduling: sequential by default, optional worker pool for
//! scenarios that declare themselves parallel-safe.

use std::thread;

use crossbeam_channel as channel;

use super::{DynScenario, RunEnv, ScenarioReport};

/// Run every scenario and return reports in the order given.
///
/// With `parallel` set, parallel-safe scenarios are drained by up to
/// `workers` scoped threads first; the rest then run one at a time. A
/// failing scenario never stops the others.
pub fn run_scenarios(
    env: &RunEnv,
    scenarios: Vec<Box<dyn DynScenario>>,
    parallel: bool,
    workers: usize,
) -> Vec<ScenarioReport> {
    let total = scenarios.len();
    let mut slots: Vec<Option<ScenarioReport>> = (0..total).map(|_| None).collect();

    let (concurrent, sequential): (Vec<_>, Vec<_>) = scenarios
        .into_iter()
        .enumerate()
        .partition(|(_, s)| parallel && s.parallel_safe());

    if !concurrent.is_empty() {
        for (index, report) in run_pool(env, concurrent, workers) {
            slots[index] = Some(report);
        }
    }

    for (index, scenario) in sequential {
        slots[index] = Some(scenario.run(env));
    }

    slots.into_iter().flatten().collect()
}

fn run_pool(
    env: &RunEnv,
    jobs: Vec<(usize, Box<dyn DynScenario>)>,
    workers: usize,
) -> Vec<(usize, ScenarioReport)> {
    let workers = workers.clamp(1, jobs.len().max(1));
    let (job_tx, job_rx) = channel::bounded::<(usize, Box<dyn DynScenario>)>(jobs.len());
    let (result_tx, result_rx) = channel::unbounded::<(usize, ScenarioReport)>();

    for job in jobs {
        // Capacity equals the job count, so this never blocks.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                while let Ok((index, scenario)) = job_rx.recv() {
                    let report = scenario.run(env);
                    if result_tx.send((index, report)).is_err() {
                        return;
                    }
                }
            });
        }
    });
    drop(result_tx);

    result_rx.into_iter().collect()
}
