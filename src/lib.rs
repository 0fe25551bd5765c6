#![forbid(unsafe_code)]

//! Engine Certification Harness (ech): black-box certification of a
//! storage engine through its client API.
//!
//! A run has four stages:
//! 1. **Generator**: seeded synthetic fixtures whose ground truth is known up front
//! 2. **Scenarios**: each one materializes fixtures, exercises the engine and verifies
//! 3. **Recorder**: per-scenario counters, quality samples, latency and audit evidence
//! 4. **Scorecard**: seven zero-tolerance gates plus a weighted 0-100 score
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use engine_cert_harness::prelude::*;
//! use std::sync::Arc;
//!
//! let config = HarnessConfig::default();
//! let card = Certification::new(
//!     Arc::new(MemoryEngine::new()),
//!     Arc::new(DeterministicProvider::new(config.run.seed, 384)),
//! )
//! .run(&config, &[])?;
//! println!("{}", card.summary_line());
//! # Ok::<(), HarnessError>(())
//! ```
//!
//! Any engine can be certified by implementing [`engine::TargetEngine`].

pub mod prelude;

pub mod certify;
pub mod core;
pub mod engine;
pub mod generator;
pub mod logger;
pub mod metrics;
pub mod provider;
pub mod scenario;
pub mod scorecard;
