#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use engine_cert_harness::certify::Certification;
use engine_cert_harness::core::config::{
    GeneratorConfig, HarnessConfig, ProviderConfig, Scale, Thresholds,
};
use engine_cert_harness::engine::{EngineFaults, MemoryEngine, TargetEngine};
use engine_cert_harness::generator::SyntheticGenerator;
use engine_cert_harness::logger::EventLog;
use engine_cert_harness::provider::{DeterministicProvider, RetryPolicy, RetryingProvider};
use engine_cert_harness::scenario::RunEnv;
use engine_cert_harness::scorecard::Scorecard;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_ech") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "ech.exe" } else { "ech" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve ech binary path for integration test"),
    }
}

/// Run the `ech` binary, keeping a transcript for failed assertions.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("ech-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", &root)
        .env("RUST_BACKTRACE", "1")
        .env_remove("ECH_OUTPUT_FORMAT")
        .output()
        .expect("execute ech command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Small but complete configuration: fewer topics and a short embedding.
pub fn small_config(seed: u64) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.run.seed = seed;
    config.generator = GeneratorConfig {
        topic_count: 40,
        embedding_dim: 32,
        ..GeneratorConfig::default()
    };
    config
}

/// Certify the reference engine with `faults` switched on.
pub fn certify(config: &HarnessConfig, faults: EngineFaults, scenarios: &[&str]) -> Scorecard {
    let dimension = usize::try_from(config.generator.embedding_dim).expect("dimension");
    let selection: Vec<String> = scenarios.iter().map(|s| (*s).to_string()).collect();
    Certification::new(
        Arc::new(MemoryEngine::with_faults(faults)),
        Arc::new(DeterministicProvider::new(config.run.seed, dimension)),
    )
    .run(config, &selection)
    .expect("certification run")
}

/// Run environment for driving single scenarios by hand.
pub fn run_env(engine: Arc<dyn TargetEngine>, seed: u64) -> RunEnv {
    let config = small_config(seed);
    let generator = SyntheticGenerator::new(seed, &config.generator).expect("generator");
    RunEnv {
        seed,
        engine,
        provider: RetryingProvider::new(
            Arc::new(DeterministicProvider::new(seed, 32)),
            RetryPolicy::from(&ProviderConfig::default()),
            EventLog::disabled(),
        ),
        generator: Arc::new(generator),
        scale: Scale::Small.params(),
        thresholds: Thresholds::default(),
        budget: Duration::from_secs(60),
        log: EventLog::disabled(),
    }
}
