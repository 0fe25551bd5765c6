//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use engine_cert_harness::certify::Certification;
use engine_cert_harness::core::config::{HarnessConfig, Scale};
use engine_cert_harness::core::errors::HarnessError;
use engine_cert_harness::engine::{EngineFaults, MemoryEngine};
use engine_cert_harness::generator::SyntheticGenerator;
use engine_cert_harness::logger::{EventLog, spawn_run_logger};
use engine_cert_harness::provider::DeterministicProvider;
use engine_cert_harness::scenario::ScenarioRegistry;
use engine_cert_harness::scorecard::{Credit, Scorecard};

/// Engine certification harness: seeded fixtures, hard gates, weighted score.
#[derive(Debug, Parser)]
#[command(
    name = "ech",
    author,
    version,
    about = "Engine Certification Harness",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the certification against the embedded reference engine.
    Run(RunArgs),
    /// List registered scenarios.
    List,
    /// Print fixture fingerprints for a seed and scale.
    Fixtures(FixturesArgs),
    /// View and check configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    /// Fixture seed.
    #[arg(long, value_name = "N")]
    seed: Option<u64>,
    /// Fixture scale.
    #[arg(long, value_name = "SCALE")]
    scale: Option<Scale>,
    /// Comma-separated scenario ids (default: all).
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    scenarios: Vec<String>,
    /// Scorecard output path.
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Run parallel-safe scenarios on a worker pool.
    #[arg(long)]
    parallel: bool,
    /// Worker count for --parallel.
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
    /// Append run events to this JSONL file.
    #[arg(long, value_name = "PATH")]
    event_log: Option<PathBuf>,
    /// Switch on a reference-engine defect (repeatable), to see the gates trip.
    #[arg(long = "inject-fault", value_name = "FAULT")]
    faults: Vec<String>,
}

#[derive(Debug, Clone, Args, Default)]
struct FixturesArgs {
    /// Fixture seed (default: configured seed).
    #[arg(long, value_name = "N")]
    seed: Option<u64>,
    /// Fixture scale (default: configured scale).
    #[arg(long, value_name = "SCALE")]
    scale: Option<Scale>,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Load and validate configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// The run completed but the engine did not certify.
    #[error("{0}")]
    CertificationFailed(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::CertificationFailed(_) => 4,
        }
    }

    /// Suppress the `ech:` error line; the verdict was already printed.
    pub const fn already_reported(&self) -> bool {
        matches!(self, Self::CertificationFailed(_))
    }
}

impl From<HarnessError> for CliError {
    fn from(err: HarnessError) -> Self {
        match err {
            HarnessError::InvalidConfig { .. }
            | HarnessError::MissingConfig { .. }
            | HarnessError::ConfigParse { .. }
            | HarnessError::UnknownScenario { .. } => Self::User(err.to_string()),
            HarnessError::Serialization { .. } => Self::Internal(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_certification(cli, args),
        Command::List => run_list(cli),
        Command::Fixtures(args) => run_fixtures(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<HarnessConfig, CliError> {
    Ok(HarnessConfig::load(cli.config.as_deref())?)
}

// ──────────────────── run ────────────────────

fn run_certification(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(seed) = args.seed {
        config.run.seed = seed;
    }
    if let Some(scale) = args.scale {
        config.run.scale = scale;
    }
    if args.parallel {
        config.run.parallel = true;
    }
    if let Some(workers) = args.workers {
        config.run.workers = workers;
    }
    if let Some(output) = &args.output {
        config.paths.output.clone_from(output);
    }
    if let Some(path) = &args.event_log {
        config.paths.event_log = Some(path.clone());
    }
    config.validate()?;

    let mut faults = EngineFaults::default();
    for name in &args.faults {
        if !faults.enable(name) {
            return Err(CliError::User(format!(
                "unknown fault {name:?}; expected one of: {}",
                EngineFaults::NAMES.join(", ")
            )));
        }
    }

    let dimension = usize::try_from(config.generator.embedding_dim)
        .map_err(|_| CliError::User("generator.embedding_dim out of range".to_string()))?;
    let (log, logger) = match &config.paths.event_log {
        Some(path) => {
            let (log, handle) = spawn_run_logger(path.clone())?;
            (log, Some(handle))
        }
        None => (EventLog::disabled(), None),
    };

    let certification = Certification::new(
        Arc::new(MemoryEngine::with_faults(faults)),
        Arc::new(DeterministicProvider::new(config.run.seed, dimension)),
    )
    .with_log(log.clone());

    if cli.verbose {
        eprintln!(
            "[ECH] seed={} scale={} parallel={} output={}",
            config.run.seed,
            config.run.scale,
            config.run.parallel,
            config.paths.output.display()
        );
    }

    let outcome = certification.run(&config, &args.scenarios);
    log.shutdown();
    if let Some(handle) = logger
        && handle.join().is_err()
    {
        eprintln!("[ECH] logger thread panicked; event log may be incomplete");
    }
    let card = outcome?;
    card.write(&config.paths.output)?;

    match output_mode(cli) {
        OutputMode::Human => print_scorecard(&card, cli.verbose),
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "output": config.paths.output.to_string_lossy(),
                "scorecard": serde_json::to_value(&card)?,
            });
            write_json_line(&payload)?;
        }
    }

    if card.overall.pass {
        Ok(())
    } else {
        Err(CliError::CertificationFailed(card.summary_line()))
    }
}

fn print_scorecard(card: &Scorecard, verbose: bool) {
    println!("{}", "Gates".bold());
    for gate in &card.gate_results {
        let verdict = if gate.pass { "PASS".green() } else { "FAIL".red() };
        let observed = gate
            .observed_value
            .map_or_else(|| "no evidence".to_string(), |v| format!("{v}"));
        println!("  {:<3} {:<30} {verdict}  observed={observed}", gate.id.id(), gate.name);
    }

    println!("{}", "Scenarios".bold());
    for (id, score) in &card.scenario_scores {
        let state = if score.pass {
            score.state.as_str().green()
        } else {
            score.state.as_str().red()
        };
        println!("  {id:<16} {state}  {}ms", score.duration_ms);
        if let Some(err) = &score.error {
            println!("    {} {}", err.code.yellow(), err.message);
        }
        if verbose {
            for note in &score.metrics.notes {
                println!("    - {note}");
            }
        }
    }

    println!("{}", "Categories".bold());
    for (category, score) in &card.category_scores {
        println!("  {category:<14} {:>5.1} / {:<5.1}", score.earned, score.possible);
    }
    if verbose {
        for line in &card.metric_scores {
            let marker = match line.credit {
                Credit::Full => "full".green(),
                Credit::Partial => "half".yellow(),
                Credit::None => "none".red(),
                Credit::NoData => "no data".red(),
            };
            let observed = line
                .observed
                .map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
            let simulated = if line.simulated { " (simulated)" } else { "" };
            println!(
                "    {:<32} {observed:>10} vs {:<8} {marker}{simulated}",
                line.name, line.threshold
            );
        }
    }

    let summary = card.summary_line();
    if card.overall.pass {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
}

// ──────────────────── list / fixtures ────────────────────

fn run_list(cli: &Cli) -> Result<(), CliError> {
    let scenarios = ScenarioRegistry::builtin().describe();
    match output_mode(cli) {
        OutputMode::Human => {
            for info in &scenarios {
                let mode = if info.parallel_safe { "parallel" } else { "exclusive" };
                println!("{:<16} {mode:<9} {}", info.id, info.description);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "list",
                "scenarios": serde_json::to_value(&scenarios)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_fixtures(cli: &Cli, args: &FixturesArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let seed = args.seed.unwrap_or(config.run.seed);
    let scale = args.scale.unwrap_or(config.run.scale);
    let generator = SyntheticGenerator::new(seed, &config.generator)?;
    let fingerprints = generator.fixture_set(&scale.params()).fingerprints()?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("seed={seed} scale={scale}");
            for (family, digest) in &fingerprints {
                println!("  {family:<12} {digest}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "fixtures",
                "seed": seed,
                "scale": scale,
                "fingerprints": fingerprints,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(HarnessConfig::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match HarnessConfig::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("ECH_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "ech",
            "run",
            "--seed",
            "42",
            "--scale",
            "medium",
            "--scenarios",
            "isolation,ledger",
            "--output",
            "/tmp/card.json",
            "--parallel",
            "--inject-fault",
            "partial_rollback",
            "--json",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.seed, Some(42));
        assert_eq!(args.scale, Some(Scale::Medium));
        assert_eq!(args.scenarios, vec!["isolation", "ledger"]);
        assert!(args.parallel);
        assert_eq!(args.faults, vec!["partial_rollback"]);
        assert!(cli.json);
    }

    #[test]
    fn rejects_unknown_scale() {
        assert!(Cli::try_parse_from(["ech", "run", "--scale", "huge"]).is_err());
    }

    #[test]
    fn parses_other_subcommands() {
        let cases = [
            vec!["ech", "list"],
            vec!["ech", "fixtures", "--seed", "3"],
            vec!["ech", "config", "show"],
            vec!["ech", "config", "validate", "--no-color"],
            vec!["ech", "config", "path", "-v"],
        ];
        for case in cases {
            assert!(Cli::try_parse_from(case.clone()).is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["ech", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Internal(String::new()).exit_code(), 3);
        assert_eq!(CliError::CertificationFailed(String::new()).exit_code(), 4);
        let unknown = CliError::from(HarnessError::UnknownScenario { name: "x".into() });
        assert_eq!(unknown.exit_code(), 1);
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }
}
