//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use packed_cmd_harness::control::ControlSurface;
use packed_cmd_harness::core::config::Config;
use packed_cmd_harness::core::errors::HarnessError;
use packed_cmd_harness::engine::DispatchEngine;
use packed_cmd_harness::engine::sim::SimulatedEngine;
use packed_cmd_harness::logger::jsonl::JsonlConfig;
use packed_cmd_harness::logger::sink::{HarnessLoggerHandle, spawn_logger};
use packed_cmd_harness::scenario::catalog::{TestCase, TestGroup};
use packed_cmd_harness::scenario::runner::HarnessResult;
use packed_cmd_harness::scenario::session::HarnessSession;

/// Packed Command Harness: fault injection for packed write commands.
#[derive(Debug, Parser)]
#[command(
    name = "pch",
    author,
    version,
    about = "Packed Command Harness - packed write conformance tests",
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
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run every case of a test group against the simulated driver.
    Run(RunArgs),
    /// List test groups, or the cases of one group.
    List(ListArgs),
    /// Print the control-file description of a group.
    Describe(DescribeArgs),
    /// Show or persist the random test seed.
    Seed(SeedArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Group to run: packing, err-check or invalid.
    #[arg(value_parser = parse_group)]
    group: TestGroup,
    /// Cycles over the group (defaults to `run.repeat`; non-positive runs once).
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    repeat: Option<i64>,
    /// Random seed for this run (0 derives one from the clock).
    #[arg(long, value_name = "SEED")]
    seed: Option<u32>,
    /// Pause after each dispatch.
    #[arg(long, value_name = "MILLISECONDS")]
    settle_ms: Option<u64>,
    /// Maximum packed writes the simulated device accepts.
    #[arg(long, value_name = "N")]
    max_packed: Option<u32>,
    /// Foreign single writes injected ahead of every round.
    #[arg(long, value_name = "N")]
    foreign_writes: Option<u32>,
}

#[derive(Debug, Clone, Args)]
struct ListArgs {
    /// Show the cases of this group only.
    #[arg(value_parser = parse_group)]
    group: Option<TestGroup>,
}

#[derive(Debug, Clone, Args)]
struct DescribeArgs {
    #[arg(value_parser = parse_group)]
    group: TestGroup,
}

#[derive(Debug, Clone, Args)]
struct SeedArgs {
    /// New seed to store in the config file.
    #[arg(value_name = "VALUE")]
    value: Option<String>,
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
    /// Load and validate the configuration.
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
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// At least one test pass failed.
    #[error("{0}")]
    TestFailure(String),
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
            Self::TestFailure(_) => 4,
        }
    }
}

impl From<HarnessError> for CliError {
    fn from(value: HarnessError) -> Self {
        match value {
            HarnessError::InvalidConfig { .. }
            | HarnessError::MissingConfig { .. }
            | HarnessError::ConfigParse { .. } => Self::User(value.to_string()),
            HarnessError::Serialization { .. } => Self::Internal(value.to_string()),
            _ => Self::Runtime(value.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_group(cli, args),
        Command::List(args) => run_list(cli, args),
        Command::Describe(args) => run_describe(cli, args),
        Command::Seed(args) => run_seed(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn parse_group(raw: &str) -> Result<TestGroup, String> {
    raw.parse()
}

// ──────────────────── session wiring ────────────────────

struct Harness {
    session: Arc<HarnessSession>,
    logger: HarnessLoggerHandle,
    logger_thread: Option<thread::JoinHandle<()>>,
}

impl Harness {
    fn start(config: Config) -> Result<Self, CliError> {
        let (logger, logger_thread) = if config.logging.enabled {
            let (handle, join) =
                spawn_logger(JsonlConfig::from_config(&config.logging, &config.paths))?;
            (handle, Some(join))
        } else {
            (HarnessLoggerHandle::disabled(), None)
        };
        let engine: Arc<dyn DispatchEngine> = Arc::new(SimulatedEngine::new(&config)?);
        let session = Arc::new(HarnessSession::new(engine, config, logger.clone()));
        Ok(Self {
            session,
            logger,
            logger_thread,
        })
    }

    fn finish(self) -> Result<(), CliError> {
        self.logger.shutdown();
        if let Some(join) = self.logger_thread {
            join.join()
                .map_err(|_| CliError::Internal("logger thread panicked".to_string()))?;
        }
        Ok(())
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

// ──────────────────── run ────────────────────

fn run_group(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(seed) = args.seed {
        config.run.random_seed = seed;
    }
    if let Some(ms) = args.settle_ms {
        config.run.settle_delay_ms = ms;
    }
    if let Some(max) = args.max_packed {
        config.device.max_packed_writes = max;
    }
    if let Some(count) = args.foreign_writes {
        config.device.foreign_writes_per_round = count;
    }
    config.validate()?;
    let repeat = args
        .repeat
        .map_or_else(|| config.run.repeat.to_string(), |n| n.to_string());

    let harness = Harness::start(config)?;
    let surface = ControlSurface::new(&harness.session);
    let outcome = match surface.file(args.group) {
        Some(file) => file.open().write(&repeat),
        None => Err(HarnessError::NotSupported {
            details: format!("group {} has no control file", args.group),
        }),
    };
    let dropped = harness.logger.dropped_events();
    harness.finish()?;

    match outcome {
        Ok(result) => {
            report_result(cli, args.group, &result, dropped)?;
            if result.passed {
                Ok(())
            } else {
                Err(CliError::TestFailure(format!(
                    "{} of {} passes failed in group {}",
                    result.failure_count, result.passes_run, args.group
                )))
            }
        }
        Err(error) if error.is_fatal_to_run() => {
            report_not_supported(cli, args.group, &error)?;
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

fn report_result(
    cli: &Cli,
    group: TestGroup,
    result: &HarnessResult,
    dropped_events: u64,
) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            println!("{} {}", "Group:".bold(), group);
            println!("  Seed: {}", result.seed);
            println!("  Passes run: {}", result.passes_run);
            println!("  Ignored rounds: {}", result.ignored_rounds);
            if result.passed {
                println!("  Result: {}", "PASSED".green().bold());
            } else {
                println!(
                    "  Result: {} ({} failure(s))",
                    "FAILED".red().bold(),
                    result.failure_count
                );
                if let Some(last) = &result.last_error {
                    println!("  Last error: {last}");
                }
            }
            if dropped_events > 0 {
                println!(
                    "  {}",
                    format!("{dropped_events} log event(s) dropped").yellow()
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "group": group,
                "result": result,
                "dropped_log_events": dropped_events,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn report_not_supported(cli: &Cli, group: TestGroup, error: &HarnessError) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{} group {group} not supported: {error}",
                "Warning:".yellow().bold()
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "group": group,
                "supported": false,
                "error_code": error.code(),
                "error": error.to_string(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── list / describe ────────────────────

fn run_list(cli: &Cli, args: &ListArgs) -> Result<(), CliError> {
    let groups: Vec<TestGroup> = args
        .group
        .map_or_else(|| TestGroup::RUNNABLE.to_vec(), |group| vec![group]);

    match output_mode(cli) {
        OutputMode::Human => {
            for group in &groups {
                println!(
                    "{} ({}, {} cases)",
                    group.to_string().bold(),
                    group.control_name(),
                    group.cases().len()
                );
                if args.group.is_some() {
                    for (index, case) in group.cases().iter().enumerate() {
                        println!("  {:>2}. {}", index + 1, case.label());
                    }
                }
            }
        }
        OutputMode::Json => {
            let entries: Vec<Value> = groups.iter().map(|group| group_json(*group)).collect();
            let payload = json!({
                "command": "list",
                "groups": entries,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn group_json(group: TestGroup) -> Value {
    let cases: Vec<Value> = group
        .cases()
        .iter()
        .map(|case: &TestCase| json!({ "case": case, "label": case.label() }))
        .collect();
    json!({
        "group": group,
        "name": group.to_string(),
        "control_file": group.control_name(),
        "cases": cases,
    })
}

fn run_describe(cli: &Cli, args: &DescribeArgs) -> Result<(), CliError> {
    let description = args.group.description();
    match output_mode(cli) {
        OutputMode::Human => print!("{description}"),
        OutputMode::Json => {
            let payload = json!({
                "command": "describe",
                "group": args.group,
                "control_file": args.group.control_name(),
                "description": description,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── seed ────────────────────

fn run_seed(cli: &Cli, args: &SeedArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    config.logging.enabled = false;
    let config_path = config.paths.config_file.clone();
    let harness = Harness::start(config)?;
    let surface = ControlSurface::new(&harness.session);

    let stored = if let Some(value) = &args.value {
        surface.seed().write(value).map_err(|e| {
            CliError::User(format!("invalid seed {value:?}: {e}"))
        })?;
        persist_seed(&config_path, harness.session.seed())?;
        true
    } else {
        false
    };
    let seed = surface.seed().read();
    harness.finish()?;

    match output_mode(cli) {
        OutputMode::Human => {
            print!("{seed}");
            if stored {
                println!("  (stored in {})", config_path.display());
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "seed",
                "seed": seed.trim().parse::<u32>().unwrap_or_default(),
                "stored": stored,
                "path": config_path.to_string_lossy(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn persist_seed(config_path: &std::path::Path, seed: u32) -> Result<(), CliError> {
    let mut toml_value: toml::Value = if config_path.exists() {
        let raw = std::fs::read_to_string(config_path)
            .map_err(|e| CliError::Runtime(format!("read config: {e}")))?;
        toml::from_str(&raw).map_err(|e| CliError::User(format!("parse config: {e}")))?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    let root = toml_value
        .as_table_mut()
        .ok_or_else(|| CliError::User("config root is not a table".to_string()))?;
    let run = root
        .entry("run")
        .or_insert_with(|| toml::Value::Table(toml::map::Map::new()))
        .as_table_mut()
        .ok_or_else(|| CliError::User("config [run] is not a table".to_string()))?;
    run.insert(
        "random_seed".to_string(),
        toml::Value::Integer(i64::from(seed)),
    );

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CliError::Runtime(format!("create config dir: {e}")))?;
    }
    let toml_str = toml::to_string_pretty(&toml_value)
        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
    std::fs::write(config_path, toml_str)
        .map_err(|e| CliError::Runtime(format!("write config: {e}")))?;
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
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
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
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
                    OutputMode::Human => {
                        eprintln!("{} {e}", "Configuration is INVALID:".red());
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error_code": e.code(),
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
    let env_mode = std::env::var("PCH_OUTPUT_FORMAT").ok();
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
        Some(_) | None => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_subcommands() {
        let cases = [
            vec!["pch", "run", "packing"],
            vec![
                "pch",
                "run",
                "err-check",
                "--repeat",
                "3",
                "--seed",
                "99",
                "--settle-ms",
                "0",
                "--max-packed",
                "16",
                "--foreign-writes",
                "2",
            ],
            vec!["pch", "run", "invalid", "--repeat", "-1"],
            vec!["pch", "list"],
            vec!["pch", "list", "invalid"],
            vec!["pch", "describe", "send_write_packing_test"],
            vec!["pch", "seed"],
            vec!["pch", "seed", "1234"],
            vec!["pch", "config", "show"],
            vec!["pch", "config", "path"],
            vec!["pch", "config", "validate"],
            vec!["pch", "--json", "--no-color", "list"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn unknown_group_is_rejected() {
        assert!(Cli::try_parse_from(["pch", "run", "bogus"]).is_err());
        assert!(Cli::try_parse_from(["pch", "run"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pch", "run", "packing", "--json", "--no-color"]).unwrap();
        assert!(cli.json);
        assert!(cli.no_color);
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["pch", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Internal(String::new()).exit_code(), 3);
        assert_eq!(CliError::TestFailure(String::new()).exit_code(), 4);
    }

    #[test]
    fn harness_errors_map_to_exit_classes() {
        let user: CliError = HarnessError::InvalidConfig {
            details: String::new(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);
        let runtime: CliError = HarnessError::Dispatch {
            details: String::new(),
        }
        .into();
        assert_eq!(runtime.exit_code(), 2);
    }

    #[test]
    fn group_json_lists_every_case() {
        let value = group_json(TestGroup::InvalidCommand);
        assert_eq!(value["control_file"], "send_invalid_packed_test");
        assert_eq!(value["cases"].as_array().unwrap().len(), 13);
    }
}
