use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use actguard_core::{
    Outcome, RequestParams, ResponseType, ValidationConfig, ValidationLevel,
    ValidationOrchestrator, ValidationResult,
};

const EXIT_VALID: i32 = 0;
const EXIT_INVALID: i32 = 1;
const EXIT_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "actguard")]
#[command(about = "Validate GitHub Actions API data before trusting it", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose (info-level) logging to stderr.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Enable debug-level logging to stderr.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a single API response.
    Validate(ValidateArgs),

    /// Cross-check a workflow runs response against a workflows response.
    Cross(CrossArgs),

    /// Inspect validation configs.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// Response JSON file, or '-' for stdin.
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Shape of the response.
    #[arg(long = "type", value_enum)]
    response_type: ResponseTypeArg,

    #[command(flatten)]
    common: CommonArgs,

    /// Request parameters as inline JSON (e.g. '{"per_page": 30}').
    #[arg(long, conflicts_with = "params_file")]
    params: Option<String>,

    /// Request parameters from a JSON file.
    #[arg(long, value_name = "PATH")]
    params_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CrossArgs {
    /// Workflow runs response JSON file.
    #[arg(long, value_name = "PATH")]
    runs: PathBuf,

    /// Workflows response JSON file.
    #[arg(long, value_name = "PATH")]
    workflows: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// Strictness level.
    #[arg(long, value_enum, default_value_t = LevelArg::Strict)]
    level: LevelArg,

    /// Validation config (YAML, or JSON by .json extension).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Check a config file against the schema and value rules.
    Check {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    /// Print the built-in config.
    Show {
        #[arg(long, value_enum, default_value_t = ConfigFormat::Yaml)]
        format: ConfigFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LevelArg {
    Basic,
    Strict,
    Paranoid,
}

impl From<LevelArg> for ValidationLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Basic => ValidationLevel::Basic,
            LevelArg::Strict => ValidationLevel::Strict,
            LevelArg::Paranoid => ValidationLevel::Paranoid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
enum ResponseTypeArg {
    WorkflowRuns,
    Workflows,
    WorkflowRun,
}

impl From<ResponseTypeArg> for ResponseType {
    fn from(ty: ResponseTypeArg) -> Self {
        match ty {
            ResponseTypeArg::WorkflowRuns => ResponseType::WorkflowRuns,
            ResponseTypeArg::Workflows => ResponseType::Workflows,
            ResponseTypeArg::WorkflowRun => ResponseType::WorkflowRun,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ConfigFormat {
    Yaml,
    Json,
}

/// JSON output shape.
#[derive(Serialize)]
struct Report<'a> {
    outcome: Outcome,
    #[serde(flatten)]
    result: &'a ValidationResult,
}

fn main() -> ExitCode {
    match run_with_args(std::env::args_os()) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run_with_args<I, T>(args: I) -> Result<i32>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    init_logging(cli.verbose, cli.debug);

    match cli.command {
        Commands::Validate(args) => cmd_validate(args),
        Commands::Cross(args) => cmd_cross(args),
        Commands::Config(ConfigCommand::Check { path }) => {
            cmd_config_check(&path)?;
            Ok(EXIT_VALID)
        }
        Commands::Config(ConfigCommand::Show { format }) => {
            print!("{}", render_config(&ValidationConfig::default(), format)?);
            Ok(EXIT_VALID)
        }
    }
}

fn init_logging(verbose: bool, debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    debug!("Logging initialized at level: {}", level);
}

fn cmd_validate(args: ValidateArgs) -> Result<i32> {
    let orchestrator = build_orchestrator(&args.common)?;
    let response = read_json(&args.input)?;

    let params = match (&args.params, &args.params_file) {
        (Some(inline), _) => serde_json::from_str(inline).context("parse --params JSON")?,
        (None, Some(path)) => read_json(path)?,
        (None, None) => Value::Null,
    };
    let params = RequestParams::from_value(&params).context("invalid request parameters")?;

    info!(
        input = %args.input.display(),
        response_type = %ResponseType::from(args.response_type),
        level = %orchestrator.level(),
        "validating response"
    );

    let result = orchestrator.validate_github_actions_response(
        &response,
        &params,
        args.response_type.into(),
    );

    print!("{}", render(&result, args.common.format)?);
    Ok(exit_code(&result))
}

fn cmd_cross(args: CrossArgs) -> Result<i32> {
    let orchestrator = build_orchestrator(&args.common)?;
    let runs = read_json(&args.runs)?;
    let workflows = read_json(&args.workflows)?;

    let result = orchestrator.cross_validate(&runs, &workflows);

    print!("{}", render(&result, args.common.format)?);
    Ok(exit_code(&result))
}

fn cmd_config_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!(
        "OK: {} ({} suspicious patterns, max list size {})",
        path.display(),
        config.suspicious_patterns.len(),
        config.max_list_size
    );
    Ok(())
}

fn build_orchestrator(common: &CommonArgs) -> Result<ValidationOrchestrator> {
    let level = ValidationLevel::from(common.level);
    match &common.config {
        Some(path) => {
            let config = load_config(path)?;
            Ok(ValidationOrchestrator::with_config(level, Arc::new(config)))
        }
        None => Ok(ValidationOrchestrator::new(level)),
    }
}

/// Load a config, picking the parser from the file extension.
fn load_config(path: &Path) -> Result<ValidationConfig> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config = if is_json {
        ValidationConfig::from_json_file(path)
    } else {
        ValidationConfig::from_yaml_file(path)
    };
    config.with_context(|| format!("load config {}", path.display()))
}

fn read_json(path: &Path) -> Result<Value> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("read stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
    };

    if text.trim().is_empty() {
        bail!("{} is empty", path.display());
    }
    serde_json::from_str(&text).with_context(|| format!("parse JSON from {}", path.display()))
}

fn exit_code(result: &ValidationResult) -> i32 {
    if result.is_valid() {
        EXIT_VALID
    } else {
        EXIT_INVALID
    }
}

fn render(result: &ValidationResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(result)),
        OutputFormat::Json => {
            let report = Report {
                outcome: result.outcome(),
                result,
            };
            let mut s = serde_json::to_string_pretty(&report).context("render json")?;
            s.push('\n');
            Ok(s)
        }
    }
}

fn render_text(result: &ValidationResult) -> String {
    let mut out = format!(
        "{} confidence={:.3} level={}\n",
        result.outcome(),
        result.confidence(),
        result.validation_level()
    );
    for issue in result.issues() {
        out.push_str("  - ");
        out.push_str(issue);
        out.push('\n');
    }
    out
}

fn render_config(config: &ValidationConfig, format: ConfigFormat) -> Result<String> {
    match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).context("render yaml"),
        ConfigFormat::Json => {
            let mut s = serde_json::to_string_pretty(config).context("render json")?;
            s.push('\n');
            Ok(s)
        }
    }
}
