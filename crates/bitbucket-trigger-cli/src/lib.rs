//! # Bitbucket Trigger CLI
//!
//! Command-line interface around `bitbucket-trigger-core`.
//!
//! This module provides CLI commands for:
//! - Replaying a captured webhook payload through the payload processor
//! - Checking whether two repository URLs loosely match
//! - Showing the resolved configuration
//! - Generating shell completions

use bitbucket_trigger_core::{
    payload::{
        Dialect, PayloadError, PayloadProcessor, ProcessingOutcome, PushNotification,
        RequestHeaders,
    },
    repository_url::{RepositoryReference, RepositoryUrlError},
    ErrorCategory, LoggingJobTrigger,
};
use clap::{CommandFactory, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_FILE_ENV: &str = "BITBUCKET_TRIGGER_CONFIG";

/// Prefix of environment variables overriding configuration values,
/// e.g. `BITBUCKET_TRIGGER__LOGGING__LEVEL=debug`.
pub const CONFIG_ENV_PREFIX: &str = "BITBUCKET_TRIGGER";

// ============================================================================
// CLI Structure
// ============================================================================

/// Bitbucket Trigger CLI - normalize Bitbucket push notifications
#[derive(Parser, Debug)]
#[command(name = "bitbucket-trigger")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Normalize Bitbucket push notifications into build triggers")]
#[command(
    long_about = "Classifies Bitbucket Cloud and Bitbucket Server webhook payloads and extracts the pushing user, repository URL and SCM type"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = CONFIG_FILE_ENV)]
    pub config: Option<PathBuf>,

    /// Logging level (overrides configuration)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a captured webhook payload through the payload processor
    Process {
        /// JSON payload file
        payload: PathBuf,

        /// Value of the User-Agent header
        #[arg(long)]
        user_agent: Option<String>,

        /// Value of the X-Event-Key header
        #[arg(long)]
        event_key: Option<String>,

        /// Send the headers of a Bitbucket Cloud repo:push webhook
        #[arg(long, conflicts_with_all = ["user_agent", "event_key"])]
        cloud_push: bool,

        /// Additional request header as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Output format (overrides configuration)
        #[arg(short, long)]
        format: Option<OutputFormat>,
    },

    /// Check whether two repository URLs identify the same repository
    Match {
        /// First repository URL
        first: String,

        /// Second repository URL
        second: String,

        /// Output format (overrides configuration)
        #[arg(short, long)]
        format: Option<OutputFormat>,
    },

    /// Show the resolved configuration
    Config {
        /// Print the configuration as TOML
        #[arg(short, long)]
        show: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Repository URL error: {0}")]
    RepositoryUrl(#[from] RepositoryUrlError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Get error category for exit-code and alerting decisions
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::InvalidArgument { .. } => ErrorCategory::Configuration,
            Self::Io(_) => ErrorCategory::Transient,
            Self::CommandFailed { .. } => ErrorCategory::Permanent,
            Self::Payload(e) => e.error_category(),
            Self::RepositoryUrl(e) => e.error_category(),
            Self::Output(_) => ErrorCategory::Permanent,
        }
    }

    /// Process exit code for this error.
    ///
    /// `1` is reserved for a successful `match` run that found no match.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            Self::InvalidArgument { .. } => 3,
            Self::Io(_) => 4,
            Self::Payload(_) => 5,
            Self::RepositoryUrl(_) => 6,
            Self::CommandFailed { .. } | Self::Output(_) => 7,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Could not load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Could not render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid logging level '{level}': {message}")]
    InvalidLogLevel { level: String, message: String },
}

// ============================================================================
// Configuration Types
// ============================================================================

/// CLI configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CliConfig {
    /// Default logging configuration
    pub logging: LoggingConfig,

    /// Output formatting preferences
    pub output: OutputConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Output formatting preferences
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
        }
    }
}

/// Per-user configuration file, e.g. `~/.config/bitbucket-trigger/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let dir = dirs::config_dir()?;
    Some(dir.join("bitbucket-trigger").join("config.toml"))
}

/// Load configuration.
///
/// Sources, later ones overriding earlier ones:
///  1. `config_path` when given (must exist), otherwise the per-user file if present
///  2. environment variables prefixed `BITBUCKET_TRIGGER__` (`__` separates nested keys)
///
/// Every field carries a default, so no source at all yields [`CliConfig::default`].
pub fn load_configuration(config_path: Option<&Path>) -> Result<CliConfig, ConfigError> {
    let mut builder = config::Config::builder();

    match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        None => {
            if let Some(path) = default_config_path() {
                builder = builder.add_source(
                    config::File::from(path)
                        .format(config::FileFormat::Toml)
                        .required(false),
                );
            }
        }
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix(CONFIG_ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub fn run_cli() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();

    // Load configuration
    let config = load_configuration(cli.config.as_deref())?;

    // Initialize logging
    initialize_logging(&cli, &config.logging)?;
    debug!(config = ?config, "Configuration loaded");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(cli.command, &config, &mut out)
}

/// Execute a parsed command, writing its output to `out`.
pub fn execute(
    command: Commands,
    config: &CliConfig,
    out: &mut impl Write,
) -> Result<ExitCode, CliError> {
    match command {
        Commands::Process {
            payload,
            user_agent,
            event_key,
            cloud_push,
            headers,
            format,
        } => {
            let request_headers =
                build_request_headers(&headers, user_agent, event_key, cloud_push)?;
            let format = format.unwrap_or(config.output.format);
            execute_process_command(&payload, &request_headers, format, out)
        }
        Commands::Match {
            first,
            second,
            format,
        } => {
            let format = format.unwrap_or(config.output.format);
            execute_match_command(&first, &second, format, out)
        }
        Commands::Config { show } => execute_config_command(config, show, out),
        Commands::Completions { shell } => execute_completions_command(shell, out),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging based on CLI arguments and configuration.
///
/// `RUST_LOG` wins over both. Logs go to stderr so command output on stdout
/// stays machine-readable.
fn initialize_logging(cli: &Cli, logging: &LoggingConfig) -> Result<(), CliError> {
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| ConfigError::InvalidLogLevel {
            level: level.to_string(),
            message: e.to_string(),
        })?,
    };

    let json = cli.json_logs || logging.format == LogFormat::Json;
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("failed to initialize logging: {e}"),
    })
}

/// Turn the header-related arguments into [`RequestHeaders`].
///
/// Explicit `--user-agent` / `--event-key` values override `--header` entries.
fn build_request_headers(
    raw_headers: &[String],
    user_agent: Option<String>,
    event_key: Option<String>,
    cloud_push: bool,
) -> Result<RequestHeaders, CliError> {
    if cloud_push {
        return Ok(RequestHeaders::cloud_push());
    }

    let mut header_map = HashMap::new();
    for raw in raw_headers {
        let (name, value) = raw.split_once(':').ok_or_else(|| CliError::InvalidArgument {
            arg: "--header".to_string(),
            message: format!("expected 'Name: value', got '{raw}'"),
        })?;
        header_map.insert(name.trim().to_string(), value.trim().to_string());
    }

    let mut headers = RequestHeaders::from_http_headers(&header_map);
    if user_agent.is_some() {
        headers.user_agent = user_agent;
    }
    if event_key.is_some() {
        headers.event_key = event_key;
    }

    Ok(headers)
}

/// Machine-readable result of the `process` command.
#[derive(Debug, Serialize)]
struct ProcessReport<'a> {
    dialect: Dialect,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<&'a PushNotification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

/// Execute process command
fn execute_process_command(
    payload_path: &Path,
    headers: &RequestHeaders,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<ExitCode, CliError> {
    info!(
        payload = %payload_path.display(),
        user_agent = ?headers.user_agent,
        event_key = ?headers.event_key,
        "Processing payload file"
    );

    let body = std::fs::read(payload_path)?;
    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(PayloadError::from)?;
    let dialect = Dialect::classify(&payload, headers);

    let processor = PayloadProcessor::new(Arc::new(LoggingJobTrigger));
    let outcome = processor.process(&payload, headers)?;

    let report = match &outcome {
        ProcessingOutcome::Dispatched(notification) => ProcessReport {
            dialect,
            status: "dispatched",
            notification: Some(notification),
            reason: None,
        },
        ProcessingOutcome::Ignored { reason, .. } => ProcessReport {
            dialect,
            status: "ignored",
            notification: None,
            reason: Some(*reason),
        },
    };

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        OutputFormat::Text => {
            writeln!(out, "dialect:        {}", report.dialect)?;
            writeln!(out, "status:         {}", report.status)?;
            if let Some(notification) = report.notification {
                writeln!(out, "actor:          {}", notification.actor)?;
                writeln!(out, "repository_url: {}", notification.repository_url)?;
                writeln!(out, "scm_type:       {}", notification.scm_type)?;
            }
            if let Some(reason) = report.reason {
                writeln!(out, "reason:         {reason}")?;
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Machine-readable result of the `match` command.
#[derive(Debug, Serialize)]
struct MatchReport {
    matches: bool,
    first: NormalizedReference,
    second: NormalizedReference,
}

#[derive(Debug, Serialize)]
struct NormalizedReference {
    host: String,
    path: String,
}

impl From<&RepositoryReference> for NormalizedReference {
    fn from(reference: &RepositoryReference) -> Self {
        Self {
            host: reference.normalized_host(),
            path: reference.normalized_path(),
        }
    }
}

/// Execute match command
fn execute_match_command(
    first: &str,
    second: &str,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<ExitCode, CliError> {
    let lhs = RepositoryReference::parse(first)?;
    let rhs = RepositoryReference::parse(second)?;
    let matches = lhs.loosely_matches(&rhs);

    info!(first = %first, second = %second, matches, "Compared repository URLs");

    match format {
        OutputFormat::Json => {
            let report = MatchReport {
                matches,
                first: NormalizedReference::from(&lhs),
                second: NormalizedReference::from(&rhs),
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        }
        OutputFormat::Text => {
            writeln!(out, "{}", if matches { "match" } else { "no match" })?;
        }
    }

    Ok(if matches {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

/// Execute config command
fn execute_config_command(
    config: &CliConfig,
    show: bool,
    out: &mut impl Write,
) -> Result<ExitCode, CliError> {
    if show {
        let rendered = toml::to_string_pretty(config).map_err(ConfigError::from)?;
        write!(out, "{rendered}")?;
    } else {
        writeln!(out, "configuration is valid")?;
    }

    Ok(ExitCode::SUCCESS)
}

/// Execute completions command
fn execute_completions_command(
    shell: clap_complete::Shell,
    out: &mut impl Write,
) -> Result<ExitCode, CliError> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, out);

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
