//! Tests for the bitbucket-trigger-cli library module.

use super::*;
use std::io::Write as _;
use tempfile::{NamedTempFile, TempDir};

fn run(command: Commands) -> (Result<ExitCode, CliError>, String) {
    let mut out = Vec::new();
    let result = execute(command, &CliConfig::default(), &mut out);
    (result, String::from_utf8(out).unwrap())
}

fn payload_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const LEGACY_PAYLOAD: &str = r#"{
    "canon_url": "https://bitbucket.org",
    "user": "marcus",
    "repository": { "absolute_url": "/marcus/project-x/", "scm": "git" }
}"#;

// ============================================================================
// Argument parsing
// ============================================================================

#[test]
fn test_cli_parsing() {
    let cli = Cli::try_parse_from([
        "bitbucket-trigger",
        "process",
        "payload.json",
        "--cloud-push",
        "--format",
        "json",
    ])
    .unwrap();

    match cli.command {
        Commands::Process {
            payload,
            cloud_push,
            format,
            ..
        } => {
            assert_eq!(payload, PathBuf::from("payload.json"));
            assert!(cloud_push);
            assert_eq!(format, Some(OutputFormat::Json));
        }
        other => panic!("Expected Process command, got {other:?}"),
    }
}

#[test]
fn test_cloud_push_conflicts_with_explicit_headers() {
    let result = Cli::try_parse_from([
        "bitbucket-trigger",
        "process",
        "payload.json",
        "--cloud-push",
        "--user-agent",
        "curl/8.0",
    ]);

    assert!(result.is_err());
}

#[test]
fn test_cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = CliConfig::default();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Text);
    assert_eq!(config.output.format, OutputFormat::Text);
}

#[test]
fn test_load_configuration_reads_explicit_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[logging]\nlevel = \"debug\"\nformat = \"json\"\n\n[output]\nformat = \"json\"\n",
    )
    .unwrap();

    let config = load_configuration(Some(&path)).unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.output.format, OutputFormat::Json);
}

#[test]
fn test_load_configuration_fills_missing_sections_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[output]\nformat = \"json\"\n").unwrap();

    let config = load_configuration(Some(&path)).unwrap();

    assert_eq!(config.logging, LoggingConfig::default());
    assert_eq!(config.output.format, OutputFormat::Json);
}

#[test]
fn test_load_configuration_rejects_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let err = load_configuration(Some(&path)).unwrap_err();

    assert!(
        matches!(err, ConfigError::FileNotFound { .. }),
        "got: {err:?}"
    );
}

#[test]
fn test_config_show_renders_toml() {
    let (result, out) = run(Commands::Config { show: true });

    assert_eq!(result.unwrap(), ExitCode::SUCCESS);
    let parsed: CliConfig = toml::from_str(&out).unwrap();
    assert_eq!(parsed, CliConfig::default());
}

// ============================================================================
// Header handling
// ============================================================================

#[test]
fn test_header_arguments_are_parsed() {
    let headers = build_request_headers(
        &[
            "User-Agent: Bitbucket-Webhooks/2.0".to_string(),
            "x-event-key:repo:push".to_string(),
        ],
        None,
        None,
        false,
    )
    .unwrap();

    assert!(headers.is_cloud_push());
}

#[test]
fn test_explicit_header_flags_override_header_list() {
    let headers = build_request_headers(
        &["X-Event-Key: repo:fork".to_string()],
        Some("Bitbucket-Webhooks/2.0".to_string()),
        Some("repo:push".to_string()),
        false,
    )
    .unwrap();

    assert_eq!(headers, RequestHeaders::cloud_push());
}

#[test]
fn test_header_without_separator_is_rejected() {
    let err = build_request_headers(&["User-Agent".to_string()], None, None, false).unwrap_err();

    assert!(matches!(err, CliError::InvalidArgument { .. }));
    assert_eq!(err.exit_code(), 3);
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_process_command_reports_notification() {
    let file = payload_file(LEGACY_PAYLOAD);

    let (result, out) = run(Commands::Process {
        payload: file.path().to_path_buf(),
        user_agent: None,
        event_key: None,
        cloud_push: false,
        headers: Vec::new(),
        format: None,
    });

    assert_eq!(result.unwrap(), ExitCode::SUCCESS);
    assert!(out.contains("bitbucket_cloud_post_service"), "got: {out}");
    assert!(out.contains("dispatched"), "got: {out}");
    assert!(
        out.contains("https://bitbucket.org/marcus/project-x/"),
        "got: {out}"
    );
}

#[test]
fn test_process_command_json_output() {
    let file = payload_file(r#"{"push": {"changes": []}}"#);

    let (result, out) = run(Commands::Process {
        payload: file.path().to_path_buf(),
        user_agent: None,
        event_key: None,
        cloud_push: true,
        headers: Vec::new(),
        format: Some(OutputFormat::Json),
    });

    assert_eq!(result.unwrap(), ExitCode::SUCCESS);
    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["dialect"], "bitbucket_cloud_webhook");
    assert_eq!(report["status"], "ignored");
    assert!(report.get("notification").is_none());
}

#[test]
fn test_process_command_surfaces_payload_errors() {
    let file = payload_file(r#"{"canon_url": "https://bitbucket.org"}"#);

    let (result, _) = run(Commands::Process {
        payload: file.path().to_path_buf(),
        user_agent: None,
        event_key: None,
        cloud_push: false,
        headers: Vec::new(),
        format: None,
    });

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        CliError::Payload(PayloadError::MissingField { .. })
    ));
    assert_eq!(err.error_category(), ErrorCategory::Permanent);
}

#[test]
fn test_process_command_rejects_invalid_json() {
    let file = payload_file("not json");

    let (result, _) = run(Commands::Process {
        payload: file.path().to_path_buf(),
        user_agent: None,
        event_key: None,
        cloud_push: false,
        headers: Vec::new(),
        format: None,
    });

    assert!(matches!(
        result.unwrap_err(),
        CliError::Payload(PayloadError::JsonParsing(_))
    ));
}

#[test]
fn test_match_command_exit_codes() {
    let (result, out) = run(Commands::Match {
        first: "https://X.COM/a/b/".to_string(),
        second: "https://x.com/a/b.git".to_string(),
        format: None,
    });
    assert_eq!(result.unwrap(), ExitCode::SUCCESS);
    assert_eq!(out.trim(), "match");

    let (result, out) = run(Commands::Match {
        first: "https://h/a/b".to_string(),
        second: "https://h/a/c".to_string(),
        format: None,
    });
    assert_eq!(result.unwrap(), ExitCode::from(1));
    assert_eq!(out.trim(), "no match");
}

#[test]
fn test_match_command_json_shows_normalized_parts() {
    let (result, out) = run(Commands::Match {
        first: "https://h/scm/P/r".to_string(),
        second: "git@H:P/r.git".to_string(),
        format: Some(OutputFormat::Json),
    });

    assert_eq!(result.unwrap(), ExitCode::SUCCESS);
    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["matches"], true);
    assert_eq!(report["first"]["path"], "P/r");
    assert_eq!(report["second"]["host"], "h");
}

#[test]
fn test_match_command_rejects_unparseable_url() {
    let (result, _) = run(Commands::Match {
        first: "not-a-url".to_string(),
        second: "https://h/a/b".to_string(),
        format: None,
    });

    let err = result.unwrap_err();
    assert!(matches!(err, CliError::RepositoryUrl(_)));
    assert_eq!(err.exit_code(), 6);
}

#[test]
fn test_completions_are_generated() {
    let (result, out) = run(Commands::Completions {
        shell: clap_complete::Shell::Bash,
    });

    assert_eq!(result.unwrap(), ExitCode::SUCCESS);
    assert!(out.contains("bitbucket-trigger"));
}
