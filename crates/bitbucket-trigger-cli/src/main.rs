use bitbucket_trigger_cli::run_cli;
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    match run_cli() {
        Ok(code) => code,
        Err(e) => {
            // Logging may not be initialized yet when configuration fails.
            error!(category = ?e.error_category(), "CLI error: {}", e);
            eprintln!("error: {e}");

            ExitCode::from(e.exit_code())
        }
    }
}
