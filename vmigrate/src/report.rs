use clap::ValueEnum;
use std::process::ExitCode;

use vmigrate_core::MigrationSummary;

/// How the final summary is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn render(summary: &MigrationSummary, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Text => Ok(summary.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(summary),
    }
}

/// Process exit status for a finished run
pub fn exit_code(summary: &MigrationSummary) -> ExitCode {
    ExitCode::from(summary.outcome.exit_code())
}

/// Exit status when the run was aborted before producing a summary
pub const ABORTED: u8 = 1;
