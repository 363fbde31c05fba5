use std::path::PathBuf;
use thiserror::Error;
use vmigrate_core::VmigrateError;

/// Errors raised while turning command line input into a plan
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read {}: {source}", path.display())]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid network map file {}: {message}", path.display())]
    NetworkMapFile { path: PathBuf, message: String },

    #[error("No workloads given; use --vm or --vm-file")]
    NoWorkloads,

    #[error("No password for {role} domain '{address}': set {env_var} or run interactively")]
    MissingPassword {
        role: &'static str,
        address: String,
        env_var: &'static str,
    },

    #[error("Password prompt failed: {0}")]
    Prompt(String),

    #[error(transparent)]
    Core(#[from] VmigrateError),
}

pub type CliResult<T> = std::result::Result<T, CliError>;
