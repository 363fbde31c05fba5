//! Command line front end for vmigrate
//!
//! Argument parsing, input files, password lookup and report rendering live
//! here; everything that touches a domain is in `vmigrate-core`.

pub mod cli;
pub mod error;
pub mod input;
pub mod report;
pub mod secrets;

pub use cli::{Cli, Commands, MigrateArgs};
pub use error::{CliError, CliResult};
