//! Password lookup for the two domains
//!
//! Passwords never appear on the command line. They come from the
//! environment or, on a terminal, from a hidden prompt.

use std::io::IsTerminal;

use dialoguer::Password;
use vmigrate_core::credentials::StaticCredentialStore;
use vmigrate_core::types::Credentials;

use crate::error::{CliError, CliResult};

pub const SOURCE_PASSWORD_ENV: &str = "VMIGRATE_SOURCE_PASSWORD";
pub const TARGET_PASSWORD_ENV: &str = "VMIGRATE_TARGET_PASSWORD";

/// One side of the run that needs a login
pub struct Login<'a> {
    pub role: &'static str,
    pub address: &'a str,
    pub username: &'a str,
    pub env_var: &'static str,
}

impl Login<'_> {
    fn password(&self) -> CliResult<String> {
        if let Ok(password) = std::env::var(self.env_var) {
            return Ok(password);
        }

        if !std::io::stdin().is_terminal() {
            return Err(CliError::MissingPassword {
                role: self.role,
                address: self.address.to_string(),
                env_var: self.env_var,
            });
        }

        Password::new()
            .with_prompt(format!("Password for {}@{}", self.username, self.address))
            .interact()
            .map_err(|e| CliError::Prompt(e.to_string()))
    }

    pub fn credentials(&self) -> CliResult<Credentials> {
        Ok(Credentials::new(self.username, self.password()?))
    }
}

/// Collect credentials for both domains into a store
pub fn credential_store(source: &Login<'_>, target: &Login<'_>) -> CliResult<StaticCredentialStore> {
    Ok(StaticCredentialStore::new()
        .with(source.address, source.credentials()?)
        .with(target.address, target.credentials()?))
}
