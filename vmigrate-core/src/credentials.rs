//! Credential store interface
//!
//! Credentials are looked up per domain address and handed straight to the
//! connection provider. Nothing here persists them.

use std::collections::HashMap;

use crate::error::{VmigrateError, VmigrateResult};
use crate::types::Credentials;

pub trait CredentialStore: Send + Sync {
    /// Credentials for the domain at `address`
    fn credentials_for(&self, address: &str) -> VmigrateResult<Credentials>;
}

/// In-process credential map, filled by the invoking layer
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: impl Into<String>, credentials: Credentials) -> Self {
        self.entries.insert(address.into(), credentials);
        self
    }

    pub fn insert(&mut self, address: impl Into<String>, credentials: Credentials) {
        self.entries.insert(address.into(), credentials);
    }
}

impl CredentialStore for StaticCredentialStore {
    fn credentials_for(&self, address: &str) -> VmigrateResult<Credentials> {
        self.entries.get(address).cloned().ok_or_else(|| {
            VmigrateError::setup(format!("no credentials available for domain '{}'", address))
        })
    }
}
