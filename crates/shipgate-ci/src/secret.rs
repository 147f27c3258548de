//! Named credentials read from the process environment.
//!
//! Secret values never implement `Display` and their `Debug` output is
//! redacted, so they cannot end up in a log line by accident.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Environment variable holding the registry token by default.
pub const DEFAULT_TOKEN_ENV: &str = "CRATES_IO_TOKEN";

/// A credential and the name it is known by.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    name: String,
    value: String,
}

impl Secret {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value. Only pass this to the process that needs it.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("value", &"***")
            .finish()
    }
}

/// The set of secrets a pipeline knows about.
///
/// Names are tracked even when no value is present so build environments can
/// strip them regardless.
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    names: BTreeSet<String>,
    values: BTreeMap<String, Secret>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the credential `name` from the process environment. An unset or
    /// empty variable leaves the name registered without a value.
    pub fn from_env(name: &str) -> Self {
        let mut store = Self::new();
        store.names.insert(name.to_string());
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => {
                store.values.insert(name.to_string(), Secret::new(name, value));
            }
            _ => tracing::debug!(secret = %name, "credential not present in environment"),
        }
        store
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.names.insert(secret.name.clone());
        self.values.insert(secret.name.clone(), secret);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Secret> {
        self.values.get(name)
    }

    /// Every registered secret name, set or not.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
