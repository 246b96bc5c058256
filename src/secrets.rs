//! The secret-lookup collaborator used while building catalogs.
//!
//! Secrets are resolved into a catalog's variables by the caller (normally the `steward`
//! binary) before the catalog is compiled. The convergence engine never performs lookups
//! itself; it only ever sees the already-interpolated declarations.

use anyhow::{bail, Context};
use indexmap::IndexMap;
use std::fs;
use std::path::Path;

/// Read-only access to secret values by key.
pub trait Lookup {
    /// Returns the value for `key`, or an error if the store has no such key.
    fn get(&self, key: &str) -> anyhow::Result<String>;

    /// Returns the value for `key`, or `default` if the store has no such key.
    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|_| default.to_owned())
    }
}

/// A [Lookup] backed by a flat YAML mapping of key to value.
#[derive(Clone, Debug, Default)]
pub struct SecretStore {
    values: IndexMap<String, String>,
}

impl SecretStore {
    /// Parses a secret store from a YAML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read secret store: {}", path.display()))?;
        let values = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse secret store: {}", path.display()))?;
        Ok(SecretStore { values })
    }

    /// Builds a store directly from values, e.g. for tests or embedding callers.
    pub fn from_values(values: IndexMap<String, String>) -> Self {
        SecretStore { values }
    }
}

impl Lookup for SecretStore {
    fn get(&self, key: &str) -> anyhow::Result<String> {
        match self.values.get(key) {
            Some(value) => Ok(value.clone()),
            None => bail!("secret store has no key `{key}`"),
        }
    }
}
