//! ---
//! ems_section: "16-application-hosting"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Application host builder, configuration, and resource lifecycle."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Layered key/value configuration used by the application host.
//!
//! Keys are `:`-separated paths such as `Resources:NameSuffix` and compare
//! case-insensitively. Later layers win.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{HostError, Result};

/// Prefix of environment variables folded into host configuration.
pub const ENV_PREFIX: &str = "R_EMS_";
/// Environment designation of the host.
pub const ENVIRONMENT_KEY: &str = "Hosting:Environment";
/// Allocate random ports for resource endpoints.
pub const RANDOMIZE_PORTS_KEY: &str = "Resources:RandomizePorts";
/// Release tracked resources when the host shuts down.
pub const DELETE_ON_SHUTDOWN_KEY: &str = "Resources:DeleteOnShutdown";
/// Suffix appended to every resource name.
pub const NAME_SUFFIX_KEY: &str = "Resources:NameSuffix";

const SECTION_SEPARATOR: char = ':';

/// Ordered configuration store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationStore {
    entries: IndexMap<String, String>,
}

impl ConfigurationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect `R_EMS_`-style environment variables; `__` maps to `:`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_pairs(std::env::vars().filter_map(|(name, value)| {
            name.strip_prefix(prefix)
                .filter(|key| !key.is_empty())
                .map(|key| (key.replace("__", ":"), value))
        }))
    }

    /// Parse `--Key=Value` and `--Key Value` command-line arguments.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut store = Self::new();
        let mut iter = args.iter().map(AsRef::<str>::as_ref).peekable();
        while let Some(arg) = iter.next() {
            let Some(body) = arg.strip_prefix("--") else {
                continue;
            };
            if let Some((key, value)) = body.split_once('=') {
                store.set(key, value);
            } else if let Some(value) = iter.next_if(|next| !next.starts_with("--")) {
                store.set(body, value);
            }
        }
        store
    }

    /// Build a store from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut store = Self::new();
        store.extend(pairs);
        store
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .keys()
            .position(|existing| existing.eq_ignore_ascii_case(key))
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(index) => {
                if let Some((_, slot)) = self.entries.get_index_mut(index) {
                    *slot = value;
                }
            }
            None => {
                self.entries.insert(key, value);
            }
        }
    }

    /// Insert every pair, later pairs replacing earlier ones.
    pub fn extend<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in pairs {
            self.set(key, value);
        }
    }

    /// Layer another store on top of this one.
    pub fn merge(&mut self, other: &ConfigurationStore) {
        self.extend(other.iter());
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key)
            .and_then(|index| self.entries.get_index(index))
            .map(|(_, value)| value.as_str())
    }

    /// Look up a boolean flag.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(HostError::InvalidConfiguration {
                key: key.to_owned(),
                value: raw.to_owned(),
            }),
        }
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.position(key)?;
        self.entries.shift_remove_index(index).map(|(_, value)| value)
    }

    /// Child entries of `section`, keyed by the remainder of their path.
    pub fn section(&self, section: &str) -> IndexMap<String, String> {
        self.entries
            .iter()
            .filter_map(|(key, value)| {
                let (head, rest) = key.split_once(SECTION_SEPARATOR)?;
                head.eq_ignore_ascii_case(section)
                    .then(|| (rest.to_owned(), value.clone()))
            })
            .collect()
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_compare_case_insensitively() {
        let mut store = ConfigurationStore::new();
        store.set("Resources:NameSuffix", "a1");
        store.set("resources:namesuffix", "b2");

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("RESOURCES:NAMESUFFIX"), Some("b2"));
    }

    #[test]
    fn args_support_both_forms() {
        let store = ConfigurationStore::from_args(&[
            "--Hosting:Environment=Staging",
            "--Resources:NameSuffix",
            "x9",
            "positional",
            "--flag",
            "--Other=1",
        ]);

        assert_eq!(store.get(ENVIRONMENT_KEY), Some("Staging"));
        assert_eq!(store.get(NAME_SUFFIX_KEY), Some("x9"));
        assert!(!store.contains_key("flag"));
        assert_eq!(store.get("Other"), Some("1"));
    }

    #[test]
    fn bool_parsing_rejects_garbage() {
        let store = ConfigurationStore::from_pairs([
            (RANDOMIZE_PORTS_KEY, "TRUE"),
            (DELETE_ON_SHUTDOWN_KEY, "maybe"),
        ]);

        assert_eq!(store.get_bool(RANDOMIZE_PORTS_KEY).unwrap(), Some(true));
        assert_eq!(store.get_bool("Missing").unwrap(), None);
        assert!(matches!(
            store.get_bool(DELETE_ON_SHUTDOWN_KEY),
            Err(HostError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn merge_layers_and_sections() {
        let mut base = ConfigurationStore::from_pairs([("Resources:NameSuffix", "base"), ("Other", "1")]);
        let overlay = ConfigurationStore::from_pairs([
            ("resources:namesuffix", "overlay"),
            ("Resources:RandomizePorts", "true"),
        ]);
        base.merge(&overlay);

        let section = base.section("Resources");
        assert_eq!(section.len(), 2);
        assert_eq!(section.get("NameSuffix").map(String::as_str), Some("overlay"));
        assert_eq!(section.get("RandomizePorts").map(String::as_str), Some("true"));
        assert_eq!(base.remove("other"), Some("1".to_owned()));
    }
}
