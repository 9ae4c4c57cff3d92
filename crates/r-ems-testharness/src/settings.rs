//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Harness settings and host configuration overrides."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use r_ems_apphost::config::{
    DELETE_ON_SHUTDOWN_KEY, ENVIRONMENT_KEY, NAME_SUFFIX_KEY, RANDOMIZE_PORTS_KEY,
};
use r_ems_apphost::HostSettings;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

const SUFFIX_LEN: usize = 8;

fn default_build_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_environment() -> String {
    "Development".to_owned()
}

fn default_true() -> bool {
    true
}

/// Reaction when the construction event is not observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissPolicy {
    /// Fail `create` with an interception error.
    #[default]
    Fail,
    /// Log a warning and continue with framework defaults.
    Warn,
}

/// File-level harness settings.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Reaction to a missed construction event.
    #[serde(default)]
    pub miss_policy: MissPolicy,
    /// Owner-side limit used by [`crate::TestBuilder::build`].
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "build_timeout_secs", default = "default_build_timeout")]
    pub build_timeout: Duration,
    /// Default environment designation.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Default for port randomization.
    #[serde(default = "default_true")]
    pub randomize_ports: bool,
    /// Default for resource release on shutdown.
    #[serde(default = "default_true")]
    pub delete_resources_on_shutdown: bool,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            miss_policy: MissPolicy::default(),
            build_timeout: default_build_timeout(),
            environment: default_environment(),
            randomize_ports: true,
            delete_resources_on_shutdown: true,
        }
    }
}

impl HarnessSettings {
    /// Environment variable naming a settings file.
    pub const ENV_CONFIG_PATH: &str = "R_EMS_TESTHARNESS_CONFIG";

    /// Load from the file named by `R_EMS_TESTHARNESS_CONFIG`, or defaults.
    pub fn load() -> Result<Self> {
        match std::env::var(Self::ENV_CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => Self::from_path(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    /// Load from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(config_path = %path.display(), "loading harness settings");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read harness settings {}", path.display()))?;
        contents
            .parse()
            .with_context(|| format!("failed to parse harness settings {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.build_timeout.is_zero() {
            return Err(anyhow!("build_timeout_secs must be greater than zero"));
        }
        if self.environment.trim().is_empty() {
            return Err(anyhow!("environment must not be empty"));
        }
        Ok(())
    }
}

impl std::str::FromStr for HarnessSettings {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let settings: HarnessSettings =
            toml::from_str(content).with_context(|| "failed to parse harness settings")?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Configuration the harness writes into the host while its builder is
/// being created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessOverrides {
    environment: String,
    randomize_ports: bool,
    delete_resources_on_shutdown: bool,
    resource_suffix: String,
    extra: IndexMap<String, String>,
}

impl Default for HarnessOverrides {
    fn default() -> Self {
        Self::from(&HarnessSettings::default())
    }
}

impl From<&HarnessSettings> for HarnessOverrides {
    fn from(settings: &HarnessSettings) -> Self {
        Self {
            environment: settings.environment.clone(),
            randomize_ports: settings.randomize_ports,
            delete_resources_on_shutdown: settings.delete_resources_on_shutdown,
            resource_suffix: random_suffix(),
            extra: IndexMap::new(),
        }
    }
}

fn random_suffix() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect()
}

impl HarnessOverrides {
    /// Environment designation for the host.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Allocate random endpoint ports.
    pub fn randomize_ports(mut self, enabled: bool) -> Self {
        self.randomize_ports = enabled;
        self
    }

    /// Release tracked resources when the host stops.
    pub fn delete_resources_on_shutdown(mut self, enabled: bool) -> Self {
        self.delete_resources_on_shutdown = enabled;
        self
    }

    /// Suffix appended to resource names.
    pub fn resource_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.resource_suffix = suffix.into();
        self
    }

    /// Additional configuration entry.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Configured environment designation.
    pub fn environment_name(&self) -> &str {
        &self.environment
    }

    /// Configured resource suffix.
    pub fn suffix(&self) -> &str {
        &self.resource_suffix
    }

    /// Write the overrides into host settings.
    pub fn apply(&self, settings: &mut HostSettings) {
        settings.environment_name = Some(self.environment.clone());
        let configuration = &mut settings.configuration;
        configuration.set(ENVIRONMENT_KEY, self.environment.clone());
        configuration.set(RANDOMIZE_PORTS_KEY, self.randomize_ports.to_string());
        configuration.set(DELETE_ON_SHUTDOWN_KEY, self.delete_resources_on_shutdown.to_string());
        configuration.set(NAME_SUFFIX_KEY, self.resource_suffix.clone());
        configuration.extend(self.extra.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        debug!(
            environment = %self.environment,
            suffix = %self.resource_suffix,
            extra = self.extra.len(),
            "harness overrides applied"
        );
    }
}
