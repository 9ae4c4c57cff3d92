//! ---
//! ems_section: "16-application-hosting"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Application host builder, configuration, and resource lifecycle."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::json;
use tracing::{debug, info};

use crate::config::{
    ConfigurationStore, DELETE_ON_SHUTDOWN_KEY, ENVIRONMENT_KEY, ENV_PREFIX, NAME_SUFFIX_KEY,
    RANDOMIZE_PORTS_KEY,
};
use crate::diagnostics::{EventPayload, BUILT_KEY, CONSTRUCTING_KEY, HOSTING};
use crate::host::{AppHost, ResourcePolicy};
use crate::resource::{InMemoryResourceTracker, Resource, ResourceSpec, ResourceTracker};
use crate::{HostError, Result};

const DEFAULT_ENVIRONMENT: &str = "Production";

/// Options handed to the builder entry point.
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Raw command-line arguments.
    pub args: Vec<String>,
    /// Allow resources to expose plain-text endpoints.
    pub allow_unsecured_transport: bool,
    /// Tracker recording acquired resources.
    pub tracker: Arc<dyn ResourceTracker>,
}

impl HostOptions {
    /// Options for the supplied arguments.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            allow_unsecured_transport: false,
            tracker: Arc::new(InMemoryResourceTracker::new()),
        }
    }
}

/// Settings the builder derives its environment and configuration from.
#[derive(Debug, Clone, Default)]
pub struct HostSettings {
    /// Arguments parsed into the command-line configuration layer.
    pub args: Vec<String>,
    /// Environment designation; takes precedence over configuration.
    pub environment_name: Option<String>,
    /// Application name reported by the host.
    pub application_name: Option<String>,
    /// In-memory configuration layered above environment variables.
    pub configuration: ConfigurationStore,
}

/// Intermediate builder accumulating configuration and resources.
#[derive(Debug)]
pub struct AppHostBuilder {
    options: HostOptions,
    environment: String,
    application_name: String,
    configuration: ConfigurationStore,
    resources: IndexMap<String, ResourceSpec>,
}

impl AppHostBuilder {
    /// Create a builder for the supplied command-line arguments.
    pub fn create<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::create_with_options(HostOptions::new(args))
    }

    /// Create a builder from explicit options.
    ///
    /// Publishes [`CONSTRUCTING_KEY`] on the hosting channel before the
    /// settings are read, so listeners can adjust options and settings.
    pub fn create_with_options(mut options: HostOptions) -> Self {
        let mut settings = HostSettings {
            args: options.args.clone(),
            ..HostSettings::default()
        };
        HOSTING.publish(
            CONSTRUCTING_KEY,
            EventPayload::Constructing {
                options: &mut options,
                settings: &mut settings,
            },
        );
        Self::from_parts(options, settings)
    }

    /// Create a builder from pre-assembled settings without announcing the
    /// construction.
    pub fn from_parts(options: HostOptions, settings: HostSettings) -> Self {
        let mut configuration = ConfigurationStore::from_env(ENV_PREFIX);
        configuration.merge(&settings.configuration);
        configuration.merge(&ConfigurationStore::from_args(&settings.args));

        let environment = settings
            .environment_name
            .or_else(|| configuration.get(ENVIRONMENT_KEY).map(str::to_owned))
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_owned());
        configuration.set(ENVIRONMENT_KEY, environment.clone());
        let application_name = settings
            .application_name
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned());

        debug!(
            environment = %environment,
            application = %application_name,
            entries = configuration.len(),
            "application host builder created"
        );
        Self {
            options,
            environment,
            application_name,
            configuration,
            resources: IndexMap::new(),
        }
    }

    /// Effective environment designation.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Application name.
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Options the builder was created with.
    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// Effective configuration.
    pub fn configuration(&self) -> &ConfigurationStore {
        &self.configuration
    }

    /// Mutable access to the effective configuration.
    pub fn configuration_mut(&mut self) -> &mut ConfigurationStore {
        &mut self.configuration
    }

    /// Register a resource.
    pub fn add_resource(&mut self, spec: ResourceSpec) -> Result<&mut Self> {
        if self.resources.contains_key(&spec.name) {
            return Err(HostError::DuplicateResource(spec.name));
        }
        debug!(resource = %spec.name, kind = %spec.kind, "resource registered");
        self.resources.insert(spec.name.clone(), spec);
        Ok(self)
    }

    /// Registered resource declarations.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.values()
    }

    /// Finish construction and produce the host.
    pub fn build(self) -> Result<AppHost> {
        let policy = ResourcePolicy {
            randomize_ports: self
                .configuration
                .get_bool(RANDOMIZE_PORTS_KEY)?
                .unwrap_or(false),
            delete_on_shutdown: self
                .configuration
                .get_bool(DELETE_ON_SHUTDOWN_KEY)?
                .unwrap_or(false),
            name_suffix: self
                .configuration
                .get(NAME_SUFFIX_KEY)
                .map(str::trim)
                .filter(|suffix| !suffix.is_empty())
                .map(str::to_owned),
        };
        let resources: Vec<Resource> = self
            .resources
            .into_values()
            .map(|spec| Resource {
                name: match &policy.name_suffix {
                    Some(suffix) => format!("{}-{}", spec.name, suffix),
                    None => spec.name.clone(),
                },
                declared_name: spec.name,
                kind: spec.kind,
                declared_port: spec.port,
            })
            .collect();

        HOSTING.publish(
            BUILT_KEY,
            EventPayload::Json(json!({
                "application": self.application_name,
                "resources": resources.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            })),
        );
        info!(
            environment = %self.environment,
            resources = resources.len(),
            randomize_ports = policy.randomize_ports,
            delete_on_shutdown = policy.delete_on_shutdown,
            "application host built"
        );
        Ok(AppHost::new(
            self.environment,
            self.application_name,
            self.configuration,
            resources,
            policy,
            self.options.tracker,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    #[test]
    fn args_layer_over_settings_configuration() {
        let options = HostOptions::new(["--Resources:NameSuffix=cli"]);
        let settings = HostSettings {
            args: options.args.clone(),
            configuration: ConfigurationStore::from_pairs([
                (NAME_SUFFIX_KEY, "settings"),
                (RANDOMIZE_PORTS_KEY, "true"),
            ]),
            ..HostSettings::default()
        };
        let builder = AppHostBuilder::from_parts(options, settings);

        assert_eq!(builder.configuration().get(NAME_SUFFIX_KEY), Some("cli"));
        assert_eq!(builder.configuration().get(RANDOMIZE_PORTS_KEY), Some("true"));
        assert_eq!(builder.environment(), "Production");
    }

    #[test]
    fn settings_environment_wins_over_configuration() {
        let settings = HostSettings {
            environment_name: Some("Development".into()),
            args: vec!["--Hosting:Environment=Staging".into()],
            ..HostSettings::default()
        };
        let builder = AppHostBuilder::from_parts(HostOptions::default(), settings);

        assert_eq!(builder.environment(), "Development");
        assert_eq!(builder.configuration().get(ENVIRONMENT_KEY), Some("Development"));
    }

    #[test]
    fn duplicate_resources_are_rejected() {
        let mut builder = AppHostBuilder::from_parts(HostOptions::default(), HostSettings::default());
        builder
            .add_resource(ResourceSpec::service("bus"))
            .expect("first registration");
        let err = builder
            .add_resource(ResourceSpec::new("bus", ResourceKind::Queue))
            .expect_err("duplicate rejected");
        assert!(matches!(err, HostError::DuplicateResource(name) if name == "bus"));
    }

    #[test]
    fn build_applies_suffix_to_resource_names() {
        let settings = HostSettings {
            configuration: ConfigurationStore::from_pairs([(NAME_SUFFIX_KEY, "c0de")]),
            ..HostSettings::default()
        };
        let mut builder = AppHostBuilder::from_parts(HostOptions::default(), settings);
        builder
            .add_resource(ResourceSpec::service("registry").with_port(7001))
            .expect("register");

        let host = builder.build().expect("build");
        let names: Vec<&str> = host.resources().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["registry-c0de"]);
    }
}
