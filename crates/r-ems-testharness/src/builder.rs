//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Test-facing entry point for suspended application host builds."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use r_ems_apphost::{AppHostBuilder, ConfigurationStore, HostOptions, ResourceSpec, ResourceTracker};
use tracing::debug;

use crate::facade::TestApp;
use crate::hooks::{BuildHooks, NoopHooks};
use crate::orchestrator::{default_entry_point, BuildOrchestrator, EntryPoint, OrchestratorInputs};
use crate::phase::BuildPhase;
use crate::settings::{HarnessOverrides, HarnessSettings};
use crate::{HarnessError, Result};

/// Options for [`TestBuilder`].
pub struct TestBuilderOptions {
    args: Vec<String>,
    overrides: Option<HarnessOverrides>,
    hooks: Arc<dyn BuildHooks>,
    settings: Option<HarnessSettings>,
    tracker: Option<Arc<dyn ResourceTracker>>,
    entry: EntryPoint,
}

impl fmt::Debug for TestBuilderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestBuilderOptions")
            .field("args", &self.args)
            .field("overrides", &self.overrides)
            .field("settings", &self.settings)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl Default for TestBuilderOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            overrides: None,
            hooks: Arc::new(NoopHooks),
            settings: None,
            tracker: None,
            entry: default_entry_point(),
        }
    }
}

impl TestBuilderOptions {
    /// Command-line arguments passed to the builder entry point.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides applied while the builder is created. Derived from the
    /// settings when unset.
    pub fn overrides(mut self, overrides: HarnessOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Lifecycle hooks.
    pub fn hooks(mut self, hooks: impl BuildHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Harness settings. Loaded through [`HarnessSettings::load`] when unset.
    pub fn settings(mut self, settings: HarnessSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Tracker injected into the host options.
    pub fn tracker(mut self, tracker: Arc<dyn ResourceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Replace the builder entry point.
    pub fn entry_point<F>(mut self, entry: F) -> Self
    where
        F: Fn(HostOptions) -> AppHostBuilder + Send + Sync + 'static,
    {
        self.entry = Arc::new(entry);
        self
    }

    /// Spawn construction and wait until the intermediate builder exists.
    pub async fn create(self) -> Result<TestBuilder> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => HarnessSettings::load().map_err(HarnessError::Settings)?,
        };
        let overrides = self
            .overrides
            .unwrap_or_else(|| HarnessOverrides::from(&settings));
        debug!(suffix = overrides.suffix(), "creating test builder");

        let orchestrator = BuildOrchestrator::new(OrchestratorInputs {
            args: self.args,
            overrides,
            miss_policy: settings.miss_policy,
            hooks: self.hooks,
            tracker: self.tracker,
            entry: self.entry,
        });
        let created = orchestrator.spawn_construction().await;
        let failure = match created {
            Ok(Ok(())) => {
                return Ok(TestBuilder {
                    orchestrator,
                    settings,
                })
            }
            Ok(Err(err)) => err,
            Err(_) => HarnessError::ConstructionAborted(
                "construction task ended before the builder was created".to_owned(),
            ),
        };
        orchestrator.dispose().await;
        Err(failure)
    }
}

/// Suspended build of an application host.
///
/// The builder must outlive the [`TestApp`] returned by
/// [`TestBuilder::build`]: dropping it disposes the harness.
#[derive(Debug)]
pub struct TestBuilder {
    orchestrator: Arc<BuildOrchestrator>,
    settings: HarnessSettings,
}

impl TestBuilder {
    /// Create a builder with the supplied overrides.
    pub async fn create(overrides: HarnessOverrides) -> Result<Self> {
        Self::options().overrides(overrides).create().await
    }

    /// Start configuring a builder.
    pub fn options() -> TestBuilderOptions {
        TestBuilderOptions::default()
    }

    /// Build using the settings' timeout.
    pub async fn build(&self) -> Result<TestApp> {
        self.build_within(self.settings.build_timeout).await
    }

    /// Build, giving up after `timeout`.
    pub async fn build_within(&self, timeout: Duration) -> Result<TestApp> {
        self.orchestrator.build(Some(timeout)).await
    }

    /// Dispose the harness and any built host.
    pub async fn dispose(&self) {
        self.orchestrator.dispose().await;
    }

    /// Current build phase.
    pub fn phase(&self) -> BuildPhase {
        self.orchestrator.phase()
    }

    /// Adjust the intermediate builder before the build is requested.
    ///
    /// `f` runs while the builder slot is locked, and so does
    /// [`BuildHooks::on_building`]. Calling back into this method from
    /// either deadlocks.
    pub fn with_builder<R>(&self, f: impl FnOnce(&mut AppHostBuilder) -> R) -> Result<R> {
        self.orchestrator.with_builder(f)
    }

    /// Register a resource on the intermediate builder.
    pub fn add_resource(&self, spec: ResourceSpec) -> Result<()> {
        self.with_builder(|builder| builder.add_resource(spec).map(|_| ()))??;
        Ok(())
    }

    /// Snapshot of the builder's configuration.
    pub fn configuration(&self) -> Result<ConfigurationStore> {
        self.with_builder(|builder| builder.configuration().clone())
    }

    /// Environment designation of the intermediate builder.
    pub fn environment(&self) -> Result<String> {
        self.with_builder(|builder| builder.environment().to_owned())
    }

    /// Overrides written into the host configuration.
    pub fn overrides(&self) -> &HarnessOverrides {
        self.orchestrator.overrides()
    }

    /// Settings the harness was created with.
    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Whether the construction task is still alive.
    pub fn construction_pending(&self) -> bool {
        self.orchestrator.construction_pending()
    }

    /// Orchestrator driving this build.
    pub fn orchestrator(&self) -> &Arc<BuildOrchestrator> {
        &self.orchestrator
    }
}

impl Drop for TestBuilder {
    fn drop(&mut self) {
        self.orchestrator.dispose_now();
    }
}
