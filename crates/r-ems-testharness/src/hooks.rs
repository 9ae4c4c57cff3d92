//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle hooks invoked by the build orchestrator."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use r_ems_apphost::{AppHost, AppHostBuilder, HostOptions, HostSettings};

/// Callbacks fired once each, in declaration order, while a harness builds
/// its host.
pub trait BuildHooks: Send + Sync {
    /// Inside the builder entry point, after harness overrides were applied.
    fn on_creating(&self, _options: &mut HostOptions, _settings: &mut HostSettings) -> anyhow::Result<()> {
        Ok(())
    }

    /// The intermediate builder exists.
    fn on_created(&self, _builder: &mut AppHostBuilder) -> anyhow::Result<()> {
        Ok(())
    }

    /// Construction is about to park until the owner requests the build.
    ///
    /// Runs with the builder slot locked. Do not call
    /// [`crate::TestBuilder::with_builder`] from here.
    fn on_building(&self, _builder: &mut AppHostBuilder) -> anyhow::Result<()> {
        Ok(())
    }

    /// The host has been built and initialized.
    fn on_built(&self, _host: &AppHost) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl BuildHooks for NoopHooks {}
