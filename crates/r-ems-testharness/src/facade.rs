//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Application facade routing lifecycle calls through the harness."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use r_ems_apphost::{AppHost, ConfigurationStore, Resource};

use crate::orchestrator::BuildOrchestrator;
use crate::{HarnessError, Result};

/// Built application as seen by a test.
///
/// Lifecycle calls go through the orchestrator so the host is never
/// initialized twice and teardown always covers the construction task.
/// Reads go straight to the host.
#[derive(Debug, Clone)]
pub struct TestApp {
    host: Arc<AppHost>,
    orchestrator: Weak<BuildOrchestrator>,
}

impl TestApp {
    pub(crate) fn new(host: Arc<AppHost>, orchestrator: Weak<BuildOrchestrator>) -> Self {
        Self { host, orchestrator }
    }

    fn orchestrator(&self) -> Result<Arc<BuildOrchestrator>> {
        self.orchestrator
            .upgrade()
            .ok_or(HarnessError::OrchestratorDropped)
    }

    /// Launch the host's resources.
    pub async fn start(&self) -> Result<()> {
        self.orchestrator()?.start().await
    }

    /// Launch and wait until the harness is disposed.
    pub async fn run(&self) -> Result<()> {
        self.orchestrator()?.run().await
    }

    /// Stop the host and dispose the whole harness.
    pub async fn stop(&self) {
        self.dispose().await;
    }

    /// Dispose the harness. Safe to call repeatedly.
    pub async fn dispose(&self) {
        if let Some(orchestrator) = self.orchestrator.upgrade() {
            orchestrator.dispose().await;
        }
    }

    /// Underlying host.
    pub fn host(&self) -> &AppHost {
        &self.host
    }

    /// Environment designation.
    pub fn environment(&self) -> &str {
        self.host.environment()
    }

    /// Application name.
    pub fn application_name(&self) -> &str {
        self.host.application_name()
    }

    /// Configuration the host was built with.
    pub fn configuration(&self) -> &ConfigurationStore {
        self.host.configuration()
    }

    /// Materialized resources.
    pub fn resources(&self) -> &[Resource] {
        self.host.resources()
    }

    /// Resource by declared or suffixed name.
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.host.resource(name)
    }

    /// Endpoint allocated to a resource.
    pub fn endpoint(&self, name: &str) -> Result<Option<SocketAddr>> {
        Ok(self.host.endpoint(name)?)
    }

    /// Whether resource tasks are running.
    pub fn is_running(&self) -> bool {
        self.host.is_running()
    }
}
