//! ---
//! ems_section: "16-application-hosting"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Application host builder, configuration, and resource lifecycle."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigurationStore;
use crate::resource::{loopback, Resource, ResourceTracker};
use crate::{HostError, Result};

const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;

/// Resource handling derived from host configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResourcePolicy {
    pub(crate) randomize_ports: bool,
    pub(crate) delete_on_shutdown: bool,
    pub(crate) name_suffix: Option<String>,
}

#[derive(Debug, Default)]
struct HostState {
    initialized: bool,
    running: bool,
    released: bool,
    disposed: bool,
    endpoints: IndexMap<String, SocketAddr>,
}

/// Fully built application host.
#[derive(Debug)]
pub struct AppHost {
    environment: String,
    application_name: String,
    configuration: ConfigurationStore,
    resources: Vec<Resource>,
    policy: ResourcePolicy,
    tracker: Arc<dyn ResourceTracker>,
    state: Mutex<HostState>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    shutdown: broadcast::Sender<()>,
}

impl AppHost {
    pub(crate) fn new(
        environment: String,
        application_name: String,
        configuration: ConfigurationStore,
        resources: Vec<Resource>,
        policy: ResourcePolicy,
        tracker: Arc<dyn ResourceTracker>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(4);
        Self {
            environment,
            application_name,
            configuration,
            resources,
            policy,
            tracker,
            state: Mutex::new(HostState::default()),
            tasks: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Environment designation.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Application name.
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Configuration the host was built with.
    pub fn configuration(&self) -> &ConfigurationStore {
        &self.configuration
    }

    /// Materialized resources.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Look up a resource by declared or suffixed name.
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|resource| resource.declared_name == name || resource.name == name)
    }

    /// Endpoint allocated for a resource during initialization.
    pub fn endpoint(&self, name: &str) -> Result<Option<SocketAddr>> {
        let resource = self
            .resource(name)
            .ok_or_else(|| HostError::UnknownResource(name.to_owned()))?;
        let state = self.state.lock();
        if !state.initialized {
            return Err(HostError::NotInitialized);
        }
        Ok(state.endpoints.get(&resource.name).copied())
    }

    /// Whether one-time initialization has run.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Whether resource tasks are running.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Whether the host has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// One-time initialization: allocate endpoints and acquire resources.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(HostError::Disposed);
        }
        if state.initialized {
            return Err(HostError::AlreadyInitialized);
        }
        state.endpoints = self.allocate_endpoints()?;
        for resource in &self.resources {
            self.tracker.acquire(&resource.name);
        }
        state.initialized = true;
        info!(
            application = %self.application_name,
            resources = self.resources.len(),
            tracker = self.tracker.name(),
            "application host initialized"
        );
        Ok(())
    }

    fn allocate_endpoints(&self) -> Result<IndexMap<String, SocketAddr>> {
        let mut rng = rand::thread_rng();
        let mut used = HashSet::new();
        let mut endpoints = IndexMap::new();
        for resource in &self.resources {
            let Some(declared) = resource.declared_port else {
                continue;
            };
            let port = if self.policy.randomize_ports {
                random_port(&mut rng, &mut used, EPHEMERAL_PORTS).ok_or_else(|| {
                    HostError::PortsExhausted {
                        resource: resource.name.clone(),
                        range: format!("{EPHEMERAL_PORTS:?}"),
                    }
                })?
            } else {
                declared
            };
            debug!(resource = %resource.name, port, "endpoint allocated");
            endpoints.insert(resource.name.clone(), loopback(port));
        }
        Ok(endpoints)
    }

    /// Spawn one task per resource. Requires a prior [`AppHost::initialize`].
    pub fn launch(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(HostError::Disposed);
        }
        if !state.initialized {
            return Err(HostError::NotInitialized);
        }
        if state.running {
            return Err(HostError::AlreadyRunning);
        }
        let mut tasks = self.tasks.lock();
        for resource in &self.resources {
            let name = resource.name.clone();
            let mut shutdown = self.shutdown.subscribe();
            let task = tokio::spawn(async move {
                let _ = shutdown.recv().await;
                debug!(resource = %name, "resource shutdown signal received");
            });
            tasks.push((resource.name.clone(), task));
        }
        state.running = true;
        info!(application = %self.application_name, resources = tasks.len(), "application host running");
        Ok(())
    }

    /// The host's own startup path: initialize, then launch.
    pub fn start(&self) -> Result<()> {
        self.initialize()?;
        self.launch()
    }

    /// Stop resource tasks and, if configured, release tracked resources.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());
        let tasks: Vec<(String, JoinHandle<()>)> = self.tasks.lock().drain(..).collect();
        for (name, task) in tasks {
            if let Err(err) = task.await {
                warn!(resource = %name, error = %err, "resource task join error");
            }
        }
        self.release_resources();
    }

    /// Stop the host and mark it disposed. Idempotent.
    pub async fn dispose(&self) {
        if self.state.lock().disposed {
            return;
        }
        self.stop().await;
        self.state.lock().disposed = true;
        debug!(application = %self.application_name, "application host disposed");
    }

    /// Synchronous best-effort teardown for use from `Drop`.
    pub fn shutdown_now(&self) {
        let _ = self.shutdown.send(());
        for (_, task) in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.release_resources();
        self.state.lock().disposed = true;
    }

    fn release_resources(&self) {
        let mut state = self.state.lock();
        state.running = false;
        if !state.initialized || state.released {
            return;
        }
        if !self.policy.delete_on_shutdown {
            info!(
                application = %self.application_name,
                retained = self.resources.len(),
                "resources retained after shutdown"
            );
            return;
        }
        for resource in &self.resources {
            if !self.tracker.release(&resource.name) {
                warn!(resource = %resource.name, "resource was not outstanding at release");
            }
        }
        state.released = true;
    }
}

const RANDOM_PORT_ATTEMPTS: usize = 64;

/// Pick an unused port from `range`, falling back to a scan once random
/// draws keep colliding. `None` when every port in `range` is taken.
fn random_port(
    rng: &mut impl Rng,
    used: &mut HashSet<u16>,
    range: RangeInclusive<u16>,
) -> Option<u16> {
    for _ in 0..RANDOM_PORT_ATTEMPTS {
        let candidate = rng.gen_range(range.clone());
        if used.insert(candidate) {
            return Some(candidate);
        }
    }
    let port = range.into_iter().find(|port| !used.contains(port))?;
    used.insert(port);
    Some(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{AppHostBuilder, HostOptions, HostSettings};
    use crate::config::{DELETE_ON_SHUTDOWN_KEY, RANDOMIZE_PORTS_KEY};
    use crate::resource::{InMemoryResourceTracker, ResourceSpec};

    fn host_with(
        tracker: Arc<InMemoryResourceTracker>,
        pairs: &[(&str, &str)],
    ) -> AppHost {
        let options = HostOptions {
            tracker: tracker.clone(),
            ..HostOptions::default()
        };
        let settings = HostSettings {
            configuration: ConfigurationStore::from_pairs(pairs.iter().copied()),
            ..HostSettings::default()
        };
        let mut builder = AppHostBuilder::from_parts(options, settings);
        builder
            .add_resource(ResourceSpec::service("bus").with_port(7100))
            .expect("bus")
            .add_resource(ResourceSpec::service("logger"))
            .expect("logger");
        builder.build().expect("build")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_runs_once_and_stop_releases_resources() {
        let tracker = Arc::new(InMemoryResourceTracker::new());
        let host = host_with(tracker.clone(), &[(DELETE_ON_SHUTDOWN_KEY, "true")]);

        host.start().expect("start");
        assert!(host.is_running());
        assert_eq!(host.endpoint("bus").unwrap(), Some(loopback(7100)));
        assert_eq!(host.endpoint("logger").unwrap(), None);
        assert!(matches!(host.start(), Err(HostError::AlreadyInitialized)));
        assert_eq!(tracker.outstanding().len(), 2);

        host.dispose().await;
        assert!(!host.is_running());
        assert!(host.is_disposed());
        assert!(tracker.outstanding().is_empty());
        host.dispose().await;
        assert_eq!(tracker.acquisitions(), 2);
    }

    #[tokio::test]
    async fn resources_retained_without_delete_flag() {
        let tracker = Arc::new(InMemoryResourceTracker::new());
        let host = host_with(tracker.clone(), &[]);

        host.initialize().expect("initialize");
        host.dispose().await;
        assert_eq!(tracker.outstanding(), vec!["bus", "logger"]);
    }

    #[tokio::test]
    async fn randomized_ports_avoid_declared_port() {
        let tracker = Arc::new(InMemoryResourceTracker::new());
        let host = host_with(tracker, &[(RANDOMIZE_PORTS_KEY, "true")]);

        host.initialize().expect("initialize");
        let endpoint = host.endpoint("bus").unwrap().expect("bus endpoint");
        assert!(EPHEMERAL_PORTS.contains(&endpoint.port()));
        assert!(matches!(host.launch(), Ok(())));
        host.shutdown_now();
        assert!(matches!(host.launch(), Err(HostError::Disposed)));
    }

    #[test]
    fn random_port_gives_up_once_range_is_full() {
        let mut rng = rand::thread_rng();
        let mut used = HashSet::new();
        let mut taken: Vec<u16> = (0..4)
            .map(|_| random_port(&mut rng, &mut used, 40000..=40003).expect("free port"))
            .collect();
        taken.sort_unstable();
        assert_eq!(taken, vec![40000, 40001, 40002, 40003]);
        assert_eq!(random_port(&mut rng, &mut used, 40000..=40003), None);
    }
}
