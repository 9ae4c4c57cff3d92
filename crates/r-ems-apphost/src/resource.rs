//! ---
//! ems_section: "16-application-hosting"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Application host builder, configuration, and resource lifecycle."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Category of a hosted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Long-running R-EMS service such as the bus or configd.
    Service,
    /// Persistent store.
    Database,
    /// Message broker or queue.
    Queue,
    /// In-memory cache.
    Cache,
}

impl ResourceKind {
    /// Static label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Service => "service",
            ResourceKind::Database => "database",
            ResourceKind::Queue => "queue",
            ResourceKind::Cache => "cache",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a resource registered on a builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Declared resource name.
    pub name: String,
    /// Resource category.
    pub kind: ResourceKind,
    /// Port the resource listens on when ports are not randomized.
    #[serde(default)]
    pub port: Option<u16>,
}

impl ResourceSpec {
    /// Declare a resource without an endpoint.
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            port: None,
        }
    }

    /// Convenience constructor for a service resource.
    pub fn service(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Service)
    }

    /// Attach a listening port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Resource materialized by a built host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Name as declared on the builder.
    pub declared_name: String,
    /// Name including the configured suffix.
    pub name: String,
    /// Resource category.
    pub kind: ResourceKind,
    /// Port requested by the declaration.
    pub declared_port: Option<u16>,
}

/// Records resources acquired by hosts so leaks can be observed.
pub trait ResourceTracker: Send + Sync + fmt::Debug {
    /// Mark a resource as acquired.
    fn acquire(&self, name: &str);
    /// Release a resource; returns `false` when it was not outstanding.
    fn release(&self, name: &str) -> bool;
    /// Names of resources acquired and not yet released.
    fn outstanding(&self) -> Vec<String>;
    /// Human-readable tracker name for logging.
    fn name(&self) -> &'static str;
}

/// In-memory tracker backed by a mutex protected map.
#[derive(Debug, Default)]
pub struct InMemoryResourceTracker {
    active: Mutex<IndexMap<String, u32>>,
    acquisitions: AtomicU64,
}

impl InMemoryResourceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of acquisitions ever recorded.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

impl ResourceTracker for InMemoryResourceTracker {
    fn acquire(&self, name: &str) {
        *self.active.lock().entry(name.to_owned()).or_insert(0) += 1;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self, name: &str) -> bool {
        let mut active = self.active.lock();
        let Some(count) = active.get_mut(name) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            active.shift_remove(name);
        }
        true
    }

    fn outstanding(&self) -> Vec<String> {
        self.active.lock().keys().cloned().collect()
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Address a resource endpoint binds on.
pub(crate) fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_counts_outstanding_resources() {
        let tracker = InMemoryResourceTracker::new();
        tracker.acquire("bus-1a");
        tracker.acquire("bus-1a");
        tracker.acquire("configd-1a");

        assert!(tracker.release("bus-1a"));
        assert_eq!(tracker.outstanding(), vec!["bus-1a", "configd-1a"]);
        assert!(tracker.release("bus-1a"));
        assert!(tracker.release("configd-1a"));
        assert!(!tracker.release("configd-1a"));
        assert!(tracker.outstanding().is_empty());
        assert_eq!(tracker.acquisitions(), 3);
    }
}
