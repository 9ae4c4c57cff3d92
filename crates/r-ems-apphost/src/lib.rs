//! ---
//! ems_section: "16-application-hosting"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Application host builder, configuration, and resource lifecycle."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Application host for composing R-EMS service resources.
//!
//! A host is assembled in two steps: [`AppHostBuilder::create`] gathers
//! options, settings and layered configuration, then
//! [`AppHostBuilder::build`] produces an [`AppHost`] whose resources can be
//! initialized, launched, and torn down. Construction milestones are
//! announced on the process-wide [`diagnostics`] channel.
#![warn(missing_docs)]

pub mod builder;
pub mod config;
pub mod diagnostics;
pub mod host;
pub mod resource;

/// Shared result type for application host operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors raised by the application host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// One-time initialization was requested twice.
    #[error("application host already initialized")]
    AlreadyInitialized,
    /// An operation required an initialized host.
    #[error("application host has not been initialized")]
    NotInitialized,
    /// Resources were launched while already running.
    #[error("application host resources are already running")]
    AlreadyRunning,
    /// The host was used after disposal.
    #[error("application host has been disposed")]
    Disposed,
    /// A resource with the same name was registered twice.
    #[error("resource {0} is already registered")]
    DuplicateResource(String),
    /// No resource is registered under the requested name.
    #[error("unknown resource {0}")]
    UnknownResource(String),
    /// No free port was left in the randomized range.
    #[error("no free port left in {range} for resource {resource}")]
    PortsExhausted {
        /// Resource that needed an endpoint.
        resource: String,
        /// Range that was searched.
        range: String,
    },
    /// A configuration value could not be interpreted.
    #[error("invalid value '{value}' for configuration key {key}")]
    InvalidConfiguration {
        /// Configuration key that was read.
        key: String,
        /// Raw value stored under the key.
        value: String,
    },
}

pub use builder::{AppHostBuilder, HostOptions, HostSettings};
pub use config::ConfigurationStore;
pub use diagnostics::{DiagnosticChannel, DiagnosticEvent, EventPayload, Subscription};
pub use host::AppHost;
pub use resource::{InMemoryResourceTracker, Resource, ResourceKind, ResourceSpec, ResourceTracker};
