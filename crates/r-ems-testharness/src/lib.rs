//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Test harness orchestrator and shared exports."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! The test harness drives construction of an R-EMS application host in
//! phases so a test can rewrite configuration while the builder is being
//! created, adjust the builder while construction is suspended, and decide
//! when the host is finally built.
//!
//! ```rust,ignore
//! let builder = TestBuilder::create(HarnessOverrides::default().resource_suffix("7f3a")).await?;
//! builder.add_resource(ResourceSpec::service("bus").with_port(7100))?;
//! let app = builder.build().await?;
//! app.start().await?;
//! app.stop().await;
//! ```
#![warn(missing_docs)]

pub mod builder;
pub mod facade;
pub mod gate;
pub mod hooks;
pub mod interceptor;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod settings;

use std::time::Duration;

use r_ems_apphost::HostError;

/// Shared result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors surfaced by the harness.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A phase transition skipped or repeated a phase.
    #[error("invalid build phase transition from {from} to {to}")]
    InvalidTransition {
        /// Phase the pipeline was in.
        from: BuildPhase,
        /// Phase that was requested.
        to: BuildPhase,
    },
    /// The builder was resolved more than once.
    #[error("the application builder has already been resolved")]
    BuilderAlreadyResolved,
    /// `build` was requested more than once.
    #[error("build has already been requested for this harness")]
    AlreadyBuilding,
    /// The builder was already handed to the build step.
    #[error("the application builder has been consumed by the build")]
    BuilderConsumed,
    /// An operation required a built host.
    #[error("the application host has not been built")]
    NotBuilt,
    /// The harness was used after disposal.
    #[error("the harness has been disposed")]
    Disposed,
    /// A lifecycle hook returned an error.
    #[error("{phase} hook failed: {source}")]
    Hook {
        /// Phase whose hook failed.
        phase: BuildPhase,
        /// Error returned by the hook.
        source: anyhow::Error,
    },
    /// The construction event was never observed.
    #[error("construction event {key} was not observed on channel {channel}")]
    InterceptionMissed {
        /// Channel the interceptor listened on.
        channel: &'static str,
        /// Event key the interceptor expected.
        key: &'static str,
    },
    /// The owner stopped waiting for the build.
    #[error("timed out after {0:?} waiting for the application host to build")]
    BuildTimedOut(Duration),
    /// The facade outlived its orchestrator.
    #[error("the build orchestrator has been dropped")]
    OrchestratorDropped,
    /// The construction task ended without reporting a result.
    #[error("construction task ended unexpectedly: {0}")]
    ConstructionAborted(String),
    /// Error raised by the application host.
    #[error(transparent)]
    Host(#[from] HostError),
    /// Harness settings could not be loaded.
    #[error("invalid harness settings: {0}")]
    Settings(#[source] anyhow::Error),
}

impl HarnessError {
    pub(crate) fn hook(phase: BuildPhase) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| HarnessError::Hook { phase, source }
    }
}

pub use builder::{TestBuilder, TestBuilderOptions};
pub use facade::TestApp;
pub use gate::SuspendGate;
pub use hooks::{BuildHooks, NoopHooks};
pub use interceptor::{ConstructionInterceptor, Intercepted, ScopeId};
pub use logging::init_test_tracing;
pub use orchestrator::{BuildOrchestrator, EntryPoint};
pub use phase::{BuildPhase, PhaseTracker};
pub use settings::{HarnessOverrides, HarnessSettings, MissPolicy};

pub use r_ems_apphost::{AppHostBuilder, HostOptions, HostSettings, ResourceKind, ResourceSpec};
