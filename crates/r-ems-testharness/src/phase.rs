//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Build phase state machine for the test harness."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use crate::{HarnessError, Result};

/// Phase of a harness-driven build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildPhase {
    /// Nothing has run yet.
    NotStarted,
    /// The builder entry point is executing.
    Creating,
    /// The intermediate builder exists and may be adjusted.
    Created,
    /// Construction is parked waiting for the owner.
    Building,
    /// The host exists and has been initialized.
    Built,
    /// Terminal.
    Disposed,
}

impl BuildPhase {
    /// Static label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::NotStarted => "not_started",
            BuildPhase::Creating => "creating",
            BuildPhase::Created => "created",
            BuildPhase::Building => "building",
            BuildPhase::Built => "built",
            BuildPhase::Disposed => "disposed",
        }
    }

    /// The only phase reachable by a forward step.
    pub fn successor(&self) -> Option<BuildPhase> {
        match self {
            BuildPhase::NotStarted => Some(BuildPhase::Creating),
            BuildPhase::Creating => Some(BuildPhase::Created),
            BuildPhase::Created => Some(BuildPhase::Building),
            BuildPhase::Building => Some(BuildPhase::Built),
            BuildPhase::Built | BuildPhase::Disposed => None,
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic phase holder shared between the owner and the construction task.
#[derive(Debug)]
pub struct PhaseTracker {
    current: Mutex<BuildPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    /// Tracker in [`BuildPhase::NotStarted`].
    pub fn new() -> Self {
        Self {
            current: Mutex::new(BuildPhase::NotStarted),
        }
    }

    /// Current phase.
    pub fn current(&self) -> BuildPhase {
        *self.current.lock()
    }

    /// Move to `next`, which must be the immediate successor.
    pub fn advance(&self, next: BuildPhase) -> Result<BuildPhase> {
        let mut current = self.current.lock();
        if *current == BuildPhase::Disposed {
            return Err(HarnessError::Disposed);
        }
        if current.successor() != Some(next) {
            return Err(HarnessError::InvalidTransition {
                from: *current,
                to: next,
            });
        }
        let previous = std::mem::replace(&mut *current, next);
        debug!(from = %previous, phase = %next, "build phase advanced");
        Ok(previous)
    }

    /// Enter [`BuildPhase::Disposed`] from any phase. Returns `false` if
    /// already disposed.
    pub fn dispose(&self) -> bool {
        let mut current = self.current.lock();
        if *current == BuildPhase::Disposed {
            return false;
        }
        let previous = std::mem::replace(&mut *current, BuildPhase::Disposed);
        debug!(from = %previous, phase = %BuildPhase::Disposed, "build phase advanced");
        true
    }

    /// Whether the tracker reached the terminal phase.
    pub fn is_disposed(&self) -> bool {
        self.current() == BuildPhase::Disposed
    }
}
