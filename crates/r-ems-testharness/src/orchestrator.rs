//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Suspendable multi-phase build pipeline for the application host."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Drives `AppHostBuilder::create` and `AppHostBuilder::build` on a
//! background construction task that parks at a [`SuspendGate`] between the
//! two calls. The owner (the test) decides when the task may continue.
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r_ems_apphost::{AppHost, AppHostBuilder, HostOptions, ResourceTracker};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::facade::TestApp;
use crate::gate::SuspendGate;
use crate::hooks::BuildHooks;
use crate::interceptor::ConstructionInterceptor;
use crate::phase::{BuildPhase, PhaseTracker};
use crate::settings::{HarnessOverrides, MissPolicy};
use crate::{HarnessError, Result};

/// Builder entry point invoked on the construction task.
pub type EntryPoint = Arc<dyn Fn(HostOptions) -> AppHostBuilder + Send + Sync>;

pub(crate) fn default_entry_point() -> EntryPoint {
    Arc::new(AppHostBuilder::create_with_options)
}

/// Inputs fixed when an orchestrator is created.
pub(crate) struct OrchestratorInputs {
    pub(crate) args: Vec<String>,
    pub(crate) overrides: HarnessOverrides,
    pub(crate) miss_policy: MissPolicy,
    pub(crate) hooks: Arc<dyn BuildHooks>,
    pub(crate) tracker: Option<Arc<dyn ResourceTracker>>,
    pub(crate) entry: EntryPoint,
}

#[derive(Default)]
struct Inner {
    builder: Option<AppHostBuilder>,
    product: Option<Arc<AppHost>>,
    started: bool,
    disposed: bool,
}

/// Owns the phase state, the gate, and the builder and product slots of one
/// harness-driven build.
pub struct BuildOrchestrator {
    inputs: OrchestratorInputs,
    interceptor: ConstructionInterceptor,
    phase: PhaseTracker,
    gate: SuspendGate,
    inner: Mutex<Inner>,
    build_requested: AtomicBool,
    construction: Mutex<Option<JoinHandle<()>>>,
    built: Mutex<Option<oneshot::Receiver<Result<Arc<AppHost>>>>>,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("phase", &self.phase.current())
            .field("suffix", &self.inputs.overrides.suffix())
            .field("miss_policy", &self.inputs.miss_policy)
            .field("gate_pending", &self.gate.pending())
            .finish_non_exhaustive()
    }
}

impl BuildOrchestrator {
    pub(crate) fn new(inputs: OrchestratorInputs) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            inputs,
            interceptor: ConstructionInterceptor::new(),
            phase: PhaseTracker::new(),
            gate: SuspendGate::new(),
            inner: Mutex::new(Inner::default()),
            build_requested: AtomicBool::new(false),
            construction: Mutex::new(None),
            built: Mutex::new(None),
            shutdown,
        })
    }

    /// Current build phase.
    pub fn phase(&self) -> BuildPhase {
        self.phase.current()
    }

    /// Overrides written into the host configuration.
    pub fn overrides(&self) -> &HarnessOverrides {
        &self.inputs.overrides
    }

    /// Built host, once available.
    pub fn product(&self) -> Option<Arc<AppHost>> {
        self.inner.lock().product.clone()
    }

    /// Whether the construction task is still alive.
    pub fn construction_pending(&self) -> bool {
        self.construction
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Run `f` against the intermediate builder while construction is
    /// suspended. `f` holds the slot lock and must not re-enter.
    pub fn with_builder<R>(&self, f: impl FnOnce(&mut AppHostBuilder) -> R) -> Result<R> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(HarnessError::Disposed);
        }
        let builder = inner.builder.as_mut().ok_or(HarnessError::BuilderConsumed)?;
        Ok(f(builder))
    }

    /// Spawn the construction task. The returned receiver resolves once the
    /// builder has been created or creation failed.
    pub(crate) fn spawn_construction(self: &Arc<Self>) -> oneshot::Receiver<Result<()>> {
        let (created_tx, created_rx) = oneshot::channel();
        let (built_tx, built_rx) = oneshot::channel();
        *self.built.lock() = Some(built_rx);

        let orchestrator = Arc::clone(self);
        let task = tokio::spawn(async move {
            if let Err(err) = orchestrator.resolve_builder() {
                let _ = created_tx.send(Err(err));
                return;
            }
            let _ = created_tx.send(Ok(()));
            let outcome = orchestrator.resolve_product().await;
            if let Err(err) = &outcome {
                debug!(error = %err, "construction task finished without a product");
            }
            let _ = built_tx.send(outcome);
        });
        *self.construction.lock() = Some(task);
        created_rx
    }

    /// Create the intermediate builder through the intercepted entry point.
    pub(crate) fn resolve_builder(&self) -> Result<()> {
        self.phase
            .advance(BuildPhase::Creating)
            .map_err(|err| match err {
                HarnessError::InvalidTransition { .. } => HarnessError::BuilderAlreadyResolved,
                other => other,
            })?;

        let mut options = HostOptions::new(self.inputs.args.clone());
        if let Some(tracker) = &self.inputs.tracker {
            options.tracker = Arc::clone(tracker);
        }
        let entry = Arc::clone(&self.inputs.entry);
        let overrides = self.inputs.overrides.clone();
        let hooks = Arc::clone(&self.inputs.hooks);
        let intercepted = self.interceptor.run(
            move || entry(options),
            move |options, settings| {
                overrides.apply(settings);
                hooks
                    .on_creating(options, settings)
                    .map_err(HarnessError::hook(BuildPhase::Creating))
            },
        )?;

        if !intercepted.intercepted && self.inputs.miss_policy == MissPolicy::Fail {
            return Err(HarnessError::InterceptionMissed {
                channel: self.interceptor.channel(),
                key: self.interceptor.key(),
            });
        }

        let mut builder = intercepted.product;
        self.phase.advance(BuildPhase::Created)?;
        info!(
            phase = %BuildPhase::Created,
            scope = %intercepted.scope,
            intercepted = intercepted.intercepted,
            environment = builder.environment(),
            "application builder created"
        );
        self.inputs
            .hooks
            .on_created(&mut builder)
            .map_err(HarnessError::hook(BuildPhase::Created))?;

        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(HarnessError::Disposed);
        }
        inner.builder = Some(builder);
        Ok(())
    }

    /// Park until the owner requests the build, then build and initialize
    /// the host.
    pub(crate) async fn resolve_product(&self) -> Result<Arc<AppHost>> {
        self.phase.advance(BuildPhase::Building)?;
        {
            // The hook runs under the slot lock; it must not call back into
            // `with_builder`.
            let mut inner = self.inner.lock();
            let builder = inner.builder.as_mut().ok_or(HarnessError::BuilderConsumed)?;
            self.inputs
                .hooks
                .on_building(builder)
                .map_err(HarnessError::hook(BuildPhase::Building))?;
        }

        info!(phase = %BuildPhase::Building, "construction suspended until build is requested");
        self.gate.wait().await;
        if self.inner.lock().disposed {
            debug!("harness disposed while construction was suspended");
            return Err(HarnessError::Disposed);
        }

        let builder = self
            .inner
            .lock()
            .builder
            .take()
            .ok_or(HarnessError::BuilderConsumed)?;
        let host = Arc::new(builder.build()?);
        host.initialize()?;
        {
            let mut inner = self.inner.lock();
            if inner.disposed {
                drop(inner);
                host.shutdown_now();
                return Err(HarnessError::Disposed);
            }
            inner.product = Some(Arc::clone(&host));
        }

        self.inputs
            .hooks
            .on_built(&host)
            .map_err(HarnessError::hook(BuildPhase::Built))?;
        self.phase.advance(BuildPhase::Built)?;
        info!(
            phase = %BuildPhase::Built,
            application = host.application_name(),
            resources = host.resources().len(),
            "application host built"
        );
        Ok(host)
    }

    /// Release the construction task and wait for the host. `timeout`
    /// bounds only this call; on expiry the task keeps running until
    /// [`BuildOrchestrator::dispose`].
    pub async fn build(self: &Arc<Self>, timeout: Option<Duration>) -> Result<TestApp> {
        if self.inner.lock().disposed {
            return Err(HarnessError::Disposed);
        }
        if self.build_requested.swap(true, Ordering::SeqCst) {
            return Err(HarnessError::AlreadyBuilding);
        }
        let receiver = self.built.lock().take().ok_or_else(|| {
            HarnessError::ConstructionAborted("construction task was never started".to_owned())
        })?;

        self.gate.release();
        debug!(phase = %self.phase(), "build requested");
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, receiver)
                .await
                .map_err(|_| HarnessError::BuildTimedOut(limit))?,
            None => receiver.await,
        };
        let host = outcome.map_err(|_| {
            HarnessError::ConstructionAborted("construction task ended before reporting a result".to_owned())
        })??;
        Ok(TestApp::new(host, Arc::downgrade(self)))
    }

    /// Launch the built host's resources. Repeated calls are no-ops.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(HarnessError::Disposed);
        }
        let host = inner.product.clone().ok_or(HarnessError::NotBuilt)?;
        if self.phase.current() != BuildPhase::Built {
            return Err(HarnessError::NotBuilt);
        }
        if inner.started {
            return Ok(());
        }
        host.launch()?;
        inner.started = true;
        info!(application = host.application_name(), "application host started");
        Ok(())
    }

    /// Start, then wait until the harness is disposed.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        let mut disposed = self.shutdown.subscribe();
        let _ = disposed.wait_for(|disposed| *disposed).await;
        Ok(())
    }

    fn mark_disposed(&self) -> Option<Option<Arc<AppHost>>> {
        let product = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return None;
            }
            inner.disposed = true;
            inner.builder = None;
            inner.product.take()
        };
        self.phase.dispose();
        self.gate.release();
        self.shutdown.send_replace(true);
        Some(product)
    }

    /// Tear down the host and the construction task. Idempotent.
    pub async fn dispose(&self) {
        let Some(product) = self.mark_disposed() else {
            return;
        };
        if let Some(host) = product {
            host.dispose().await;
        }
        let task = self.construction.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "construction task join error");
            }
        }
        info!(phase = %BuildPhase::Disposed, "harness disposed");
    }

    /// Synchronous best-effort teardown for use from `Drop`.
    pub fn dispose_now(&self) {
        let Some(product) = self.mark_disposed() else {
            return;
        };
        if let Some(task) = self.construction.lock().take() {
            task.abort();
        }
        if let Some(host) = product {
            host.shutdown_now();
        }
        debug!(phase = %BuildPhase::Disposed, "harness dropped");
    }
}
