//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Call-stack scoped interception of host builder construction."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Captures the options and settings a builder entry point creates
//! internally, without changing the entry point's signature.
//!
//! The hosting channel is process-wide, so a listener alone would also see
//! constructions running on other threads. Each [`ConstructionInterceptor::run`]
//! therefore marks the current call stack with a fresh [`ScopeId`] and only
//! reacts to events published while that scope is active.
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use r_ems_apphost::diagnostics::{self, EventPayload, CONSTRUCTING_KEY, HOSTING_CHANNEL};
use r_ems_apphost::{HostOptions, HostSettings};
use tracing::{debug, warn};

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE_SCOPE: Cell<Option<ScopeId>> = const { Cell::new(None) };
}

/// Identity of one interception on the current call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        ScopeId(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }

    /// Scope active on the calling thread, if any.
    pub fn current() -> Option<ScopeId> {
        ACTIVE_SCOPE.with(Cell::get)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

struct ScopeGuard {
    previous: Option<ScopeId>,
}

impl ScopeGuard {
    fn enter(scope: ScopeId) -> Self {
        let previous = ACTIVE_SCOPE.with(|slot| slot.replace(Some(scope)));
        Self { previous }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        ACTIVE_SCOPE.with(|slot| slot.set(self.previous));
    }
}

type Configure<E> = Box<dyn FnOnce(&mut HostOptions, &mut HostSettings) -> Result<(), E> + Send>;

/// Product of an intercepted construction.
#[derive(Debug)]
pub struct Intercepted<P> {
    /// Value returned by the construction call.
    pub product: P,
    /// Whether the configuring callback ran.
    pub intercepted: bool,
    /// Scope the construction ran under.
    pub scope: ScopeId,
}

/// Listens for one construction event around a synchronous call.
#[derive(Debug, Clone, Copy)]
pub struct ConstructionInterceptor {
    channel: &'static str,
    key: &'static str,
}

impl Default for ConstructionInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstructionInterceptor {
    /// Interceptor for the host builder construction event.
    pub fn new() -> Self {
        Self::for_event(HOSTING_CHANNEL, CONSTRUCTING_KEY)
    }

    /// Interceptor for a custom channel and key.
    pub fn for_event(channel: &'static str, key: &'static str) -> Self {
        Self { channel, key }
    }

    /// Channel name matched by this interceptor.
    pub fn channel(&self) -> &'static str {
        self.channel
    }

    /// Event key matched by this interceptor.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Run `construction` and hand the first matching constructing payload
    /// published on this call stack to `on_configuring`.
    ///
    /// Listeners cannot fail the publishing call, so an error from
    /// `on_configuring` does not stop `construction`: it runs to completion
    /// with whatever the callback had already written, then its product is
    /// dropped and the error returned. When no matching event is
    /// seen, the product built with framework defaults is returned with
    /// `intercepted` unset.
    pub fn run<P, E, C, F>(&self, construction: C, on_configuring: F) -> Result<Intercepted<P>, E>
    where
        C: FnOnce() -> P,
        F: FnOnce(&mut HostOptions, &mut HostSettings) -> Result<(), E> + Send + 'static,
        E: Send + 'static,
    {
        let scope = ScopeId::next();
        let callback: Configure<E> = Box::new(on_configuring);
        let pending = Mutex::new(Some(callback));
        let outcome: Arc<Mutex<Option<Result<(), E>>>> = Arc::new(Mutex::new(None));

        let product = {
            let listener_outcome = Arc::clone(&outcome);
            let (channel, key) = (self.channel, self.key);
            let _scope = ScopeGuard::enter(scope);
            let _subscription = diagnostics::subscribe(move |event| {
                if ScopeId::current() != Some(scope) || event.channel != channel || event.key != key {
                    return;
                }
                let EventPayload::Constructing { options, settings } = &mut event.payload else {
                    debug!(%scope, key, "construction event without constructing payload ignored");
                    return;
                };
                let Some(callback) = pending.lock().take() else {
                    debug!(%scope, key, "duplicate construction event ignored");
                    return;
                };
                debug!(%scope, channel, key, "construction intercepted");
                let result = callback(&mut **options, &mut **settings);
                *listener_outcome.lock() = Some(result);
            });
            construction()
        };

        let result = outcome.lock().take();
        match result {
            Some(Err(err)) => Err(err),
            Some(Ok(())) => Ok(Intercepted {
                product,
                intercepted: true,
                scope,
            }),
            None => {
                warn!(
                    %scope,
                    channel = self.channel,
                    key = self.key,
                    "construction event not observed; builder uses framework defaults"
                );
                Ok(Intercepted {
                    product,
                    intercepted: false,
                    scope,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_ems_apphost::diagnostics::{DiagnosticChannel, HOSTING};
    use r_ems_apphost::AppHostBuilder;

    #[test]
    fn callback_mutates_settings_before_builder_reads_them() {
        let intercepted = ConstructionInterceptor::new()
            .run(
                || AppHostBuilder::create(Vec::<String>::new()),
                |_options, settings| {
                    settings.environment_name = Some("Staging".into());
                    Ok::<_, std::convert::Infallible>(())
                },
            )
            .expect("intercept");

        assert!(intercepted.intercepted);
        assert_eq!(intercepted.product.environment(), "Staging");
        assert_eq!(ScopeId::current(), None);
    }

    #[test]
    fn other_channel_is_a_miss() {
        static OTHER: DiagnosticChannel = DiagnosticChannel::new("r-ems.other");
        let intercepted = ConstructionInterceptor::new()
            .run(
                || {
                    let mut options = HostOptions::default();
                    let mut settings = HostSettings::default();
                    OTHER.publish(
                        CONSTRUCTING_KEY,
                        EventPayload::Constructing {
                            options: &mut options,
                            settings: &mut settings,
                        },
                    );
                },
                |_, _| -> Result<(), ()> { panic!("must not run") },
            )
            .expect("miss is not an error");
        assert!(!intercepted.intercepted);
    }

    #[test]
    fn second_event_is_ignored() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let intercepted = ConstructionInterceptor::new()
            .run(
                || {
                    for _ in 0..2 {
                        let mut options = HostOptions::default();
                        let mut settings = HostSettings::default();
                        HOSTING.publish(
                            CONSTRUCTING_KEY,
                            EventPayload::Constructing {
                                options: &mut options,
                                settings: &mut settings,
                            },
                        );
                    }
                },
                move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                },
            )
            .expect("intercept");
        assert!(intercepted.intercepted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_error_is_returned_after_construction() {
        let err = ConstructionInterceptor::new()
            .run(
                || AppHostBuilder::create(["--Resources:NameSuffix=ab"]),
                |_, _| Err("rejected"),
            )
            .expect_err("callback failure");
        assert_eq!(err, "rejected");
        assert_eq!(ScopeId::current(), None);
    }

    #[test]
    fn scope_is_restored_after_panic() {
        let outcome = std::panic::catch_unwind(|| {
            ConstructionInterceptor::new().run(
                || -> u8 { panic!("construction failed") },
                |_, _| Ok::<_, ()>(()),
            )
        });
        assert!(outcome.is_err());
        assert_eq!(ScopeId::current(), None);
    }
}
