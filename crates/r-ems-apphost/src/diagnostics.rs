//! ---
//! ems_section: "16-application-hosting"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Application host builder, configuration, and resource lifecycle."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Process-wide diagnostic event channel.
//!
//! Listeners subscribe once and observe every event published on every
//! channel; filtering by channel name and key is the listener's job.
//! Events are delivered synchronously on the publishing call stack.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::builder::{HostOptions, HostSettings};

/// Channel used by the application host for lifecycle milestones.
pub const HOSTING_CHANNEL: &str = "r-ems.hosting";
/// Key of the event published while a builder is being constructed.
pub const CONSTRUCTING_KEY: &str = "HostBuilderConstructing";
/// Key of the event published after a host has been built.
pub const BUILT_KEY: &str = "HostBuilt";

/// Channel the host publishes its construction milestones on.
pub static HOSTING: DiagnosticChannel = DiagnosticChannel::new(HOSTING_CHANNEL);

type Listener = Arc<dyn Fn(&mut DiagnosticEvent<'_>) + Send + Sync>;

static LISTENERS: Lazy<RwLock<Vec<(u64, Listener)>>> = Lazy::new(|| RwLock::new(Vec::new()));
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Payload carried by a diagnostic event.
pub enum EventPayload<'a> {
    /// Options and settings of a builder under construction. Listeners may
    /// mutate both before the builder reads them.
    Constructing {
        /// Options passed to the builder entry point.
        options: &'a mut HostOptions,
        /// Settings the builder derives its configuration from.
        settings: &'a mut HostSettings,
    },
    /// Free-form JSON payload.
    Json(Value),
}

impl fmt::Debug for EventPayload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPayload::Constructing { settings, .. } => f
                .debug_struct("Constructing")
                .field("args", &settings.args)
                .finish_non_exhaustive(),
            EventPayload::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

/// Event delivered to subscribed listeners.
#[derive(Debug)]
pub struct DiagnosticEvent<'a> {
    /// Name of the channel the event was published on.
    pub channel: &'a str,
    /// Event key within the channel.
    pub key: &'a str,
    /// Event payload.
    pub payload: EventPayload<'a>,
}

/// Named publisher on the process-wide event channel.
#[derive(Debug)]
pub struct DiagnosticChannel {
    name: &'static str,
}

impl DiagnosticChannel {
    /// Create a channel publishing under `name`.
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// Channel name attached to every published event.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether any listener is currently subscribed.
    pub fn is_enabled(&self) -> bool {
        !LISTENERS.read().is_empty()
    }

    /// Deliver an event to every listener and hand the payload back.
    pub fn publish<'a>(&self, key: &'a str, payload: EventPayload<'a>) -> EventPayload<'a> {
        let listeners: Vec<Listener> = LISTENERS
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        let mut event = DiagnosticEvent {
            channel: self.name,
            key,
            payload,
        };
        trace!(channel = self.name, key, listeners = listeners.len(), "publishing diagnostic event");
        for listener in listeners {
            listener(&mut event);
        }
        event.payload
    }
}

/// Registration handle; dropping it unsubscribes the listener.
#[derive(Debug)]
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
}

impl Subscription {
    /// Identifier of the registered listener.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        LISTENERS.write().retain(|(id, _)| *id != self.id);
        trace!(listener = self.id, "diagnostic listener unsubscribed");
    }
}

/// Subscribe a listener to every channel.
pub fn subscribe<F>(listener: F) -> Subscription
where
    F: Fn(&mut DiagnosticEvent<'_>) + Send + Sync + 'static,
{
    let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
    LISTENERS.write().push((id, Arc::new(listener)));
    trace!(listener = id, "diagnostic listener subscribed");
    Subscription { id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    static PROBE: DiagnosticChannel = DiagnosticChannel::new("r-ems.probe");

    #[test]
    fn listeners_observe_events_until_dropped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = subscribe(move |event| {
            if event.channel == "r-ems.probe" {
                sink.lock().push(event.key.to_owned());
            }
        });

        PROBE.publish("first", EventPayload::Json(Value::Null));
        drop(subscription);
        PROBE.publish("second", EventPayload::Json(Value::Null));

        assert_eq!(*seen.lock(), vec!["first".to_owned()]);
    }

    #[test]
    fn listeners_can_mutate_constructing_payload() {
        let _subscription = subscribe(|event| {
            if event.key != "mutate" {
                return;
            }
            if let EventPayload::Constructing { settings, .. } = &mut event.payload {
                settings.application_name = Some("probe-app".into());
            }
        });

        let mut options = HostOptions::default();
        let mut settings = HostSettings::default();
        PROBE.publish(
            "mutate",
            EventPayload::Constructing {
                options: &mut options,
                settings: &mut settings,
            },
        );
        assert_eq!(settings.application_name.as_deref(), Some("probe-app"));
    }
}
