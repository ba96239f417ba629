//! Process-wide event bus
//!
//! Synchronous publish/subscribe over a closed set of topics. Publishing
//! fans out to subscribers in registration order; a panicking handler is
//! caught and logged so it cannot stop delivery to the remaining
//! subscribers. Events on the same topic are delivered in publish order.
//! The bus keeps no history: subscribers registered after a publish never
//! see that event.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::session::SessionMetadata;

/// The closed set of event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    ModelLoaded,
    ModelUnloaded,
    ChatMessage,
    AddonLoaded,
    AddonUnloaded,
    SettingsChanged,
}

impl Topic {
    /// All topics, in a stable order
    pub const ALL: [Topic; 6] = [
        Topic::ModelLoaded,
        Topic::ModelUnloaded,
        Topic::ChatMessage,
        Topic::AddonLoaded,
        Topic::AddonUnloaded,
        Topic::SettingsChanged,
    ];

    fn index(self) -> usize {
        match self {
            Topic::ModelLoaded => 0,
            Topic::ModelUnloaded => 1,
            Topic::ChatMessage => 2,
            Topic::AddonLoaded => 3,
            Topic::AddonUnloaded => 4,
            Topic::SettingsChanged => 5,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Topic::ModelLoaded => "model_loaded",
            Topic::ModelUnloaded => "model_unloaded",
            Topic::ChatMessage => "chat_message",
            Topic::AddonLoaded => "addon_loaded",
            Topic::AddonUnloaded => "addon_unloaded",
            Topic::SettingsChanged => "settings_changed",
        };
        f.write_str(name)
    }
}

/// Typed event payloads, one variant family per topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A model load attempt finished; `error` is set when it failed
    ModelLoaded {
        metadata: Option<SessionMetadata>,
        error: Option<String>,
    },
    /// The active model was unloaded
    ModelUnloaded,
    /// A chat message produced by the host or an addon
    ChatMessage { source: String, content: String },
    /// An addon changed state (load result, suspension, resumption)
    AddonStatus {
        name: String,
        state: String,
        error: Option<String>,
    },
    /// Host settings were changed at runtime
    SettingsChanged { key: String },
}

impl EventPayload {
    /// The topic this payload is published on
    pub fn topic(&self) -> Topic {
        match self {
            EventPayload::ModelLoaded { .. } => Topic::ModelLoaded,
            EventPayload::ModelUnloaded => Topic::ModelUnloaded,
            EventPayload::ChatMessage { .. } => Topic::ChatMessage,
            // Addon status updates (suspension, resumption) ride the
            // addon_loaded topic; unload notices get their own topic via
            // `Event::addon_unloaded`.
            EventPayload::AddonStatus { .. } => Topic::AddonLoaded,
            EventPayload::SettingsChanged { .. } => Topic::SettingsChanged,
        }
    }
}

/// An immutable event: topic, payload, and publish timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Build an event on the payload's natural topic
    pub fn new(payload: EventPayload) -> Self {
        Self {
            topic: payload.topic(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// An addon-unloaded notice (AddonStatus payload on the unload topic)
    pub fn addon_unloaded(name: &str, state: &str, error: Option<String>) -> Self {
        Self {
            topic: Topic::AddonUnloaded,
            payload: EventPayload::AddonStatus {
                name: name.to_string(),
                state: state.to_string(),
                error,
            },
            timestamp: Utc::now(),
        }
    }
}

/// Handler invoked for every event on a subscribed topic
pub type EventHandler = Box<dyn Fn(&Event) + Send + Sync>;

/// Opaque handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic: Topic,
    id: Uuid,
}

impl SubscriptionHandle {
    /// The topic this subscription is registered on
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

struct Subscriber {
    id: Uuid,
    handler: Arc<EventHandler>,
}

struct TopicState {
    subscribers: Vec<Subscriber>,
    pending: VecDeque<Event>,
    delivering: bool,
}

impl TopicState {
    fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            pending: VecDeque::new(),
            delivering: false,
        }
    }
}

/// Publish/subscribe bus over the closed topic set
///
/// One lock per topic: publishing on one topic never contends with
/// publishing on another. The lock is never held while handlers run, so a
/// handler may itself subscribe, unsubscribe, or publish — a publish on the
/// topic currently being delivered lands on that topic's pending queue and
/// is drained by the outermost publish, preserving strict FIFO per topic.
pub struct EventBus {
    topics: [Mutex<TopicState>; 6],
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: std::array::from_fn(|_| Mutex::new(TopicState::new())),
        }
    }

    /// Register a handler for a topic; returns a handle for unsubscribing
    pub fn subscribe(&self, topic: Topic, handler: EventHandler) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        let mut state = self.topics[topic.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.subscribers.push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        SubscriptionHandle { topic, id }
    }

    /// Remove a subscription; unknown handles are ignored
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut state = self.topics[handle.topic.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.subscribers.retain(|s| s.id != handle.id);
    }

    /// Publish an event, fanning out synchronously in registration order
    ///
    /// A panicking handler is caught and logged; delivery continues to the
    /// remaining subscribers. Publishing from inside a handler never
    /// deadlocks: the nested event is queued and delivered once the event
    /// in flight has reached every subscriber.
    pub fn publish(&self, event: Event) {
        let topic = &self.topics[event.topic.index()];
        {
            let mut state = topic.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.pending.push_back(event);
            if state.delivering {
                // Re-entrant publish from a handler on this topic; the
                // outer drain below picks the event up.
                return;
            }
            state.delivering = true;
        }

        loop {
            let (event, handlers) = {
                let mut state = topic.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                match state.pending.pop_front() {
                    Some(event) => {
                        let handlers: Vec<(Uuid, Arc<EventHandler>)> = state
                            .subscribers
                            .iter()
                            .map(|s| (s.id, Arc::clone(&s.handler)))
                            .collect();
                        (event, handlers)
                    }
                    None => {
                        state.delivering = false;
                        return;
                    }
                }
            };

            for (id, handler) in handlers {
                let result = catch_unwind(AssertUnwindSafe(|| handler(&event)));
                if result.is_err() {
                    warn!(
                        topic = %event.topic,
                        subscription = %id,
                        "event handler panicked; continuing fan-out"
                    );
                }
            }
        }
    }

    /// Publish a payload on its natural topic
    pub fn publish_payload(&self, payload: EventPayload) {
        self.publish(Event::new(payload));
    }

    /// Number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics[topic.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .subscribers
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut counts = f.debug_struct("EventBus");
        for topic in Topic::ALL {
            counts.field(&topic.to_string(), &self.subscriber_count(topic));
        }
        counts.finish()
    }
}
