//! # Event Bus Implementation
//!
//! The EventBus is the central messaging hub for the runtime's event-driven
//! architecture. Boot phases, module hooks, and diagnostic observers all
//! communicate through it without direct dependencies.
//!
//! ## Features
//!
//! - **Namespaced Events**: `:`-delimited names with single-segment `*`
//!   wildcard subscriptions
//! - **Awaited Delivery**: `publish` resolves only after every matching
//!   listener has completed, in registration order
//! - **Fail-fast Dispatch**: the first listener error aborts delivery and
//!   propagates to the publisher
//! - **Any-event Observers**: synchronous taps notified of every emission
//!
//! ## Design Decisions
//!
//! The bus keeps an ordered listener table instead of a broadcast channel
//! because phase ordering requires the publisher to await listener
//! completion, not merely enqueue the event. The table lock is released
//! before any listener runs, so listeners may freely register or remove
//! other listeners while a dispatch is in flight.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::pattern::EventPattern;

/// # Event
///
/// A discrete message on the bus: a `:`-delimited name plus a payload of
/// key-value parameters.
///
/// ## Example
///
/// ```rust,no_run
/// use modulith::event::{Event, Value};
///
/// let event = Event::new("modules:heartbeat:beat")
///     .with_parameter("sequence", Value::Integer(42));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    /// Namespaced event name, e.g. `modules:heartbeat:beat`
    pub name: String,
    /// Event payload data as key-value pairs
    pub parameters: HashMap<String, Value>,
}

impl Event {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Returns a copy of the event renamed under `<namespace>:<name>`.
    /// Parameters are carried over untouched.
    pub fn namespaced(&self, namespace: &str) -> Self {
        Self {
            name: format!("{}:{}", namespace, self.name),
            parameters: self.parameters.clone(),
        }
    }
}

/// Parameter values carried by events.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<Value>),
    Duration(Duration),
    Map(HashMap<String, Value>),
    Null,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<HashMap<String, Value>>(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Integer(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Value::from(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::Boolean(b) => serde_json::Value::Bool(b),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Duration(d) => serde_json::Value::from(d.as_millis() as u64),
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
            Value::Null => serde_json::Value::Null,
        }
    }
}

/// Opaque handle identifying a registered listener or observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type ListenerFuture = BoxFuture<'static, EventResult<()>>;
pub type Listener = Arc<dyn Fn(&Event) -> ListenerFuture + Send + Sync>;
/// Synchronous tap invoked for every emission, before listener dispatch.
pub type Observer = Arc<dyn Fn(&Event) + Send + Sync>;

struct ListenerEntry {
    id: ListenerId,
    pattern: EventPattern,
    listener: Listener,
}

/// # EventBus
///
/// Ordered publish-subscribe hub. `publish` dispatches to every listener
/// whose pattern matches the event name, awaiting each in registration
/// order; a listener error aborts the remaining dispatch and is returned
/// to the publisher. Zero matching listeners is a successful no-op.
pub struct EventBus {
    listeners: RwLock<Vec<ListenerEntry>>,
    observers: RwLock<Vec<(ListenerId, Observer)>>,
    /// Warn threshold for listeners sharing one pattern.
    max_listeners: usize,
}

impl EventBus {
    pub fn new(max_listeners: usize) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            max_listeners,
        }
    }

    /// Registers a listener for the given pattern and returns its handle.
    pub async fn on(&self, pattern: EventPattern, listener: Listener) -> ListenerId {
        let id = ListenerId::generate();
        let mut listeners = self.listeners.write().await;
        let same_pattern = listeners
            .iter()
            .filter(|entry| entry.pattern.as_str() == pattern.as_str())
            .count();
        if same_pattern + 1 > self.max_listeners {
            warn!(
                "Listener count for pattern {} exceeds {}",
                pattern, self.max_listeners
            );
        }
        listeners.push(ListenerEntry {
            id,
            pattern,
            listener,
        });
        id
    }

    /// Parses `pattern` and registers the listener.
    pub async fn on_pattern(&self, pattern: &str, listener: Listener) -> EventResult<ListenerId> {
        let pattern = EventPattern::parse(pattern)?;
        Ok(self.on(pattern, listener).await)
    }

    /// Publishes an event and awaits every matching listener sequentially.
    ///
    /// The listener table lock is dropped before dispatch starts, so
    /// listeners may mutate subscriptions while handling the event.
    ///
    /// # Errors
    ///
    /// Returns the first listener error; later listeners are not invoked.
    pub async fn publish(&self, event: Event) -> EventResult<()> {
        for (_, observer) in self.observers.read().await.iter() {
            observer(&event);
        }

        let matching: Vec<(ListenerId, Listener)> = {
            let listeners = self.listeners.read().await;
            listeners
                .iter()
                .filter(|entry| entry.pattern.matches(&event.name))
                .map(|entry| (entry.id, entry.listener.clone()))
                .collect()
        };

        debug!(
            "Publishing {} to {} listener(s)",
            event.name,
            matching.len()
        );

        for (id, listener) in matching {
            listener(&event).await.map_err(|e| {
                warn!("Listener {} failed on {}: {}", id, event.name, e);
                EventError::HandlerFailed {
                    event_name: event.name.clone(),
                    message: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    /// Publishes without awaiting delivery. Listener errors are logged.
    pub fn spawn_publish(self: &Arc<Self>, event: Event) {
        let bus = self.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.publish(event).await {
                warn!("Detached publish failed: {}", e);
            }
        });
    }

    /// Removes a single listener. Returns false when the id is unknown.
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    /// Removes every listener whose pattern text starts with `prefix`.
    /// Returns the number removed. Used for `modules:<name>:` eviction.
    pub async fn remove_namespace(&self, prefix: &str) -> usize {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|entry| !entry.pattern.as_str().starts_with(prefix));
        before - listeners.len()
    }

    /// Registers a synchronous observer invoked for every emission.
    pub async fn on_any(&self, observer: Observer) -> ListenerId {
        let id = ListenerId::generate();
        self.observers.write().await.push((id, observer));
        id
    }

    pub async fn remove_observer(&self, id: ListenerId) -> bool {
        let mut observers = self.observers.write().await;
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Distinct pattern texts with at least one listener, in registration
    /// order.
    pub async fn event_names(&self) -> Vec<String> {
        let listeners = self.listeners.read().await;
        let mut names: Vec<String> = Vec::new();
        for entry in listeners.iter() {
            let text = entry.pattern.as_str();
            if !names.iter().any(|n| n == text) {
                names.push(text.to_string());
            }
        }
        names
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Invalid event pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Listener failed on {event_name}: {message}")]
    HandlerFailed {
        event_name: String,
        message: String,
    },
}

pub type EventResult<T> = Result<T, EventError>;
