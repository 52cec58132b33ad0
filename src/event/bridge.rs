//! Module-to-bus event bridging.
//!
//! Each loaded module owns a [`ContextEmitter`]: a private bus for the
//! module's internal listeners, bridged onto the global bus so that an
//! emission of `beat` inside module `heartbeat` surfaces globally as
//! `modules:heartbeat:beat`. Unload tears the bridge down by handle, so a
//! departed module can no longer reach the global bus.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::event_bus::{Event, EventBus, EventResult, Listener, ListenerId};
use super::pattern::EventPattern;

struct ForwardTarget {
    id: ListenerId,
    bus: Arc<EventBus>,
    namespace: String,
}

/// Per-module emitter bridging local events onto the global bus.
pub struct ContextEmitter {
    local: EventBus,
    forwards: RwLock<Vec<ForwardTarget>>,
}

impl ContextEmitter {
    pub fn new(max_listeners: usize) -> Self {
        Self {
            local: EventBus::new(max_listeners),
            forwards: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes a listener on the module-local bus.
    pub async fn on(&self, pattern: EventPattern, listener: Listener) -> ListenerId {
        self.local.on(pattern, listener).await
    }

    pub async fn on_pattern(&self, pattern: &str, listener: Listener) -> EventResult<ListenerId> {
        self.local.on_pattern(pattern, listener).await
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.local.remove_listener(id).await
    }

    /// Starts forwarding every local emission to `bus`, renamed under
    /// `<namespace>:<event>`. Returns a handle for [`Self::unforward`].
    pub async fn forward_to(&self, bus: Arc<EventBus>, namespace: &str) -> ListenerId {
        let id = ListenerId::generate();
        debug!("Forwarding local events under {}", namespace);
        self.forwards.write().await.push(ForwardTarget {
            id,
            bus,
            namespace: namespace.to_string(),
        });
        id
    }

    /// Stops one forward. Returns false when the handle is unknown.
    pub async fn unforward(&self, id: ListenerId) -> bool {
        let mut forwards = self.forwards.write().await;
        let before = forwards.len();
        forwards.retain(|target| target.id != id);
        forwards.len() != before
    }

    /// Drops every forward target. Local listeners stay registered.
    pub async fn unforward_all(&self) {
        self.forwards.write().await.clear();
    }

    /// Emits on the local bus, then forwards the namespaced event to every
    /// bridged bus. Local listeners run before any forward target; the
    /// first failure on either side aborts the emission.
    pub async fn emit(&self, event: Event) -> EventResult<()> {
        self.local.publish(event.clone()).await?;

        let targets: Vec<(Arc<EventBus>, String)> = {
            let forwards = self.forwards.read().await;
            forwards
                .iter()
                .map(|target| (target.bus.clone(), target.namespace.clone()))
                .collect()
        };

        for (bus, namespace) in targets {
            bus.publish(event.namespaced(&namespace)).await?;
        }
        Ok(())
    }

    pub async fn forward_count(&self) -> usize {
        self.forwards.read().await.len()
    }
}
