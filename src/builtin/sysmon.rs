//! Sysmon builtin: watches every event on the global bus and keeps
//! per-namespace counts, exposed through a `stats` command and a
//! `/sysmon/counters` route.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::event::{Event, EventBus, Value, SEGMENT_DELIMITER};
use crate::module::{
    ActionDescriptor, BuiltinItems, CommandDescriptor, HandlerSet, ModuleContext,
    ModuleDefinition, ModuleFactory, ModuleResult, RouteDescriptor,
};
use crate::registry::ActionInput;

pub const MODULE_NAME: &str = "sysmon";

pub struct SysmonModule {
    bus: Arc<EventBus>,
    counters: Arc<DashMap<String, u64>>,
}

impl SysmonModule {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            counters: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl ModuleFactory for SysmonModule {
    async fn create(&self, ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
        let counters = self.counters.clone();
        let id = self
            .bus
            .on_any(Arc::new(move |event: &Event| {
                let namespace = event
                    .name
                    .split(SEGMENT_DELIMITER)
                    .next()
                    .unwrap_or_default()
                    .to_string();
                *counters.entry(namespace).or_insert(0) += 1;
            }))
            .await;
        // Tracked so unload revokes the observer with the module.
        ctx.track_observer(id);
        debug!("Sysmon observing the global bus");
        Ok(())
    }

    fn handlers(&self, _ctx: &Arc<ModuleContext>) -> HandlerSet {
        let counters = self.counters.clone();
        HandlerSet::new().with_handler(
            "stats",
            Arc::new(move |_input: ActionInput| {
                let counters = counters.clone();
                async move {
                    let mut entries: Vec<(String, u64)> = counters
                        .iter()
                        .map(|entry| (entry.key().clone(), *entry.value()))
                        .collect();
                    entries.sort();
                    let counts: serde_json::Map<String, JsonValue> = entries
                        .into_iter()
                        .map(|(namespace, count)| (namespace, JsonValue::from(count)))
                        .collect();
                    Ok(Value::from(JsonValue::Object(counts)))
                }
                .boxed()
            }),
        )
    }
}

pub fn definition(bus: Arc<EventBus>) -> ModuleDefinition {
    let mut items = BuiltinItems::default();
    items.commands.push(CommandDescriptor {
        name: "stats".to_string(),
        description: Some("Show per-namespace event counts".to_string()),
        usage: Some("stats".to_string()),
        action: ActionDescriptor::handler("stats"),
    });
    items.routes.push((
        "/sysmon/counters".to_string(),
        RouteDescriptor {
            get: Some(ActionDescriptor::handler("stats")),
            ..Default::default()
        },
    ));
    ModuleDefinition::new(MODULE_NAME, Arc::new(SysmonModule::new(bus))).with_items(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_by_namespace() {
        let bus = Arc::new(EventBus::new(25));
        let factory = SysmonModule::new(bus.clone());
        let ctx = Arc::new(ModuleContext::new(MODULE_NAME, 25));
        factory
            .create(&ctx, &JsonValue::Object(serde_json::Map::new()))
            .await
            .unwrap();

        bus.publish(Event::new("http:listen")).await.unwrap();
        bus.publish(Event::new("http:loadroutes")).await.unwrap();
        bus.publish(Event::new("cli:start")).await.unwrap();

        let handlers = factory.handlers(&ctx);
        let stats = handlers.get("stats").unwrap();
        let result = stats(ActionInput::empty()).await.unwrap();

        let json = serde_json::Value::from(result);
        assert_eq!(json["http"], JsonValue::from(2u64));
        assert_eq!(json["cli"], JsonValue::from(1u64));
    }

    #[tokio::test]
    async fn test_observer_is_tracked_for_unload() {
        let bus = Arc::new(EventBus::new(25));
        let factory = SysmonModule::new(bus.clone());
        let ctx = Arc::new(ModuleContext::new(MODULE_NAME, 25));
        factory
            .create(&ctx, &JsonValue::Object(serde_json::Map::new()))
            .await
            .unwrap();

        let tracked = ctx.drain_tracked_observers();
        assert_eq!(tracked.len(), 1);
        assert!(bus.remove_observer(tracked[0]).await);
    }
}
