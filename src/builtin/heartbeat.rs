//! Heartbeat builtin: a scheduled task emitting a periodic liveness
//! event at `modules:heartbeat:beat`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::EngineConfig;
use crate::event::{Event, Value};
use crate::module::{
    ActionDescriptor, BuiltinItems, HandlerSet, ModuleContext, ModuleDefinition, ModuleFactory,
    ModuleResult, TaskDescriptor,
};
use crate::registry::{ActionInput, RegistryError};

pub const MODULE_NAME: &str = "heartbeat";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_every_ms")]
    pub every_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            every_ms: default_every_ms(),
        }
    }
}

pub struct HeartbeatModule;

#[async_trait]
impl ModuleFactory for HeartbeatModule {
    async fn create(&self, ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
        debug!("Heartbeat module created for {}", ctx.name());
        Ok(())
    }

    fn handlers(&self, ctx: &Arc<ModuleContext>) -> HandlerSet {
        let beats = Arc::new(AtomicU64::new(0));
        let emit_ctx = ctx.clone();
        HandlerSet::new().with_handler(
            "beat",
            Arc::new(move |_input: ActionInput| {
                let ctx = emit_ctx.clone();
                let beats = beats.clone();
                async move {
                    let count = beats.fetch_add(1, Ordering::SeqCst) + 1;
                    ctx.emit(Event::new("beat").with_parameter("count", Value::from(count as i64)))
                        .await
                        .map_err(|e| RegistryError::ActionFailed {
                            name: "beat".to_string(),
                            message: e.to_string(),
                        })?;
                    Ok(Value::from(count as i64))
                }
                .boxed()
            }),
        )
    }
}

/// Builds the heartbeat definition from the `modules.heartbeat` config
/// section. With `enabled: false` the module still activates but
/// schedules nothing.
pub fn definition(config: &EngineConfig) -> ModuleDefinition {
    let section: HeartbeatConfig = config
        .module_section(MODULE_NAME)
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();

    let mut items = BuiltinItems::default();
    if section.enabled {
        items.tasks.push(TaskDescriptor {
            name: "heartbeat".to_string(),
            cron: None,
            every_ms: Some(section.every_ms),
            action: ActionDescriptor::handler("beat"),
        });
    }
    ModuleDefinition::new(MODULE_NAME, Arc::new(HeartbeatModule)).with_items(items)
}

fn default_enabled() -> bool {
    true
}
fn default_every_ms() -> u64 {
    30_000
}
