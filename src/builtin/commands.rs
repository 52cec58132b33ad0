//! Engine builtin commands: `help`, `status`, `reload`, and `stop`.
//! Registered at the `cli:loadbuiltin` phase, before app commands, so an
//! app command of the same name overwrites the builtin.

use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde_json::json;

use crate::boot::STOP_EVENT;
use crate::event::{Event, Value};
use crate::registry::{ActionInput, CommandEntry, Owner, RegistryError};
use crate::system::EngineContext;

pub fn register_builtin(ctx: &Arc<EngineContext>) {
    register_help(ctx);
    register_status(ctx);
    register_reload(ctx);
    register_stop(ctx);
}

fn register_help(ctx: &Arc<EngineContext>) {
    let command_ctx = ctx.clone();
    let entry = CommandEntry::new(
        "help",
        Owner::App,
        Arc::new(move |_input: ActionInput| {
            let ctx = command_ctx.clone();
            async move {
                let mut lines = Vec::new();
                for entry in ctx.commands.entries() {
                    let description = entry.description.unwrap_or_default();
                    lines.push(format!("{:<12} {}", entry.name, description));
                }
                Ok(Value::String(lines.join("\n")))
            }
            .boxed()
        }),
    )
    .with_description("List available commands")
    .with_usage("help");
    ctx.commands.register(entry);
}

fn register_status(ctx: &Arc<EngineContext>) {
    let command_ctx = ctx.clone();
    let entry = CommandEntry::new(
        "status",
        Owner::App,
        Arc::new(move |_input: ActionInput| {
            let ctx = command_ctx.clone();
            async move {
                let uptime = Utc::now()
                    .signed_duration_since(ctx.started_at)
                    .num_seconds();
                let status = json!({
                    "app": ctx.config.app.name,
                    "uptime_seconds": uptime,
                    "modules": ctx.modules.names(),
                    "commands": ctx.commands.len(),
                    "routes": ctx.routes.len(),
                    "tasks": ctx.tasks.len(),
                    "listeners": ctx.bus.listener_count().await,
                });
                Ok(Value::from(status))
            }
            .boxed()
        }),
    )
    .with_description("Show engine status")
    .with_usage("status");
    ctx.commands.register(entry);
}

fn register_reload(ctx: &Arc<EngineContext>) {
    let command_ctx = ctx.clone();
    let entry = CommandEntry::new(
        "reload",
        Owner::App,
        Arc::new(move |_input: ActionInput| {
            let ctx = command_ctx.clone();
            async move {
                // The engine run loop owns the coordinator; just signal it.
                let _ = ctx.reload_tx.send(());
                Ok(Value::String("reload requested".to_string()))
            }
            .boxed()
        }),
    )
    .with_description("Reload modules and app assets")
    .with_usage("reload");
    ctx.commands.register(entry);
}

fn register_stop(ctx: &Arc<EngineContext>) {
    let command_ctx = ctx.clone();
    let entry = CommandEntry::new(
        "stop",
        Owner::App,
        Arc::new(move |_input: ActionInput| {
            let ctx = command_ctx.clone();
            async move {
                ctx.bus
                    .publish(Event::new(STOP_EVENT))
                    .await
                    .map_err(|e| RegistryError::ActionFailed {
                        name: "stop".to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Value::String("stopping".to_string()))
            }
            .boxed()
        }),
    )
    .with_description("Stop the engine gracefully")
    .with_usage("stop");
    ctx.commands.register(entry);
}
