//! CLI phase handlers: engine builtin commands, app command loading,
//! and the console prompt handoff.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use super::phase_error;
use crate::boot::Phase;
use crate::builtin::commands::register_builtin;
use crate::event::{Event, EventResult};
use crate::module::loader::install_command;
use crate::module::{collect_bundle, ActionScope, CommandDescriptor};
use crate::registry::Owner;
use crate::system::EngineContext;

pub(crate) async fn register(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::CliLoadBuiltin.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move {
                    debug!("Loading builtin commands");
                    register_builtin(&ctx);
                    Ok(())
                }
                .boxed()
            }),
        )
        .await?;

    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::CliLoadCommands.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { load_commands(&ctx).await }.boxed()
            }),
        )
        .await?;

    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::CliStart.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { start_console(&ctx).await }.boxed()
            }),
        )
        .await?;

    Ok(())
}

async fn load_commands(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let dir = ctx.app_dir(&ctx.config.app.commands_dir);
    let items = collect_bundle(&dir)
        .await
        .map_err(|e| phase_error(Phase::CliLoadCommands, e))?;
    if !items.is_empty() {
        debug!("Loading app commands");
    }
    let scope = ActionScope::App(ctx.bus.clone());
    for item in items {
        let descriptor: CommandDescriptor = match serde_json::from_value(item.value.clone()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(
                    "Command {} is invalid: {}",
                    item.relative_path.display(),
                    e
                );
                continue;
            }
        };
        install_command(
            &ctx.commands,
            &descriptor,
            Owner::App,
            &scope,
            ctx.app_handlers(),
        );
    }
    Ok(())
}

/// Hands the prompt to the console front. Implementations return once
/// the prompt is accepting input.
async fn start_console(ctx: &Arc<EngineContext>) -> EventResult<()> {
    if !ctx.config.console.enabled {
        debug!("Console front disabled, skipping prompt");
        return Ok(());
    }
    ctx.console
        .start(ctx.commands.clone(), &ctx.config.console.prompt)
        .await
        .map_err(|e| phase_error(Phase::CliStart, e))
}
