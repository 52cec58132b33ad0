//! Task phase handlers: app task loading and scheduler start.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use super::phase_error;
use crate::boot::Phase;
use crate::event::{Event, EventResult};
use crate::module::loader::install_task;
use crate::module::{collect_bundle, ActionScope, TaskDescriptor};
use crate::registry::Owner;
use crate::system::EngineContext;

pub(crate) async fn register(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::TasksLoadTasks.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { load_tasks(&ctx).await }.boxed()
            }),
        )
        .await?;

    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::TasksStart.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move {
                    let started = ctx.scheduler.start_all(&ctx.shutdown_tx);
                    debug!("Started {} tasks", started);
                    Ok(())
                }
                .boxed()
            }),
        )
        .await?;

    Ok(())
}

async fn load_tasks(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let dir = ctx.app_dir(&ctx.config.app.tasks_dir);
    let items = collect_bundle(&dir)
        .await
        .map_err(|e| phase_error(Phase::TasksLoadTasks, e))?;
    if !items.is_empty() {
        debug!("Loading app tasks");
    }
    let scope = ActionScope::App(ctx.bus.clone());
    for item in items {
        let descriptor: TaskDescriptor = match serde_json::from_value(item.value.clone()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Task {} is invalid: {}", item.relative_path.display(), e);
                continue;
            }
        };
        install_task(
            &ctx.tasks,
            &descriptor,
            Owner::App,
            &scope,
            ctx.app_handlers(),
        );
    }
    Ok(())
}
