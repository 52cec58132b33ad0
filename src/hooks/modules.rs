//! Module phase handlers: the load cycle and the post-load init pass.

use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use super::phase_error;
use crate::boot::Phase;
use crate::event::{Event, EventResult};
use crate::module::ModuleLoader;
use crate::system::EngineContext;

pub(crate) async fn register(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::ModulesLoad.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move {
                    ModuleLoader::new(ctx)
                        .load_all()
                        .await
                        .map(|_| ())
                        .map_err(|e| phase_error(Phase::ModulesLoad, e))
                }
                .boxed()
            }),
        )
        .await?;

    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::ModulesInit.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { init_modules(&ctx).await }.boxed()
            }),
        )
        .await?;

    Ok(())
}

/// Runs every module's `init` in activation order, after all modules
/// exist so cross-module wiring can assume a complete registry.
async fn init_modules(ctx: &Arc<EngineContext>) -> EventResult<()> {
    for name in ctx.modules.names() {
        let entry = match ctx.modules.get(&name) {
            Some(entry) => entry,
            None => continue,
        };
        debug!("Initializing module {}", name);
        let config = ctx.module_config(&name);
        entry
            .definition
            .factory
            .init(&entry.context, &config)
            .await
            .map_err(|e| phase_error(Phase::ModulesInit, e))?;
    }
    Ok(())
}
