//! WebSocket phase handler. Handler descriptors live in their own app
//! directory and must carry a `ws` action; file locations become mount
//! paths the same way HTTP routes do.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use super::phase_error;
use crate::boot::Phase;
use crate::event::{Event, EventResult};
use crate::module::loader::install_route;
use crate::module::{collect_bundle, route_path_name, ActionScope, RouteDescriptor};
use crate::registry::Owner;
use crate::system::EngineContext;

pub(crate) async fn register(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::WsLoadHandlers.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { load_handlers(&ctx).await }.boxed()
            }),
        )
        .await?;
    Ok(())
}

async fn load_handlers(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let dir = ctx.app_dir(&ctx.config.app.ws_dir);
    let items = collect_bundle(&dir)
        .await
        .map_err(|e| phase_error(Phase::WsLoadHandlers, e))?;
    if !items.is_empty() {
        debug!("Loading app websocket handlers");
    }
    let scope = ActionScope::App(ctx.bus.clone());
    for item in items {
        let descriptor: RouteDescriptor = match serde_json::from_value(item.value.clone()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(
                    "Websocket handler {} is invalid: {}",
                    item.relative_path.display(),
                    e
                );
                continue;
            }
        };
        if descriptor.ws.is_none() {
            warn!(
                "Websocket handler {} declares no ws action, skipping",
                item.relative_path.display()
            );
            continue;
        }
        let path = route_path_name(&item.relative_path);
        install_route(
            &ctx.routes,
            &path,
            &descriptor,
            Owner::App,
            &scope,
            ctx.app_handlers(),
        );
    }
    Ok(())
}
