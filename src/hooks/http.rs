//! HTTP phase handlers: app route and middleware loading, static
//! binding, and the listen handoff to the HTTP front.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use super::phase_error;
use crate::boot::Phase;
use crate::event::{Event, EventResult};
use crate::module::loader::{install_route, resolve_action};
use crate::module::{collect_bundle, route_path_name, ActionScope, HookDescriptor, RouteDescriptor};
use crate::registry::Owner;
use crate::system::EngineContext;

pub(crate) async fn register(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::HttpLoadRoutes.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { load_routes(&ctx).await }.boxed()
            }),
        )
        .await?;

    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::HttpLoadMiddleware.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { load_middleware(&ctx).await }.boxed()
            }),
        )
        .await?;

    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::HttpBindStatic.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { bind_static(&ctx).await }.boxed()
            }),
        )
        .await?;

    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::HttpListen.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { listen(&ctx).await }.boxed()
            }),
        )
        .await?;

    Ok(())
}

/// Loads app route descriptors. File locations become paths, so
/// `users/index.json` mounts at `/users/index`.
async fn load_routes(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let dir = ctx.app_dir(&ctx.config.app.routes_dir);
    let items = collect_bundle(&dir)
        .await
        .map_err(|e| phase_error(Phase::HttpLoadRoutes, e))?;
    if !items.is_empty() {
        debug!("Loading app routes");
    }
    let scope = ActionScope::App(ctx.bus.clone());
    for item in items {
        let descriptor: RouteDescriptor = match serde_json::from_value(item.value.clone()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Route {} is invalid: {}", item.relative_path.display(), e);
                continue;
            }
        };
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

/// Rebuilds the middleware chain from the app middleware directory.
/// Clearing first keeps a reload from stacking duplicates.
async fn load_middleware(ctx: &Arc<EngineContext>) -> EventResult<()> {
    ctx.routes.clear_middlewares();
    let dir = ctx.app_dir(&ctx.config.app.middleware_dir);
    let items = collect_bundle(&dir)
        .await
        .map_err(|e| phase_error(Phase::HttpLoadMiddleware, e))?;
    if !items.is_empty() {
        debug!("Loading app middleware");
    }
    let scope = ActionScope::App(ctx.bus.clone());
    for item in items {
        // Middleware files share the hook descriptor shape: one action.
        let descriptor: HookDescriptor = match serde_json::from_value(item.value.clone()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(
                    "Middleware {} is invalid: {}",
                    item.relative_path.display(),
                    e
                );
                continue;
            }
        };
        match resolve_action(&descriptor.action, &scope, ctx.app_handlers()) {
            Some(action) => ctx.routes.add_middleware(Owner::App, action),
            None => warn!(
                "Middleware {} references an unknown handler, skipping",
                item.relative_path.display()
            ),
        }
    }
    Ok(())
}

async fn bind_static(ctx: &Arc<EngineContext>) -> EventResult<()> {
    if !ctx.config.http.enabled {
        debug!("HTTP front disabled, skipping static binding");
        return Ok(());
    }
    ctx.http
        .bind_static(&ctx.config.http.static_dir)
        .await
        .map_err(|e| phase_error(Phase::HttpBindStatic, e))
}

/// Pushes the assembled registry state to the front, then starts
/// listening.
async fn listen(ctx: &Arc<EngineContext>) -> EventResult<()> {
    if !ctx.config.http.enabled {
        debug!("HTTP front disabled, skipping listen");
        return Ok(());
    }
    ctx.http
        .apply_middleware(ctx.routes.middlewares())
        .await
        .map_err(|e| phase_error(Phase::HttpListen, e))?;
    ctx.http
        .apply_routes(ctx.routes.routes())
        .await
        .map_err(|e| phase_error(Phase::HttpListen, e))?;
    ctx.http
        .listen(&ctx.config.http.host, ctx.config.http.port)
        .await
        .map_err(|e| phase_error(Phase::HttpListen, e))
}
