//! App phase handler: runs the registered app-load callback, if any.

use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use super::phase_error;
use crate::boot::Phase;
use crate::event::{Event, EventResult};
use crate::registry::ActionInput;
use crate::system::EngineContext;

pub(crate) async fn register(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::AppLoad.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move {
                    let callback = match ctx.app_load() {
                        Some(callback) => callback,
                        None => {
                            debug!("No app load callback registered");
                            return Ok(());
                        }
                    };
                    callback(ActionInput::empty())
                        .await
                        .map(|_| ())
                        .map_err(|e| phase_error(Phase::AppLoad, e))
                }
                .boxed()
            }),
        )
        .await?;
    Ok(())
}
