//! User-space phase handler: hands the assembled context to app wiring.

use std::sync::Arc;

use futures::FutureExt;

use super::phase_error;
use crate::boot::Phase;
use crate::event::{Event, EventResult};
use crate::system::EngineContext;

pub(crate) async fn register(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::UserLoad.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move {
                    ctx.user_space
                        .load(ctx.clone())
                        .await
                        .map_err(|e| phase_error(Phase::UserLoad, e))
                }
                .boxed()
            }),
        )
        .await?;
    Ok(())
}
