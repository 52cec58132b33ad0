//! Engine phase handlers: the database connection and the stop signal.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info};

use super::phase_error;
use crate::boot::{Phase, STOP_EVENT};
use crate::event::{Event, EventResult};
use crate::front::DatabaseCredentials;
use crate::system::EngineContext;

pub(crate) async fn register(ctx: &Arc<EngineContext>) -> EventResult<()> {
    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            &Phase::DatabaseConnect.to_string(),
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move { connect_database(&ctx).await }.boxed()
            }),
        )
        .await?;

    let phase_ctx = ctx.clone();
    ctx.bus
        .on_pattern(
            STOP_EVENT,
            Arc::new(move |_event: &Event| {
                let ctx = phase_ctx.clone();
                async move {
                    info!("Stopping engine");
                    // Receivers may all be gone already on a repeated stop.
                    let _ = ctx.shutdown_tx.send(());
                    Ok(())
                }
                .boxed()
            }),
        )
        .await?;

    Ok(())
}

async fn connect_database(ctx: &Arc<EngineContext>) -> EventResult<()> {
    if !ctx.config.database.enabled {
        debug!("Database disabled, skipping connect");
        return Ok(());
    }
    ctx.storage
        .connect(DatabaseCredentials::from(&ctx.config.database))
        .await
        .map_err(|e| phase_error(Phase::DatabaseConnect, e))
}
