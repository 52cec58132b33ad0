//! # Boot Sequencer
//!
//! Startup is a fixed sequence of named phases, each published as an
//! event on the global bus and awaited to completion before the next
//! phase begins. Subsystems take part in booting by subscribing to the
//! phase events; the sequencer itself knows nothing about them.
//!
//! The full sequence ends with `engine:ready`. A hot reload replays the
//! dynamic subset only, leaving bound sockets, the console prompt, and
//! the database connection untouched.

use std::sync::Arc;

use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, info};

use crate::event::{Event, EventBus};

/// Event name announcing a completed boot. Emitted once per process,
/// never replayed by a reload.
pub const READY_EVENT: &str = "engine:ready";

/// Event name requesting a graceful shutdown.
pub const STOP_EVENT: &str = "engine:stop";

#[derive(Error, Debug)]
pub enum BootError {
    #[error("Phase {phase} failed: {message}")]
    PhaseFailed { phase: String, message: String },
    #[error("Engine is already running")]
    AlreadyRunning,
}

pub type BootResult<T> = Result<T, BootError>;

/// One startup phase. The serialized form is the event name published
/// on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Phase {
    #[strum(serialize = "http:loadroutes")]
    HttpLoadRoutes,
    #[strum(serialize = "http:loadmiddleware")]
    HttpLoadMiddleware,
    #[strum(serialize = "ws:loadhandlers")]
    WsLoadHandlers,
    #[strum(serialize = "cli:loadbuiltin")]
    CliLoadBuiltin,
    #[strum(serialize = "cli:loadcommands")]
    CliLoadCommands,
    #[strum(serialize = "tasks:loadtasks")]
    TasksLoadTasks,
    #[strum(serialize = "modules:load")]
    ModulesLoad,
    #[strum(serialize = "app:load")]
    AppLoad,
    #[strum(serialize = "database:connect")]
    DatabaseConnect,
    #[strum(serialize = "modules:init")]
    ModulesInit,
    #[strum(serialize = "user:load")]
    UserLoad,
    #[strum(serialize = "cli:start")]
    CliStart,
    #[strum(serialize = "http:bindstatic")]
    HttpBindStatic,
    #[strum(serialize = "http:listen")]
    HttpListen,
    #[strum(serialize = "tasks:start")]
    TasksStart,
}

impl Phase {
    /// Static phases bind process-lifetime resources and are skipped on
    /// reload.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            Phase::DatabaseConnect | Phase::CliStart | Phase::HttpBindStatic | Phase::HttpListen
        )
    }
}

/// Every phase, in boot order.
pub const BOOT_SEQUENCE: [Phase; 15] = [
    Phase::HttpLoadRoutes,
    Phase::HttpLoadMiddleware,
    Phase::WsLoadHandlers,
    Phase::CliLoadBuiltin,
    Phase::CliLoadCommands,
    Phase::TasksLoadTasks,
    Phase::ModulesLoad,
    Phase::AppLoad,
    Phase::DatabaseConnect,
    Phase::ModulesInit,
    Phase::UserLoad,
    Phase::CliStart,
    Phase::HttpBindStatic,
    Phase::HttpListen,
    Phase::TasksStart,
];

/// The dynamic phases replayed by a hot reload, in boot order.
pub const RELOAD_SEQUENCE: [Phase; 11] = [
    Phase::HttpLoadRoutes,
    Phase::HttpLoadMiddleware,
    Phase::WsLoadHandlers,
    Phase::CliLoadBuiltin,
    Phase::CliLoadCommands,
    Phase::TasksLoadTasks,
    Phase::ModulesLoad,
    Phase::AppLoad,
    Phase::ModulesInit,
    Phase::UserLoad,
    Phase::TasksStart,
];

/// Publishes phase events in order, failing fast on the first phase
/// whose listeners error.
pub struct BootSequencer {
    bus: Arc<EventBus>,
}

impl BootSequencer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    #[tracing::instrument(level = "debug", skip(self, phases))]
    pub async fn run(&self, phases: &[Phase]) -> BootResult<()> {
        for phase in phases {
            self.run_phase(*phase).await?;
        }
        Ok(())
    }

    pub async fn run_phase(&self, phase: Phase) -> BootResult<()> {
        debug!("Entering phase {}", phase);
        self.bus
            .publish(Event::new(&phase.to_string()))
            .await
            .map_err(|e| BootError::PhaseFailed {
                phase: phase.to_string(),
                message: e.to_string(),
            })
    }

    pub async fn announce_ready(&self) -> BootResult<()> {
        self.bus
            .publish(Event::new(READY_EVENT))
            .await
            .map_err(|e| BootError::PhaseFailed {
                phase: READY_EVENT.to_string(),
                message: e.to_string(),
            })?;
        info!("Engine ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    #[test]
    fn test_phase_names() {
        let test_cases = vec![
            (Phase::HttpLoadRoutes, "http:loadroutes"),
            (Phase::CliLoadBuiltin, "cli:loadbuiltin"),
            (Phase::ModulesLoad, "modules:load"),
            (Phase::DatabaseConnect, "database:connect"),
            (Phase::TasksStart, "tasks:start"),
        ];
        for (phase, expected) in test_cases {
            assert_eq!(phase.to_string(), expected);
            assert_eq!(Phase::from_str(expected).unwrap(), phase);
        }
    }

    #[test]
    fn test_boot_sequence_order() {
        let names: Vec<String> = BOOT_SEQUENCE.iter().map(Phase::to_string).collect();
        assert_eq!(
            names,
            vec![
                "http:loadroutes",
                "http:loadmiddleware",
                "ws:loadhandlers",
                "cli:loadbuiltin",
                "cli:loadcommands",
                "tasks:loadtasks",
                "modules:load",
                "app:load",
                "database:connect",
                "modules:init",
                "user:load",
                "cli:start",
                "http:bindstatic",
                "http:listen",
                "tasks:start",
            ]
        );
    }

    #[test]
    fn test_reload_sequence_is_the_dynamic_subset() {
        let dynamic: Vec<Phase> = BOOT_SEQUENCE
            .iter()
            .filter(|phase| !phase.is_static())
            .copied()
            .collect();
        assert_eq!(dynamic, RELOAD_SEQUENCE.to_vec());
    }

    #[tokio::test]
    async fn test_run_fails_fast_on_first_failing_phase() {
        let bus = Arc::new(EventBus::new(25));
        let first_runs = Arc::new(AtomicUsize::new(0));
        let third_runs = Arc::new(AtomicUsize::new(0));

        let counter = first_runs.clone();
        bus.on_pattern(
            "http:loadroutes",
            Arc::new(move |_event: &Event| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            }),
        )
        .await
        .unwrap();

        bus.on_pattern(
            "http:loadmiddleware",
            Arc::new(|_event: &Event| {
                async move {
                    Err(crate::event::EventError::HandlerFailed {
                        event_name: "http:loadmiddleware".to_string(),
                        message: "middleware directory unreadable".to_string(),
                    })
                }
                .boxed()
            }),
        )
        .await
        .unwrap();

        let counter = third_runs.clone();
        bus.on_pattern(
            "ws:loadhandlers",
            Arc::new(move |_event: &Event| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            }),
        )
        .await
        .unwrap();

        let sequencer = BootSequencer::new(bus);
        let result = sequencer.run(&BOOT_SEQUENCE).await;

        match result {
            Err(BootError::PhaseFailed { phase, .. }) => {
                assert_eq!(phase, "http:loadmiddleware");
            }
            other => panic!("expected a phase failure, got {:?}", other),
        }
        assert_eq!(first_runs.load(Ordering::SeqCst), 1);
        assert_eq!(third_runs.load(Ordering::SeqCst), 0);
    }
}
