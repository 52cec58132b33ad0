//! Task loop spawning.
//!
//! The scheduler turns registered task definitions into running tokio
//! loops during the `tasks:start` phase. Each loop sleeps until the next
//! occurrence of its schedule, runs the action, and repeats until the
//! engine shutdown broadcast fires or the registry aborts its handle.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::broadcast, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use super::Schedule;
use crate::registry::{ActionInput, TaskEntry, TaskRegistry};

pub struct Scheduler {
    registry: Arc<TaskRegistry>,
}

impl Scheduler {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// Spawns a loop for every registered task not already running and
    /// records the handles in the registry. Returns how many were
    /// started; calling again without new registrations is a no-op.
    pub fn start_all(&self, shutdown: &broadcast::Sender<()>) -> usize {
        let mut started = 0;
        for entry in self.registry.entries() {
            if self.registry.is_running(&entry.name) {
                continue;
            }
            let handle = spawn_task_loop(entry.clone(), shutdown.subscribe());
            self.registry.mark_running(&entry.name, handle);
            started += 1;
        }
        started
    }
}

fn spawn_task_loop(entry: TaskEntry, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Task loop {} started ({})", entry.name, entry.schedule);
        loop {
            let wait = match next_wait(&entry.schedule) {
                Some(wait) => wait,
                None => {
                    warn!(
                        "Task {} has no upcoming occurrence, stopping its loop",
                        entry.name
                    );
                    break;
                }
            };
            tokio::select! {
                _ = sleep(wait) => {
                    if let Err(e) = (entry.action)(ActionInput::empty()).await {
                        warn!("Task {} failed: {}", entry.name, e);
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Task loop {} stopping", entry.name);
                    break;
                }
            }
        }
    })
}

fn next_wait(schedule: &Schedule) -> Option<Duration> {
    match schedule {
        Schedule::Every(interval) => Some(*interval),
        Schedule::Cron(expr) => {
            let now = Utc::now();
            expr.next_after(now)
                .and_then(|next| (next - now).to_std().ok())
        }
    }
}
