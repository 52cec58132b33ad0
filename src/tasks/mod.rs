//! Scheduled task model.
//!
//! Tasks declare a [`Schedule`], either a fixed interval or a cron
//! expression, and are spawned as tokio loops by the [`Scheduler`] when
//! the `tasks:start` phase fires.

pub mod cron;
pub mod scheduler;

use std::{fmt, time::Duration};

pub use cron::{CronExpr, ScheduleError};
pub use scheduler::Scheduler;

/// When a task runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Fixed interval between runs.
    Every(Duration),
    /// Cron cadence evaluated against UTC wall time.
    Cron(CronExpr),
}

impl Schedule {
    /// Parses a 5-field cron expression into a schedule.
    pub fn cron(expression: &str) -> Result<Self, ScheduleError> {
        Ok(Schedule::Cron(CronExpr::parse(expression)?))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Every(interval) => write!(f, "every {:?}", interval),
            Schedule::Cron(expr) => write!(f, "cron {}", expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Schedule::Every(Duration::from_secs(5)).to_string(),
            "every 5s"
        );
        assert_eq!(
            Schedule::cron("*/15 * * * *").unwrap().to_string(),
            "cron */15 * * * *"
        );
    }

    #[test]
    fn test_cron_parse_error_propagates() {
        assert!(Schedule::cron("not a cron").is_err());
    }
}
