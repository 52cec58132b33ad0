//! # Extension Point Registries
//!
//! Commands, routes, and scheduled tasks contributed by modules and by the
//! application are held in dedicated registries. Every entry carries an
//! [`Owner`] tag so hot-reload can evict application entries and module
//! entries separately, and so a module's contributions can be traced back
//! to it.
//!
//! All three registries share one collision policy: a name claimed by a
//! different module is rejected with a warning, while re-registration by
//! the same owner kind silently replaces the previous entry.

pub mod commands;
pub mod routes;
pub mod tasks;

use std::{collections::HashMap, fmt, sync::Arc};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::event::Value;

pub use commands::{CommandEntry, CommandRegistry};
pub use routes::{Method, RouteEntry, RouteRegistry};
pub use tasks::{TaskEntry, TaskRegistry};

/// Identifies who contributed a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Registered by application wiring.
    App,
    /// Registered by the named module.
    Module(String),
}

impl Owner {
    pub fn module(name: &str) -> Self {
        Owner::Module(name.to_string())
    }

    pub fn is_app(&self) -> bool {
        matches!(self, Owner::App)
    }

    pub fn is_module(&self) -> bool {
        matches!(self, Owner::Module(_))
    }

    pub fn module_name(&self) -> Option<&str> {
        match self {
            Owner::App => None,
            Owner::Module(name) => Some(name),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::App => write!(f, "app"),
            Owner::Module(name) => write!(f, "module:{}", name),
        }
    }
}

/// True when `incoming` must be rejected: two different modules may not
/// claim the same name. Every other combination overwrites.
pub(crate) fn owner_conflict(existing: &Owner, incoming: &Owner) -> bool {
    matches!(
        (existing, incoming),
        (Owner::Module(a), Owner::Module(b)) if a != b
    )
}

/// Invocation payload handed to a registered action.
#[derive(Debug, Clone, Default)]
pub struct ActionInput {
    /// Positional arguments, e.g. console command words.
    pub args: Vec<String>,
    /// Named parameters, e.g. request fields from a front.
    pub parameters: HashMap<String, Value>,
}

impl ActionInput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_args(args: Vec<String>) -> Self {
        Self {
            args,
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameters(parameters: HashMap<String, Value>) -> Self {
        Self {
            args: Vec::new(),
            parameters,
        }
    }
}

pub type ActionFuture = BoxFuture<'static, RegistryResult<Value>>;
/// Shared action shape for commands, routes, and tasks.
pub type ActionFn = Arc<dyn Fn(ActionInput) -> ActionFuture + Send + Sync>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Route not found: {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Action {name} failed: {message}")]
    ActionFailed { name: String, message: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;
