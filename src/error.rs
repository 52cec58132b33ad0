use thiserror::Error;

use crate::boot::BootError;
use crate::event::EventError;
use crate::front::FrontError;
use crate::module::ModuleError;
use crate::registry::RegistryError;
use crate::reload::ReloadError;
use crate::tasks::ScheduleError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Boot error: {0}")]
    Boot(#[from] BootError),
    // event bus
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    // module loading
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Reload error: {0}")]
    Reload(#[from] ReloadError),
    // task scheduling
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
    // collaborator surfaces
    #[error("Front error: {0}")]
    Front(#[from] FrontError),

    #[error("Config error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
