//! On-disk module manifests and bundle descriptors.
//!
//! A user module directory carries a `module.json` manifest naming the
//! module, its bundle directories, and its dependencies. Bundle files are
//! JSON descriptors whose actions either emit an event or reference a
//! named handler from the module's factory. Everything is deserialized
//! into plain values and validated explicitly before registration.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{ModuleError, ModuleResult};

lazy_static! {
    static ref MODULE_NAME: Regex = Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap();
}

/// Checks the module naming rule shared by manifests and builtin
/// definitions: lowercase alphanumeric with `-`/`_`, letter first.
pub(crate) fn validate_module_name(name: &str) -> Result<(), String> {
    if MODULE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(format!(
            "name {:?} must match {}",
            name,
            MODULE_NAME.as_str()
        ))
    }
}

/// Bundle directory names, each defaulting to its field name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModulePaths {
    #[serde(default = "default_hooks_dir")]
    pub hooks: String,
    #[serde(default = "default_commands_dir")]
    pub commands: String,
    #[serde(default = "default_routes_dir")]
    pub routes: String,
    #[serde(default = "default_tasks_dir")]
    pub tasks: String,
}

impl Default for ModulePaths {
    fn default() -> Self {
        Self {
            hooks: default_hooks_dir(),
            commands: default_commands_dir(),
            routes: default_routes_dir(),
            tasks: default_tasks_dir(),
        }
    }
}

/// # ModuleManifest
///
/// The `module.json` at a user module's root.
///
/// ```json
/// {
///   "name": "greeter",
///   "dependencies": ["heartbeat"],
///   "paths": { "commands": "cli" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleManifest {
    pub name: String,
    #[serde(default)]
    pub paths: ModulePaths,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ModuleManifest {
    /// Reads and parses a manifest file. Parse failures surface as
    /// `InvalidManifest` with the offending path.
    pub async fn from_file(path: &Path) -> ModuleResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_str_named(&content, &path.display().to_string())
    }

    pub fn from_str_named(content: &str, origin: &str) -> ModuleResult<Self> {
        let manifest: Self =
            serde_json::from_str(content).map_err(|e| ModuleError::InvalidManifest {
                path: origin.to_string(),
                message: e.to_string(),
            })?;
        manifest.validate(origin)?;
        Ok(manifest)
    }

    pub fn validate(&self, origin: &str) -> ModuleResult<()> {
        validate_module_name(&self.name).map_err(|message| ModuleError::InvalidManifest {
            path: origin.to_string(),
            message,
        })?;
        for dependency in &self.dependencies {
            if dependency == &self.name {
                return Err(ModuleError::InvalidManifest {
                    path: origin.to_string(),
                    message: "module depends on itself".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// What a descriptor does when invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ActionDescriptor {
    /// Publish an event: module items emit on their context (surfacing
    /// globally under the module namespace), app items on the global bus.
    Emit {
        event: String,
        #[serde(default)]
        parameters: serde_json::Map<String, JsonValue>,
    },
    /// Invoke a named handler from the owning factory's handler set.
    Handler(String),
}

impl ActionDescriptor {
    pub fn emit(event: &str) -> Self {
        ActionDescriptor::Emit {
            event: event.to_string(),
            parameters: serde_json::Map::new(),
        }
    }

    pub fn handler(id: &str) -> Self {
        ActionDescriptor::Handler(id.to_string())
    }
}

/// A console command contributed by a bundle file or builtin items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    pub action: ActionDescriptor,
}

impl CommandDescriptor {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("command name must not be empty".to_string());
        }
        Ok(())
    }
}

/// A verb map for one route path. At least one verb must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteDescriptor {
    pub get: Option<ActionDescriptor>,
    pub post: Option<ActionDescriptor>,
    pub put: Option<ActionDescriptor>,
    pub delete: Option<ActionDescriptor>,
    pub patch: Option<ActionDescriptor>,
    /// WebSocket handler slot, used by `ws` bundles.
    pub ws: Option<ActionDescriptor>,
}

impl RouteDescriptor {
    pub fn verbs(&self) -> Vec<(crate::registry::Method, &ActionDescriptor)> {
        use crate::registry::Method;
        let mut verbs = Vec::new();
        if let Some(action) = &self.get {
            verbs.push((Method::Get, action));
        }
        if let Some(action) = &self.post {
            verbs.push((Method::Post, action));
        }
        if let Some(action) = &self.put {
            verbs.push((Method::Put, action));
        }
        if let Some(action) = &self.delete {
            verbs.push((Method::Delete, action));
        }
        if let Some(action) = &self.patch {
            verbs.push((Method::Patch, action));
        }
        if let Some(action) = &self.ws {
            verbs.push((Method::Ws, action));
        }
        verbs
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.verbs().is_empty() {
            return Err("route descriptor declares no verbs".to_string());
        }
        Ok(())
    }
}

/// A scheduled task with exactly one cadence: `cron` or `every_ms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDescriptor {
    pub name: String,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub every_ms: Option<u64>,
    pub action: ActionDescriptor,
}

impl TaskDescriptor {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("task name must not be empty".to_string());
        }
        match (&self.cron, &self.every_ms) {
            (Some(_), Some(_)) => Err("task declares both cron and every_ms".to_string()),
            (None, None) => Err("task declares neither cron nor every_ms".to_string()),
            _ => Ok(()),
        }
    }
}

/// A hook file body: the action bound to the event named by the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookDescriptor {
    pub action: ActionDescriptor,
}

fn default_hooks_dir() -> String {
    "hooks".to_string()
}

fn default_commands_dir() -> String {
    "commands".to_string()
}

fn default_routes_dir() -> String {
    "routes".to_string()
}

fn default_tasks_dir() -> String {
    "tasks".to_string()
}
