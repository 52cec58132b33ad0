use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap, fs::File, io::BufReader, path::Path, path::PathBuf, time::Duration,
};

use crate::{Error, EngineResult};

/// Engine configuration, usually read from `config.json`. The raw
/// document is retained so modules can look up arbitrary sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub console: ConsoleConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub modules: ModulesConfig,

    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,

    #[serde(skip)]
    raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Root directory holding the app's asset directories.
    #[serde(default = "default_app_root")]
    pub root: PathBuf,

    #[serde(default = "default_routes_dir")]
    pub routes_dir: PathBuf,

    #[serde(default = "default_middleware_dir")]
    pub middleware_dir: PathBuf,

    #[serde(default = "default_ws_dir")]
    pub ws_dir: PathBuf,

    #[serde(default = "default_commands_dir")]
    pub commands_dir: PathBuf,

    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            root: default_app_root(),
            routes_dir: default_routes_dir(),
            middleware_dir: default_middleware_dir(),
            ws_dir: default_ws_dir(),
            commands_dir: default_commands_dir(),
            tasks_dir: default_tasks_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_http_host")]
    pub host: String,

    #[serde(default = "default_http_port")]
    pub port: u16,

    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_http_host(),
            port: default_http_port(),
            static_dir: default_static_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_prompt")]
    pub prompt: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            prompt: default_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Warn threshold for listeners registered under one pattern.
    #[serde(default = "default_max_listeners")]
    pub max_listeners: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_listeners: default_max_listeners(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    #[serde(default = "default_modules_dir")]
    pub dir: PathBuf,

    /// Disable-list file, one module name per line.
    #[serde(default = "default_disabled_file")]
    pub disabled_file: PathBuf,

    /// Remaining keys are per-module config sections.
    #[serde(flatten)]
    pub sections: HashMap<String, serde_json::Value>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            dir: default_modules_dir(),
            disabled_file: default_disabled_file(),
            sections: HashMap::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            http: HttpConfig::default(),
            console: ConsoleConfig::default(),
            database: DatabaseConfig::default(),
            events: EventsConfig::default(),
            modules: ModulesConfig::default(),
            shutdown_timeout: default_shutdown_timeout(),
            raw: serde_json::Value::Null,
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let raw: serde_json::Value = from_file(path)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: serde_json::Value) -> EngineResult<Self> {
        let mut config: EngineConfig = serde_json::from_value(raw.clone())
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.raw = raw;
        Ok(config)
    }

    /// Looks up a dotted path (`"modules.heartbeat.every_ms"`) in the raw
    /// document.
    pub fn get(&self, path: &str) -> Option<&serde_json::Value> {
        path.split('.')
            .try_fold(&self.raw, |value, key| value.get(key))
    }

    /// Per-module config section under `modules.<name>`.
    pub fn module_section(&self, name: &str) -> Option<serde_json::Value> {
        self.modules.sections.get(name).cloned()
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> EngineResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

fn default_app_name() -> String {
    "modulith".to_string()
}
fn default_app_root() -> PathBuf {
    PathBuf::from("app")
}
fn default_routes_dir() -> PathBuf {
    PathBuf::from("http/routes")
}
fn default_middleware_dir() -> PathBuf {
    PathBuf::from("http/middleware")
}
fn default_ws_dir() -> PathBuf {
    PathBuf::from("ws")
}
fn default_commands_dir() -> PathBuf {
    PathBuf::from("commands")
}
fn default_tasks_dir() -> PathBuf {
    PathBuf::from("tasks")
}
fn default_true() -> bool {
    true
}
fn default_http_host() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    3000
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}
fn default_prompt() -> String {
    "> ".to_string()
}
fn default_max_listeners() -> usize {
    25
}
fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}
fn default_disabled_file() -> PathBuf {
    PathBuf::from("modules/.disabled")
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper, milliseconds on the wire.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
