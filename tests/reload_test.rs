use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use modulith::config::EngineConfig;
use modulith::event::{Event, EventBus};
use modulith::front::{FrontResult, HttpFront};
use modulith::module::{ModuleContext, ModuleError, ModuleFactory, ModuleResult};
use modulith::registry::{ActionFn, Method, RouteEntry};
use modulith::reload::{ReloadCoordinator, ReloadError};
use modulith::system::Engine;
use modulith::Error;
use serde_json::{json, Value as JsonValue};
use tokio::time::sleep;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn sandbox_config(dir: &tempfile::TempDir, overrides: JsonValue) -> EngineConfig {
    let mut raw = json!({
        "app": { "root": dir.path().join("app") },
        "modules": { "dir": dir.path().join("modules") },
    });
    merge(&mut raw, overrides);
    EngineConfig::from_value(raw).unwrap()
}

fn merge(base: &mut JsonValue, overrides: JsonValue) {
    match (base, overrides) {
        (JsonValue::Object(base), JsonValue::Object(overrides)) => {
            for (key, value) in overrides {
                merge(base.entry(key).or_insert(JsonValue::Null), value);
            }
        }
        (base, overrides) => *base = overrides,
    }
}

fn write_module(root: &Path, name: &str, manifest: JsonValue) -> PathBuf {
    let dir = root.join("modules").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("module.json"), manifest.to_string()).unwrap();
    dir
}

fn write_descriptor(dir: &Path, relative: &str, value: JsonValue) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, value.to_string()).unwrap();
}

fn write_greeter(root: &Path) {
    let dir = write_module(root, "greeter", json!({ "name": "greeter" }));
    write_descriptor(
        &dir,
        "commands/greet.json",
        json!({ "name": "greet", "action": { "emit": { "event": "greeted" } } }),
    );
    write_descriptor(
        &dir,
        "hooks/ping.json",
        json!({ "action": { "emit": { "event": "pong" } } }),
    );
    write_descriptor(
        &dir,
        "routes/api/hello.json",
        json!({ "get": { "emit": { "event": "hello:read" } } }),
    );
    write_descriptor(
        &dir,
        "tasks/tick.json",
        json!({ "name": "tick", "every_ms": 60000, "action": { "emit": { "event": "ticked" } } }),
    );
}

struct NoopFactory;

#[async_trait]
impl ModuleFactory for NoopFactory {
    async fn create(&self, _ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_reload_restores_registrations_without_reemitting_ready() {
    let dir = tempfile::tempdir().unwrap();
    write_greeter(dir.path());
    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("greeter", Arc::new(NoopFactory))
        .build();

    let counts = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
    let sink = counts.clone();
    engine
        .bus()
        .on_any(Arc::new(move |event: &Event| {
            *sink.lock().unwrap().entry(event.name.clone()).or_insert(0) += 1;
        }))
        .await;

    engine.start().await.unwrap();
    let ctx = engine.context();

    let commands_before = ctx.commands.names();
    let routes_before = ctx.routes.len();
    let tasks_before = ctx.tasks.names();
    let modules_before = ctx.modules.names();
    let listeners_before = ctx.bus.listener_count().await;

    engine.reload().await.unwrap();

    assert_eq!(ctx.commands.names(), commands_before);
    assert_eq!(ctx.routes.len(), routes_before);
    assert_eq!(ctx.tasks.names(), tasks_before);
    assert_eq!(ctx.modules.names(), modules_before);
    assert_eq!(ctx.bus.listener_count().await, listeners_before);
    assert!(ctx.tasks.is_running("tick"));

    let counts = counts.lock().unwrap();
    // Dynamic phases replay; static phases and the ready announcement do not.
    assert_eq!(counts.get("engine:ready"), Some(&1));
    assert_eq!(counts.get("http:listen"), Some(&1));
    assert_eq!(counts.get("database:connect"), Some(&1));
    assert_eq!(counts.get("modules:load"), Some(&2));
    assert_eq!(counts.get("tasks:start"), Some(&2));
    drop(counts);

    ctx.tasks.stop_all();
}

#[tokio::test]
async fn test_reload_refuses_concurrent_runs() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Engine::builder(sandbox_config(&dir, json!({}))).build());
    engine.start().await.unwrap();

    // Slow one dynamic phase down so the second reload lands mid-flight.
    engine
        .bus()
        .on_pattern(
            "tasks:loadtasks",
            Arc::new(|_event: &Event| {
                async move {
                    sleep(Duration::from_millis(300)).await;
                    Ok(())
                }
                .boxed()
            }),
        )
        .await
        .unwrap();

    let first = engine.clone();
    let handle = tokio::spawn(async move { first.reload().await });
    sleep(Duration::from_millis(50)).await;

    let second = engine.reload().await;
    assert!(matches!(
        second,
        Err(Error::Reload(ReloadError::AlreadyInProgress))
    ));

    handle.await.unwrap().unwrap();
    engine.context().tasks.stop_all();
}

#[tokio::test]
async fn test_unload_all_is_idempotent_and_complete() {
    let dir = tempfile::tempdir().unwrap();
    write_greeter(dir.path());
    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("greeter", Arc::new(NoopFactory))
        .build();
    engine.start().await.unwrap();
    let ctx = engine.context();
    assert!(!ctx.commands.is_empty());

    let coordinator = ReloadCoordinator::new(ctx.clone());
    coordinator.unload_all().await;
    coordinator.unload_all().await;

    assert!(ctx.commands.is_empty());
    assert!(ctx.routes.is_empty());
    assert!(ctx.tasks.is_empty());
    assert!(ctx.modules.is_empty());
    assert_eq!(ctx.tasks.running_count(), 0);
    let names = ctx.bus.event_names().await;
    assert!(!names.iter().any(|name| name.starts_with("modules:")));

    // A reload from the emptied state brings everything back.
    engine.reload().await.unwrap();
    assert_eq!(ctx.modules.names(), vec!["heartbeat", "sysmon", "greeter"]);
    assert!(ctx.commands.contains("greet"));

    ctx.tasks.stop_all();
}

struct RecordingHttpFront {
    route_pushes: Arc<Mutex<Vec<usize>>>,
    removed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl HttpFront for RecordingHttpFront {
    async fn apply_routes(&self, routes: Vec<RouteEntry>) -> FrontResult<()> {
        self.route_pushes.lock().unwrap().push(routes.len());
        Ok(())
    }

    async fn apply_middleware(&self, _middlewares: Vec<ActionFn>) -> FrontResult<()> {
        Ok(())
    }

    async fn bind_static(&self, _dir: &Path) -> FrontResult<()> {
        Ok(())
    }

    async fn listen(&self, _host: &str, _port: u16) -> FrontResult<()> {
        Ok(())
    }

    async fn remove_route(&self, method: Method, path: &str) -> FrontResult<()> {
        self.removed
            .lock()
            .unwrap()
            .push(format!("{} {}", method, path));
        Ok(())
    }
}

#[tokio::test]
async fn test_reload_resyncs_the_http_front() {
    let dir = tempfile::tempdir().unwrap();
    write_greeter(dir.path());

    let route_pushes = Arc::new(Mutex::new(Vec::new()));
    let removed = Arc::new(Mutex::new(Vec::new()));
    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("greeter", Arc::new(NoopFactory))
        .with_http(Arc::new(RecordingHttpFront {
            route_pushes: route_pushes.clone(),
            removed: removed.clone(),
        }))
        .build();
    engine.start().await.unwrap();

    // One push from the listen phase: the greeter route plus sysmon's.
    assert_eq!(*route_pushes.lock().unwrap(), vec![2]);

    engine.reload().await.unwrap();

    let removed = removed.lock().unwrap();
    assert!(removed.contains(&"GET /api/hello".to_string()));
    assert!(removed.contains(&"GET /sysmon/counters".to_string()));
    drop(removed);

    // The listen phase does not replay; the rebuilt table is re-pushed.
    assert_eq!(*route_pushes.lock().unwrap(), vec![2, 2]);

    engine.context().tasks.stop_all();
}

/// Factory of a module that taps the global bus from `create`, the way
/// diagnostic modules do, and relies on tracking for revocation.
struct TapFactory {
    bus: Arc<Mutex<Option<Arc<EventBus>>>>,
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl ModuleFactory for TapFactory {
    async fn create(&self, ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
        let bus = self
            .bus
            .lock()
            .unwrap()
            .clone()
            .expect("bus handle filled before boot");
        let count = self.count.clone();
        let id = bus
            .on_pattern(
                "app:custom",
                Arc::new(move |_event: &Event| {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .await
            .map_err(|source| ModuleError::Event {
                module: ctx.name().to_string(),
                source,
            })?;
        ctx.track_listener(id);
        Ok(())
    }
}

#[tokio::test]
async fn test_unload_revokes_tracked_global_listeners() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "tap", json!({ "name": "tap" }));

    let slot = Arc::new(Mutex::new(None));
    let count = Arc::new(AtomicUsize::new(0));
    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module(
            "tap",
            Arc::new(TapFactory {
                bus: slot.clone(),
                count: count.clone(),
            }),
        )
        .build();
    *slot.lock().unwrap() = Some(engine.bus());

    engine.start().await.unwrap();
    let ctx = engine.context();

    ctx.bus.publish(Event::new("app:custom")).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    ReloadCoordinator::new(ctx.clone()).unload_all().await;

    ctx.bus.publish(Event::new("app:custom")).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
