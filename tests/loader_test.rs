use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::FutureExt;
use modulith::config::EngineConfig;
use modulith::event::{Event, Value};
use modulith::module::{
    HandlerSet, ModuleContext, ModuleError, ModuleFactory, ModuleLoader, ModuleResult,
};
use modulith::registry::{ActionInput, Method, Owner};
use modulith::system::Engine;
use serde_json::{json, Value as JsonValue};
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

struct NoopFactory;

#[async_trait]
impl ModuleFactory for NoopFactory {
    async fn create(&self, _ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
        Ok(())
    }
}

struct GreeterFactory;

#[async_trait]
impl ModuleFactory for GreeterFactory {
    async fn create(&self, _ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
        Ok(())
    }

    fn handlers(&self, _ctx: &Arc<ModuleContext>) -> HandlerSet {
        HandlerSet::new().with_handler(
            "hello",
            Arc::new(|_input: ActionInput| {
                async move { Ok(Value::String("hi".to_string())) }.boxed()
            }),
        )
    }
}

struct CountingFactory {
    created: Arc<AtomicUsize>,
}

#[async_trait]
impl ModuleFactory for CountingFactory {
    async fn create(&self, _ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingFactory;

#[async_trait]
impl ModuleFactory for FailingFactory {
    async fn create(&self, ctx: &Arc<ModuleContext>, _config: &JsonValue) -> ModuleResult<()> {
        Err(ModuleError::ActivationFailed {
            module: ctx.name().to_string(),
            message: "backing service unreachable".to_string(),
        })
    }
}

#[tokio::test]
async fn test_loads_user_module_with_bundles() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = write_module(dir.path(), "greeter", json!({ "name": "greeter" }));
    write_descriptor(
        &module_dir,
        "commands/greet.json",
        json!({ "name": "greet", "description": "Say hello", "action": { "handler": "hello" } }),
    );
    write_descriptor(
        &module_dir,
        "hooks/ping.json",
        json!({ "action": { "emit": { "event": "pong" } } }),
    );
    write_descriptor(
        &module_dir,
        "routes/api/hello.json",
        json!({ "get": { "handler": "hello" } }),
    );
    write_descriptor(
        &module_dir,
        "routes/users/$id.json",
        json!({ "get": { "emit": { "event": "user:read" } } }),
    );
    write_descriptor(
        &module_dir,
        "tasks/tick.json",
        json!({ "name": "tick", "every_ms": 60000, "action": { "emit": { "event": "ticked" } } }),
    );

    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("greeter", Arc::new(GreeterFactory))
        .build();
    let ctx = engine.context();

    let activated = ModuleLoader::new(ctx.clone()).load_all().await.unwrap();
    assert_eq!(activated, 3);
    assert_eq!(ctx.modules.names(), vec!["heartbeat", "sysmon", "greeter"]);

    let entry = ctx.commands.get("greet").unwrap();
    assert_eq!(entry.owner, Owner::module("greeter"));
    assert_eq!(
        ctx.commands.run("greet", ActionInput::empty()).await.unwrap(),
        Value::String("hi".to_string())
    );

    assert!(ctx.routes.get(Method::Get, "/api/hello").is_some());
    assert!(ctx.routes.get(Method::Get, "/users/:id").is_some());
    assert!(ctx.tasks.contains("tick"));
    assert!(ctx
        .bus
        .event_names()
        .await
        .contains(&"modules:greeter:ping".to_string()));
}

#[tokio::test]
async fn test_hook_actions_emit_inside_the_module_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = write_module(dir.path(), "greeter", json!({ "name": "greeter" }));
    write_descriptor(
        &module_dir,
        "hooks/ping.json",
        json!({ "action": { "emit": { "event": "pong" } } }),
    );

    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("greeter", Arc::new(GreeterFactory))
        .build();
    let ctx = engine.context();
    ModuleLoader::new(ctx.clone()).load_all().await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let count = seen.clone();
    ctx.bus
        .on_pattern(
            "modules:greeter:pong",
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
        .unwrap();

    // The hook's emit goes through the module context, so it surfaces
    // globally under the module namespace rather than as a bare "pong".
    ctx.bus
        .publish(Event::new("modules:greeter:ping"))
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disable_list_skips_user_and_builtin_modules() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "greeter", json!({ "name": "greeter" }));
    let disabled_file = dir.path().join("modules").join(".disabled");
    std::fs::write(&disabled_file, "greeter\n\n# builtins can go here too\nheartbeat\n").unwrap();

    let config = sandbox_config(
        &dir,
        json!({ "modules": { "disabled_file": disabled_file } }),
    );
    let engine = Engine::builder(config)
        .register_module("greeter", Arc::new(GreeterFactory))
        .build();
    let ctx = engine.context();
    ModuleLoader::new(ctx.clone()).load_all().await.unwrap();

    assert!(!ctx.modules.contains("greeter"));
    assert!(!ctx.modules.contains("heartbeat"));
    assert!(ctx.modules.contains("sysmon"));
}

#[tokio::test]
async fn test_missing_dependency_skips_module() {
    let dir = tempfile::tempdir().unwrap();
    write_module(
        dir.path(),
        "zeta",
        json!({ "name": "zeta", "dependencies": ["missing"] }),
    );

    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("zeta", Arc::new(NoopFactory))
        .build();
    let ctx = engine.context();
    ModuleLoader::new(ctx.clone()).load_all().await.unwrap();

    assert!(!ctx.modules.contains("zeta"));
}

#[tokio::test]
async fn test_dependencies_resolve_in_directory_order() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "alpha", json!({ "name": "alpha" }));
    write_module(
        dir.path(),
        "beta",
        json!({ "name": "beta", "dependencies": ["alpha", "heartbeat"] }),
    );

    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("alpha", Arc::new(NoopFactory))
        .register_module("beta", Arc::new(NoopFactory))
        .build();
    let ctx = engine.context();
    ModuleLoader::new(ctx.clone()).load_all().await.unwrap();

    assert_eq!(
        ctx.modules.names(),
        vec!["heartbeat", "sysmon", "alpha", "beta"]
    );
}

#[tokio::test]
async fn test_invalid_manifests_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("modules").join("broken");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("module.json"), "{not json").unwrap();
    write_module(dir.path(), "casing", json!({ "name": "Bad Name" }));
    write_module(dir.path(), "fine", json!({ "name": "fine" }));

    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("fine", Arc::new(NoopFactory))
        .build();
    let ctx = engine.context();
    let activated = ModuleLoader::new(ctx.clone()).load_all().await.unwrap();

    assert_eq!(activated, 3);
    assert!(ctx.modules.contains("fine"));
    assert!(!ctx.modules.contains("Bad Name"));
}

#[tokio::test]
async fn test_failing_create_aborts_the_whole_load() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "flaky", json!({ "name": "flaky" }));

    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("flaky", Arc::new(FailingFactory))
        .build();
    let ctx = engine.context();

    // Unlike a bad manifest, a factory failure is not downgraded to a skip.
    let result = ModuleLoader::new(ctx.clone()).load_all().await;
    assert!(matches!(result, Err(ModuleError::ActivationFailed { .. })));
    assert!(!ctx.modules.contains("flaky"));
}

#[tokio::test]
async fn test_module_without_registered_factory_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "ghost", json!({ "name": "ghost" }));

    let engine = Engine::builder(sandbox_config(&dir, json!({}))).build();
    let ctx = engine.context();
    ModuleLoader::new(ctx.clone()).load_all().await.unwrap();

    assert!(!ctx.modules.contains("ghost"));
}

#[tokio::test]
async fn test_duplicate_name_keeps_the_first_module() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "sysmon", json!({ "name": "sysmon" }));

    let created = Arc::new(AtomicUsize::new(0));
    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module(
            "sysmon",
            Arc::new(CountingFactory {
                created: created.clone(),
            }),
        )
        .build();
    let ctx = engine.context();
    ModuleLoader::new(ctx.clone()).load_all().await.unwrap();

    // The builtin claimed the name first; the user factory never ran.
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.modules.names(), vec!["heartbeat", "sysmon"]);
}

#[tokio::test]
async fn test_command_name_collision_between_modules_keeps_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_module(dir.path(), "a", json!({ "name": "a" }));
    write_descriptor(
        &first,
        "commands/dup.json",
        json!({ "name": "dup", "action": { "emit": { "event": "claimed" } } }),
    );
    let second = write_module(dir.path(), "b", json!({ "name": "b" }));
    write_descriptor(
        &second,
        "commands/dup.json",
        json!({ "name": "dup", "action": { "emit": { "event": "stolen" } } }),
    );

    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("a", Arc::new(NoopFactory))
        .register_module("b", Arc::new(NoopFactory))
        .build();
    let ctx = engine.context();
    ModuleLoader::new(ctx.clone()).load_all().await.unwrap();

    assert_eq!(ctx.commands.get("dup").unwrap().owner, Owner::module("a"));
}

#[tokio::test]
async fn test_self_emitting_hook_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = write_module(dir.path(), "echo", json!({ "name": "echo" }));
    write_descriptor(
        &module_dir,
        "hooks/loop.json",
        json!({ "action": { "emit": { "event": "loop" } } }),
    );
    write_descriptor(
        &module_dir,
        "hooks/safe.json",
        json!({ "action": { "emit": { "event": "other" } } }),
    );

    let engine = Engine::builder(sandbox_config(&dir, json!({})))
        .register_module("echo", Arc::new(NoopFactory))
        .build();
    let ctx = engine.context();
    ModuleLoader::new(ctx.clone()).load_all().await.unwrap();

    let names = ctx.bus.event_names().await;
    assert!(!names.contains(&"modules:echo:loop".to_string()));
    assert!(names.contains(&"modules:echo:safe".to_string()));
}
