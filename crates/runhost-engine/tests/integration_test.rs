//! Integration tests for the runhost execution core

use mockall::mock;
use mockall::predicate::eq;
use runhost_config::ConfigBuilder;
use runhost_core::{Error, ExecutionPolicy, LogMode, Severity, Value};
use runhost_engine::testing::MemorySink;
use runhost_engine::{
    CommandDefinition, CommandRegistry, ContextOptions, ExecutionService, LogSink, ParamType,
};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mock! {
    pub Sink {}

    impl LogSink for Sink {
        fn log(&self, level: Severity, message: &str);
    }
}

fn script_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("deploy.rhai"),
        r#"
            fn deploy(service, replicas) {
                write_verbose(`deploying ${service}`);
                if replicas > 5 { write_warning("large rollout"); }
                `${service}x${replicas}`
            }
        "#,
    )
    .unwrap();
    fs::write(dir.path().join("ops.rhai"), "fn ping() { \"pong\" }").unwrap();
    fs::write(dir.path().join("README.md"), "not a script").unwrap();
    fs::create_dir(dir.path().join("lib")).unwrap();
    fs::write(dir.path().join("lib").join("hidden.rhai"), "fn hidden() { 1 }").unwrap();
    dir
}

#[test]
fn test_modules_resolved_from_directory() {
    let dir = script_dir();
    let config = ConfigBuilder::new()
        .script(dir.path())
        .host_app("integration")
        .build()
        .unwrap();
    let service = ExecutionService::new(config).unwrap();
    assert_eq!(service.modules().len(), 2);

    let context = service.get_execution_context(None).unwrap();
    let mut context = context.try_lock().unwrap();

    let mut params = HashMap::new();
    params.insert("Service".to_string(), json!("api"));
    params.insert("replicas".to_string(), json!(3));
    params.insert("ignored".to_string(), json!("x"));
    assert_eq!(
        context.run_command("deploy", Some(&params)).unwrap(),
        vec![json!("apix3")]
    );
    assert_eq!(context.run_command("ping", None).unwrap(), vec![json!("pong")]);
    assert!(context.parameters_of("hidden").unwrap().is_none());
}

#[test]
fn test_bulk_mode_emits_once_at_worst_level() {
    let dir = script_dir();
    let config = ConfigBuilder::new()
        .script(dir.path())
        .log_mode(LogMode::Bulk)
        .build()
        .unwrap();
    let service = ExecutionService::new(config).unwrap();

    let mut sink = MockSink::new();
    sink.expect_log()
        .withf(|level, message| {
            *level == Severity::Warning
                && message.contains("deploying web")
                && message.contains("large rollout")
        })
        .times(1)
        .return_const(());

    let context = service.get_execution_context(Some(Arc::new(sink))).unwrap();
    let mut context = context.try_lock().unwrap();
    context
        .add_script("deploy(\"web\", 9)", true)
        .unwrap();
    assert_eq!(context.run().unwrap(), vec![json!("webx9")]);
    assert_eq!(context.max_severity(), Severity::Warning);
}

#[test]
fn test_direct_mode_emits_each_event() {
    let sink = Arc::new(MemorySink::new());
    let config = ConfigBuilder::new().log_mode(LogMode::Direct).build().unwrap();
    let service = ExecutionService::new(config).unwrap();

    let context = service.get_execution_context(Some(sink.clone())).unwrap();
    let mut context = context.try_lock().unwrap();
    context
        .run_script(r#"write_debug("1"); write_information("2"); write_error("3");"#)
        .unwrap();

    assert_eq!(
        sink.records(),
        vec![
            (Severity::Debug, "1".to_string()),
            (Severity::Information, "2".to_string()),
            (Severity::Error, "3".to_string()),
        ]
    );
}

#[test]
fn test_log_separator_from_config() {
    let mut sink = MockSink::new();
    sink.expect_log()
        .with(eq(Severity::Information), mockall::predicate::always())
        .times(1)
        .return_const(());

    let config = ConfigBuilder::new().log_separator("|").build().unwrap();
    let service = ExecutionService::new(config).unwrap();
    let context = service.get_execution_context(Some(Arc::new(sink))).unwrap();
    let mut context = context.try_lock().unwrap();

    context.run_script("print(\"hello\")").unwrap();
    assert!(context.log().contains("\"|\"Information\"|\"hello\""));
}

#[test]
fn test_host_commands_bind_typed_parameters() {
    let registry = CommandRegistry::new()
        .with(
            CommandDefinition::new("resize", |args| {
                let name = args.get_str("name").unwrap_or("?");
                let size = args.get("size").and_then(Value::as_i64).unwrap_or(-1);
                Ok(json!(format!("{name}:{size}")))
            })
            .param("name", ParamType::String)
            .param("size", ParamType::Int),
        )
        .unwrap();
    let service =
        ExecutionService::with_registry(ConfigBuilder::new().build().unwrap(), registry).unwrap();

    let context = service.get_execution_context(None).unwrap();
    let mut context = context.try_lock().unwrap();

    let mut params = HashMap::new();
    params.insert("NAME".to_string(), json!("disk"));
    params.insert("size".to_string(), json!("large"));
    assert_eq!(
        context.run_command("resize", Some(&params)).unwrap(),
        vec![json!("disk:-1")]
    );
}

#[test]
fn test_load_module_keeps_names_namespaced() {
    let dir = script_dir();
    let config = ConfigBuilder::new().script(dir.path()).build().unwrap();
    let service = ExecutionService::new(config).unwrap();

    let context = service.get_execution_context(None).unwrap();
    let mut context = context.try_lock().unwrap();
    context.load_module("ops").unwrap();

    assert!(context.parameters_of("ops::ping").unwrap().is_some());
    assert_eq!(context.run_script("ops::ping()").unwrap(), vec![json!("pong")]);
    assert!(matches!(
        context.load_module("two words"),
        Err(Error::Validation(_))
    ));
}

#[test]
fn test_restricted_policy_from_config() {
    let dir = script_dir();
    let config = ConfigBuilder::new()
        .script(dir.path())
        .execution_policy(ExecutionPolicy::Restricted)
        .build()
        .unwrap();
    let service = ExecutionService::new(config).unwrap();

    let context = service.get_execution_context(None).unwrap();
    let mut context = context.try_lock().unwrap();
    assert!(context.is_restricted());
    assert_eq!(context.run_command("ping", None).unwrap(), vec![json!("pong")]);
    assert!(matches!(context.load_module("ops"), Err(Error::Restricted(_))));
    assert!(matches!(
        context.run_script_from_path(dir.path(), "*.rhai", 1),
        Err(Error::Restricted(_))
    ));
}

#[test]
fn test_init_hook_seeds_object_parameters() {
    let config = ConfigBuilder::new()
        .parameter("Env", "staging")
        .init(|params| {
            params.insert("!Limits".to_string(), json!({"cpu": 2}));
        })
        .build()
        .unwrap();
    let service = ExecutionService::new(config).unwrap();

    let context = service.get_execution_context(None).unwrap();
    let mut context = context.try_lock().unwrap();
    assert_eq!(
        context.run_script("`${Env}/${Limits.cpu}`").unwrap(),
        vec![json!("staging/2")]
    );
    assert!(context
        .set_variable("Limits", json!(null), false, true)
        .is_err());
}

#[test]
fn test_run_script_from_files_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.rhai");
    let second = dir.path().join("b.rhai");
    fs::write(&first, "[1, 2, 3]").unwrap();
    fs::write(&second, "input.filter(|x| x > 1)").unwrap();

    let service = ExecutionService::new(ConfigBuilder::new().build().unwrap()).unwrap();
    let context = service.get_execution_context(None).unwrap();
    let mut context = context.try_lock().unwrap();

    assert_eq!(
        context.run_script_from_files(&[first, second]).unwrap(),
        vec![json!(2), json!(3)]
    );
    assert_eq!(
        context.run_script_from_path(dir.path(), "a.*", 1).unwrap(),
        vec![json!(1), json!(2), json!(3)]
    );
}

#[tokio::test]
async fn test_pool_bounds_concurrent_contexts() {
    let config = ConfigBuilder::new().max_concurrency(3).build().unwrap();
    let service = Arc::new(ExecutionService::new(config).unwrap());
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = Arc::clone(&service);
        let live = Arc::clone(&live);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            let context = service.get_execution_context_async(None).await.unwrap();
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);

            let token = CancellationToken::new();
            let output = {
                let mut context = context.lock().await;
                context.run_script_async(format!("{i} * 2"), &token).await.unwrap()
            };
            tokio::time::sleep(Duration::from_millis(10)).await;

            live.fetch_sub(1, Ordering::SeqCst);
            drop(context);
            output
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), vec![json!(i * 2)]);
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(service.pool().unwrap().active_contexts(), 0);
}

#[tokio::test]
async fn test_cancelled_run_leaves_context_ready() {
    let sink = Arc::new(MemorySink::new());
    let service = ExecutionService::new(ConfigBuilder::new().build().unwrap()).unwrap();
    let context = service
        .get_execution_context_async(Some(sink.clone()))
        .await
        .unwrap();
    let mut context = context.lock().await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = context
        .run_script_async(
            "write_information(\"started\"); let n = 0; loop { n += 1; }",
            &token,
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(sink.len(), 1);
    assert!(sink.records()[0].1.contains("started"));

    let fresh = CancellationToken::new();
    assert_eq!(
        context.run_script_async("\"again\"", &fresh).await.unwrap(),
        vec![json!("again")]
    );
}

#[tokio::test]
async fn test_pool_contexts_respect_overrides() {
    let config = ConfigBuilder::new()
        .max_concurrency(2)
        .host_app("pooled-host")
        .build()
        .unwrap();
    let service = ExecutionService::new(config).unwrap();
    let pool = service.pool().unwrap();

    let context = pool
        .get_execution_context_async(ContextOptions::new().with_log_mode(LogMode::Direct))
        .await
        .unwrap();
    assert_eq!(context.host_app(), "pooled-host");
    assert_eq!(context.log_mode(), LogMode::Direct);

    service.shutdown().await;
    assert!(context.is_disposed());
}
