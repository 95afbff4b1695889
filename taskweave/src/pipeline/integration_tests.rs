//! End-to-end tests driving applications through the engine.

use crate::checkpoint::CheckpointStore;
use crate::config::{CheckpointConfig, EngineConfig};
use crate::coordinator::WaitPolicy;
use crate::core::{Outcome, RunStatus};
use crate::errors::{ErrorKind, InvocationError};
use crate::events::types;
use crate::functions::{AsyncFnComputation, CallContext, FnComputation};
use crate::observability::SpanTimer;
use crate::pipeline::{Engine, PipelineDriver, StageSource};
use crate::reduce::Reducer;
use crate::registry::{FnApplication, FunctionDefinition, FunctionRegistry};
use crate::testing::{
    add_application, add_function, assert_failed_with, assert_report, assert_succeeded,
    instant_retries, CountingComputation, FailingComputation, SlowComputation, TestEngine,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn summarize() -> Reducer {
    Reducer::local(|mut acc, item| {
        acc["sites_processed"] = json!(acc["sites_processed"].as_u64().unwrap_or(0) + 1);
        match item {
            Outcome::Succeeded { value } => {
                acc["successful"] = json!(acc["successful"].as_u64().unwrap_or(0) + 1);
                acc["results"]
                    .as_array_mut()
                    .ok_or_else(|| InvocationError::validation("results must be an array"))?
                    .push(value.clone());
            }
            Outcome::Failed { .. } => {
                acc["failed"] = json!(acc["failed"].as_u64().unwrap_or(0) + 1);
            }
        }
        Ok(acc)
    })
}

fn empty_summary() -> Value {
    json!({"sites_processed": 0, "successful": 0, "failed": 0, "results": []})
}

fn process_site() -> FnComputation<impl Fn(Value) -> Result<Value, InvocationError> + Send + Sync> {
    FnComputation::new("process_site", |input: Value| {
        let url = input
            .as_str()
            .ok_or_else(|| InvocationError::validation("url must be a string"))?;
        if url.contains("unreachable") {
            return Err(InvocationError::transient(format!("connection refused: {url}")));
        }
        let text = format!("welcome to {url} home page");
        Ok(json!({"url": url, "word_count": text.split_whitespace().count()}))
    })
}

fn urls(input: &Value) -> Result<Vec<Value>, InvocationError> {
    input["urls"]
        .as_array()
        .cloned()
        .ok_or_else(|| InvocationError::validation("urls must be an array"))
}

fn scraper_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    add_function(
        &mut registry,
        FunctionDefinition::new("process_site", process_site()).with_retries(instant_retries(1)),
    );
    add_application(
        &mut registry,
        FnApplication::new("scraper", |driver: PipelineDriver, input: Value| async move {
            let processed = driver.map("process", "process_site", urls(&input)?).await;
            driver
                .reduce("summarize", &summarize(), &processed, empty_summary())
                .await
                .into_result()
        }),
    );
    registry
}

#[tokio::test]
async fn test_map_reduce_scraper_isolates_failure() {
    let fixture = TestEngine::new();
    let engine = fixture.engine(scraper_registry());

    let report = engine
        .run(
            "scraper",
            "scrape-1",
            json!({"urls": ["https://example.com", "https://unreachable.test"]}),
        )
        .await
        .unwrap();

    assert_report(&report, RunStatus::PartiallySucceeded, 1, 1);
    let output = assert_succeeded(&report.output);
    assert_eq!(output["sites_processed"], 2);
    assert_eq!(output["successful"], 1);
    assert_eq!(output["failed"], 1);
    assert_eq!(output["results"][0]["url"], "https://example.com");
    assert_eq!(output["results"][0]["word_count"], 5);

    assert_eq!(report.failures[0].index, Some(1));
    assert_eq!(report.failures[0].kind, ErrorKind::Transient);
    // One retry for the unreachable site.
    assert_eq!(fixture.events().count(types::INVOCATION_STARTED), 3);
    assert_eq!(report.stage("summarize").map(|s| s.successful), Some(1));
}

#[tokio::test]
async fn test_broadcast_partial_success() {
    let mut registry = FunctionRegistry::new();
    add_function(
        &mut registry,
        FunctionDefinition::new(
            "send_notification",
            FnComputation::new("send_notification", |input: Value| {
                if input["channel"] == "sms" {
                    return Err(InvocationError::transient("sms gateway unavailable"));
                }
                Ok(json!({"channel": input["channel"], "delivered": true}))
            }),
        )
        .with_retries(instant_retries(2)),
    );
    add_application(
        &mut registry,
        FnApplication::new("broadcast", |driver: PipelineDriver, input: Value| async move {
            let mut futures = Vec::new();
            for channel in ["email", "sms", "slack", "webhook"] {
                let stage = format!("notify_{channel}");
                let payload = json!({"channel": channel, "message": input["message"]});
                futures.push(driver.spawn(&stage, "send_notification", payload).await);
            }
            let done = driver
                .wait(&futures, WaitPolicy::AllCompleted)
                .await
                .map_err(InvocationError::from)?;

            let mut delivered = Vec::new();
            let mut attempts = Vec::new();
            for index in done.done {
                let outcome = futures[index].result().await.map_err(InvocationError::from)?;
                delivered.push(outcome.is_success());
                attempts.push(futures[index].invocation().map(|record| record.read().attempt_count()));
            }
            Ok(json!({"delivered": delivered, "attempts": attempts}))
        }),
    );

    let fixture = TestEngine::new();
    let engine = fixture.engine(registry);
    let report = engine
        .run("broadcast", "notify-1", json!({"message": "deploy finished"}))
        .await
        .unwrap();

    assert_report(&report, RunStatus::PartiallySucceeded, 3, 1);
    let output = assert_succeeded(&report.output);
    assert_eq!(output["delivered"], json!([true, false, true, true]));
    // The sms channel exhausts two retries before failing.
    assert_eq!(output["attempts"], json!([1, 3, 1, 1]));
    assert_eq!(report.failures[0].stage_id, "notify_sms");
    assert_eq!(report.failures[0].kind, ErrorKind::Transient);
    assert_eq!(fixture.events().count(types::INVOCATION_RETRYING), 2);
    assert_eq!(fixture.events().count(types::INVOCATION_FAILED), 1);
    let stage_ids: Vec<_> = report.stages.iter().map(|s| s.stage_id.as_str()).collect();
    assert_eq!(stage_ids, ["notify_email", "notify_sms", "notify_slack", "notify_webhook"]);
}

#[tokio::test]
async fn test_chained_maps_pass_tombstones_through() {
    let add_one = Arc::new(CountingComputation::new(|input| {
        Ok(json!(input.as_i64().unwrap_or_default() + 1))
    }));
    let mut registry = FunctionRegistry::new();
    add_function(
        &mut registry,
        FunctionDefinition::new(
            "double",
            FnComputation::new("double", |input: Value| {
                let n = input
                    .as_i64()
                    .ok_or_else(|| InvocationError::validation("expected integer"))?;
                Ok(json!(n * 2))
            }),
        ),
    );
    add_function(&mut registry, FunctionDefinition::from_arc("add_one", add_one.clone()));

    let engine = TestEngine::new().engine(registry);
    let driver = engine.driver("chain", "chain-1");
    let doubled = driver.map("double", "double", vec![json!(1), json!("x"), json!(3)]).await;
    let incremented = driver.map_outcomes("add_one", "add_one", &doubled).await;

    assert_eq!(incremented.len(), 3);
    assert_eq!(incremented[0], Outcome::success(json!(3)));
    assert_eq!(incremented[1], doubled[1]);
    assert_failed_with(&incremented[1], ErrorKind::Validation);
    assert_eq!(incremented[2], Outcome::success(json!(7)));
    assert_eq!(add_one.calls(), 2);

    let report = driver
        .finish(Ok(json!(null)), SpanTimer::start("chain"))
        .await
        .unwrap();
    // The tombstone is counted once, in the stage that produced it.
    assert_report(&report, RunStatus::PartiallySucceeded, 4, 1);
    assert_eq!(report.stage("add_one").map(|s| s.passed_through), Some(1));
}

struct ResumeCounters {
    a: Arc<CountingComputation>,
    b: Arc<CountingComputation>,
    c: Arc<CountingComputation>,
}

fn resume_registry(c_fails: Arc<AtomicBool>) -> (FunctionRegistry, ResumeCounters) {
    let counters = ResumeCounters {
        a: Arc::new(CountingComputation::new(|input| {
            Ok(json!({"items": input["items"], "prepared": true}))
        })),
        b: Arc::new(CountingComputation::new(|input| {
            Ok(json!(input.as_i64().unwrap_or_default() * 10))
        })),
        c: Arc::new(CountingComputation::new(move |input| {
            if c_fails.load(Ordering::SeqCst) {
                return Err(InvocationError::validation("downstream not ready"));
            }
            let total: i64 = input
                .as_array()
                .map(|items| items.iter().filter_map(Value::as_i64).sum())
                .unwrap_or_default();
            Ok(json!({"total": total}))
        })),
    };

    let mut registry = FunctionRegistry::new();
    add_function(&mut registry, FunctionDefinition::from_arc("prepare", counters.a.clone()));
    add_function(&mut registry, FunctionDefinition::from_arc("scale", counters.b.clone()));
    add_function(&mut registry, FunctionDefinition::from_arc("publish", counters.c.clone()));
    add_application(
        &mut registry,
        FnApplication::new("three_stage", |driver: PipelineDriver, input: Value| async move {
            let prepared = driver.call("a", "prepare", input).await.into_result()?;
            let items = prepared["items"].as_array().cloned().unwrap_or_default();
            let scaled = driver.map("b", "scale", items).await;
            let values = scaled
                .into_iter()
                .map(Outcome::into_result)
                .collect::<Result<Vec<_>, _>>()?;
            driver.call("c", "publish", Value::Array(values)).await.into_result()
        }),
    );
    (registry, counters)
}

#[tokio::test]
async fn test_resume_reexecutes_only_missing_stage() {
    let input = json!({"items": [1, 2]});
    let fixture = TestEngine::new();
    let c_fails = Arc::new(AtomicBool::new(true));

    let (registry, first) = resume_registry(Arc::clone(&c_fails));
    let report = fixture.engine(registry).run("three_stage", "resume-1", input.clone()).await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!((first.a.calls(), first.b.calls(), first.c.calls()), (1, 2, 1));

    c_fails.store(false, Ordering::SeqCst);
    let (registry, second) = resume_registry(Arc::clone(&c_fails));
    let resumed = fixture.engine(registry).run("three_stage", "resume-1", input.clone()).await.unwrap();
    assert_eq!((second.a.calls(), second.b.calls(), second.c.calls()), (0, 0, 1));
    assert_eq!(resumed.status, RunStatus::Succeeded);
    assert_eq!(resumed.stage("a").map(|s| s.source), Some(StageSource::Checkpoint));
    assert_eq!(resumed.stage("b").map(|s| s.source), Some(StageSource::Checkpoint));
    assert_eq!(resumed.stage("c").map(|s| s.source), Some(StageSource::Executed));

    let (registry, _) = resume_registry(c_fails);
    let uninterrupted = TestEngine::new()
        .engine(registry)
        .run("three_stage", "fresh-1", input)
        .await
        .unwrap();
    assert_eq!(resumed.output, uninterrupted.output);
    assert_eq!(assert_succeeded(&resumed.output), &json!({"total": 30}));
}

#[tokio::test]
async fn test_retry_budget_is_k_plus_one() {
    let mut registry = FunctionRegistry::new();
    add_function(
        &mut registry,
        FunctionDefinition::new("always_down", FailingComputation::transient("service unavailable"))
            .with_retries(instant_retries(3)),
    );
    let fixture = TestEngine::new();
    let driver = fixture.engine(registry).driver("retry", "retry-1");

    let outcome = driver.call("down", "always_down", json!(null)).await;
    assert_failed_with(&outcome, ErrorKind::Transient);
    assert_eq!(fixture.events().count(types::INVOCATION_STARTED), 4);
    assert_eq!(fixture.events().count(types::INVOCATION_RETRYING), 3);
    assert_eq!(fixture.events().count(types::INVOCATION_FAILED), 1);
    assert!(fixture.store().is_empty());
}

#[tokio::test]
async fn test_wait_first_then_all() {
    let mut registry = FunctionRegistry::new();
    add_function(
        &mut registry,
        FunctionDefinition::new("sleepy", SlowComputation::new(Duration::from_millis(10))),
    );
    let driver = TestEngine::new().engine(registry).driver("waiter", "wait-1");

    let slow = driver.spawn("slow", "sleepy", json!({"delay_ms": 300})).await;
    let fast = driver.spawn("fast", "sleepy", json!({"delay_ms": 5})).await;
    let futures = vec![slow, fast];

    let first = driver.wait(&futures, WaitPolicy::FirstCompleted).await.unwrap();
    assert_eq!(first.done, vec![1]);
    assert_eq!(first.pending, vec![0]);
    assert!(!futures[0].is_terminal());

    let all = driver.wait(&futures, WaitPolicy::AllCompleted).await.unwrap();
    assert_eq!(all.done, vec![0, 1]);
    assert!(all.pending.is_empty());

    let empty: Vec<crate::coordinator::InvocationFuture> = Vec::new();
    assert!(driver.wait(&empty, WaitPolicy::FirstCompleted).await.is_err());
    assert!(driver.wait(&empty, WaitPolicy::AllCompleted).await.unwrap().done.is_empty());
}

#[tokio::test]
async fn test_reduce_is_independent_of_completion_order() {
    let concat = Reducer::local(|acc, item| {
        let label = item.value().and_then(|v| v["label"].as_str()).unwrap_or("?");
        Ok(json!(format!("{}{label}", acc.as_str().unwrap_or_default())))
    });

    let mut finals = Vec::new();
    for (run, delays) in [("order-1", [40, 30, 20, 10]), ("order-2", [10, 20, 30, 40])] {
        let mut registry = FunctionRegistry::new();
        add_function(
            &mut registry,
            FunctionDefinition::new("sleepy", SlowComputation::new(Duration::from_millis(1))),
        );
        let driver = TestEngine::new().engine(registry).driver("order", run);

        let inputs = ["a", "b", "c", "d"]
            .iter()
            .zip(delays)
            .map(|(label, delay)| json!({"label": label, "delay_ms": delay}))
            .collect();
        let mapped = driver.map("sleep", "sleepy", inputs).await;
        let labels: Vec<_> = mapped
            .iter()
            .map(|outcome| assert_succeeded(outcome)["label"].clone())
            .collect();
        assert_eq!(labels, vec![json!("a"), json!("b"), json!("c"), json!("d")]);
        finals.push(driver.reduce("concat", &concat, &mapped, json!("")).await);
    }

    assert_eq!(finals[0], Outcome::success(json!("abcd")));
    assert_eq!(finals[0], finals[1]);
}

#[tokio::test]
async fn test_unknown_function_is_reported_not_raised() {
    let mut registry = FunctionRegistry::new();
    add_application(
        &mut registry,
        FnApplication::new("ghostly", |driver: PipelineDriver, _input: Value| async move {
            let outcome = driver.call("haunt", "ghost", json!(1)).await;
            Ok(json!({"kind": outcome.error_kind()}))
        }),
    );

    let report = TestEngine::new()
        .engine(registry)
        .run("ghostly", "ghost-1", json!(null))
        .await
        .unwrap();
    assert_report(&report, RunStatus::Failed, 0, 1);
    assert_eq!(assert_succeeded(&report.output)["kind"], "terminal_platform");
    assert_eq!(report.failures[0].kind, ErrorKind::TerminalPlatform);
}

#[tokio::test]
async fn test_spawn_map_runs_in_background() {
    let mut registry = FunctionRegistry::new();
    add_function(
        &mut registry,
        FunctionDefinition::new("sleepy", SlowComputation::new(Duration::from_millis(5))),
    );
    add_application(
        &mut registry,
        FnApplication::new("background", |driver: PipelineDriver, input: Value| async move {
            let map = driver.spawn_map("batch", "sleepy", urls(&input)?);
            let outcomes = map.result().await.map_err(InvocationError::from)?;
            Ok(json!(outcomes.len()))
        }),
    );

    let report = TestEngine::new()
        .engine(registry)
        .run("background", "bg-1", json!({"urls": [1, 2, 3]}))
        .await
        .unwrap();
    assert_report(&report, RunStatus::Succeeded, 3, 0);
    assert_eq!(report.output, Outcome::success(json!(3)));
}

#[tokio::test]
async fn test_call_context_carries_stage_and_run() {
    let mut registry = FunctionRegistry::new();
    add_function(
        &mut registry,
        FunctionDefinition::new(
            "whoami",
            AsyncFnComputation::new("whoami", |_input, ctx: CallContext| async move {
                Ok::<_, InvocationError>(json!({
                    "run": ctx.run_id,
                    "stage": ctx.stage_id,
                    "secrets": ctx.secrets,
                }))
            }),
        )
        .with_secret("API_TOKEN"),
    );
    let driver = TestEngine::new().engine(registry).driver("ctx", "ctx-1");

    let outcome = driver.call("identify", "whoami", json!(null)).await;
    assert_eq!(
        assert_succeeded(&outcome),
        &json!({"run": "ctx-1", "stage": "identify", "secrets": ["API_TOKEN"]})
    );
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        checkpoint: CheckpointConfig::File {
            path: dir.path().join("runs").join("checkpoints.jsonl"),
        },
        ..EngineConfig::default()
    };
    let c_fails = Arc::new(AtomicBool::new(false));
    let input = json!({"items": [4, 5]});

    let (registry, first) = resume_registry(Arc::clone(&c_fails));
    let engine = Engine::from_config(registry, config.clone()).await.unwrap();
    let report = engine.run("three_stage", "durable-1", input.clone()).await.unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(first.c.calls(), 1);
    drop(engine);

    let (registry, second) = resume_registry(c_fails);
    let engine = Engine::from_config(registry, config).await.unwrap();
    let replayed = engine.run("three_stage", "durable-1", input).await.unwrap();
    assert_eq!((second.a.calls(), second.b.calls(), second.c.calls()), (0, 0, 0));
    assert_eq!(replayed.output, report.output);
    assert_eq!(
        engine.checkpoint_store().entries_for_run("durable-1").await.unwrap().len(),
        4
    );
}
