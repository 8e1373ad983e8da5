//! Graph runs and file-based configuration through the public API.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bulwark_core::config::load_config;
use bulwark_core::node::node_fn;
use bulwark_core::resilience::ExecutionOrchestrator;
use bulwark_core::workflow::WorkflowRunner;
use bulwark_types::error::{ConfigurationError, ErrorKind, NodeError};
use bulwark_types::event::ResilienceEvent;
use bulwark_types::workflow::{NodeSpec, WorkflowGraph, WorkflowRunStatus};
use futures_util::future::join_all;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

// ---------------------------------------------------------------------------
// Graph runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn diamond_graph_passes_outputs_downstream() {
    let orchestrator = Arc::new(ExecutionOrchestrator::default());
    orchestrator.register_node(
        "load",
        node_fn(|input: Value| async move { Ok(json!(input["n"].as_i64().unwrap_or(0))) }),
    );
    orchestrator.register_node(
        "double",
        node_fn(|input: Value| async move { Ok(json!(input["load"].as_i64().unwrap_or(0) * 2)) }),
    );
    orchestrator.register_node(
        "square",
        node_fn(|input: Value| async move {
            let n = input["load"].as_i64().unwrap_or(0);
            Ok(json!(n * n))
        }),
    );
    orchestrator.register_node(
        "sum",
        node_fn(|input: Value| async move {
            let total = input["double"].as_i64().unwrap_or(0) + input["square"].as_i64().unwrap_or(0);
            Ok(json!(total))
        }),
    );

    let graph = WorkflowGraph {
        name: "diamond".to_string(),
        nodes: vec![
            NodeSpec::new("load"),
            NodeSpec::new("double").depends_on(["load"]),
            NodeSpec::new("square").depends_on(["load"]),
            NodeSpec::new("sum").depends_on(["double", "square"]),
        ],
    };
    let runner = WorkflowRunner::new(Arc::clone(&orchestrator));
    let mut rx = orchestrator.event_bus().subscribe();

    let outcome = runner
        .execute(&graph, json!({"n": 3}), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, WorkflowRunStatus::Completed);
    assert_eq!(outcome.outputs["sum"], json!(15));
    assert!(outcome.failures.is_empty());
    assert!(outcome.skipped.is_empty());

    let mut completed = None;
    while let Ok(event) = rx.try_recv() {
        if let ResilienceEvent::WorkflowRunCompleted { run_id, status, .. } = event {
            completed = Some((run_id, status));
        }
    }
    assert_eq!(completed, Some((outcome.run_id, WorkflowRunStatus::Completed)));
}

#[tokio::test]
async fn dead_lettered_node_skips_transitive_dependents() {
    let orchestrator = Arc::new(ExecutionOrchestrator::default());
    orchestrator.register_node(
        "extract",
        node_fn(|_| async { Err(NodeError::rate_limited("429")) }),
    );
    orchestrator.register_node("transform", node_fn(|v: Value| async move { Ok(v) }));
    orchestrator.register_node("publish", node_fn(|v: Value| async move { Ok(v) }));
    orchestrator.register_node("audit", node_fn(|_| async { Ok(json!("logged")) }));

    let graph = WorkflowGraph {
        name: "etl".to_string(),
        nodes: vec![
            NodeSpec::new("extract"),
            NodeSpec::new("audit"),
            NodeSpec::new("transform").depends_on(["extract"]),
            NodeSpec::new("publish").depends_on(["transform"]),
        ],
    };
    let outcome = WorkflowRunner::new(Arc::clone(&orchestrator))
        .execute(&graph, Value::Null, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, WorkflowRunStatus::Failed);
    assert_eq!(outcome.skipped, vec!["transform".to_string(), "publish".to_string()]);
    assert_eq!(outcome.outputs["audit"], json!("logged"));
    assert_eq!(outcome.failures[0].error.kind, ErrorKind::RateLimited);
    assert_eq!(orchestrator.list_dead_letters().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_leaves_no_dead_letters() {
    let orchestrator = Arc::new(ExecutionOrchestrator::default());
    orchestrator.register_node(
        "slow",
        node_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("late"))
        }),
    );
    orchestrator.register_node("next", node_fn(|v: Value| async move { Ok(v) }));

    let graph = WorkflowGraph {
        name: "cancel".to_string(),
        nodes: vec![NodeSpec::new("slow"), NodeSpec::new("next").depends_on(["slow"])],
    };
    let runner = WorkflowRunner::new(Arc::clone(&orchestrator));
    let cancel = CancellationToken::new();

    let run = runner.execute(&graph, Value::Null, &cancel);
    let trigger = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(run, trigger);
    let outcome = outcome.unwrap();

    assert_eq!(outcome.status, WorkflowRunStatus::Cancelled);
    assert_eq!(outcome.skipped, vec!["slow".to_string(), "next".to_string()]);
    assert!(orchestrator.list_dead_letters().is_empty());
}

#[tokio::test]
async fn concurrent_runs_share_one_dead_letter_queue() {
    let orchestrator = Arc::new(ExecutionOrchestrator::default());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    orchestrator.register_node(
        "odd_fails",
        node_fn(move |input: Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let n = input["n"].as_i64().unwrap_or(0);
                if n % 2 == 1 {
                    Err(NodeError::validation(format!("odd input {n}")))
                } else {
                    Ok(json!(n))
                }
            }
        }),
    );

    let runs = (0..20).map(|n| {
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run_node("odd_fails", json!({"n": n})).await }
    });
    let results = join_all(runs).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
    assert_eq!(orchestrator.list_dead_letters().len(), 10);
    assert_eq!(calls.load(Ordering::SeqCst), 20);
}

// ---------------------------------------------------------------------------
// Configuration files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn config_file_drives_retry_and_fallback() {
    let file = write_config(
        r#"
[defaults.retry]
max_retries = 1

[nodes.primary.retry]
max_retries = 2
strategy = "immediate"
retryable_kinds = ["connection"]

[nodes.primary.breaker]
failure_threshold = 10
success_threshold = 1
open_timeout_ms = 1000

[nodes.primary]
fallback = "replica"
"#,
    );
    let config = load_config(file.path()).unwrap();

    let orchestrator = ExecutionOrchestrator::default();
    orchestrator.apply_config(&config).unwrap();
    assert_eq!(orchestrator.policy("primary").max_retries, 2);
    assert_eq!(orchestrator.policy("replica").max_retries, 1);

    let primary_calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&primary_calls);
    orchestrator.register_node(
        "primary",
        node_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(NodeError::connection("reset")) }
        }),
    );
    orchestrator.register_node("replica", node_fn(|_| async { Ok(json!("replica")) }));

    assert_eq!(
        orchestrator.run_node("primary", Value::Null).await.unwrap(),
        json!("replica")
    );
    assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
    assert_eq!(orchestrator.breaker_status("primary").unwrap().total_failures, 3);
}

#[test]
fn config_file_with_fallback_cycle_is_rejected() {
    let file = write_config(
        r#"
[nodes.a]
fallback = "b"

[nodes.b]
fallback = "a"
"#,
    );
    let config = load_config(file.path()).unwrap();
    let err = ExecutionOrchestrator::default()
        .apply_config(&config)
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::FallbackCycle { .. }));
}

#[test]
fn config_file_with_zero_threshold_is_rejected() {
    let file = write_config(
        r#"
[nodes.a.breaker]
failure_threshold = 0
"#,
    );
    let config = load_config(file.path()).unwrap();
    let err = ExecutionOrchestrator::default()
        .apply_config(&config)
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::InvalidThreshold { field: "failure_threshold", .. }
    ));
}
