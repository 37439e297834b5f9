#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use conductor_core::*;
use std::collections::HashSet;
use uuid::Uuid;

fn result(id: &str, content: &str) -> SubtaskResult {
    SubtaskResult {
        subtask_id: id.to_string(),
        agent_id: "worker".to_string(),
        content: content.to_string(),
        tool_calls: vec![ToolCall {
            id: "call_1".to_string(),
            name: "web_search".to_string(),
            arguments: serde_json::json!({"query": "lisbon flights"}),
        }],
        context_update: None,
        attempts: Vec::new(),
        tokens_used: 42,
        duration_ms: 7,
    }
}

// ---------------------------------------------------------------------------
// 1. Task graph: derived order, readiness and serde
// ---------------------------------------------------------------------------

#[test]
fn graph_order_and_readiness() {
    let graph = TaskGraph::new(vec![
        Subtask::new("report", "Write the final report")
            .with_dependencies(["flights", "hotels"])
            .with_cost(300),
        Subtask::new("hotels", "Compare hotels near the centre")
            .with_dependencies(["flights"])
            .with_cost(200),
        Subtask::new("flights", "Search flights to Lisbon").with_cost(100),
    ]);
    assert_eq!(graph.execution_order(), ["flights", "hotels", "report"]);
    assert_eq!(graph.total_cost(), 600);
    assert!(!graph.has_cycle());

    let mut done = HashSet::new();
    assert!(graph.get("flights").unwrap().is_ready(&done));
    assert!(!graph.get("hotels").unwrap().is_ready(&done));
    done.insert("flights".to_string());
    assert!(graph.get("hotels").unwrap().is_ready(&done));
    assert!(!graph.get("report").unwrap().is_ready(&done));
}

#[test]
fn graph_serialization_roundtrip_keeps_derived_fields() {
    let graph = TaskGraph::new(vec![
        Subtask::new("b", "Second step")
            .with_dependencies(["a"])
            .with_capabilities([Capability::DataAnalysis, Capability::Custom("ocr".into())]),
        Subtask::new("a", "First step").with_parallel(false),
    ]);
    let json = serde_json::to_string(&graph).unwrap();
    assert!(json.contains("\"dataAnalysis\""));
    let parsed: TaskGraph = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, graph);
    assert_eq!(parsed.execution_order(), ["a", "b"]);
    assert!(!parsed.get("a").unwrap().parallel);
}

// ---------------------------------------------------------------------------
// 2. Subtask lifecycle, including a retry
// ---------------------------------------------------------------------------

#[test]
fn subtask_lifecycle_with_retry() {
    let pending = SubtaskState::Pending;
    let running = SubtaskState::InProgress {
        agent_id: "worker".into(),
        started_at: Utc::now(),
    };
    let failed = SubtaskState::Failed {
        error: "timeout".into(),
        attempts: vec![RetryAttempt {
            number: 0,
            timestamp: Utc::now(),
            delay_ms: 0,
            error: Some("timeout".into()),
        }],
    };
    let completed = SubtaskState::Completed {
        result: result("s1", "done"),
    };

    assert!(pending.can_transition_to(&running));
    assert!(running.can_transition_to(&failed));
    assert!(failed.can_transition_to(&running));
    assert!(running.can_transition_to(&completed));

    assert!(!pending.can_transition_to(&completed));
    assert!(!completed.can_transition_to(&running));
    assert!(!failed.can_transition_to(&completed));
    assert!(completed.is_completed());
    assert_eq!(failed.name(), "failed");
}

// ---------------------------------------------------------------------------
// 3. Phases
// ---------------------------------------------------------------------------

#[test]
fn phases_skip_forward_but_never_back() {
    assert!(Phase::Decision.can_advance_to(Phase::Execution));
    assert!(Phase::Execution.can_advance_to(Phase::Failed));
    assert!(!Phase::Synthesis.can_advance_to(Phase::Analysis));
    assert!(!Phase::Complete.can_advance_to(Phase::Failed));
    assert!(!Phase::Failed.can_advance_to(Phase::Complete));
    assert_eq!(Phase::Decomposition.to_string(), "decomposition");
}

// ---------------------------------------------------------------------------
// 4. Context merging
// ---------------------------------------------------------------------------

#[test]
fn context_updates_merge_by_key() {
    let mut shared = AgentContext::new()
        .with_history(vec![Message::user("Plan my trip")])
        .with_tool_result("weather", "sunny")
        .with_preference("currency", "EUR");

    let mut first = ContextUpdate::default();
    first.tool_results.insert("flights".into(), "TAP 80 EUR".into());
    let mut second = ContextUpdate::default();
    second.user_preferences.insert("currency".into(), "USD".into());
    second
        .metadata
        .insert("hotel_count".into(), serde_json::json!(3));

    shared.apply_update(&first);
    shared.apply_update(&second);

    assert_eq!(shared.conversation_history.len(), 1);
    assert_eq!(shared.tool_results.len(), 2);
    assert_eq!(shared.user_preferences["currency"], "USD");
    assert_eq!(shared.metadata["hotel_count"], serde_json::json!(3));
}

// ---------------------------------------------------------------------------
// 5. Snapshot round trip as stored in checkpoints
// ---------------------------------------------------------------------------

#[test]
fn snapshot_roundtrip_with_results_and_metrics() {
    let mut snapshot = ProgressSnapshot::new(Uuid::new_v4());
    snapshot.phase = Phase::Execution;
    snapshot.delegated = Some(true);
    snapshot.graph = Some(TaskGraph::new(vec![
        Subtask::new("s1", "Search flights"),
        Subtask::new("s2", "Book hotel").with_dependencies(["s1"]),
    ]));
    snapshot.subtask_states.insert(
        "s1".into(),
        SubtaskState::Completed {
            result: result("s1", "Found flights"),
        },
    );
    snapshot
        .subtask_states
        .insert("s2".into(), SubtaskState::Pending);
    snapshot.pruned.insert("s3".into(), "duplicate of s1".into());
    snapshot.metrics = Some(DelegationMetrics::new(
        3,
        1,
        2,
        500,
        1000,
        TimeBreakdown {
            analysis_ms: 10,
            synthesis_ms: 5,
            specialized_ms: 30,
        },
    ));

    let json = serde_json::to_string(&snapshot).unwrap();
    let parsed: ProgressSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, snapshot);

    let completed = parsed.completed_results();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].tool_calls[0].name, "web_search");
    assert!((parsed.metrics.unwrap().savings_percent - 50.0).abs() < f64::EPSILON);
}

// ---------------------------------------------------------------------------
// 6. Token counting and summarization defaults
// ---------------------------------------------------------------------------

#[tokio::test]
async fn default_counter_and_summarizer() {
    let counter = HeuristicTokenCounter;
    assert_eq!(counter.count("twelve chars"), 3);

    let text = "Lisbon is sunny in May. Flights are cheap. Hotels fill up fast.";
    let heavy = ExtractiveSummarizer
        .summarize(text, SummaryLevel::Heavy)
        .await
        .unwrap();
    assert_eq!(heavy, "Lisbon is sunny in May.");
}

// ---------------------------------------------------------------------------
// 7. Errors
// ---------------------------------------------------------------------------

#[test]
fn error_variants_display() {
    let cancelled = ConductorError::Cancelled {
        reason: Some("user abort".into()),
    };
    assert!(cancelled.is_cancellation());
    assert_eq!(cancelled.to_string(), "Cancelled: user abort");

    let io: ConductorError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(io.to_string().starts_with("IO error"));
    assert!(!io.is_cancellation());
}
