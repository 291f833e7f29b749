//! Conformance properties: transform caching, loop caps, replay
//! determinism, batch equivalence, exactly-once mediation, lifecycle
//! rules.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use atp_checkpoint::InMemoryCacheProvider;
use atp_core::executor::{ExecutionOutcome, ExecutorConfig, SandboxExecutor, SubmitRequest};
use atp_core::{ContinuationRequest, ExecutionHints, ExecutionStatus, LimitOverrides, PauseKind};

fn executor_with(provider: Arc<InMemoryCacheProvider>) -> SandboxExecutor {
    SandboxExecutor::new(provider, ExecutorConfig::default())
}

fn executor() -> SandboxExecutor {
    executor_with(Arc::new(InMemoryCacheProvider::new()))
}

fn answers(pairs: &[(u64, Value)]) -> HashMap<u64, Value> {
    pairs.iter().cloned().collect()
}

fn completed(outcome: ExecutionOutcome) -> Value {
    match outcome {
        ExecutionOutcome::Completed { result, .. } => result,
        ExecutionOutcome::Paused { continuation } => {
            panic!("expected completion, paused at {:?}", continuation)
        }
    }
}

fn paused(outcome: ExecutionOutcome) -> ContinuationRequest {
    match outcome {
        ExecutionOutcome::Paused { continuation } => continuation,
        ExecutionOutcome::Completed { result, .. } => {
            panic!("expected pause, completed with {:?}", result)
        }
    }
}

#[tokio::test]
async fn identical_code_hits_the_transform_cache() {
    let executor = executor();
    let code = "return 40 + 2;";

    completed(executor.submit(SubmitRequest::new(code)).await.unwrap());
    completed(executor.submit(SubmitRequest::new(code)).await.unwrap());

    assert_eq!(executor.transforms_computed(), 1);
    assert!(executor.transform_hits() >= 1);
}

#[tokio::test]
async fn infinite_loop_is_cut_by_the_iteration_cap() {
    let executor = executor();
    let request = SubmitRequest {
        limits: Some(LimitOverrides {
            max_loop_iterations: Some(50),
            ..Default::default()
        }),
        ..SubmitRequest::new("while (true) {}")
    };

    let error = executor.submit(request).await.unwrap_err();
    assert_eq!(error.kind(), "infinite-loop");
}

#[tokio::test]
async fn parse_failure_reports_position_and_never_runs() {
    let executor = executor();
    let error = executor
        .submit(SubmitRequest::new("let = 3;"))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "parse-error");
    assert!(error.to_string().contains("line 1"));
}

#[tokio::test]
async fn mediated_callbacks_fire_exactly_once_per_site() {
    let executor = executor();
    let code = r#"
        const outs = [];
        for (const x of [1, 2, 3]) {
            const r = await atp.tools.invoke("count", {x: x});
            outs.push(r);
        }
        return outs;
    "#;

    // across all attempts combined, the client is asked for exactly
    // three tool calls, one per element, in program order
    let c1 = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    let id = c1.execution_id.clone();
    assert_eq!(c1.payload["input"], json!({"x": 1}));
    assert_eq!(c1.sequence_number, 1);

    let c2 = paused(executor.resume(&id, answers(&[(1, json!("a"))])).await.unwrap());
    assert_eq!(c2.payload["input"], json!({"x": 2}));
    assert_eq!(c2.sequence_number, 2);

    let c3 = paused(executor.resume(&id, answers(&[(2, json!("b"))])).await.unwrap());
    assert_eq!(c3.payload["input"], json!({"x": 3}));
    assert_eq!(c3.sequence_number, 3);

    let outcome = executor.resume(&id, answers(&[(3, json!("c"))])).await.unwrap();
    assert_eq!(completed(outcome), json!(["a", "b", "c"]));
}

#[tokio::test]
async fn replay_is_deterministic_across_a_restart() {
    let provider = Arc::new(InMemoryCacheProvider::new());
    let code = r#"return await [1, 2, 3].map(async x => await atp.llm.complete({prompt: String(x)}));"#;

    let first = executor_with(provider.clone());
    let request = SubmitRequest {
        execution_id: Some("restart-1".to_string()),
        ..SubmitRequest::new(code)
    };
    let c1 = paused(first.submit(request).await.unwrap());
    assert_eq!(c1.payload, json!({"prompt": "1"}));
    let c2 = paused(
        first
            .resume("restart-1", answers(&[(1, json!("a"))]))
            .await
            .unwrap(),
    );
    assert_eq!(c2.payload, json!({"prompt": "2"}));
    drop(first);

    // a fresh executor over the same durable store continues exactly
    // where the old process stopped
    let second = executor_with(provider);
    let c3 = paused(
        second
            .resume("restart-1", answers(&[(2, json!("b"))]))
            .await
            .unwrap(),
    );
    assert_eq!(c3.payload, json!({"prompt": "3"}));
    assert_eq!(c3.sequence_number, 3);

    let outcome = second
        .resume("restart-1", answers(&[(3, json!("c"))]))
        .await
        .unwrap();
    assert_eq!(completed(outcome), json!(["a", "b", "c"]));
}

#[tokio::test]
async fn batched_and_sequential_execution_agree() {
    let code = r#"return await [1, 2, 3].map(async x => await atp.llm.complete({prompt: String(x)}));"#;
    let replies = [json!("A"), json!("B"), json!("C")];

    // sequential (default threshold is above the input length)
    let sequential = executor();
    let c = paused(sequential.submit(SubmitRequest::new(code)).await.unwrap());
    let id = c.execution_id.clone();
    let mut outcome = ExecutionOutcome::Paused { continuation: c };
    for (i, reply) in replies.iter().enumerate() {
        outcome = sequential
            .resume(&id, answers(&[(i as u64 + 1, reply.clone())]))
            .await
            .unwrap();
    }
    let sequential_result = completed(outcome);

    // batched (threshold lowered to the input length)
    let batched = executor();
    let request = SubmitRequest {
        hints: Some(ExecutionHints {
            batch_threshold: Some(3),
        }),
        ..SubmitRequest::new(code)
    };
    let c = paused(batched.submit(request).await.unwrap());
    assert_eq!(c.kind, PauseKind::Batch);
    let outcome = batched
        .resume(
            &c.execution_id,
            answers(&[(1, Value::Array(replies.to_vec()))]),
        )
        .await
        .unwrap();
    let batched_result = completed(outcome);

    assert_eq!(sequential_result, batched_result);
    assert_eq!(batched_result, json!(["A", "B", "C"]));
}

#[tokio::test]
async fn llm_call_budget_is_enforced() {
    let executor = executor();
    let code = r#"return await [1, 2, 3].map(async x => await atp.llm.complete({prompt: String(x)}));"#;
    let request = SubmitRequest {
        limits: Some(LimitOverrides {
            max_llm_calls: Some(2),
            ..Default::default()
        }),
        ..SubmitRequest::new(code)
    };

    let c1 = paused(executor.submit(request).await.unwrap());
    let id = c1.execution_id.clone();
    paused(executor.resume(&id, answers(&[(1, json!("a"))])).await.unwrap());
    let error = executor
        .resume(&id, answers(&[(2, json!("b"))]))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "limit-exceeded");
}

#[tokio::test]
async fn cancelled_executions_refuse_resume() {
    let executor = executor();
    let c = paused(
        executor
            .submit(SubmitRequest::new(
                r#"return await atp.llm.complete({prompt: "x"});"#,
            ))
            .await
            .unwrap(),
    );
    let id = c.execution_id.clone();

    executor.cancel(&id).await.unwrap();
    let status = executor.status(&id).await.unwrap();
    assert_eq!(status.status, ExecutionStatus::Failed);
    assert_eq!(status.error.as_ref().unwrap().kind, "cancelled");

    let error = executor
        .resume(&id, answers(&[(1, json!("late"))]))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "invalid-state");

    // cancelling again is also refused
    assert!(executor.cancel(&id).await.is_err());
}

#[tokio::test]
async fn paused_executions_expire_after_their_ttl() {
    let executor = executor();
    let request = SubmitRequest {
        limits: Some(LimitOverrides {
            paused_ttl_seconds: Some(0),
            ..Default::default()
        }),
        ..SubmitRequest::new(r#"return await atp.llm.complete({prompt: "x"});"#)
    };
    let c = paused(executor.submit(request).await.unwrap());
    let id = c.execution_id.clone();

    let expired = executor.sweep_expired();
    assert!(expired.contains(&id));

    let status = executor.status(&id).await.unwrap();
    assert_eq!(status.status, ExecutionStatus::Failed);
    assert_eq!(status.error.as_ref().unwrap().kind, "expired");

    let error = executor
        .resume(&id, answers(&[(1, json!("late"))]))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "invalid-state");
}

#[tokio::test]
async fn resubmitting_different_code_for_an_id_is_refused() {
    let executor = executor();
    let request = SubmitRequest {
        execution_id: Some("pinned".to_string()),
        ..SubmitRequest::new(r#"return await atp.llm.complete({prompt: "x"});"#)
    };
    paused(executor.submit(request).await.unwrap());

    let request = SubmitRequest {
        execution_id: Some("pinned".to_string()),
        ..SubmitRequest::new("return 2;")
    };
    let error = executor.submit(request).await.unwrap_err();
    assert_eq!(error.kind(), "code-mismatch");
}

#[tokio::test]
async fn resubmitting_identical_code_reattaches() {
    let executor = executor();
    let code = r#"return await atp.llm.complete({prompt: "x"});"#;
    let request = SubmitRequest {
        execution_id: Some("idem".to_string()),
        ..SubmitRequest::new(code)
    };
    let c1 = paused(executor.submit(request.clone()).await.unwrap());

    // same id, same code: the pause is simply re-issued
    let c2 = paused(executor.submit(request).await.unwrap());
    assert_eq!(c1.sequence_number, c2.sequence_number);
    assert_eq!(c1.payload, c2.payload);
}

#[tokio::test]
async fn unknown_execution_is_not_found() {
    let executor = executor();
    let error = executor
        .resume("nope", answers(&[(1, json!("x"))]))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "not-found");
    assert!(executor.status("nope").await.is_err());
}

#[tokio::test]
async fn nested_loops_replay_correctly() {
    let executor = executor();
    let code = r#"
        const out = [];
        for (const a of [1, 2]) {
            for (const b of [10, 20]) {
                const v = await atp.tools.invoke("mul", {a: a, b: b});
                out.push(v);
            }
        }
        return out;
    "#;

    let mut continuation = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    let id = continuation.execution_id.clone();
    let expected_inputs = [
        json!({"a": 1, "b": 10}),
        json!({"a": 1, "b": 20}),
        json!({"a": 2, "b": 10}),
        json!({"a": 2, "b": 20}),
    ];
    for (i, expected) in expected_inputs.iter().enumerate() {
        assert_eq!(&continuation.payload["input"], expected);
        assert_eq!(continuation.sequence_number, i as u64 + 1);
        let outcome = executor
            .resume(&id, answers(&[(i as u64 + 1, json!(i * 100))]))
            .await
            .unwrap();
        if i + 1 < expected_inputs.len() {
            continuation = paused(outcome);
        } else {
            assert_eq!(completed(outcome), json!([0, 100, 200, 300]));
        }
    }
}

#[tokio::test]
async fn status_reports_transform_metadata() {
    let executor = executor();
    let code = r#"
        let s = 0;
        for (const x of [1, 2]) {
            const v = await atp.llm.complete({prompt: String(x)});
            s += Number(v);
        }
        return s;
    "#;
    let c = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    let status = executor.status(&c.execution_id).await.unwrap();
    let transform = status.transform.unwrap();
    assert_eq!(transform.loops_transformed, 1);
    assert!(transform.patterns.contains(&"for-of".to_string()));
}
