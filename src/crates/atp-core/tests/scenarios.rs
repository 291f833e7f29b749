//! End-to-end submit/resume scenarios over the full engine stack.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use atp_checkpoint::InMemoryCacheProvider;
use atp_core::executor::{ExecutionOutcome, ExecutorConfig, SandboxExecutor, SubmitRequest};
use atp_core::{ContinuationRequest, ExecutionHints, PauseKind};

fn executor() -> SandboxExecutor {
    SandboxExecutor::new(
        Arc::new(InMemoryCacheProvider::new()),
        ExecutorConfig::default(),
    )
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
async fn pure_program_completes_immediately() {
    let executor = executor();
    let outcome = executor
        .submit(SubmitRequest::new("return 1 + 2;"))
        .await
        .unwrap();
    assert_eq!(completed(outcome), json!(3));
}

#[tokio::test]
async fn single_llm_pause_round_trip() {
    let executor = executor();
    let outcome = executor
        .submit(SubmitRequest::new(
            r#"return await atp.llm.complete({prompt: "hi"});"#,
        ))
        .await
        .unwrap();

    let continuation = paused(outcome);
    assert_eq!(continuation.kind, PauseKind::Llm);
    assert_eq!(continuation.operation, "complete");
    assert_eq!(continuation.sequence_number, 1);
    assert_eq!(continuation.payload, json!({"prompt": "hi"}));
    assert!(continuation.resume_url.ends_with("/resume"));

    let outcome = executor
        .resume(&continuation.execution_id, answers(&[(1, json!("hello"))]))
        .await
        .unwrap();
    assert_eq!(completed(outcome), json!("hello"));
}

#[tokio::test]
async fn sequential_map_pauses_once_per_element() {
    let executor = executor();
    let code = r#"return await [1, 2, 3].map(async x => await atp.llm.complete({prompt: String(x)}));"#;

    let c1 = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    let id = c1.execution_id.clone();
    assert_eq!(c1.kind, PauseKind::Llm);
    assert_eq!(c1.sequence_number, 1);
    assert_eq!(c1.payload, json!({"prompt": "1"}));

    let c2 = paused(executor.resume(&id, answers(&[(1, json!("a"))])).await.unwrap());
    assert_eq!(c2.sequence_number, 2);
    assert_eq!(c2.payload, json!({"prompt": "2"}));

    let c3 = paused(executor.resume(&id, answers(&[(2, json!("b"))])).await.unwrap());
    assert_eq!(c3.sequence_number, 3);
    assert_eq!(c3.payload, json!({"prompt": "3"}));

    let outcome = executor.resume(&id, answers(&[(3, json!("c"))])).await.unwrap();
    assert_eq!(completed(outcome), json!(["a", "b", "c"]));
}

#[tokio::test]
async fn batched_map_fuses_into_one_pause() {
    let executor = executor();
    let code = r#"return await [1, 2, 3].map(async x => await atp.llm.complete({prompt: String(x)}));"#;
    let request = SubmitRequest {
        hints: Some(ExecutionHints {
            batch_threshold: Some(3),
        }),
        ..SubmitRequest::new(code)
    };

    let continuation = paused(executor.submit(request).await.unwrap());
    assert_eq!(continuation.kind, PauseKind::Batch);
    assert_eq!(continuation.operation, "parallel");
    assert_eq!(continuation.sequence_number, 1);

    let calls = continuation.payload["calls"].as_array().unwrap();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0]["payload"], json!({"prompt": "1"}));
    assert_eq!(calls[1]["payload"], json!({"prompt": "2"}));
    assert_eq!(calls[2]["payload"], json!({"prompt": "3"}));
    // sub-calls occupy the consecutive block after the batch itself
    assert_eq!(calls[0]["sequenceNumber"], json!(2));
    assert_eq!(calls[2]["sequenceNumber"], json!(4));
    assert_eq!(continuation.payload["parallelId"], json!("p1"));

    let outcome = executor
        .resume(
            &continuation.execution_id,
            answers(&[(1, json!(["v1", "v2", "v3"]))]),
        )
        .await
        .unwrap();
    assert_eq!(completed(outcome), json!(["v1", "v2", "v3"]));
}

#[tokio::test]
async fn loop_with_interleaved_logic_accumulates() {
    let executor = executor();
    let code = r#"
        let s = 0;
        for (const x of [10, 20, 30]) {
            const v = await atp.llm.complete({prompt: String(x)});
            s += Number(v);
        }
        return s;
    "#;

    let c1 = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    let id = c1.execution_id.clone();
    assert_eq!(c1.payload, json!({"prompt": "10"}));

    let c2 = paused(executor.resume(&id, answers(&[(1, json!("1"))])).await.unwrap());
    assert_eq!(c2.payload, json!({"prompt": "20"}));

    let c3 = paused(executor.resume(&id, answers(&[(2, json!("2"))])).await.unwrap());
    assert_eq!(c3.payload, json!({"prompt": "30"}));

    let outcome = executor.resume(&id, answers(&[(3, json!("3"))])).await.unwrap();
    assert_eq!(completed(outcome), json!(6));
}

#[tokio::test]
async fn uncaught_throw_fails_with_user_error() {
    let executor = executor();
    let error = executor
        .submit(SubmitRequest::new(r#"throw new Error("boom");"#))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "user-error");
    assert_eq!(error.to_string(), "boom");
}

#[tokio::test]
async fn pause_inside_try_is_not_catchable() {
    let executor = executor();
    let code = r#"
        try {
            const v = await atp.llm.complete({prompt: "x"});
            return v;
        } catch (e) {
            return "caught";
        }
    "#;

    let continuation = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    assert_eq!(continuation.kind, PauseKind::Llm);

    let outcome = executor
        .resume(&continuation.execution_id, answers(&[(1, json!("ok"))]))
        .await
        .unwrap();
    assert_eq!(completed(outcome), json!("ok"));
}

#[tokio::test]
async fn pause_carries_iteration_index_in_payload_context() {
    let executor = executor();
    let code = r#"return await ["a", "b"].map(async x => await atp.llm.complete({prompt: x}));"#;

    let c1 = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    let id = c1.execution_id.clone();
    let c2 = paused(executor.resume(&id, answers(&[(1, json!("ra"))])).await.unwrap());
    // second element pauses at the second sequence number
    assert_eq!(c2.sequence_number, 2);
    assert_eq!(c2.payload, json!({"prompt": "b"}));
}

#[tokio::test]
async fn promise_all_pauses_per_slot_in_order() {
    let executor = executor();
    let code = r#"return await Promise.all([atp.llm.complete({prompt: "a"}), atp.llm.complete({prompt: "b"})]);"#;

    let c1 = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    let id = c1.execution_id.clone();
    assert_eq!(c1.payload, json!({"prompt": "a"}));

    let c2 = paused(executor.resume(&id, answers(&[(1, json!("ra"))])).await.unwrap());
    assert_eq!(c2.payload, json!({"prompt": "b"}));

    let outcome = executor.resume(&id, answers(&[(2, json!("rb"))])).await.unwrap();
    assert_eq!(completed(outcome), json!(["ra", "rb"]));
}

#[tokio::test]
async fn approval_embedding_and_tool_round_trips() {
    let executor = executor();

    // approval
    let code = r#"return await atp.approval.request("deploy?", {service: "api"});"#;
    let c = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    assert_eq!(c.kind, PauseKind::Approval);
    assert_eq!(c.payload["message"], json!("deploy?"));
    assert_eq!(c.payload["context"], json!({"service": "api"}));
    let outcome = executor
        .resume(
            &c.execution_id,
            answers(&[(1, json!({"approved": true, "response": "go"}))]),
        )
        .await
        .unwrap();
    assert_eq!(completed(outcome)["approved"], json!(true));

    // embedding
    let code = r#"return await atp.embedding.embed("hello world");"#;
    let c = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    assert_eq!(c.kind, PauseKind::Embedding);
    assert_eq!(c.payload["text"], json!("hello world"));
    let outcome = executor
        .resume(&c.execution_id, answers(&[(1, json!([0.25, 0.5]))]))
        .await
        .unwrap();
    assert_eq!(completed(outcome), json!([0.25, 0.5]));

    // tool
    let code = r#"return await atp.tools.invoke("search", {q: "rust"});"#;
    let c = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());
    assert_eq!(c.kind, PauseKind::Tool);
    assert_eq!(c.payload, json!({"toolName": "search", "input": {"q": "rust"}}));
    let outcome = executor
        .resume(&c.execution_id, answers(&[(1, json!({"hits": []}))]))
        .await
        .unwrap();
    assert_eq!(completed(outcome), json!({"hits": []}));
}

#[tokio::test]
async fn cache_api_is_served_without_pausing() {
    let executor = executor();
    let code = r#"
        await atp.cache.set("session", {count: 7});
        return await atp.cache.get("session");
    "#;
    let outcome = executor.submit(SubmitRequest::new(code)).await.unwrap();
    assert_eq!(completed(outcome), json!({"count": 7}));

    // a separate execution sees the same durable entry
    let outcome = executor
        .submit(SubmitRequest::new(r#"return await atp.cache.get("session");"#))
        .await
        .unwrap();
    assert_eq!(completed(outcome), json!({"count": 7}));
}

#[tokio::test]
async fn progress_reports_surface_in_status() {
    let executor = executor();
    let code = r#"
        atp.progress.report("warming up", 10);
        return await atp.llm.complete({prompt: "go"});
    "#;
    let continuation = paused(executor.submit(SubmitRequest::new(code)).await.unwrap());

    let status = executor.status(&continuation.execution_id).await.unwrap();
    assert_eq!(status.progress.len(), 1);
    assert_eq!(status.progress[0].message, "warming up");
    assert_eq!(status.progress[0].percent, Some(10.0));
    assert!(status.continuation.is_some());
}
