//! End-to-end integration tests for the ThinkChain reasoning pipeline.
//!
//! These tests drive the full path from an inbound request to the streamed
//! events: validation, the retrying caller, the response parser, the
//! orchestrator state machine, and the SSE gateway.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use thinkchain_agent::{ChainEvent, ChainRequest, StepOrchestrator, StreamEmitter, TerminationReason};
use thinkchain_config::{ChainConfig, ChainMode, GatewayConfig};
use thinkchain_core::error::ProviderError;
use thinkchain_core::message::{Message, Role};
use thinkchain_core::provider::{Connector, Endpoint, Provider, ProviderRequest, ProviderResponse};
use thinkchain_gateway::{GatewayState, build_router};
use tower::ServiceExt;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted raw texts in sequence.
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ProviderRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(result) => result?,
            None => panic!("ScriptedProvider exhausted after {} calls", self.calls()),
        };
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: None,
            model: request.model,
        })
    }
}

struct ScriptedConnector(Arc<ScriptedProvider>);

impl Connector for ScriptedConnector {
    fn connect(&self, _endpoint: &Endpoint) -> Result<Arc<dyn Provider>, ProviderError> {
        Ok(self.0.clone())
    }
}

fn orchestrator(provider: &Arc<ScriptedProvider>, config: ChainConfig) -> Arc<StepOrchestrator> {
    Arc::new(StepOrchestrator::new(
        Arc::new(ScriptedConnector(provider.clone())),
        config,
    ))
}

fn step(title: &str, content: &str, next_action: &str) -> String {
    serde_json::json!({ "title": title, "content": content, "next_action": next_action }).to_string()
}

fn request(mode: ChainMode) -> ChainRequest {
    ChainRequest {
        query: "How many r's are in strawberry?".into(),
        api_key: "sk-e2e".into(),
        model: "gpt-4o".into(),
        base_url: "https://api.example.com/v1".into(),
        mode,
    }
}

async fn collect(orchestrator: &StepOrchestrator, req: ChainRequest) -> Vec<ChainEvent> {
    let (emitter, mut rx) = StreamEmitter::channel(64);
    orchestrator.run(req, emitter).await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Split an SSE body into `(event, data)` pairs. Unnamed frames are
/// `message` events, as `EventSource` dispatches them.
fn parse_sse(body: &str) -> Vec<(String, serde_json::Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut name = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(v) = line.strip_prefix("event: ") {
                    name = Some(v.to_string());
                } else if let Some(v) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(v).ok();
                }
            }
            Some((name.unwrap_or_else(|| "message".to_string()), data?))
        })
        .collect()
}

// ── Orchestrator pipeline ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_messy_model_output_becomes_clean_steps() {
    let provider = ScriptedProvider::new(vec![
        Ok(step("Spell it out", "s-t-r-a-w-b-e-r-r-y", "continue")),
        Ok(format!(
            "Sure! Here is my next step:\n```json\n{}\n```\nHope that helps.",
            step("Count", "r appears at 3, 8 and 9", "continue")
        )),
        Ok(r#"{"title": "Verify", "content": "Three r's", "next_action": " Final_Answer "}"#.into()),
        Ok(step("Answer", "There are 3 r's in strawberry", "final_answer")),
    ]);
    let orch = orchestrator(&provider, ChainConfig::default());

    let events = collect(&orch, request(ChainMode::Full)).await;

    let titles: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ChainEvent::Step(s) => Some((s.step, s.record.title.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        titles,
        vec![
            (1, "Spell it out".to_string()),
            (2, "Count".to_string()),
            (3, "Verify".to_string()),
        ]
    );

    match &events[3] {
        ChainEvent::FinalAnswer(f) => assert_eq!(f.record.content, "There are 3 r's in strawberry"),
        other => panic!("expected final answer, got {other:?}"),
    }
    match events.last() {
        Some(ChainEvent::Done(done)) => {
            assert_eq!(done.steps, 3);
            assert_eq!(done.reason, TerminationReason::FinalAnswer);
        }
        other => panic!("expected close, got {other:?}"),
    }

    // The final call sees the whole reasoning history
    let last = provider.last_request();
    assert_eq!(last.max_tokens, Some(200));
    assert_eq!(last.messages[0].role, Role::System);
    assert!(last.messages.iter().any(|m| m.content.contains("\"Count\"")));
    assert!(last.messages.last().unwrap().content.contains("final answer"));
}

#[tokio::test(start_paused = true)]
async fn e2e_transient_outage_is_retried_transparently() {
    let provider = ScriptedProvider::new(vec![
        Err(ProviderError::Network("connection reset".into())),
        Err(ProviderError::RateLimited { retry_after_secs: 1 }),
        Ok(step("Only step", "Three", "final_answer")),
        Ok(step("Answer", "3", "final_answer")),
    ]);
    let orch = orchestrator(&provider, ChainConfig::default());

    let events = collect(&orch, request(ChainMode::Full)).await;

    assert_eq!(provider.calls(), 4);
    assert!(!events.iter().any(|e| matches!(e, ChainEvent::Error(_))));
    match &events[0] {
        ChainEvent::Step(s) => {
            assert_eq!(s.step, 1);
            // Two backoff pauses are part of the turn's thinking time
            assert!(s.thinking_time >= 2.0);
        }
        other => panic!("expected step, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn e2e_constrained_mode_caps_steps_and_totals_are_monotonic() {
    let mut script: Vec<Result<String, ProviderError>> = (0..10)
        .map(|i| Ok(step(&format!("Step {i}"), "still going", "continue")))
        .collect();
    script.push(Ok(step("Answer", "done", "final_answer")));
    let provider = ScriptedProvider::new(script);
    let orch = orchestrator(&provider, ChainConfig::default());

    let events = collect(&orch, request(ChainMode::Constrained)).await;

    let mut last_total = 0.0;
    let mut count = 0;
    for event in &events {
        if let ChainEvent::Step(s) = event {
            count += 1;
            assert_eq!(s.step, count);
            assert!(s.total_thinking_time >= last_total);
            last_total = s.total_thinking_time;
        }
    }
    assert_eq!(count, 10);
    assert_eq!(provider.calls(), 11);
    match events.last() {
        Some(ChainEvent::Done(done)) => assert_eq!(done.reason, TerminationReason::StepLimit),
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn e2e_endpoint_rejection_on_first_turn_aborts() {
    let provider = ScriptedProvider::new(vec![Err(ProviderError::AuthenticationFailed(
        "invalid api key".into(),
    ))]);
    let orch = orchestrator(&provider, ChainConfig::default());

    let events = collect(&orch, request(ChainMode::Full)).await;

    assert_eq!(provider.calls(), 1);
    assert_eq!(events.len(), 2);
    match &events[0] {
        ChainEvent::Error(e) => {
            assert_eq!(e.error, "Failed to generate response");
            assert!(e.message.contains("401"));
        }
        other => panic!("expected error, got {other:?}"),
    }
    match &events[1] {
        ChainEvent::Done(done) => {
            assert_eq!(done.steps, 0);
            assert_eq!(done.reason, TerminationReason::Aborted);
        }
        other => panic!("expected close, got {other:?}"),
    }
}

// ── Gateway pipeline ────────────────────────────────────────────────────

fn app(provider: &Arc<ScriptedProvider>) -> axum::Router {
    let state = Arc::new(GatewayState {
        orchestrator: orchestrator(provider, ChainConfig::default()),
    });
    build_router(state, &GatewayConfig::default())
}

#[tokio::test]
async fn e2e_gateway_streams_chain_over_sse() {
    let provider = ScriptedProvider::new(vec![
        Ok(step("Spell it out", "s-t-r-a-w-b-e-r-r-y", "continue")),
        Ok("I think the count is three.".into()),
        Ok(step("Verify", "3", "final_answer")),
        Ok(step("Answer", "3", "final_answer")),
    ]);

    let body = serde_json::json!({
        "query": "How many r's are in strawberry?",
        "apiKey": "sk-e2e",
        "model": "gpt-4o",
        "baseUrl": "https://api.example.com"
    });
    let req = Request::builder()
        .method("POST")
        .uri("/api/generate")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app(&provider).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let frames = parse_sse(&String::from_utf8(bytes.to_vec()).unwrap());
    let names: Vec<_> = frames.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["message", "message", "message", "message", "close"]);

    assert_eq!(frames[1].1["title"], "Parsing Failed");
    assert_eq!(frames[1].1["content"], "I think the count is three.");
    assert_eq!(frames[1].1["step"], 2);
    assert_eq!(frames[3].1["step"], "Final Answer");
    assert_eq!(frames[4].1["steps"], 3);
    assert_eq!(frames[4].1["reason"], "final_answer");
}

#[tokio::test]
async fn e2e_gateway_rejects_incomplete_request_without_calling_endpoint() {
    let provider = ScriptedProvider::new(vec![]);

    let req = Request::builder()
        .uri("/api/generate?query=hello&apiKey=sk-e2e&model=gpt-4o")
        .body(Body::empty())
        .unwrap();

    let response = app(&provider).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["message"], "Missing required parameters");
    assert!(json["error"].as_str().unwrap().contains("baseUrl"));
    assert_eq!(provider.calls(), 0);
}
