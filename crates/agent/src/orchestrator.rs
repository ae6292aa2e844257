//! The step orchestrator: drives one reasoning chain from validation to the
//! terminal event.
//!
//! Lifecycle of a session:
//!
//! 1. **Init**: validate the request, connect the provider, seed the
//!    conversation (system prompt, query, priming acknowledgment)
//! 2. **Stepping**: call the endpoint, parse, append, emit; repeat until
//!    `final_answer`, the step budget, or the parse-failure limit
//! 3. **Finalizing**: ask for the conclusive answer with its own budget
//! 4. **Done**: emit the `close` summary
//!
//! Failures before any step was produced abort the session with an `error`
//! event; later failures turn into synthetic steps so the caller still gets
//! a final answer. Every remote call is raced against the receiver going
//! away.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thinkchain_config::{ChainConfig, ChainMode};
use thinkchain_core::error::ValidationError;
use thinkchain_core::message::{ConversationId, Message};
use thinkchain_core::provider::{Connector, Endpoint};
use thinkchain_core::step::{NextAction, StepRecord};
use thinkchain_providers::{RetryOutcome, RetryPolicy, RetryingCaller};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::emitter::{ChainEvent, Disconnected, DoneEvent, StreamEmitter, TerminationReason};
use crate::parser::ResponseParser;
use crate::prompts;
use crate::session::Session;

/// Capacity of the per-session event channel.
pub const EVENT_BUFFER: usize = 128;

/// Inbound parameters of one chain.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub mode: ChainMode,
}

impl std::fmt::Debug for ChainRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRequest")
            .field("query", &self.query)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("mode", &self.mode)
            .finish()
    }
}

impl ChainRequest {
    /// Check that every required field is present and the base URL is HTTP(S).
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("query", &self.query),
            ("apiKey", &self.api_key),
            ("model", &self.model),
            ("baseUrl", &self.base_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(name));
            }
        }

        let base_url = self.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ValidationError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            base_url: self.base_url.trim().to_string(),
            api_key: self.api_key.trim().to_string(),
        }
    }
}

/// What a finished session reports back to its driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSummary {
    pub session_id: ConversationId,
    pub steps: u32,
    pub total_thinking_time: f64,
    pub reason: TerminationReason,
}

impl ChainSummary {
    fn done_event(&self) -> DoneEvent {
        DoneEvent {
            total_thinking_time: self.total_thinking_time,
            steps: self.steps,
            reason: self.reason,
        }
    }
}

/// Why a session stopped before reaching `Done` normally.
enum Halt {
    Abort { error: &'static str, message: String },
    Disconnected,
}

impl From<Disconnected> for Halt {
    fn from(_: Disconnected) -> Self {
        Self::Disconnected
    }
}

/// Runs reasoning chains. Shared immutably between sessions.
pub struct StepOrchestrator {
    connector: Arc<dyn Connector>,
    config: ChainConfig,
    parser: ResponseParser,
}

impl StepOrchestrator {
    pub fn new(connector: Arc<dyn Connector>, config: ChainConfig) -> Self {
        let parser = ResponseParser::new(config.parse_mode);
        Self {
            connector,
            config,
            parser,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn system_prompt(&self) -> &str {
        self.config
            .system_prompt_override
            .as_deref()
            .unwrap_or(prompts::SYSTEM_PROMPT)
    }

    /// Start a session on its own task and return the event stream.
    pub fn spawn(self: &Arc<Self>, request: ChainRequest) -> mpsc::Receiver<ChainEvent> {
        let (emitter, rx) = StreamEmitter::channel(EVENT_BUFFER);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run(request, emitter).await;
        });
        rx
    }

    /// Drive one session to completion. The `close` event is the last thing
    /// emitted, unless the receiver disconnected.
    pub async fn run(&self, request: ChainRequest, emitter: StreamEmitter) -> ChainSummary {
        let max_steps = self.config.max_steps_for(request.mode);
        let mut session = Session::new(self.system_prompt(), max_steps);

        let reason = match self.execute(&request, &mut session, &emitter).await {
            Ok(reason) => reason,
            Err(Halt::Abort { error, message }) => {
                warn!(session_id = %session.id, error, %message, "Session aborted");
                match emitter.emit(ChainEvent::error(error, message)).await {
                    Ok(()) => TerminationReason::Aborted,
                    Err(Disconnected) => {
                        return Self::summary(&session, TerminationReason::Aborted);
                    }
                }
            }
            Err(Halt::Disconnected) => {
                info!(session_id = %session.id, steps = session.step_count, "Client disconnected, session cancelled");
                return Self::summary(&session, TerminationReason::Aborted);
            }
        };

        let summary = Self::summary(&session, reason);
        info!(
            session_id = %summary.session_id,
            steps = summary.steps,
            total_thinking_time = summary.total_thinking_time,
            reason = %summary.reason,
            "Session finished"
        );
        if emitter.close(summary.done_event()).await.is_err() {
            debug!(session_id = %summary.session_id, "Receiver gone before close event");
        }
        summary
    }

    fn summary(session: &Session, reason: TerminationReason) -> ChainSummary {
        ChainSummary {
            session_id: session.id.clone(),
            steps: session.step_count,
            total_thinking_time: session.total_thinking_secs(),
            reason,
        }
    }

    async fn execute(
        &self,
        request: &ChainRequest,
        session: &mut Session,
        emitter: &StreamEmitter,
    ) -> Result<TerminationReason, Halt> {
        // ── Init ──
        request.validate().map_err(|e| Halt::Abort {
            error: "Invalid request",
            message: e.to_string(),
        })?;

        let provider = self
            .connector
            .connect(&request.endpoint())
            .map_err(|e| Halt::Abort {
                error: "Failed to connect to endpoint",
                message: e.to_string(),
            })?;

        let caller = RetryingCaller::new(provider, request.model.trim(), RetryPolicy::from_config(&self.config))
            .with_temperature(self.config.temperature)
            .with_streaming(self.config.stream);

        let priming = self.config.prime_assistant.then_some(prompts::PRIMING_ACK);
        session.seed(request.query.trim(), priming);

        info!(
            session_id = %session.id,
            model = %request.model.trim(),
            max_steps = session.max_steps,
            "Session started"
        );

        // ── Stepping ──
        let reason = self.step_loop(&caller, session, emitter).await?;

        // ── Finalizing ──
        self.finalize(&caller, session, emitter).await?;

        Ok(reason)
    }

    async fn step_loop(
        &self,
        caller: &RetryingCaller,
        session: &mut Session,
        emitter: &StreamEmitter,
    ) -> Result<TerminationReason, Halt> {
        loop {
            if emitter.is_disconnected() {
                return Err(Halt::Disconnected);
            }

            let messages = session.conversation.windowed(self.config.history_window);
            let started = Instant::now();
            let outcome = emitter
                .unless_disconnected(caller.call(&messages, self.config.step_max_tokens))
                .await?;
            let elapsed = started.elapsed();

            let raw = match outcome {
                RetryOutcome::Success(raw) => raw,
                failure if session.step_count == 0 => {
                    return Err(Halt::Abort {
                        error: "Failed to generate response",
                        message: failure.detail(),
                    });
                }
                failure => {
                    let record = StepRecord::error(
                        format!("Failed to generate step. Error: {}", failure.detail()),
                        NextAction::FinalAnswer,
                    );
                    self.emit_step(session, emitter, &record, elapsed).await?;
                    return Ok(TerminationReason::StepFailed);
                }
            };

            let mut turn_time = elapsed;
            for record in self.parser.parse_turn(&raw) {
                self.emit_step(session, emitter, &record, turn_time).await?;
                turn_time = Duration::ZERO;

                if record.is_final() {
                    return Ok(TerminationReason::FinalAnswer);
                }
                if session.budget_exhausted() {
                    debug!(session_id = %session.id, steps = session.step_count, "Step budget exhausted");
                    return Ok(TerminationReason::StepLimit);
                }
                if session.consecutive_parse_failures >= self.config.parse_failure_limit {
                    warn!(
                        session_id = %session.id,
                        failures = session.consecutive_parse_failures,
                        "Too many unparseable steps, forcing final answer"
                    );
                    return Ok(TerminationReason::ParseFailures);
                }
            }

            session.conversation.push(Message::user(prompts::CONTINUE_PROMPT));
        }
    }

    async fn emit_step(
        &self,
        session: &mut Session,
        emitter: &StreamEmitter,
        record: &StepRecord,
        elapsed: Duration,
    ) -> Result<(), Halt> {
        let step = session.record_step(record, elapsed);
        debug!(
            session_id = %session.id,
            step,
            title = %record.title,
            next_action = %record.next_action,
            "Step recorded"
        );
        emitter
            .emit(ChainEvent::step(
                record,
                step,
                elapsed.as_secs_f64(),
                session.total_thinking_secs(),
            ))
            .await?;
        Ok(())
    }

    async fn finalize(
        &self,
        caller: &RetryingCaller,
        session: &mut Session,
        emitter: &StreamEmitter,
    ) -> Result<(), Halt> {
        session
            .conversation
            .push(Message::user(prompts::FINAL_ANSWER_PROMPT));

        let messages = session.conversation.windowed(self.config.history_window);
        let started = Instant::now();
        let outcome = emitter
            .unless_disconnected(caller.call(&messages, self.config.final_max_tokens))
            .await?;
        let elapsed = started.elapsed();

        let mut record = match outcome {
            RetryOutcome::Success(raw) => self.parser.parse(&raw),
            failure => {
                warn!(session_id = %session.id, error = %failure.detail(), "Final answer call failed");
                StepRecord::error(
                    format!("Failed to generate final answer. Error: {}", failure.detail()),
                    NextAction::FinalAnswer,
                )
            }
        };
        record.next_action = NextAction::FinalAnswer;

        session.add_elapsed(elapsed);
        session
            .conversation
            .push(Message::assistant(record.to_json()));

        emitter
            .emit(ChainEvent::final_answer(
                &record,
                elapsed.as_secs_f64(),
                session.total_thinking_secs(),
            ))
            .await?;
        Ok(())
    }
}
