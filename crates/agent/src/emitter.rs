//! Chain-level streaming events and the ordered channel they travel on.
//!
//! Event kinds:
//! - `step`         one reasoning step
//! - `final_answer` the concluding answer
//! - `error`        the session could not run
//! - `close`        terminal summary, always last and always exactly once
//!
//! On the `/api/generate` SSE stream only `close` is a named event. The other
//! kinds travel as plain `data:` frames, which `EventSource.onmessage`
//! receives; clients tell them apart by their payload fields.

use serde::{Deserialize, Serialize};
use std::future::Future;
use thinkchain_core::step::StepRecord;
use tokio::sync::mpsc;

/// Label carried in the `step` field of the concluding answer.
pub const FINAL_ANSWER_LABEL: &str = "Final Answer";

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The model signalled `final_answer`
    FinalAnswer,
    /// The step budget ran out
    StepLimit,
    /// Too many consecutive unparseable steps
    ParseFailures,
    /// A remote call failed after the first step
    StepFailed,
    /// Validation, connection or first-turn failure, or client disconnect
    Aborted,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinalAnswer => "final_answer",
            Self::StepLimit => "step_limit",
            Self::ParseFailures => "parse_failures",
            Self::StepFailed => "step_failed",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    #[serde(flatten)]
    pub record: StepRecord,
    pub step: u32,
    /// Seconds spent on this turn
    pub thinking_time: f64,
    pub total_thinking_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswerEvent {
    #[serde(flatten)]
    pub record: StepRecord,
    /// Always [`FINAL_ANSWER_LABEL`]
    pub step: String,
    pub thinking_time: f64,
    pub total_thinking_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneEvent {
    pub total_thinking_time: f64,
    pub steps: u32,
    pub reason: TerminationReason,
}

/// Events emitted by the orchestrator during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    Step(StepEvent),
    FinalAnswer(FinalAnswerEvent),
    Error(ErrorEvent),
    Done(DoneEvent),
}

impl ChainEvent {
    pub fn step(record: &StepRecord, step: u32, thinking_time: f64, total_thinking_time: f64) -> Self {
        Self::Step(StepEvent {
            record: record.clone(),
            step,
            thinking_time,
            total_thinking_time,
        })
    }

    pub fn final_answer(record: &StepRecord, thinking_time: f64, total_thinking_time: f64) -> Self {
        Self::FinalAnswer(FinalAnswerEvent {
            record: record.clone(),
            step: FINAL_ANSWER_LABEL.into(),
            thinking_time,
            total_thinking_time,
        })
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorEvent {
            error: error.into(),
            message: message.into(),
        })
    }

    /// Kind of this event; the terminal summary is `close`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::FinalAnswer(_) => "final_answer",
            Self::Error(_) => "error",
            Self::Done(_) => "close",
        }
    }

    /// Name for the SSE `event:` line, `None` for an unnamed message frame.
    pub fn sse_event_name(&self) -> Option<&'static str> {
        match self {
            Self::Done(_) => Some("close"),
            Self::Step(_) | Self::FinalAnswer(_) | Self::Error(_) => None,
        }
    }

    /// The SSE `data:` payload: the event body without the `type` tag.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Step(e) => serde_json::to_string(e),
            Self::FinalAnswer(e) => serde_json::to_string(e),
            Self::Error(e) => serde_json::to_string(e),
            Self::Done(e) => serde_json::to_string(e),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// The receiving side went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event receiver disconnected")]
pub struct Disconnected;

/// Single writer over the ordered event channel of one session.
///
/// [`close`](Self::close) consumes the emitter, so the `close` event can be
/// sent at most once.
#[derive(Debug)]
pub struct StreamEmitter {
    tx: mpsc::Sender<ChainEvent>,
}

impl StreamEmitter {
    pub fn new(tx: mpsc::Sender<ChainEvent>) -> Self {
        Self { tx }
    }

    /// A connected emitter/receiver pair.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ChainEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: ChainEvent) -> Result<(), Disconnected> {
        self.tx.send(event).await.map_err(|_| Disconnected)
    }

    pub async fn close(self, summary: DoneEvent) -> Result<(), Disconnected> {
        self.emit(ChainEvent::Done(summary)).await
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the receiver is dropped.
    pub async fn cancelled(&self) {
        self.tx.closed().await
    }

    /// Run `fut` unless the receiver disconnects first, in which case `fut`
    /// is dropped.
    pub async fn unless_disconnected<F: Future>(&self, fut: F) -> Result<F::Output, Disconnected> {
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(Disconnected),
        }
    }
}
