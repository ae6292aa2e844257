//! Per-request session state, exclusively owned by one orchestrator run.

use std::time::Duration;
use thinkchain_core::message::{Conversation, ConversationId, Message};
use thinkchain_core::step::StepRecord;

/// Mutable bookkeeping of one reasoning chain.
#[derive(Debug)]
pub struct Session {
    pub id: ConversationId,
    pub conversation: Conversation,
    /// Steps emitted so far (1-based index of the last step)
    pub step_count: u32,
    pub max_steps: u32,
    pub total_elapsed: Duration,
    pub consecutive_parse_failures: u32,
}

impl Session {
    pub fn new(system_prompt: impl Into<String>, max_steps: u32) -> Self {
        let conversation = Conversation::new(system_prompt);
        Self {
            id: conversation.id.clone(),
            conversation,
            step_count: 0,
            max_steps,
            total_elapsed: Duration::ZERO,
            consecutive_parse_failures: 0,
        }
    }

    /// Add the user query and, optionally, the assistant priming turn. These
    /// survive history compaction.
    pub fn seed(&mut self, query: &str, priming: Option<&str>) {
        self.conversation.push(Message::user(query));
        if let Some(ack) = priming {
            self.conversation.push(Message::assistant(ack));
        }
        self.conversation.seal_seed();
    }

    /// Append `record` as the assistant turn and account for it. Returns the
    /// step index.
    pub fn record_step(&mut self, record: &StepRecord, elapsed: Duration) -> u32 {
        self.conversation.push(Message::assistant(record.to_json()));
        self.step_count += 1;
        self.total_elapsed += elapsed;
        if record.is_parse_fallback() {
            self.consecutive_parse_failures += 1;
        } else {
            self.consecutive_parse_failures = 0;
        }
        self.step_count
    }

    pub fn add_elapsed(&mut self, elapsed: Duration) {
        self.total_elapsed += elapsed;
    }

    pub fn budget_exhausted(&self) -> bool {
        self.step_count >= self.max_steps
    }

    pub fn total_thinking_secs(&self) -> f64 {
        self.total_elapsed.as_secs_f64()
    }
}
