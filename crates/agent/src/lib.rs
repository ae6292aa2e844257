//! The reasoning-chain engine of ThinkChain.
//!
//! A chain follows a **Step → Append → Emit** cycle:
//!
//! 1. **Seed** the conversation with the system prompt and the query
//! 2. **Call** the endpoint through a [`RetryingCaller`](thinkchain_providers::RetryingCaller)
//! 3. **Parse** the raw text into a structured step
//! 4. **Append** the step to the conversation and **emit** it to the caller
//! 5. **Finalize** with one bounded call for the conclusive answer
//!
//! The loop ends on `final_answer`, when the step budget is spent, or after
//! too many unparseable steps in a row.

pub mod emitter;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use emitter::{ChainEvent, Disconnected, DoneEvent, StreamEmitter, TerminationReason};
pub use orchestrator::{ChainRequest, ChainSummary, StepOrchestrator};
pub use parser::ResponseParser;
pub use session::Session;
