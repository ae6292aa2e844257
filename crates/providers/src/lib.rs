//! LLM provider implementations for ThinkChain.
//!
//! All providers implement the `thinkchain_core::Provider` trait. The
//! [`RetryingCaller`] wraps a provider with the timeout and retry policy used
//! for every turn of a reasoning chain.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::{OpenAiCompatConnector, OpenAiCompatProvider};
pub use retry::{RetryOutcome, RetryPolicy, RetryingCaller};
