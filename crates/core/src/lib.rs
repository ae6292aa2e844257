//! # ThinkChain Core
//!
//! Domain types, traits, and error definitions for the ThinkChain
//! reasoning-chain runtime. This crate has **no HTTP or runtime framework
//! dependencies**: it defines the domain model that the provider, agent and
//! gateway crates implement against.

pub mod error;
pub mod message;
pub mod provider;
pub mod step;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ValidationError};
pub use message::{Conversation, ConversationId, Message, Role};
pub use provider::{Connector, Endpoint, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use step::{NextAction, StepRecord};
