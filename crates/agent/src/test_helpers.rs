//! Shared test helpers for orchestrator tests.

use crate::emitter::ChainEvent;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thinkchain_core::error::ProviderError;
use thinkchain_core::message::Message;
use thinkchain_core::provider::{Connector, Endpoint, Provider, ProviderRequest, ProviderResponse};
use tokio::sync::mpsc;

/// A mock provider that replays scripted raw responses in order.
///
/// Every request is recorded. Once the script runs out it either fails with
/// `NotConfigured` or, with [`hang_when_exhausted`](Self::hang_when_exhausted),
/// never answers.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    hang: bool,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            hang: false,
        }
    }

    pub fn hang_when_exhausted(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();

        let text = match next {
            Some(result) => result?,
            None if self.hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                return Err(ProviderError::Network("unreachable".into()));
            }
            None => return Err(ProviderError::NotConfigured("script exhausted".into())),
        };

        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: None,
            model: request.model,
        })
    }
}

/// A connector that always hands out the same scripted provider.
pub struct ScriptedConnector {
    provider: Arc<ScriptedProvider>,
    connects: Mutex<usize>,
}

impl ScriptedConnector {
    pub fn new(provider: Arc<ScriptedProvider>) -> Self {
        Self {
            provider,
            connects: Mutex::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _endpoint: &Endpoint) -> Result<Arc<dyn Provider>, ProviderError> {
        *self.connects.lock().unwrap() += 1;
        Ok(self.provider.clone())
    }
}

/// A well-formed step object as the model would send it.
pub fn step_json(title: &str, content: &str, next_action: &str) -> String {
    serde_json::json!({
        "title": title,
        "content": content,
        "next_action": next_action,
    })
    .to_string()
}

/// Collect every event until the sender side is dropped.
pub async fn drain(mut rx: mpsc::Receiver<ChainEvent>) -> Vec<ChainEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
