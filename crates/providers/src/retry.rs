//! Bounded retry around a single provider call.
//!
//! Every attempt runs under a wall-clock timeout. Transient failures are
//! retried after a fixed backoff; anything retrying cannot fix is surfaced
//! immediately. The caller never sees an `Err`: exhaustion is reported as a
//! [`RetryOutcome`].

use std::sync::Arc;
use std::time::Duration;
use thinkchain_config::ChainConfig;
use thinkchain_core::error::ProviderError;
use thinkchain_core::message::Message;
use thinkchain_core::provider::{self, Provider, ProviderRequest};
use tracing::{debug, warn};

/// How many times to try, how long to wait between tries, and how long a
/// single try may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(55),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
            timeout: config.timeout(),
        }
    }
}

/// The result of a call after the retry budget is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Raw text of the first choice
    Success(String),
    /// The endpoint could not be reached, or the connection dropped
    TransportError(String),
    /// The endpoint answered with something unusable
    EndpointError { status_code: u16, detail: String },
    /// The last attempt ran past its deadline
    Timeout,
}

impl RetryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Human-readable description of a failed outcome.
    pub fn detail(&self) -> String {
        match self {
            Self::Success(_) => String::new(),
            Self::TransportError(detail) => detail.clone(),
            Self::EndpointError {
                status_code,
                detail,
            } if *status_code > 0 => format!("{detail} (status {status_code})"),
            Self::EndpointError { detail, .. } => detail.clone(),
            Self::Timeout => "request timed out".into(),
        }
    }
}

impl From<ProviderError> for RetryOutcome {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(_) => Self::Timeout,
            ProviderError::Network(detail) | ProviderError::StreamInterrupted(detail) => {
                Self::TransportError(detail)
            }
            other => Self::EndpointError {
                status_code: other.status_code().unwrap_or(0),
                detail: other.to_string(),
            },
        }
    }
}

/// Issues chat completions against one provider under a [`RetryPolicy`].
pub struct RetryingCaller {
    provider: Arc<dyn Provider>,
    model: String,
    policy: RetryPolicy,
    temperature: f32,
    streaming: bool,
}

impl RetryingCaller {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            model: model.into(),
            policy,
            temperature: 0.2,
            streaming: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Request streamed completions and reassemble them inside each attempt.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `messages` with a `max_tokens` budget, retrying transient failures.
    pub async fn call(&self, messages: &[Message], max_tokens: u32) -> RetryOutcome {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature: self.temperature,
            max_tokens: Some(max_tokens),
            stream: self.streaming,
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last = RetryOutcome::Timeout;

        for attempt in 1..=max_attempts {
            debug!(
                provider = %self.provider.name(),
                attempt,
                max_attempts,
                streaming = self.streaming,
                "Calling endpoint"
            );

            match tokio::time::timeout(self.policy.timeout, self.attempt(request.clone())).await {
                Ok(Ok(text)) => return RetryOutcome::Success(text),
                Ok(Err(e)) if !e.is_transient() => {
                    warn!(
                        provider = %self.provider.name(),
                        attempt,
                        error = %e,
                        "Endpoint error is not retryable"
                    );
                    return RetryOutcome::EndpointError {
                        status_code: e.status_code().unwrap_or(0),
                        detail: e.to_string(),
                    };
                }
                Ok(Err(e)) => {
                    warn!(
                        provider = %self.provider.name(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    last = e.into();
                }
                Err(_) => {
                    warn!(
                        provider = %self.provider.name(),
                        attempt,
                        max_attempts,
                        timeout_secs = self.policy.timeout.as_secs(),
                        "Attempt timed out"
                    );
                    last = RetryOutcome::Timeout;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        last
    }

    async fn attempt(&self, request: ProviderRequest) -> Result<String, ProviderError> {
        if self.streaming {
            let rx = self.provider.stream(request).await?;
            provider::collect_stream(rx).await
        } else {
            let response = self.provider.complete(request).await?;
            Ok(response.message.content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use thinkchain_core::provider::{ProviderResponse, StreamChunk};

    /// A provider that replays a fixed script of results.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        call_count: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::NotConfigured("script exhausted".into())));
            next.map(|text| ProviderResponse {
                message: Message::assistant(text),
                usage: None,
                model: request.model,
            })
        }
    }

    /// A provider that never answers.
    struct HangingProvider {
        call_count: Mutex<usize>,
    }

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Network("unreachable".into()))
        }
    }

    /// A provider whose stream delivers the text in two fragments.
    struct FragmentingProvider;

    #[async_trait]
    impl Provider for FragmentingProvider {
        fn name(&self) -> &str {
            "fragmenting"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("streaming only".into()))
        }

        async fn stream(
            &self,
            _request: ProviderRequest,
        ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>
        {
            let (tx, rx) = tokio::sync::mpsc::channel(4);
            for (text, done) in [("{\"title\":", false), ("\"t\"}", true)] {
                let _ = tx
                    .send(Ok(StreamChunk {
                        content: Some(text.into()),
                        done,
                        usage: None,
                    }))
                    .await;
            }
            Ok(rx)
        }
    }

    fn messages() -> Vec<Message> {
        vec![Message::system("sys"), Message::user("what is 2+2?")]
    }

    #[tokio::test(start_paused = true)]
    async fn two_transport_failures_then_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("connection reset".into())),
            Err(ProviderError::ApiError {
                status_code: 502,
                message: "bad gateway".into(),
            }),
            Ok("{\"title\":\"ok\"}".into()),
        ]));
        let caller = RetryingCaller::new(provider.clone(), "gpt-4o", RetryPolicy::default());

        let outcome = caller.call(&messages(), 300).await;
        assert_eq!(outcome, RetryOutcome::Success("{\"title\":\"ok\"}".into()));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::MalformedResponse("No choices in response".into())),
            Ok("never reached".into()),
        ]));
        let caller = RetryingCaller::new(provider.clone(), "gpt-4o", RetryPolicy::default());

        let outcome = caller.call(&messages(), 300).await;
        assert!(matches!(
            outcome,
            RetryOutcome::EndpointError { status_code: 200, .. }
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let caller = RetryingCaller::new(provider.clone(), "gpt-4o", RetryPolicy::default());

        let outcome = caller.call(&messages(), 300).await;
        assert!(matches!(
            outcome,
            RetryOutcome::EndpointError { status_code: 401, .. }
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_last_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("a".into())),
            Err(ProviderError::Network("b".into())),
            Err(ProviderError::Network("c".into())),
            Ok("too late".into()),
        ]));
        let caller = RetryingCaller::new(provider.clone(), "gpt-4o", RetryPolicy::default());

        let outcome = caller.call(&messages(), 300).await;
        assert_eq!(outcome, RetryOutcome::TransportError("c".into()));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_endpoint_times_out_each_attempt() {
        let provider = Arc::new(HangingProvider {
            call_count: Mutex::new(0),
        });
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(10),
            timeout: Duration::from_secs(55),
        };
        let caller = RetryingCaller::new(provider.clone(), "gpt-4o", policy);

        let start = tokio::time::Instant::now();
        let outcome = caller.call(&messages(), 300).await;
        assert_eq!(outcome, RetryOutcome::Timeout);
        assert_eq!(*provider.call_count.lock().unwrap(), 2);
        assert!(start.elapsed() >= Duration::from_secs(110));
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_reassembles_fragments() {
        let caller = RetryingCaller::new(Arc::new(FragmentingProvider), "gpt-4o", RetryPolicy::default())
            .with_streaming(true);
        let outcome = caller.call(&messages(), 300).await;
        assert_eq!(outcome, RetryOutcome::Success("{\"title\":\"t\"}".into()));
    }

    #[test]
    fn policy_from_config() {
        let mut config = ChainConfig::default();
        config.max_attempts = 5;
        config.retry_backoff_ms = 250;
        config.timeout_secs = 10;
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Duration::from_millis(250));
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(RetryPolicy::from_config(&ChainConfig::default()), RetryPolicy::default());
    }

    #[test]
    fn outcome_details() {
        let outcome = RetryOutcome::EndpointError {
            status_code: 503,
            detail: "overloaded".into(),
        };
        assert_eq!(outcome.detail(), "overloaded (status 503)");
        assert_eq!(RetryOutcome::Timeout.detail(), "request timed out");
        assert!(!RetryOutcome::Timeout.is_success());
        assert!(matches!(
            RetryOutcome::from(ProviderError::StreamInterrupted("eof".into())),
            RetryOutcome::TransportError(_)
        ));
    }
}
