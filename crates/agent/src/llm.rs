use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

/// Failure classes that make the reasoning oracle unavailable for a call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("gateway response could not be decoded: {0}")]
    Decode(String),
    #[error("scripted gateway has no response left for call {0}")]
    ScriptExhausted(usize),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::ScriptExhausted(_) => false,
        }
    }
}

#[async_trait]
pub trait ReasoningGateway: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        context: &str,
        streaming: bool,
    ) -> Result<String, GatewayError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayCall {
    pub system_prompt: String,
    pub context: String,
    pub streaming: bool,
}

/// Replays a fixed queue of responses in call order and records every call.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    responses: Arc<Mutex<VecDeque<Result<String, GatewayError>>>>,
    calls: Arc<Mutex<Vec<GatewayCall>>>,
}

impl ScriptedGateway {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gateway = Self::default();
        for response in responses {
            gateway.push_response(response);
        }
        gateway
    }

    pub fn push_response(&self, response: impl Into<String>) {
        lock(&self.responses).push_back(Ok(response.into()));
    }

    pub fn push_failure(&self, error: GatewayError) {
        lock(&self.responses).push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }
}

#[async_trait]
impl ReasoningGateway for ScriptedGateway {
    async fn generate(
        &self,
        system_prompt: &str,
        context: &str,
        streaming: bool,
    ) -> Result<String, GatewayError> {
        let call_index = {
            let mut calls = lock(&self.calls);
            calls.push(GatewayCall {
                system_prompt: system_prompt.to_string(),
                context: context.to_string(),
                streaming,
            });
            calls.len()
        };

        lock(&self.responses).pop_front().unwrap_or(Err(GatewayError::ScriptExhausted(call_index)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::{GatewayError, ReasoningGateway, ScriptedGateway};

    #[tokio::test]
    async fn scripted_gateway_replays_in_order_and_records_calls() {
        let gateway = ScriptedGateway::new(["first", "second"]);

        assert_eq!(gateway.generate("sys", "ctx-1", false).await.as_deref(), Ok("first"));
        assert_eq!(gateway.generate("sys", "ctx-2", true).await.as_deref(), Ok("second"));

        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].context, "ctx-2");
        assert!(calls[1].streaming);
        assert_eq!(gateway.remaining(), 0);
    }

    #[tokio::test]
    async fn scripted_gateway_reports_exhaustion() {
        let gateway = ScriptedGateway::default();
        let result = gateway.generate("sys", "ctx", false).await;
        assert_eq!(result, Err(GatewayError::ScriptExhausted(1)));
    }

    #[tokio::test]
    async fn scripted_gateway_replays_failures() {
        let gateway = ScriptedGateway::default();
        gateway.push_failure(GatewayError::Transport("connection reset".to_string()));

        let result = gateway.generate("sys", "ctx", false).await;
        assert!(matches!(result, Err(GatewayError::Transport(_))));
    }

    #[test]
    fn retryable_classes() {
        assert!(GatewayError::Transport("timeout".to_string()).is_retryable());
        assert!(GatewayError::Rejected { status: 503, body: String::new() }.is_retryable());
        assert!(GatewayError::Rejected { status: 429, body: String::new() }.is_retryable());
        assert!(!GatewayError::Rejected { status: 401, body: String::new() }.is_retryable());
        assert!(!GatewayError::Decode("not json".to_string()).is_retryable());
    }
}
