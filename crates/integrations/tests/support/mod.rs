#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use treejar_core::domain::batch::PendingBatch;
use treejar_core::domain::token::{ProviderId, TokenGrant};
use treejar_integrations::{
    AuthError, BatchHandler, OutboundRequest, ProviderResponse, ProviderTransport, Sleeper,
    TokenSource, TransportFailure,
};

/// Token endpoint that takes `latency` to answer and numbers each grant.
pub struct CountingSource {
    pub calls: AtomicUsize,
    pub latency: Duration,
    pub expires_in: Option<i64>,
}

impl CountingSource {
    pub fn new(latency: Duration) -> Self {
        Self { calls: AtomicUsize::new(0), latency, expires_in: Some(3600) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingSource {
    async fn refresh(&self, _provider: &ProviderId) -> Result<TokenGrant, AuthError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;
        Ok(TokenGrant { access_token: format!("token-{call}"), expires_in: self.expires_in })
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<ProviderResponse, TransportFailure>>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn with_script(responses: Vec<Result<ProviderResponse, TransportFailure>>) -> Self {
        Self { responses: Mutex::new(responses.into()), requests: Mutex::new(Vec::new()) }
    }

    pub async fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ProviderTransport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<ProviderResponse, TransportFailure> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(ProviderResponse { status: 200, body: json!({}) }))
    }
}

pub fn status(code: u16) -> Result<ProviderResponse, TransportFailure> {
    Ok(ProviderResponse { status: code, body: json!({ "status": code }) })
}

#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub async fn slept(&self) -> Vec<Duration> {
        self.slept.lock().await.clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().await.push(duration);
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    batches: Mutex<Vec<PendingBatch>>,
}

impl RecordingHandler {
    pub async fn batches(&self) -> Vec<PendingBatch> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl BatchHandler for RecordingHandler {
    async fn handle(&self, batch: &PendingBatch) -> anyhow::Result<()> {
        self.batches.lock().await.push(batch.clone());
        Ok(())
    }
}
