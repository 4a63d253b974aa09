//! Mock implementations for testing.
//!
//! `MockHttpTransport` is a mockall expectation mock; `ScriptedTransport`
//! plays back a fixed sequence of outcomes and records what it was sent.

use crate::errors::{AirtableError, AirtableResult};
use crate::transport::{DownstreamRequest, DownstreamResponse, HttpTransport};
use async_trait::async_trait;
use mockall::mock;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

mock! {
    pub HttpTransport {}

    #[async_trait]
    impl HttpTransport for HttpTransport {
        async fn send(&self, request: DownstreamRequest) -> AirtableResult<DownstreamResponse>;
    }
}

enum Script {
    Sequence(VecDeque<AirtableResult<Value>>),
    Repeat(AirtableResult<Value>),
    EchoRecords,
}

/// Transport that replays scripted outcomes in order
pub struct ScriptedTransport {
    script: Mutex<Script>,
    delay: Option<Duration>,
    requests: Mutex<Vec<DownstreamRequest>>,
}

impl ScriptedTransport {
    /// Replay `outcomes` once each, then fail with `Internal`
    pub fn new(outcomes: Vec<AirtableResult<Value>>) -> Self {
        Self::from_script(Script::Sequence(outcomes.into()))
    }

    /// Return `outcome` for every request
    pub fn repeating(outcome: AirtableResult<Value>) -> Self {
        Self::from_script(Script::Repeat(outcome))
    }

    /// Answer record writes with the submitted records, each given an ID
    pub fn echo_records() -> Self {
        Self::from_script(Script::EchoRecords)
    }

    /// Sleep before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<DownstreamRequest> {
        self.requests.lock().clone()
    }

    fn from_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn next_outcome(&self, request: &DownstreamRequest, index: usize) -> AirtableResult<Value> {
        match &mut *self.script.lock() {
            Script::Sequence(outcomes) => outcomes.pop_front().unwrap_or_else(|| {
                Err(AirtableError::Internal {
                    message: "Scripted transport exhausted".to_string(),
                })
            }),
            Script::Repeat(outcome) => outcome.clone(),
            Script::EchoRecords => {
                let records = request
                    .body
                    .as_ref()
                    .and_then(|body| body.get("records"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let created: Vec<Value> = records
                    .into_iter()
                    .enumerate()
                    .map(|(i, mut record)| {
                        record["id"] = json!(format!("rec{}_{}", index, i));
                        record
                    })
                    .collect();
                Ok(json!({ "records": created }))
            }
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: DownstreamRequest) -> AirtableResult<DownstreamResponse> {
        let index = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };
        let outcome = self.next_outcome(&request, index);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        outcome.map(|body| DownstreamResponse { status: 200, body })
    }
}
