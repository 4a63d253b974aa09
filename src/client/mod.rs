//! Airtable client implementation.
//!
//! Every request goes through the resilience orchestrator with the base ID
//! as the target, so each base gets its own circuit and rate limit budget.

use crate::config::AirtableConfig;
use crate::errors::AirtableResult;
use crate::health::{HealthChecker, HealthReport};
use crate::observability::{create_metrics_collector, MetricsCollector};
use crate::resilience::{execute_chunked, BatchConfig, CallOptions, ResilienceOrchestrator};
use crate::transport::{is_idempotent, DownstreamRequest, HttpTransport, ReqwestTransport};
use http::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Main Airtable client
#[derive(Clone)]
pub struct AirtableClient {
    config: Arc<AirtableConfig>,
    transport: Arc<dyn HttpTransport>,
    resilience: ResilienceOrchestrator,
    health: HealthChecker,
}

impl AirtableClient {
    /// Create a client with the reqwest transport and metrics enabled
    pub fn new(config: AirtableConfig) -> AirtableResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(
            config.api_key().clone(),
            config.timeout,
        )?);
        Ok(Self::with_transport(config, transport))
    }

    /// Create a client from environment variables
    pub fn from_env() -> AirtableResult<Self> {
        Self::new(AirtableConfig::from_env()?)
    }

    /// Create a client over a custom transport
    pub fn with_transport(config: AirtableConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let resilience = ResilienceOrchestrator::builder()
            .config(config.resilience.clone())
            .metrics(create_metrics_collector())
            .build();
        Self::with_orchestrator(config, transport, resilience)
    }

    /// Create a client sharing an existing orchestrator
    pub fn with_orchestrator(
        config: AirtableConfig,
        transport: Arc<dyn HttpTransport>,
        resilience: ResilienceOrchestrator,
    ) -> Self {
        let health = HealthChecker::new(resilience.clone());
        Self {
            config: Arc::new(config),
            transport,
            resilience,
            health,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &AirtableConfig {
        &self.config
    }

    /// Get the resilience orchestrator
    pub fn resilience(&self) -> &ResilienceOrchestrator {
        &self.resilience
    }

    /// Get the metrics collector, if one is attached
    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.resilience.metrics()
    }

    /// Current health of the resilience layer
    pub fn health(&self) -> HealthReport {
        self.health.check()
    }

    /// Send a request under `base_id`.
    ///
    /// Idempotent methods are de-duplicated against identical in-flight
    /// requests; everything else always reaches the API.
    pub async fn request(
        &self,
        base_id: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> AirtableResult<Value> {
        let url = self.config.build_url(base_id, path)?;
        let mut request = DownstreamRequest::new(method, url);
        if let Some(body) = body {
            request = request.with_body(body);
        }

        let key = request.key();
        let options = if is_idempotent(&request.method) {
            CallOptions::read()
        } else {
            CallOptions::new()
        };
        debug!(base = %base_id, method = %request.method, path, "Dispatching request");

        let transport = self.transport.clone();
        self.resilience
            .call(base_id, Some(&key), &options, move || {
                let transport = transport.clone();
                let request = request.clone();
                async move { transport.send(request).await.map(|response| response.body) }
            })
            .await
    }

    /// GET a path under `base_id`
    pub async fn get(&self, base_id: &str, path: &str) -> AirtableResult<Value> {
        self.request(base_id, Method::GET, path, None).await
    }

    /// POST a JSON body to a path under `base_id`
    pub async fn post(&self, base_id: &str, path: &str, body: Value) -> AirtableResult<Value> {
        self.request(base_id, Method::POST, path, Some(body)).await
    }

    /// PATCH a JSON body to a path under `base_id`
    pub async fn patch(&self, base_id: &str, path: &str, body: Value) -> AirtableResult<Value> {
        self.request(base_id, Method::PATCH, path, Some(body)).await
    }

    /// DELETE a path under `base_id`
    pub async fn delete(&self, base_id: &str, path: &str) -> AirtableResult<Value> {
        self.request(base_id, Method::DELETE, path, None).await
    }

    /// Create records in `table`, ten per request.
    ///
    /// `records` are field maps. Returns the created records in input order.
    pub async fn create_records(
        &self,
        base_id: &str,
        table: &str,
        records: Vec<Value>,
    ) -> AirtableResult<Vec<Value>> {
        let url = self.config.build_url(base_id, table)?;
        let transport = self.transport.clone();

        let responses = execute_chunked(
            &self.resilience,
            base_id,
            records,
            &BatchConfig::default(),
            move |chunk| {
                let transport = transport.clone();
                let body = json!({
                    "records": chunk
                        .into_iter()
                        .map(|fields| json!({ "fields": fields }))
                        .collect::<Vec<_>>()
                });
                let request = DownstreamRequest::new(Method::POST, url.clone()).with_body(body);
                async move { transport.send(request).await.map(|response| response.body) }
            },
        )
        .await?;

        Ok(responses
            .into_iter()
            .flat_map(|body| match body.get("records") {
                Some(Value::Array(records)) => records.clone(),
                _ => Vec::new(),
            })
            .collect())
    }
}

impl std::fmt::Debug for AirtableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirtableClient")
            .field("config", &self.config)
            .field("resilience", &self.resilience)
            .finish()
    }
}
