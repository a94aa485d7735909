// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use super::domain::{Domain, DomainClassifier};
use super::request::{RenderedResponse, Request};
use super::state::{Lifecycle, RouterState};
use crate::config::{CoreConfig, RouterSettings};
use crate::error::CoreResult;
use crate::handlers::{
    DataAccessHandler, DomainHandler, HandlerContext, MedicineHandler, MonitoringHandler,
    SchedulingHandler, StockHandler,
};
use crate::metrics::{LoopMetrics, RouterMetrics};
use crate::oracle::HttpOracle;
use crate::query::AdaptiveQueryLoop;
use crate::store::{PgStore, RelationalStore};
use futures::FutureExt;
use llm_contracts::TextOracle;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const COORDINATOR_TAG: &str = "COORDINATOR";

/// Result of running one handler under the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success { text: String, attempts: u32 },
    Failure { error: String, attempts: u32 },
}

impl HandlerOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            HandlerOutcome::Success { attempts, .. } | HandlerOutcome::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandlerOutcome::Success { .. })
    }
}

pub struct CoordinatorBuilder {
    oracle: Arc<dyn TextOracle>,
    settings: RouterSettings,
    handlers: BTreeMap<Domain, Arc<dyn DomainHandler>>,
    store: Option<Arc<dyn RelationalStore>>,
    loop_metrics: Arc<LoopMetrics>,
}

impl CoordinatorBuilder {
    pub fn new(oracle: Arc<dyn TextOracle>, settings: RouterSettings) -> Self {
        Self {
            oracle,
            settings,
            handlers: BTreeMap::new(),
            store: None,
            loop_metrics: Arc::new(LoopMetrics::new()),
        }
    }

    /// Registers `handler` under its own domain, replacing any earlier one.
    pub fn with_handler(mut self, handler: Arc<dyn DomainHandler>) -> Self {
        self.handlers.insert(handler.domain(), handler);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RelationalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_loop_metrics(mut self, metrics: Arc<LoopMetrics>) -> Self {
        self.loop_metrics = metrics;
        self
    }

    pub fn build(self) -> Coordinator {
        let default_domain = self.settings.default_domain();
        info!(
            handlers = self.handlers.len(),
            default_domain = %default_domain,
            "Coordinator initialised"
        );
        Coordinator {
            classifier: DomainClassifier::new(self.oracle, default_domain),
            handlers: self.handlers,
            store: self.store,
            settings: self.settings,
            metrics: Arc::new(RouterMetrics::new()),
            loop_metrics: self.loop_metrics,
        }
    }
}

/// Entry point for every request: classify, dispatch with retry, render.
pub struct Coordinator {
    classifier: DomainClassifier,
    handlers: BTreeMap<Domain, Arc<dyn DomainHandler>>,
    store: Option<Arc<dyn RelationalStore>>,
    settings: RouterSettings,
    metrics: Arc<RouterMetrics>,
    loop_metrics: Arc<LoopMetrics>,
}

impl Coordinator {
    pub fn builder(oracle: Arc<dyn TextOracle>, settings: RouterSettings) -> CoordinatorBuilder {
        CoordinatorBuilder::new(oracle, settings)
    }

    /// Wires the standard handler set over one shared query loop.
    pub fn from_config(
        config: &CoreConfig,
        oracle: Arc<dyn TextOracle>,
        store: Arc<dyn RelationalStore>,
    ) -> Self {
        let loop_metrics = Arc::new(LoopMetrics::new());
        let query_loop =
            AdaptiveQueryLoop::from_config(config, oracle.clone(), store.clone(), loop_metrics.clone());
        let context = HandlerContext::new(oracle.clone(), query_loop.clone(), config.handlers.clone());

        Self::builder(oracle, config.router.clone())
            .with_handler(Arc::new(MedicineHandler::new(&context)))
            .with_handler(Arc::new(MonitoringHandler::new(&context)))
            .with_handler(Arc::new(StockHandler::new(&context)))
            .with_handler(Arc::new(SchedulingHandler::new(&context)))
            .with_handler(Arc::new(DataAccessHandler::new(query_loop)))
            .with_store(store)
            .with_loop_metrics(loop_metrics)
            .build()
    }

    /// Validates `config`, opens the Postgres pool and builds the HTTP oracle.
    pub async fn connect(config: &CoreConfig) -> CoreResult<Self> {
        config.validate()?;
        let oracle = HttpOracle::new(config.oracle.clone())?;
        info!(provider = config.oracle.provider.as_str(), model = %config.oracle.model, "Oracle ready");
        let store = PgStore::connect(&config.database).await?;
        Ok(Self::from_config(config, Arc::new(oracle), Arc::new(store)))
    }

    /// The hint wins; blank text goes to the coordinator; otherwise the oracle decides.
    pub async fn classify(&self, request: &Request) -> Domain {
        let domain = if let Some(hint) = request.domain_hint {
            debug!(domain = %hint, "Using domain hint");
            hint
        } else if request.text.trim().is_empty() {
            Domain::CoordinatorInternal
        } else {
            self.classifier.classify(&request.text).await
        };
        self.metrics.record_classified(domain);
        domain
    }

    /// Runs `handler` up to `max_attempts` times. Errors and panics count as
    /// failed attempts.
    pub async fn route_with_retry(
        &self,
        handler: &Arc<dyn DomainHandler>,
        request: &Request,
    ) -> HandlerOutcome {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.metrics.record_attempt(attempt);
            let result = AssertUnwindSafe(handler.handle(request)).catch_unwind().await;
            match result {
                Ok(Ok(text)) => {
                    debug!(handler = handler.name(), attempt, "Handler succeeded");
                    return HandlerOutcome::Success {
                        text,
                        attempts: attempt,
                    };
                }
                Ok(Err(e)) => {
                    self.metrics.record_handler_failure();
                    warn!(handler = handler.name(), attempt, error = %e, "Handler attempt failed");
                    last_error = e.to_string();
                }
                Err(payload) => {
                    self.metrics.record_panic();
                    last_error = format!("handler panicked: {}", panic_message(&*payload));
                    error!(handler = handler.name(), attempt, error = %last_error, "Handler panicked");
                }
            }

            if attempt < max_attempts {
                let delay = self.settings.retry_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        HandlerOutcome::Failure {
            error: last_error,
            attempts: max_attempts,
        }
    }

    /// Looks up the handler for `domain` and runs it under the retry policy.
    pub async fn dispatch(
        &self,
        domain: Domain,
        request: &Request,
    ) -> Option<(Arc<dyn DomainHandler>, HandlerOutcome)> {
        let handler = self.handlers.get(&domain)?.clone();
        info!(domain = %domain, handler = handler.name(), "Dispatching request");
        let outcome = self.route_with_retry(&handler, request).await;
        Some((handler, outcome))
    }

    pub fn render(&self, handler_name: &str, outcome: &HandlerOutcome) -> String {
        match outcome {
            HandlerOutcome::Success { text, .. } => {
                format!("[{}] {text}", handler_name.to_uppercase())
            }
            HandlerOutcome::Failure { error, .. } => apology(error),
        }
    }

    /// Full lifecycle under the request timeout. Never fails.
    #[instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    pub async fn handle_request(&self, request: Request) -> RenderedResponse {
        self.metrics.record_request();
        let timeout = self.settings.request_timeout();
        let fallback_domain = request
            .domain_hint
            .unwrap_or_else(|| self.classifier.default_domain());
        let correlation_id = request.correlation_id;

        let response = match tokio::time::timeout(timeout, self.run_lifecycle(request)).await {
            Ok(response) => response,
            Err(_) => {
                self.metrics.record_timeout();
                warn!(timeout_ms = timeout.as_millis() as u64, "Request timed out");
                let mut lifecycle = Lifecycle::new();
                lifecycle.advance(RouterState::DomainFailed);
                lifecycle.advance(RouterState::Rendered);
                lifecycle.advance(RouterState::Terminal);
                RenderedResponse {
                    text: apology(&format!(
                        "the request timed out after {} ms",
                        timeout.as_millis()
                    )),
                    domain: fallback_domain,
                    handler: None,
                    attempts: 0,
                    succeeded: false,
                    trail: lifecycle.into_trail(),
                    correlation_id,
                }
            }
        };

        self.metrics.record_outcome(response.succeeded);
        info!(
            domain = %response.domain,
            succeeded = response.succeeded,
            attempts = response.attempts,
            "Request completed"
        );
        response
    }

    async fn run_lifecycle(&self, request: Request) -> RenderedResponse {
        let mut lifecycle = Lifecycle::new();
        let domain = self.classify(&request).await;
        lifecycle.advance(RouterState::Classified);

        if domain == Domain::CoordinatorInternal {
            lifecycle.advance(RouterState::Succeeded);
            let text = format!("[{COORDINATOR_TAG}] {}", self.capability_overview());
            return finish(lifecycle, text, domain, None, 0, true, &request);
        }

        let Some((handler, outcome)) = self.dispatch(domain, &request).await else {
            lifecycle.advance(RouterState::DomainFailed);
            warn!(domain = %domain, "No handler registered");
            let text = apology(&format!("no handler is registered for {domain} requests"));
            return finish(lifecycle, text, domain, None, 0, false, &request);
        };
        lifecycle.advance(RouterState::Dispatched);

        let succeeded = outcome.is_success();
        lifecycle.advance(if succeeded {
            RouterState::Succeeded
        } else {
            RouterState::DomainFailed
        });
        let text = self.render(handler.name(), &outcome);
        finish(
            lifecycle,
            text,
            domain,
            Some(handler.name().to_string()),
            outcome.attempts(),
            succeeded,
            &request,
        )
    }

    /// Processes one line of user text. Invalid hints are ignored.
    pub async fn process(&self, text: &str, hint: Option<&str>) -> (String, Domain) {
        let hint = hint.and_then(|h| match Domain::from_str(h) {
            Ok(domain) => Some(domain),
            Err(e) => {
                warn!(error = %e, "Ignoring domain hint");
                None
            }
        });
        let response = self
            .handle_request(Request::new(text).with_hint(hint))
            .await;
        (response.text, response.domain)
    }

    pub fn status(&self) -> BTreeMap<String, bool> {
        let mut status = BTreeMap::new();
        status.insert("coordinator".to_string(), true);
        for handler in self.handlers.values() {
            status.insert(handler.name().to_string(), handler.is_running());
        }
        status
    }

    /// Status plus a live store ping.
    pub async fn health(&self) -> BTreeMap<String, bool> {
        let mut health = self.status();
        if let Some(store) = &self.store {
            health.insert(format!("store.{}", store.name()), store.ping().await);
        }
        health
    }

    pub fn metrics(&self) -> BTreeMap<String, u64> {
        let mut snapshot = self.metrics.snapshot();
        snapshot.extend(self.loop_metrics.snapshot());
        snapshot
    }

    fn capability_overview(&self) -> String {
        let handlers: Vec<&str> = self.handlers.values().map(|h| h.name()).collect();
        format!(
            "I can help with medicines (stock inflow and outflow, expiry dates, usage), \
             patient monitoring (vitals, medical history, health alerts), \
             stock management (inventory levels, reorder alerts, suppliers, transactions), \
             appointments (scheduling and viewing), and general questions about the clinic database. \
             Active handlers: {}.",
            if handlers.is_empty() {
                "none".to_string()
            } else {
                handlers.join(", ")
            }
        )
    }
}

fn apology(error: &str) -> String {
    format!("I apologize, but I encountered an error while processing your request: {error}")
}

fn finish(
    mut lifecycle: Lifecycle,
    text: String,
    domain: Domain,
    handler: Option<String>,
    attempts: u32,
    succeeded: bool,
    request: &Request,
) -> RenderedResponse {
    lifecycle.advance(RouterState::Rendered);
    lifecycle.advance(RouterState::Terminal);
    RenderedResponse {
        text,
        domain,
        handler,
        attempts,
        succeeded,
        trail: lifecycle.into_trail(),
        correlation_id: request.correlation_id,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
