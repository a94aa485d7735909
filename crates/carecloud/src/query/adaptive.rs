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

use super::executor::QueryExecutor;
use super::schema::{SchemaDescription, SchemaIntrospector};
use super::synthesizer::QuerySynthesizer;
use super::validator::StatementValidator;
use crate::config::CoreConfig;
use crate::metrics::LoopMetrics;
use crate::render::ResultRenderer;
use crate::store::{RelationalStore, Row};
use llm_contracts::TextOracle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Terminal result of one loop run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    Failure { message: String, attempts: u32 },
}

impl QueryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, QueryOutcome::Failure { .. })
    }
}

/// What the loop carries from one attempt to the next. Context only grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptState {
    pub attempt_number: u32,
    pub last_error: Option<String>,
    pub accumulated_context: Vec<String>,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptState {
    pub fn new() -> Self {
        Self {
            attempt_number: 1,
            last_error: None,
            accumulated_context: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.accumulated_context
            .push(format!("Attempt {}: {}", self.attempt_number, message));
        self.last_error = Some(message);
    }

    pub fn advance(&mut self) {
        self.attempt_number += 1;
    }
}

/// Outcome plus the statement that produced it.
#[derive(Debug, Clone)]
pub struct LoopRun {
    pub outcome: QueryOutcome,
    pub statement: Option<String>,
    pub attempts: u32,
}

/// Schema snapshot scoped to one run. Refreshed after an execution failure;
/// a failed refresh keeps the previous snapshot.
#[derive(Default)]
struct SchemaCache {
    current: Option<SchemaDescription>,
    stale: bool,
}

impl SchemaCache {
    async fn get(
        &mut self,
        introspector: &SchemaIntrospector,
        metrics: &LoopMetrics,
    ) -> SchemaDescription {
        if let Some(schema) = &self.current {
            if !self.stale {
                return schema.clone();
            }
        }

        match introspector.introspect().await {
            Ok(schema) => {
                self.current = Some(schema.clone());
                self.stale = false;
                schema
            }
            Err(e) => {
                metrics.record_introspection_failure();
                warn!(error = %e, "Schema introspection failed");
                self.stale = false;
                match &self.current {
                    Some(previous) => previous.clone(),
                    None => SchemaDescription::unavailable(e.to_string()),
                }
            }
        }
    }

    fn invalidate(&mut self) {
        self.stale = true;
    }
}

/// Introspect, synthesise, execute; on failure feed the error back and try
/// again, up to `max_attempts` times.
#[derive(Clone)]
pub struct AdaptiveQueryLoop {
    introspector: SchemaIntrospector,
    synthesizer: QuerySynthesizer,
    executor: QueryExecutor,
    renderer: Arc<ResultRenderer>,
    metrics: Arc<LoopMetrics>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl AdaptiveQueryLoop {
    pub fn new(
        introspector: SchemaIntrospector,
        synthesizer: QuerySynthesizer,
        executor: QueryExecutor,
        renderer: Arc<ResultRenderer>,
        metrics: Arc<LoopMetrics>,
    ) -> Self {
        Self {
            introspector,
            synthesizer,
            executor,
            renderer,
            metrics,
            max_attempts: 5,
            retry_delay: Duration::from_millis(1000),
        }
    }

    pub fn from_config(
        config: &CoreConfig,
        oracle: Arc<dyn TextOracle>,
        store: Arc<dyn RelationalStore>,
        metrics: Arc<LoopMetrics>,
    ) -> Self {
        let settings = &config.query_loop;
        let synthesizer = QuerySynthesizer::new(
            oracle.clone(),
            StatementValidator::new(&settings.allowed_verbs),
            settings.quoted_identifiers.clone(),
            settings.derive_identifiers_from_schema,
        );
        let renderer = Arc::new(ResultRenderer::new(
            oracle,
            settings.row_summary_limit,
            settings.min_summary_chars,
            config.renderer.name_fields.clone(),
        ));

        Self::new(
            SchemaIntrospector::new(store.clone(), settings.table_schema.clone()),
            synthesizer,
            QueryExecutor::new(store),
            renderer,
            metrics,
        )
        .with_max_attempts(settings.max_attempts)
        .with_retry_delay(config.router.retry_delay())
    }

    /// Zero is treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn renderer(&self) -> &Arc<ResultRenderer> {
        &self.renderer
    }

    pub fn metrics(&self) -> &Arc<LoopMetrics> {
        &self.metrics
    }

    pub async fn run(&self, text: &str) -> QueryOutcome {
        self.run_detailed(text).await.outcome
    }

    /// Runs the loop and renders the outcome for a person to read.
    pub async fn answer(&self, text: &str) -> String {
        let run = self.run_detailed(text).await;
        self.renderer
            .render(&run.outcome, text, run.statement.as_deref())
            .await
    }

    #[instrument(skip(self, text), fields(max_attempts = self.max_attempts))]
    pub async fn run_detailed(&self, text: &str) -> LoopRun {
        self.metrics.record_run();
        let mut state = AttemptState::new();
        let mut cache = SchemaCache::default();

        loop {
            self.metrics.record_attempt();
            let attempt = state.attempt_number;
            let schema = cache.get(&self.introspector, &self.metrics).await;

            match self.synthesizer.synthesize(text, &schema, &state).await {
                Ok(candidate) => match self.executor.execute(&candidate).await {
                    Ok(rows) => {
                        self.metrics.record_success();
                        info!(attempt, row_count = rows.len(), "Query loop succeeded");
                        return LoopRun {
                            outcome: QueryOutcome::Rows(rows),
                            statement: Some(candidate.text),
                            attempts: attempt,
                        };
                    }
                    Err(e) => {
                        self.metrics.record_execution_failure();
                        state.record_failure(format!("{e} (statement: {})", candidate.text));
                        cache.invalidate();
                    }
                },
                Err(e) => {
                    self.metrics.record_synthesis_failure();
                    state.record_failure(e.to_string());
                }
            }

            if attempt >= self.max_attempts {
                break;
            }
            debug!(attempt, last_error = ?state.last_error, "Retrying query loop");
            if !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
            state.advance();
        }

        self.metrics.record_exhausted();
        let message = state
            .last_error
            .unwrap_or_else(|| "no statement could be produced".to_string());
        warn!(attempts = self.max_attempts, error = %message, "Query loop exhausted");
        LoopRun {
            outcome: QueryOutcome::Failure {
                message,
                attempts: self.max_attempts,
            },
            statement: None,
            attempts: self.max_attempts,
        }
    }
}
