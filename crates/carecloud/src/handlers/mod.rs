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

pub mod data_access;
pub mod medicine;
pub mod monitoring;
pub mod scheduling;
pub mod stock;

pub use data_access::DataAccessHandler;
pub use medicine::{MedicineHandler, MedicineOperation};
pub use monitoring::{MonitoringHandler, MonitoringOperation};
pub use scheduling::{SchedulingHandler, SchedulingOperation};
pub use stock::{StockHandler, StockOperation};

use crate::config::HandlerSettings;
use crate::oracle::{classify_with_default, LabelTable};
use crate::query::{AdaptiveQueryLoop, QueryExecutor};
use crate::router::{Domain, Request};
use crate::store::{Row, StoreError};
use async_trait::async_trait;
use llm_contracts::{OracleError, PromptPurpose, TextOracle};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed<S: Into<String>>(msg: S) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// A domain specialist the coordinator dispatches to.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    fn name(&self) -> &str;

    fn domain(&self) -> Domain;

    async fn handle(&self, request: &Request) -> Result<String, HandlerError>;

    /// Standalone entry point. Never fails; errors come back as text.
    async fn run(&self, text: &str) -> String {
        match self.handle(&Request::new(text)).await {
            Ok(reply) => reply,
            Err(e) => format!("Error processing {} request: {e}", self.name()),
        }
    }

    fn is_running(&self) -> bool {
        true
    }
}

/// A domain's closed operation vocabulary.
pub trait OperationKind: Copy + Debug + PartialEq + Send + Sync + 'static {
    const DEFAULT: Self;
    /// Oracle replies checked in order.
    const LABELS: &'static [(&'static str, Self)];
    /// Prompt lines describing each operation.
    const DESCRIPTIONS: &'static str;

    fn label(&self) -> &'static str;
}

/// One oracle call per request, mapped onto `K`. Anything unrecognised is `K::DEFAULT`.
pub struct OperationClassifier<K: OperationKind> {
    oracle: Arc<dyn TextOracle>,
    table: LabelTable<K>,
    subject: &'static str,
}

impl<K: OperationKind> OperationClassifier<K> {
    pub fn new(oracle: Arc<dyn TextOracle>, subject: &'static str) -> Self {
        Self {
            oracle,
            table: LabelTable::new(K::LABELS),
            subject,
        }
    }

    pub fn build_prompt(&self, text: &str) -> String {
        format!(
            "Classify this {} request into one of these operations:\n{}\n\n\
             Request: {text}\n\n\
             Respond with only the operation name.",
            self.subject,
            K::DESCRIPTIONS
        )
    }

    pub async fn classify(&self, text: &str) -> K {
        classify_with_default(
            self.oracle.as_ref(),
            &self.build_prompt(text),
            PromptPurpose::OperationClassification,
            &self.table,
            K::DEFAULT,
        )
        .await
    }
}

/// What every domain handler is built from.
#[derive(Clone)]
pub struct HandlerContext {
    pub oracle: Arc<dyn TextOracle>,
    pub query_loop: AdaptiveQueryLoop,
    pub settings: HandlerSettings,
}

impl HandlerContext {
    pub fn new(
        oracle: Arc<dyn TextOracle>,
        query_loop: AdaptiveQueryLoop,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            oracle,
            query_loop,
            settings,
        }
    }

    /// Loop used for operations without a template, capped at the handler budget.
    pub fn delegated_loop(&self) -> AdaptiveQueryLoop {
        self.query_loop
            .clone()
            .with_max_attempts(self.settings.max_attempts)
    }

    pub fn executor(&self) -> QueryExecutor {
        self.query_loop.executor().clone()
    }
}

/// Runs a fixed statement. No oracle involved.
pub(crate) async fn run_template(
    executor: &QueryExecutor,
    template: &str,
    statement: &str,
    params: &[Value],
) -> Result<Vec<Row>, HandlerError> {
    debug!(template, param_count = params.len(), "Running fixed template");
    Ok(executor.execute_template(statement, params).await?)
}

static PATIENT_ID: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").ok()
});

/// First UUID-shaped token in the text, in either case.
pub fn extract_patient_id(text: &str) -> Option<String> {
    PATIENT_ID
        .as_ref()?
        .find(text)
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedOracle;

    #[test]
    fn extracts_first_uuid_in_any_case() {
        let text = "vitals for 3F2504E0-4F89-11D3-9A0C-0305E82C3301 and 6fa459ea-ee8a-3ca4-894e-db77e160355e";
        assert_eq!(
            extract_patient_id(text).as_deref(),
            Some("3F2504E0-4F89-11D3-9A0C-0305E82C3301")
        );
        assert_eq!(extract_patient_id("vitals for patient 42"), None);
        assert_eq!(extract_patient_id("id 3f2504e0-4f89-11d3-9a0c"), None);
    }

    #[tokio::test]
    async fn off_vocabulary_operations_default_to_query() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply(PromptPurpose::OperationClassification, "teleport")
                .fail(PromptPurpose::OperationClassification, "down")
                .reply(PromptPurpose::OperationClassification, "expiry"),
        );
        let classifier: OperationClassifier<MedicineOperation> =
            OperationClassifier::new(oracle.clone(), "medicine");

        assert_eq!(classifier.classify("a").await, MedicineOperation::Query);
        assert_eq!(classifier.classify("b").await, MedicineOperation::Query);
        assert_eq!(classifier.classify("c").await, MedicineOperation::Expiry);

        let prompt = &oracle.prompts(PromptPurpose::OperationClassification)[0];
        assert!(prompt.contains("Classify this medicine request"));
        assert!(prompt.contains("Request: a"));
    }
}
