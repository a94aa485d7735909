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

//! In-memory stand-ins for the oracle and the store, shared by unit and
//! integration tests.

use crate::store::{RelationalStore, Row, StoreError};
use async_trait::async_trait;
use llm_contracts::{
    Completion, CompletionRequest, OracleError, OracleResult, PromptPurpose, TextOracle, Usage,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
enum ScriptedReply {
    Text(String),
    Error(String),
}

/// Oracle that answers from per-purpose queues. When a queue runs dry the
/// purpose's sticky reply is used, and failing that an empty string.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    queues: Mutex<HashMap<PromptPurpose, VecDeque<ScriptedReply>>>,
    sticky: Mutex<HashMap<PromptPurpose, String>>,
    prompts: Mutex<Vec<(PromptPurpose, String)>>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, purpose: PromptPurpose, text: impl Into<String>) -> Self {
        lock(&self.queues)
            .entry(purpose)
            .or_default()
            .push_back(ScriptedReply::Text(text.into()));
        self
    }

    pub fn fail(self, purpose: PromptPurpose, message: impl Into<String>) -> Self {
        lock(&self.queues)
            .entry(purpose)
            .or_default()
            .push_back(ScriptedReply::Error(message.into()));
        self
    }

    /// Reply used for `purpose` whenever its queue is empty.
    pub fn always(self, purpose: PromptPurpose, text: impl Into<String>) -> Self {
        lock(&self.sticky).insert(purpose, text.into());
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, purpose: PromptPurpose) -> usize {
        lock(&self.prompts)
            .iter()
            .filter(|(p, _)| *p == purpose)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn prompts(&self, purpose: PromptPurpose) -> Vec<String> {
        lock(&self.prompts)
            .iter()
            .filter(|(p, _)| *p == purpose)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

#[async_trait]
impl TextOracle for ScriptedOracle {
    async fn complete(&self, request: CompletionRequest) -> OracleResult<Completion> {
        lock(&self.prompts).push((request.purpose, request.prompt.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = lock(&self.queues)
            .get_mut(&request.purpose)
            .and_then(|queue| queue.pop_front());
        let content = match next {
            Some(ScriptedReply::Text(text)) => text,
            Some(ScriptedReply::Error(message)) => return Err(OracleError::Provider(message)),
            None => lock(&self.sticky)
                .get(&request.purpose)
                .cloned()
                .unwrap_or_default(),
        };

        Ok(Completion {
            request_id: request.id,
            content,
            provider_used: "scripted".to_string(),
            model_used: "scripted".to_string(),
            usage: Usage::default(),
            created_at: chrono::Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Debug, Clone)]
pub struct SeededTable {
    pub name: String,
    pub columns: Vec<(String, String, bool)>,
}

impl SeededTable {
    pub fn new(name: &str, columns: &[(&str, &str, bool)]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(c, t, n)| (c.to_string(), t.to_string(), *n))
                .collect(),
        }
    }
}

/// In-memory store. Answers the two information-schema statements from its
/// seeded tables; every other statement counts as a data execution and is
/// answered by the first response rule whose pattern it contains.
#[derive(Debug, Default)]
pub struct SeededStore {
    tables: Vec<SeededTable>,
    rules: Vec<(String, Vec<Row>)>,
    failures: Mutex<VecDeque<String>>,
    metadata_failures: Mutex<VecDeque<String>>,
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    metadata_calls: AtomicUsize,
    offline: bool,
}

impl SeededStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two tables, `medicines` and `inventory`, with four medicines of which
    /// two expire soon.
    pub fn clinic() -> Self {
        Self::new()
            .with_table(SeededTable::new(
                "inventory",
                &[
                    ("id", "text", false),
                    ("medicineId", "text", false),
                    ("batchNumber", "text", false),
                    ("quantity", "integer", false),
                    ("expiryDate", "timestamp without time zone", false),
                    ("supplier", "text", true),
                ],
            ))
            .with_table(SeededTable::new(
                "medicines",
                &[
                    ("id", "text", false),
                    ("productName", "text", false),
                    ("subCategory", "text", true),
                    ("productPrice", "numeric", true),
                ],
            ))
            .respond_to(
                "expiryDate",
                vec![
                    row(&[
                        ("productName", json!("Amoxicillin 500mg")),
                        ("expiryDate", json!("2026-10-25")),
                        ("quantity", json!(40)),
                    ]),
                    row(&[
                        ("productName", json!("Ibuprofen 200mg")),
                        ("expiryDate", json!("2026-11-02")),
                        ("quantity", json!(8)),
                    ]),
                ],
            )
            .respond_to(
                "FROM medicines",
                vec![
                    row(&[("productName", json!("Amoxicillin 500mg"))]),
                    row(&[("productName", json!("Ibuprofen 200mg"))]),
                    row(&[("productName", json!("Paracetamol 500mg"))]),
                    row(&[("productName", json!("Cetirizine 10mg"))]),
                ],
            )
    }

    pub fn with_table(mut self, table: SeededTable) -> Self {
        self.tables.push(table);
        self.tables.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    /// Statements containing `pattern` return `rows`. Rules are checked in
    /// insertion order.
    pub fn respond_to(mut self, pattern: &str, rows: Vec<Row>) -> Self {
        self.rules.push((pattern.to_string(), rows));
        self
    }

    /// The next data execution fails with `message`. Queues up.
    pub fn fail_next(self, message: impl Into<String>) -> Self {
        lock(&self.failures).push_back(message.into());
        self
    }

    pub fn fail_next_metadata(self, message: impl Into<String>) -> Self {
        lock(&self.metadata_failures).push_back(message.into());
        self
    }

    /// Every call fails, including `ping`.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn executions(&self) -> usize {
        lock(&self.statements).len()
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements)
            .iter()
            .map(|(statement, _)| statement.clone())
            .collect()
    }

    pub fn params(&self) -> Vec<Vec<Value>> {
        lock(&self.statements)
            .iter()
            .map(|(_, params)| params.clone())
            .collect()
    }

    fn metadata(&self, statement: &str, params: &[Value]) -> Option<Result<Vec<Row>, StoreError>> {
        let lists_tables = statement.contains("information_schema.tables");
        let lists_columns = statement.contains("information_schema.columns");
        if !lists_tables && !lists_columns {
            return None;
        }
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.metadata_failures).pop_front() {
            return Some(Err(StoreError::query(message)));
        }

        if lists_tables {
            return Some(Ok(self
                .tables
                .iter()
                .map(|t| row(&[("table_name", json!(t.name))]))
                .collect()));
        }

        let table_name = params.get(1).and_then(Value::as_str).unwrap_or_default();
        let rows = self
            .tables
            .iter()
            .filter(|t| t.name == table_name)
            .flat_map(|t| t.columns.iter())
            .map(|(column, data_type, nullable)| {
                row(&[
                    ("column_name", json!(column)),
                    ("data_type", json!(data_type)),
                    ("is_nullable", json!(if *nullable { "YES" } else { "NO" })),
                ])
            })
            .collect();
        Some(Ok(rows))
    }
}

#[async_trait]
impl RelationalStore for SeededStore {
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        if self.offline {
            return Err(StoreError::connection("store is offline"));
        }
        if let Some(result) = self.metadata(statement, params) {
            return result;
        }

        lock(&self.statements).push((statement.to_string(), params.to_vec()));
        if let Some(message) = lock(&self.failures).pop_front() {
            return Err(StoreError::query(message));
        }

        Ok(self
            .rules
            .iter()
            .find(|(pattern, _)| statement.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn ping(&self) -> bool {
        !self.offline
    }

    fn name(&self) -> &str {
        "seeded"
    }
}

/// Builds a row from ordered pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
