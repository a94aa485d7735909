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

use super::synthesizer::CandidateQuery;
use crate::store::{RelationalStore, Row, StoreError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Runs candidate statements and fixed templates against the store.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn RelationalStore>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, candidate: &CandidateQuery) -> Result<Vec<Row>, StoreError> {
        self.run(&candidate.text, &[], candidate.attempt).await
    }

    pub async fn execute_template(
        &self,
        statement: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, StoreError> {
        self.run(statement, params, 0).await
    }

    async fn run(
        &self,
        statement: &str,
        params: &[Value],
        attempt: u32,
    ) -> Result<Vec<Row>, StoreError> {
        let started = Instant::now();
        match self.store.execute(statement, params).await {
            Ok(rows) => {
                debug!(
                    attempt,
                    row_count = rows.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query executed"
                );
                Ok(rows)
            }
            Err(e) => {
                warn!(attempt, statement = %statement, error = %e, "Query execution failed");
                Err(e)
            }
        }
    }
}
