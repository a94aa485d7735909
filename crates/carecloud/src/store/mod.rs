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

pub mod postgres;

pub use postgres::PgStore;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

/// One result row: column name to value, in select-list order.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Database query failed: {0}")]
    Query(String),

    #[error("Failed to decode column {column}: {message}")]
    Decode { column: String, message: String },

    #[error("Database configuration missing: {0}")]
    Configuration(String),
}

impl StoreError {
    pub fn query<S: Into<String>>(msg: S) -> Self {
        StoreError::Query(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        StoreError::Connection(msg.into())
    }
}

/// The relational store the query loop and the fixed templates run against.
/// Parameters bind positionally to `$1`, `$2`, ...
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, StoreError>;

    async fn ping(&self) -> bool {
        self.execute("SELECT 1", &[]).await.is_ok()
    }

    fn name(&self) -> &str;
}

/// Renders a cell the way formatted answers show it: strings bare, nulls as `N/A`.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "N/A".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Looks up a column and renders it with [`display_value`]; missing columns read `N/A`.
pub fn field(row: &Row, column: &str) -> String {
    row.get(column)
        .map(display_value)
        .unwrap_or_else(|| "N/A".to_string())
}
