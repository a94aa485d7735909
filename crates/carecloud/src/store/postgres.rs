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

use super::{RelationalStore, Row, StoreError};
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Postgres-backed store over a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Configuration("DATABASE_URL is not set".to_string()))?;

        info!(max_connections = config.max_connections, "Connecting to Postgres");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(url)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to connect to database");
                StoreError::connection(e.to_string())
            })?;
        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        let started = Instant::now();
        let mut query = sqlx::query(statement);
        for param in params {
            query = bind_json(query, param);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::query(e.to_string()))?;
        debug!(
            row_count = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Statement executed"
        );

        rows.iter().map(decode_row).collect()
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

fn bind_json<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(sqlx::types::Json(other.clone())),
    }
}

fn decode_row(row: &PgRow) -> Result<Row, StoreError> {
    let mut decoded = Row::with_capacity(row.columns().len());
    for column in row.columns() {
        let index = column.ordinal();
        let value = decode_column(row, index, column.type_info().name()).map_err(|e| {
            StoreError::Decode {
                column: column.name().to_string(),
                message: e.to_string(),
            }
        })?;
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(|f| Value::from(f as f64)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::from),
        "NUMERIC" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(index)?
            .map(|d| decimal_to_json(&d)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            row.try_get::<Option<String>, _>(index)?.map(Value::String)
        }
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)?
            .map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(|dt| Value::String(dt.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(|dt| Value::String(dt.to_string())),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map(|d| Value::String(d.to_string())),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)?
            .map(|t| Value::String(t.to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(index)?,
        // Enums and domains over text arrive as text on the wire.
        other => match row.try_get_unchecked::<Option<String>, _>(index) {
            Ok(text) => text.map(Value::String),
            Err(e) => {
                debug!(type_name = %other, error = %e, "Unsupported column type, returning null");
                None
            }
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decimal_to_json(decimal: &rust_decimal::Decimal) -> Value {
    let text = decimal.to_string();
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn decimals_become_json_numbers() {
        let price = rust_decimal::Decimal::from_str("12.50").unwrap();
        assert_eq!(decimal_to_json(&price), serde_json::json!(12.5));
    }

    #[tokio::test]
    async fn connect_without_url_is_a_configuration_error() {
        let config = DatabaseConfig::default();
        let err = PgStore::connect(&config).await.err().unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));
    }
}
