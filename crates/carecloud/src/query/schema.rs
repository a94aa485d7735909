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

use crate::store::{field, RelationalStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub const LIST_TABLES: &str = "SELECT table_name::text AS table_name \
     FROM information_schema.tables \
     WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

pub const LIST_COLUMNS: &str = "SELECT column_name::text AS column_name, \
     data_type::text AS data_type, is_nullable::text AS is_nullable \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Snapshot of the live schema, rendered into synthesis prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableInfo>,
    pub captured_at: DateTime<Utc>,
    /// Set when introspection failed and nothing better was cached.
    pub unavailable: Option<String>,
}

impl SchemaDescription {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        Self {
            tables,
            captured_at: Utc::now(),
            unavailable: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            tables: Vec::new(),
            captured_at: Utc::now(),
            unavailable: Some(reason.into()),
        }
    }

    pub fn render(&self) -> String {
        if let Some(reason) = &self.unavailable {
            return format!("Schema inspection failed: {reason}");
        }
        if self.tables.is_empty() {
            return "No tables found in database".to_string();
        }

        let mut out = String::from("DATABASE SCHEMA INSPECTION:\n\n");
        for table in &self.tables {
            out.push_str(&format!("TABLE: {}\n", table.name));
            if table.columns.is_empty() {
                out.push_str("No column information found\n\n");
                continue;
            }
            out.push_str("COLUMNS:\n");
            for column in &table.columns {
                let nullability = if column.nullable { "NULL" } else { "NOT NULL" };
                out.push_str(&format!(
                    "- {} ({}, {})\n",
                    column.name, column.data_type, nullability
                ));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    /// Column names containing upper-case letters, deduplicated and sorted.
    pub fn mixed_case_columns(&self) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(|t| t.columns.iter())
            .filter(|c| c.name.chars().any(|ch| ch.is_uppercase()))
            .map(|c| c.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Reads the information schema through the same store the loop executes against.
#[derive(Clone)]
pub struct SchemaIntrospector {
    store: Arc<dyn RelationalStore>,
    table_schema: String,
}

impl SchemaIntrospector {
    pub fn new(store: Arc<dyn RelationalStore>, table_schema: impl Into<String>) -> Self {
        Self {
            store,
            table_schema: table_schema.into(),
        }
    }

    pub async fn introspect(&self) -> Result<SchemaDescription, StoreError> {
        let schema = Value::String(self.table_schema.clone());
        let table_rows = self.store.execute(LIST_TABLES, &[schema.clone()]).await?;

        let mut tables = Vec::with_capacity(table_rows.len());
        for table_row in &table_rows {
            let name = field(table_row, "table_name");
            let params = [schema.clone(), Value::String(name.clone())];
            let columns = match self.store.execute(LIST_COLUMNS, &params).await {
                Ok(rows) => rows
                    .iter()
                    .map(|r| ColumnInfo {
                        name: field(r, "column_name"),
                        data_type: field(r, "data_type"),
                        nullable: field(r, "is_nullable").eq_ignore_ascii_case("YES"),
                    })
                    .collect(),
                Err(e) => {
                    warn!(table = %name, error = %e, "Failed to read columns");
                    Vec::new()
                }
            };
            tables.push(TableInfo { name, columns });
        }

        debug!(table_count = tables.len(), "Schema introspected");
        Ok(SchemaDescription::new(tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SeededStore;

    #[tokio::test]
    async fn introspects_seeded_tables_in_order() {
        let store = Arc::new(SeededStore::clinic());
        let introspector = SchemaIntrospector::new(store.clone(), "public");
        let schema = introspector.introspect().await.unwrap();

        assert_eq!(schema.table_names(), vec!["inventory", "medicines"]);
        let rendered = schema.render();
        assert!(rendered.starts_with("DATABASE SCHEMA INSPECTION:"));
        assert!(rendered.contains("TABLE: medicines\nCOLUMNS:\n- id (text, NOT NULL)"));
        assert!(rendered.contains("- subCategory (text, NULL)"));
        assert_eq!(store.metadata_calls(), 3);
        assert_eq!(store.executions(), 0);
    }

    #[tokio::test]
    async fn empty_store_renders_placeholder() {
        let store = Arc::new(SeededStore::new());
        let schema = SchemaIntrospector::new(store, "public")
            .introspect()
            .await
            .unwrap();
        assert_eq!(schema.render(), "No tables found in database");
    }

    #[test]
    fn mixed_case_columns_are_deduplicated() {
        let column = |name: &str| ColumnInfo {
            name: name.to_string(),
            data_type: "text".to_string(),
            nullable: false,
        };
        let schema = SchemaDescription::new(vec![
            TableInfo {
                name: "inventory".to_string(),
                columns: vec![column("id"), column("medicineId"), column("expiryDate")],
            },
            TableInfo {
                name: "prescription_items".to_string(),
                columns: vec![column("medicineId"), column("quantity")],
            },
        ]);
        assert_eq!(schema.mixed_case_columns(), vec!["expiryDate", "medicineId"]);
    }

    #[test]
    fn unavailable_schema_renders_reason() {
        let schema = SchemaDescription::unavailable("connection refused");
        assert_eq!(
            schema.render(),
            "Schema inspection failed: connection refused"
        );
    }
}
