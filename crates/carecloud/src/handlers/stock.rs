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

use super::{run_template, DomainHandler, HandlerContext, HandlerError, OperationClassifier, OperationKind};
use crate::query::{AdaptiveQueryLoop, QueryExecutor};
use crate::router::{Domain, Request};
use crate::store::{field, Row};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockOperation {
    Inventory,
    Reorder,
    Suppliers,
    Transactions,
    Query,
}

impl OperationKind for StockOperation {
    const DEFAULT: Self = StockOperation::Query;
    const LABELS: &'static [(&'static str, Self)] = &[
        ("inventory", StockOperation::Inventory),
        ("reorder", StockOperation::Reorder),
        ("suppliers", StockOperation::Suppliers),
        ("supplier", StockOperation::Suppliers),
        ("transactions", StockOperation::Transactions),
        ("transaction", StockOperation::Transactions),
        ("query", StockOperation::Query),
    ];
    const DESCRIPTIONS: &'static str = "\
- inventory: checking stock levels, current inventory, stock counts
- reorder: low stock alerts, reorder points, automatic reordering
- suppliers: supplier information, vendor management, procurement
- transactions: stock movements, inflow/outflow tracking, transaction history
- query: general stock information, reports, analytics";

    fn label(&self) -> &'static str {
        match self {
            StockOperation::Inventory => "inventory",
            StockOperation::Reorder => "reorder",
            StockOperation::Suppliers => "suppliers",
            StockOperation::Transactions => "transactions",
            StockOperation::Query => "query",
        }
    }
}

pub const INVENTORY_LEVELS: &str = "SELECT m.\"productName\", i.quantity, i.\"unitPrice\", i.\"batchNumber\" \
     FROM medicines m JOIN inventory i ON m.id = i.\"medicineId\" \
     ORDER BY i.quantity ASC LIMIT 20";

pub const SUPPLIERS: &str = "SELECT i.supplier, COUNT(*) AS items_count \
     FROM inventory i WHERE i.supplier IS NOT NULL \
     GROUP BY i.supplier ORDER BY items_count DESC";

pub const RECENT_TRANSACTIONS: &str = "SELECT t.\"transactionType\", t.quantity, t.\"transactionDate\", m.\"productName\" \
     FROM transactions t JOIN inventory i ON t.\"inventoryId\" = i.id \
     JOIN medicines m ON i.\"medicineId\" = m.id \
     ORDER BY t.\"transactionDate\" DESC LIMIT 10";

pub fn reorder_statement(threshold: i64) -> String {
    format!(
        "SELECT m.\"productName\", i.quantity, i.\"batchNumber\" \
         FROM medicines m JOIN inventory i ON m.id = i.\"medicineId\" \
         WHERE i.quantity < {threshold} ORDER BY i.quantity ASC"
    )
}

fn quantity(row: &Row) -> Option<i64> {
    match row.get("quantity") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn format_inventory(rows: &[Row], threshold: i64) -> String {
    if rows.is_empty() {
        return "No inventory data available.".to_string();
    }
    let mut out = String::from("Current inventory levels (lowest first):");
    for row in rows {
        let status = match quantity(row) {
            Some(q) if q < threshold => "LOW STOCK",
            _ => "NORMAL",
        };
        out.push_str(&format!(
            "\n- {}: {} units (${}) - {status}",
            field(row, "productName"),
            field(row, "quantity"),
            field(row, "unitPrice")
        ));
    }
    out
}

pub fn format_reorder(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "All items are sufficiently stocked. No reorder alerts.".to_string();
    }
    let mut out = String::from("REORDER ALERTS - Items with low stock:");
    for row in rows {
        out.push_str(&format!(
            "\n- {}: Only {} units remaining (Batch: {})",
            field(row, "productName"),
            field(row, "quantity"),
            field(row, "batchNumber")
        ));
    }
    out.push_str("\n\nRecommendation: Reorder these items immediately.");
    out
}

pub fn format_suppliers(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No supplier information available.".to_string();
    }
    let mut out = String::from("Supplier management overview:");
    for row in rows {
        out.push_str(&format!(
            "\n- {}: {} items supplied",
            field(row, "supplier"),
            field(row, "items_count")
        ));
    }
    out
}

pub fn format_transactions(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No transaction data available.".to_string();
    }
    let mut out = String::from("Recent stock transactions:");
    for row in rows {
        out.push_str(&format!(
            "\n- {}: {} units of {} on {}",
            field(row, "transactionType"),
            field(row, "quantity"),
            field(row, "productName"),
            field(row, "transactionDate")
        ));
    }
    out
}

pub struct StockHandler {
    classifier: OperationClassifier<StockOperation>,
    executor: QueryExecutor,
    query_loop: AdaptiveQueryLoop,
    low_stock_threshold: i64,
}

impl StockHandler {
    pub fn new(context: &HandlerContext) -> Self {
        Self {
            classifier: OperationClassifier::new(context.oracle.clone(), "stock management"),
            executor: context.executor(),
            query_loop: context.delegated_loop(),
            low_stock_threshold: context.settings.low_stock_threshold,
        }
    }
}

#[async_trait]
impl DomainHandler for StockHandler {
    fn name(&self) -> &str {
        "stock"
    }

    fn domain(&self) -> Domain {
        Domain::Stock
    }

    #[instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    async fn handle(&self, request: &Request) -> Result<String, HandlerError> {
        let operation = self.classifier.classify(&request.text).await;
        info!(operation = operation.label(), "Stock operation classified");

        match operation {
            StockOperation::Inventory => {
                let rows =
                    run_template(&self.executor, "stock.inventory", INVENTORY_LEVELS, &[]).await?;
                Ok(format_inventory(&rows, self.low_stock_threshold))
            }
            StockOperation::Reorder => {
                let statement = reorder_statement(self.low_stock_threshold);
                let rows = run_template(&self.executor, "stock.reorder", &statement, &[]).await?;
                Ok(format_reorder(&rows))
            }
            StockOperation::Suppliers => {
                let rows = run_template(&self.executor, "stock.suppliers", SUPPLIERS, &[]).await?;
                Ok(format_suppliers(&rows))
            }
            StockOperation::Transactions => {
                let rows =
                    run_template(&self.executor, "stock.transactions", RECENT_TRANSACTIONS, &[])
                        .await?;
                Ok(format_transactions(&rows))
            }
            StockOperation::Query => Ok(self.query_loop.answer(&request.text).await),
        }
    }
}
