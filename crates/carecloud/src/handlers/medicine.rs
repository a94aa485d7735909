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
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedicineOperation {
    Inflow,
    Outflow,
    Expiry,
    Usage,
    Query,
}

impl OperationKind for MedicineOperation {
    const DEFAULT: Self = MedicineOperation::Query;
    const LABELS: &'static [(&'static str, Self)] = &[
        ("inflow", MedicineOperation::Inflow),
        ("outflow", MedicineOperation::Outflow),
        ("expiry", MedicineOperation::Expiry),
        ("usage", MedicineOperation::Usage),
        ("query", MedicineOperation::Query),
    ];
    const DESCRIPTIONS: &'static str = "\
- inflow: adding new medicine stock, receiving deliveries, restocking inventory
- outflow: dispensing medicine, selling medicine, removing from inventory
- expiry: checking expiry dates, expiration alerts, medicines about to expire
- usage: tracking medicine usage patterns, consumption statistics, prescription frequency
- query: asking for information, listing data, showing inventory, general questions about medicines";

    fn label(&self) -> &'static str {
        match self {
            MedicineOperation::Inflow => "inflow",
            MedicineOperation::Outflow => "outflow",
            MedicineOperation::Expiry => "expiry",
            MedicineOperation::Usage => "usage",
            MedicineOperation::Query => "query",
        }
    }
}

pub const USAGE_TOP_TEN: &str = "SELECT m.\"productName\", COUNT(pi.id) AS usage_count \
     FROM medicines m JOIN prescription_items pi ON m.id = pi.\"medicineId\" \
     GROUP BY m.\"productName\" ORDER BY usage_count DESC LIMIT 10";

/// Batches expiring within `days` days, soonest first. Past-dated batches are included.
pub fn expiry_statement(days: u32) -> String {
    format!(
        "SELECT m.\"productName\", i.\"expiryDate\", i.quantity \
         FROM medicines m JOIN inventory i ON m.id = i.\"medicineId\" \
         WHERE i.\"expiryDate\" < NOW() + INTERVAL '{days} days' \
         ORDER BY i.\"expiryDate\""
    )
}

const EXPIRY_LISTING_LIMIT: usize = 10;

/// Lists at most ten batches, soonest first.
pub fn format_expiry(rows: &[Row], days: u32) -> String {
    if rows.is_empty() {
        return format!("No medicines expiring within the next {days} days.");
    }
    let mut out = String::from("Medicines expiring soon:");
    for row in rows.iter().take(EXPIRY_LISTING_LIMIT) {
        out.push_str(&format!(
            "\n- {}: expires {}, quantity: {}",
            field(row, "productName"),
            field(row, "expiryDate"),
            field(row, "quantity")
        ));
    }
    out
}

pub fn format_usage(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No usage data available.".to_string();
    }
    let mut out = String::from("Top 10 medicines by usage:");
    for row in rows {
        out.push_str(&format!(
            "\n- {}: {} prescriptions",
            field(row, "productName"),
            field(row, "usage_count")
        ));
    }
    out
}

pub struct MedicineHandler {
    classifier: OperationClassifier<MedicineOperation>,
    executor: QueryExecutor,
    query_loop: AdaptiveQueryLoop,
    expiry_window_days: u32,
}

impl MedicineHandler {
    pub fn new(context: &HandlerContext) -> Self {
        Self {
            classifier: OperationClassifier::new(context.oracle.clone(), "medicine-related"),
            executor: context.executor(),
            query_loop: context.delegated_loop(),
            expiry_window_days: context.settings.expiry_window_days,
        }
    }
}

#[async_trait]
impl DomainHandler for MedicineHandler {
    fn name(&self) -> &str {
        "medicine"
    }

    fn domain(&self) -> Domain {
        Domain::Medicine
    }

    #[instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    async fn handle(&self, request: &Request) -> Result<String, HandlerError> {
        let operation = self.classifier.classify(&request.text).await;
        info!(operation = operation.label(), "Medicine operation classified");

        match operation {
            MedicineOperation::Expiry => {
                let statement = expiry_statement(self.expiry_window_days);
                let rows = run_template(&self.executor, "medicine.expiry", &statement, &[]).await?;
                Ok(format_expiry(&rows, self.expiry_window_days))
            }
            MedicineOperation::Usage => {
                let rows = run_template(&self.executor, "medicine.usage", USAGE_TOP_TEN, &[]).await?;
                Ok(format_usage(&rows))
            }
            MedicineOperation::Inflow | MedicineOperation::Outflow | MedicineOperation::Query => {
                Ok(self.query_loop.answer(&request.text).await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::row;
    use serde_json::json;

    #[test]
    fn expiry_statement_embeds_window() {
        let statement = expiry_statement(45);
        assert!(statement.contains("INTERVAL '45 days'"));
        assert!(statement.contains("i.\"medicineId\""));
    }

    #[test]
    fn expiry_rows_are_listed() {
        let rows = vec![row(&[
            ("productName", json!("Amoxicillin 500mg")),
            ("expiryDate", json!("2026-10-25")),
            ("quantity", json!(40)),
        ])];
        assert_eq!(
            format_expiry(&rows, 30),
            "Medicines expiring soon:\n- Amoxicillin 500mg: expires 2026-10-25, quantity: 40"
        );
        assert_eq!(
            format_expiry(&[], 30),
            "No medicines expiring within the next 30 days."
        );
    }

    #[test]
    fn expiry_listing_stops_at_ten_batches() {
        let rows: Vec<Row> = (1..=12)
            .map(|n| {
                row(&[
                    ("productName", json!(format!("Batch {n}"))),
                    ("expiryDate", json!(format!("2026-11-{n:02}"))),
                    ("quantity", json!(n)),
                ])
            })
            .collect();
        let text = format_expiry(&rows, 30);
        assert_eq!(text.lines().count(), 11);
        assert!(text.contains("- Batch 10: expires 2026-11-10"));
        assert!(!text.contains("Batch 11"));
    }

    #[test]
    fn usage_rows_are_listed() {
        let rows = vec![row(&[
            ("productName", json!("Paracetamol 500mg")),
            ("usage_count", json!(12)),
        ])];
        assert_eq!(
            format_usage(&rows),
            "Top 10 medicines by usage:\n- Paracetamol 500mg: 12 prescriptions"
        );
        assert_eq!(format_usage(&[]), "No usage data available.");
    }
}
