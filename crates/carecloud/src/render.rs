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

use crate::query::QueryOutcome;
use crate::store::{display_value, Row};
use llm_contracts::{PromptPurpose, TextOracle};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_LISTED_NAMES: usize = 5;
const PREVIEW_NAMES: usize = 3;

/// Turns a loop outcome into a reply. Rows are summarised by the oracle;
/// a blank, short or failed summary falls back to [`ResultRenderer::fallback_format`].
pub struct ResultRenderer {
    oracle: Arc<dyn TextOracle>,
    row_summary_limit: usize,
    min_summary_chars: usize,
    name_fields: Vec<String>,
}

impl ResultRenderer {
    pub fn new(
        oracle: Arc<dyn TextOracle>,
        row_summary_limit: usize,
        min_summary_chars: usize,
        name_fields: Vec<String>,
    ) -> Self {
        Self {
            oracle,
            row_summary_limit,
            min_summary_chars,
            name_fields,
        }
    }

    pub async fn render(
        &self,
        outcome: &QueryOutcome,
        request_text: &str,
        statement: Option<&str>,
    ) -> String {
        match outcome {
            QueryOutcome::Rows(rows) if rows.is_empty() => {
                format!("No results found for your request: {request_text}")
            }
            QueryOutcome::Rows(rows) => self.summarise(rows, request_text, statement).await,
            QueryOutcome::Failure { message, attempts } => format!(
                "I couldn't complete that request after {attempts} attempts. Last error: {message}"
            ),
        }
    }

    async fn summarise(&self, rows: &[Row], request_text: &str, statement: Option<&str>) -> String {
        let preview: Vec<&Row> = rows.iter().take(self.row_summary_limit).collect();
        let preview_json = serde_json::to_string(&preview).unwrap_or_default();
        let prompt = format!(
            "Format these database query results into a natural language response for a medical AI assistant.\n\n\
             Original request: {request_text}\n\
             SQL query executed: {}\n\
             Results ({} of {} rows): {preview_json}\n\n\
             Provide a clear, concise, and user-friendly summary of the results. \
             Focus on the key information and present it in a natural way that would be helpful for medical professionals.",
            statement.unwrap_or("(fixed template)"),
            preview.len(),
            rows.len(),
        );

        match self
            .oracle
            .complete_text(&prompt, PromptPurpose::ResultSummary)
            .await
        {
            Ok(summary) => {
                let summary = summary.trim();
                if summary.chars().count() > self.min_summary_chars {
                    return summary.to_string();
                }
                debug!(length = summary.len(), "Summary too short, using fallback format");
            }
            Err(e) => warn!(error = %e, "Result summary failed, using fallback format"),
        }
        self.fallback_format(rows)
    }

    fn name_field<'a>(&self, row: &'a Row) -> Option<&'a str> {
        self.name_fields
            .iter()
            .find_map(|field| row.get_key_value(field.as_str()))
            .map(|(key, _)| key.as_str())
    }

    fn display_name(&self, row: &Row, field: &str) -> String {
        let name = row.get(field).map(display_value).unwrap_or_default();
        if field == "firstName" {
            if let Some(last) = row.get("lastName").filter(|v| !v.is_null()) {
                return format!("{name} {}", display_value(last));
            }
        }
        name
    }

    /// Deterministic rendering used when the oracle cannot summarise.
    pub fn fallback_format(&self, rows: &[Row]) -> String {
        match rows {
            [] => "No results found.".to_string(),
            [row] => match self.name_field(row) {
                Some(field) => {
                    let mut out = format!("Found {}", self.display_name(row, field));
                    for (key, value) in row {
                        if key == field || (field == "firstName" && key == "lastName") {
                            continue;
                        }
                        if value.is_null() {
                            continue;
                        }
                        out.push_str(&format!("\n{key}: {}", display_value(value)));
                    }
                    out
                }
                None => format!("Found result: {}", inline_pairs(row)),
            },
            _ => match rows.first().and_then(|row| self.name_field(row)) {
                Some(field) => {
                    let names: Vec<String> = rows
                        .iter()
                        .filter(|row| row.get(field).is_some_and(|v| !v.is_null()))
                        .map(|row| self.display_name(row, field))
                        .collect();
                    if rows.len() <= MAX_LISTED_NAMES {
                        format!("Found {} results: {}", rows.len(), names.join(", "))
                    } else {
                        let first: Vec<&str> =
                            names.iter().take(PREVIEW_NAMES).map(String::as_str).collect();
                        format!(
                            "Found {} results. First few: {}...",
                            rows.len(),
                            first.join(", ")
                        )
                    }
                }
                None => format!("Found {} results for your query.", rows.len()),
            },
        }
    }
}

fn inline_pairs(row: &Row) -> String {
    row.iter()
        .map(|(key, value): (&String, &Value)| format!("{key}: {}", display_value(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{row, ScriptedOracle};
    use serde_json::json;

    fn renderer(oracle: Arc<ScriptedOracle>) -> ResultRenderer {
        ResultRenderer::new(
            oracle,
            10,
            10,
            ["productName", "name", "firstName", "testName", "supplier"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn medicines(n: usize) -> Vec<Row> {
        (1..=n)
            .map(|i| row(&[("productName", json!(format!("Medicine {i}")))]))
            .collect()
    }

    #[tokio::test]
    async fn empty_rows_skip_the_oracle() {
        let oracle = Arc::new(ScriptedOracle::new());
        let text = renderer(oracle.clone())
            .render(&QueryOutcome::Rows(Vec::new()), "show me unicorns", None)
            .await;
        assert_eq!(text, "No results found for your request: show me unicorns");
        assert_eq!(oracle.total_calls(), 0);
    }

    #[tokio::test]
    async fn summary_is_used_when_long_enough() {
        let oracle = Arc::new(ScriptedOracle::new().reply(
            PromptPurpose::ResultSummary,
            "  There are two medicines in stock: Medicine 1 and Medicine 2.  ",
        ));
        let text = renderer(oracle)
            .render(&QueryOutcome::Rows(medicines(2)), "list medicines", None)
            .await;
        assert_eq!(
            text,
            "There are two medicines in stock: Medicine 1 and Medicine 2."
        );
    }

    #[tokio::test]
    async fn short_or_failed_summary_falls_back() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply(PromptPurpose::ResultSummary, "ok")
                .fail(PromptPurpose::ResultSummary, "rate limited"),
        );
        let renderer = renderer(oracle);
        let rows = QueryOutcome::Rows(medicines(2));
        assert_eq!(
            renderer.render(&rows, "list", None).await,
            "Found 2 results: Medicine 1, Medicine 2"
        );
        assert_eq!(
            renderer.render(&rows, "list", None).await,
            "Found 2 results: Medicine 1, Medicine 2"
        );
    }

    #[tokio::test]
    async fn summary_prompt_is_limited_to_configured_rows() {
        let oracle = Arc::new(ScriptedOracle::new());
        renderer(oracle.clone())
            .render(&QueryOutcome::Rows(medicines(25)), "list", Some("SELECT 1"))
            .await;
        let prompt = &oracle.prompts(PromptPurpose::ResultSummary)[0];
        assert!(prompt.contains("Results (10 of 25 rows)"));
        assert!(prompt.contains("Medicine 10"));
        assert!(!prompt.contains("Medicine 11"));
        assert!(prompt.contains("SQL query executed: SELECT 1"));
    }

    #[tokio::test]
    async fn failure_outcome_names_attempts_and_error() {
        let text = renderer(Arc::new(ScriptedOracle::new()))
            .render(
                &QueryOutcome::Failure {
                    message: "relation \"medicine\" does not exist".to_string(),
                    attempts: 5,
                },
                "list",
                None,
            )
            .await;
        assert!(text.contains("5 attempts"));
        assert!(text.contains("relation \"medicine\" does not exist"));
    }

    #[test]
    fn single_named_row_lists_remaining_fields() {
        let renderer = renderer(Arc::new(ScriptedOracle::new()));
        let rows = vec![row(&[
            ("productName", json!("Paracetamol 500mg")),
            ("productPrice", json!(4.5)),
            ("sideEffects", Value::Null),
        ])];
        assert_eq!(
            renderer.fallback_format(&rows),
            "Found Paracetamol 500mg\nproductPrice: 4.5"
        );
    }

    #[test]
    fn single_generic_row_is_inlined() {
        let renderer = renderer(Arc::new(ScriptedOracle::new()));
        let rows = vec![row(&[("count", json!(42)), ("status", json!("ok"))])];
        assert_eq!(
            renderer.fallback_format(&rows),
            "Found result: count: 42, status: ok"
        );
    }

    #[test]
    fn patient_names_join_first_and_last() {
        let renderer = renderer(Arc::new(ScriptedOracle::new()));
        let rows = vec![
            row(&[("firstName", json!("Ada")), ("lastName", json!("Okafor"))]),
            row(&[("firstName", json!("Lin")), ("lastName", json!("Wei"))]),
        ];
        assert_eq!(
            renderer.fallback_format(&rows),
            "Found 2 results: Ada Okafor, Lin Wei"
        );
    }

    #[test]
    fn many_rows_show_a_preview_or_a_count() {
        let renderer = renderer(Arc::new(ScriptedOracle::new()));
        assert_eq!(
            renderer.fallback_format(&medicines(7)),
            "Found 7 results. First few: Medicine 1, Medicine 2, Medicine 3..."
        );
        let generic: Vec<Row> = (0..3).map(|i| row(&[("total", json!(i))])).collect();
        assert_eq!(
            renderer.fallback_format(&generic),
            "Found 3 results for your query."
        );
    }
}
