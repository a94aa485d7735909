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

use llm_contracts::{PromptPurpose, TextOracle};
use std::fmt::Debug;
use tracing::{debug, warn};

/// Ordered label table. Exact matches win; otherwise the first entry whose key
/// appears inside the reply is taken, so longer keys must come before keys
/// they contain (`reschedule` before `schedule`).
#[derive(Debug, Clone)]
pub struct LabelTable<T> {
    entries: Vec<(String, T)>,
}

impl<T: Copy> LabelTable<T> {
    pub fn new(entries: &[(&str, T)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(key, value)| (normalise_label(key), *value))
                .collect(),
        }
    }

    pub fn resolve(&self, raw: &str) -> Option<T> {
        let label = normalise_label(raw);
        if label.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(key, _)| *key == label)
            .or_else(|| self.entries.iter().find(|(key, _)| label.contains(key.as_str())))
            .map(|(_, value)| *value)
    }
}

/// Lower-cases, strips surrounding quotes and punctuation, and joins words with `_`.
pub fn normalise_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Asks the oracle for a label and maps it through `table`. Errors, empty
/// replies and unknown labels all yield `default`.
pub async fn classify_with_default<T: Copy + Debug>(
    oracle: &dyn TextOracle,
    prompt: &str,
    purpose: PromptPurpose,
    table: &LabelTable<T>,
    default: T,
) -> T {
    match oracle.complete_text(prompt, purpose).await {
        Ok(reply) => match table.resolve(&reply) {
            Some(label) => {
                debug!(purpose = purpose.as_str(), reply = %reply.trim(), resolved = ?label, "Classification resolved");
                label
            }
            None => {
                debug!(purpose = purpose.as_str(), reply = %reply.trim(), fallback = ?default, "Unrecognised classification, using default");
                default
            }
        },
        Err(e) => {
            warn!(purpose = purpose.as_str(), error = %e, fallback = ?default, "Classification failed, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedOracle;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Schedule,
        Reschedule,
        Query,
    }

    fn table() -> LabelTable<Op> {
        LabelTable::new(&[
            ("reschedule", Op::Reschedule),
            ("schedule", Op::Schedule),
            ("query", Op::Query),
        ])
    }

    #[test]
    fn normalise_strips_noise() {
        assert_eq!(normalise_label("  \"Patient Monitoring\". "), "patient_monitoring");
        assert_eq!(normalise_label("stock-management"), "stock_management");
        assert_eq!(normalise_label("   "), "");
    }

    #[test]
    fn exact_then_substring_resolution() {
        let table = table();
        assert_eq!(table.resolve("schedule"), Some(Op::Schedule));
        assert_eq!(table.resolve("Reschedule."), Some(Op::Reschedule));
        assert_eq!(table.resolve("operation: reschedule"), Some(Op::Reschedule));
        assert_eq!(table.resolve("billing"), None);
        assert_eq!(table.resolve(""), None);
    }

    #[tokio::test]
    async fn oracle_failure_and_unknown_labels_default() {
        let oracle = ScriptedOracle::new()
            .fail(PromptPurpose::OperationClassification, "provider down")
            .reply(PromptPurpose::OperationClassification, "teleport");
        let table = table();

        let first = classify_with_default(
            &oracle,
            "prompt",
            PromptPurpose::OperationClassification,
            &table,
            Op::Query,
        )
        .await;
        let second = classify_with_default(
            &oracle,
            "prompt",
            PromptPurpose::OperationClassification,
            &table,
            Op::Query,
        )
        .await;

        assert_eq!(first, Op::Query);
        assert_eq!(second, Op::Query);
        assert_eq!(oracle.calls(PromptPurpose::OperationClassification), 2);
    }
}
