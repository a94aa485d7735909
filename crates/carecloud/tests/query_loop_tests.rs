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

use carecloud::config::CoreConfig;
use carecloud::metrics::LoopMetrics;
use carecloud::query::{AdaptiveQueryLoop, QueryOutcome};
use carecloud::testing::{row, SeededStore, ScriptedOracle};
use llm_contracts::PromptPurpose;
use serde_json::json;
use std::sync::Arc;

const UNQUOTED_EXPIRY_QUERY: &str = "SELECT m.productName, i.expiryDate, i.quantity \
    FROM medicines m JOIN inventory i ON m.id = i.medicineId \
    WHERE i.expiryDate < NOW() + INTERVAL '30 days' ORDER BY i.expiryDate";

fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.router.retry_delay_ms = 0;
    config
}

fn build_loop(oracle: Arc<ScriptedOracle>, store: Arc<SeededStore>) -> AdaptiveQueryLoop {
    AdaptiveQueryLoop::from_config(&test_config(), oracle, store, Arc::new(LoopMetrics::new()))
}

#[tokio::test]
async fn test_expiring_medicines_end_to_end_with_fallback_rendering() {
    let oracle = Arc::new(
        ScriptedOracle::new().reply(
            PromptPurpose::QuerySynthesis,
            format!("```sql\n{UNQUOTED_EXPIRY_QUERY}\n```"),
        ),
    );
    let store = Arc::new(SeededStore::clinic());
    let query_loop = build_loop(oracle.clone(), store.clone());

    let answer = query_loop.answer("show me medicines expiring soon").await;

    assert_eq!(answer, "Found 2 results: Amoxicillin 500mg, Ibuprofen 200mg");
    let statements = store.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("m.\"productName\""));
    assert!(statements[0].contains("i.\"medicineId\""));
    assert!(statements[0].contains("i.\"expiryDate\" < NOW()"));
    assert!(!statements[0].contains("```"));
    assert_eq!(oracle.calls(PromptPurpose::QuerySynthesis), 1);
    assert_eq!(oracle.calls(PromptPurpose::ResultSummary), 1);
}

#[tokio::test]
async fn test_oracle_summary_is_returned_when_meaningful() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .reply(PromptPurpose::QuerySynthesis, UNQUOTED_EXPIRY_QUERY)
            .reply(
                PromptPurpose::ResultSummary,
                "Two medicines expire within 30 days: Amoxicillin 500mg and Ibuprofen 200mg.",
            ),
    );
    let store = Arc::new(SeededStore::clinic());
    let answer = build_loop(oracle, store)
        .answer("which medicines expire this month?")
        .await;
    assert!(answer.starts_with("Two medicines expire within 30 days"));
}

#[tokio::test]
async fn test_loop_never_exceeds_max_attempts() {
    let mut store = SeededStore::clinic();
    for _ in 0..10 {
        store = store.fail_next("column \"productname\" does not exist");
    }
    let store = Arc::new(store);
    let oracle = Arc::new(
        ScriptedOracle::new().always(PromptPurpose::QuerySynthesis, "SELECT productName FROM medicines"),
    );

    let outcome = build_loop(oracle.clone(), store.clone())
        .run("list all medicines")
        .await;

    match outcome {
        QueryOutcome::Failure { message, attempts } => {
            assert_eq!(attempts, 5);
            assert!(message.contains("does not exist"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(store.executions(), 5);
    assert_eq!(oracle.calls(PromptPurpose::QuerySynthesis), 5);
}

#[tokio::test]
async fn test_failure_text_is_fed_into_the_next_prompt() {
    let store = Arc::new(SeededStore::clinic().fail_next("relation \"medicine\" does not exist"));
    let oracle = Arc::new(
        ScriptedOracle::new()
            .reply(PromptPurpose::QuerySynthesis, "SELECT productName FROM medicine")
            .reply(PromptPurpose::QuerySynthesis, "SELECT productName FROM medicines"),
    );

    let outcome = build_loop(oracle.clone(), store.clone())
        .run("list all medicines")
        .await;

    match outcome {
        QueryOutcome::Rows(rows) => assert_eq!(rows.len(), 4),
        other => panic!("expected rows, got {other:?}"),
    }
    let prompts = oracle.prompts(PromptPurpose::QuerySynthesis);
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("PREVIOUS ATTEMPTS FAILED"));
    assert!(prompts[1].contains("PREVIOUS ATTEMPTS FAILED"));
    assert!(prompts[1].contains("relation \"medicine\" does not exist"));
    // Schema is read again after the execution failure.
    assert_eq!(store.metadata_calls(), 6);
}

#[tokio::test]
async fn test_recovers_on_third_attempt() {
    let store = Arc::new(
        SeededStore::clinic()
            .fail_next("connection reset by peer")
            .fail_next("canceling statement due to lock timeout"),
    );
    let oracle = Arc::new(
        ScriptedOracle::new().always(PromptPurpose::QuerySynthesis, "SELECT productName FROM medicines"),
    );

    let outcome = build_loop(oracle.clone(), store.clone())
        .run("list all medicines")
        .await;

    match outcome {
        QueryOutcome::Rows(rows) => assert_eq!(rows.len(), 4),
        other => panic!("expected rows, got {other:?}"),
    }
    assert_eq!(store.executions(), 3);
    let prompts = oracle.prompts(PromptPurpose::QuerySynthesis);
    assert_eq!(prompts.len(), 3);
    assert!(prompts[2].contains("connection reset by peer"));
    assert!(prompts[2].contains("lock timeout"));
}

#[tokio::test]
async fn test_disallowed_verb_is_never_executed() {
    let store = Arc::new(SeededStore::clinic());
    let oracle = Arc::new(
        ScriptedOracle::new()
            .reply(PromptPurpose::QuerySynthesis, "DROP TABLE medicines")
            .reply(PromptPurpose::QuerySynthesis, "SELECT productName FROM medicines"),
    );

    let outcome = build_loop(oracle.clone(), store.clone()).run("clean up").await;

    assert!(!outcome.is_failure());
    assert_eq!(store.executions(), 1);
    assert!(store.statements().iter().all(|s| !s.starts_with("DROP")));
    let prompts = oracle.prompts(PromptPurpose::QuerySynthesis);
    assert!(prompts[1].contains("Statement verb 'DROP' is not allowed"));
    // A synthesis failure keeps the cached schema.
    assert_eq!(store.metadata_calls(), 3);
}

#[tokio::test]
async fn test_empty_result_skips_the_summary_oracle() {
    let store = Arc::new(SeededStore::clinic());
    let oracle = Arc::new(
        ScriptedOracle::new().reply(PromptPurpose::QuerySynthesis, "SELECT * FROM doctors"),
    );

    let answer = build_loop(oracle.clone(), store)
        .answer("list all doctors")
        .await;

    assert_eq!(answer, "No results found for your request: list all doctors");
    assert_eq!(oracle.calls(PromptPurpose::ResultSummary), 0);
}

#[tokio::test]
async fn test_introspection_failure_still_attempts_synthesis() {
    let store = Arc::new(
        SeededStore::clinic()
            .fail_next_metadata("permission denied for schema information_schema"),
    );
    let oracle = Arc::new(
        ScriptedOracle::new().reply(PromptPurpose::QuerySynthesis, "SELECT productName FROM medicines"),
    );

    let outcome = build_loop(oracle.clone(), store.clone()).run("list medicines").await;

    assert!(matches!(outcome, QueryOutcome::Rows(ref rows) if rows.len() == 4));
    let prompt = &oracle.prompts(PromptPurpose::QuerySynthesis)[0];
    assert!(prompt.contains("Schema inspection failed: "));
    // Configured identifiers still repair the statement without a schema.
    assert!(store.statements()[0].contains("\"productName\""));
}

#[tokio::test]
async fn test_empty_store_renders_no_tables_in_prompt() {
    let store = Arc::new(SeededStore::new());
    let oracle = Arc::new(
        ScriptedOracle::new().reply(PromptPurpose::QuerySynthesis, "SELECT 1 AS ok"),
    );

    build_loop(oracle.clone(), store).run("anything at all").await;

    let prompt = &oracle.prompts(PromptPurpose::QuerySynthesis)[0];
    assert!(prompt.contains("DATABASE SCHEMA:\nNo tables found in database"));
}

#[tokio::test]
async fn test_loop_metrics_track_attempts_and_outcomes() {
    let store = Arc::new(SeededStore::clinic().fail_next("syntax error at or near \"FORM\""));
    let oracle = Arc::new(
        ScriptedOracle::new().always(PromptPurpose::QuerySynthesis, "SELECT productName FROM medicines"),
    );
    let metrics = Arc::new(LoopMetrics::new());
    let query_loop =
        AdaptiveQueryLoop::from_config(&test_config(), oracle, store, metrics.clone());

    query_loop.run("list medicines").await;

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot["query_loop.runs"], 1);
    assert_eq!(snapshot["query_loop.attempts"], 2);
    assert_eq!(snapshot["query_loop.execution_failures"], 1);
    assert_eq!(snapshot["query_loop.successes"], 1);
    assert_eq!(snapshot["query_loop.exhausted"], 0);
}

#[tokio::test]
async fn test_single_named_row_fallback_lists_fields() {
    let store = Arc::new(SeededStore::clinic().respond_to(
        "Paracetamol",
        vec![row(&[
            ("productName", json!("Paracetamol 500mg")),
            ("subCategory", json!("Analgesic")),
            ("productPrice", json!(4.5)),
        ])],
    ));
    let oracle = Arc::new(ScriptedOracle::new().reply(
        PromptPurpose::QuerySynthesis,
        "SELECT productName, subCategory, productPrice FROM drugs WHERE productName = 'Paracetamol 500mg'",
    ));

    let answer = build_loop(oracle, store).answer("tell me about paracetamol").await;

    assert_eq!(
        answer,
        "Found Paracetamol 500mg\nsubCategory: Analgesic\nproductPrice: 4.5"
    );
}
