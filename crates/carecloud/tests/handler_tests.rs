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
use carecloud::handlers::monitoring::MISSING_PATIENT_ID;
use carecloud::handlers::{DomainHandler, HandlerContext, StockHandler};
use carecloud::metrics::LoopMetrics;
use carecloud::query::AdaptiveQueryLoop;
use carecloud::router::{Coordinator, Domain};
use carecloud::testing::{row, ScriptedOracle, SeededStore};
use llm_contracts::PromptPurpose;
use serde_json::{json, Value};
use std::sync::Arc;

const PATIENT_ID: &str = "6fa459ea-ee8a-3ca4-894e-db77e160355e";

fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.router.retry_delay_ms = 0;
    config
}

fn coordinator(oracle: &Arc<ScriptedOracle>, store: &Arc<SeededStore>) -> Coordinator {
    Coordinator::from_config(&test_config(), oracle.clone(), store.clone())
}

#[tokio::test]
async fn test_medicine_expiry_uses_fixed_template() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .reply(PromptPurpose::DomainClassification, "medicine")
            .reply(PromptPurpose::OperationClassification, "expiry"),
    );
    let store = Arc::new(SeededStore::clinic());
    let coordinator = coordinator(&oracle, &store);

    let (text, domain) = coordinator
        .process("which medicines expire this month?", None)
        .await;

    assert_eq!(domain, Domain::Medicine);
    assert_eq!(
        text,
        "[MEDICINE] Medicines expiring soon:\n\
         - Amoxicillin 500mg: expires 2026-10-25, quantity: 40\n\
         - Ibuprofen 200mg: expires 2026-11-02, quantity: 8"
    );
    assert_eq!(oracle.calls(PromptPurpose::QuerySynthesis), 0);
    assert_eq!(store.metadata_calls(), 0);
    let statements = store.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("INTERVAL '30 days'"));
}

#[tokio::test]
async fn test_expiry_window_follows_configuration() {
    let oracle = Arc::new(
        ScriptedOracle::new().reply(PromptPurpose::OperationClassification, "expiry"),
    );
    let store = Arc::new(SeededStore::clinic());
    let mut config = test_config();
    config.handlers.expiry_window_days = 90;
    let coordinator = Coordinator::from_config(&config, oracle, store.clone());

    coordinator
        .process("expiring stock", Some("medicine"))
        .await;

    assert!(store.statements()[0].contains("INTERVAL '90 days'"));
}

#[tokio::test]
async fn test_off_vocabulary_operation_falls_back_to_query_loop() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .reply(PromptPurpose::OperationClassification, "teleport")
            .reply(PromptPurpose::QuerySynthesis, "SELECT productName FROM medicines"),
    );
    let store = Arc::new(SeededStore::clinic());
    let coordinator = coordinator(&oracle, &store);

    let (text, _) = coordinator.process("list all medicines", Some("medicine")).await;

    assert_eq!(
        text,
        "[MEDICINE] Found 4 results: Amoxicillin 500mg, Ibuprofen 200mg, Paracetamol 500mg, Cetirizine 10mg"
    );
    assert_eq!(oracle.calls(PromptPurpose::QuerySynthesis), 1);
    assert_eq!(store.statements(), vec!["SELECT \"productName\" FROM medicines".to_string()]);
}

#[tokio::test]
async fn test_monitoring_vitals_binds_patient_id() {
    let oracle = Arc::new(
        ScriptedOracle::new().reply(PromptPurpose::OperationClassification, "vitals"),
    );
    let store = Arc::new(
        SeededStore::clinic()
            .respond_to(
                "FROM patients WHERE",
                vec![row(&[
                    ("firstName", json!("Ada")),
                    ("lastName", json!("Okafor")),
                ])],
            )
            .respond_to(
                "'vitals'",
                vec![row(&[
                    ("recordDate", json!("2026-10-12")),
                    ("recordType", json!("vitals")),
                    ("description", json!("BP 120/80")),
                ])],
            ),
    );
    let coordinator = coordinator(&oracle, &store);

    let (text, domain) = coordinator
        .process(
            &format!("latest vitals for patient {}", PATIENT_ID.to_uppercase()),
            Some("monitoring"),
        )
        .await;

    assert_eq!(domain, Domain::Monitoring);
    let expected_id = PATIENT_ID.to_uppercase();
    assert!(text.starts_with(&format!(
        "[MONITORING] Patient vitals for Ada Okafor (ID: {expected_id})"
    )));
    assert!(text.contains("Recent vitals (1 records):"));
    let params = store.params();
    assert_eq!(params.len(), 2);
    assert!(params
        .iter()
        .all(|p| p == &vec![Value::String(expected_id.clone())]));
    assert_eq!(oracle.calls(PromptPurpose::QuerySynthesis), 0);
}

#[tokio::test]
async fn test_monitoring_report_without_patient_id_asks_for_one() {
    let oracle = Arc::new(
        ScriptedOracle::new().reply(PromptPurpose::OperationClassification, "monitoring"),
    );
    let store = Arc::new(SeededStore::clinic());
    let coordinator = coordinator(&oracle, &store);

    let (text, _) = coordinator
        .process("start continuous monitoring", Some("monitoring"))
        .await;

    assert_eq!(text, format!("[MONITORING] {MISSING_PATIENT_ID}"));
    assert_eq!(store.executions(), 0);
    assert_eq!(store.metadata_calls(), 0);
}

#[tokio::test]
async fn test_stock_reorder_lists_low_items() {
    let oracle = Arc::new(
        ScriptedOracle::new().reply(PromptPurpose::OperationClassification, "reorder"),
    );
    let store = Arc::new(SeededStore::new().respond_to(
        "WHERE i.quantity < 10",
        vec![row(&[
            ("productName", json!("Ibuprofen 200mg")),
            ("quantity", json!(8)),
            ("batchNumber", json!("IB-2291")),
        ])],
    ));
    let coordinator = coordinator(&oracle, &store);

    let (text, domain) = coordinator.process("what should I reorder?", Some("stock")).await;

    assert_eq!(domain, Domain::Stock);
    assert_eq!(
        text,
        "[STOCK] REORDER ALERTS - Items with low stock:\n\
         - Ibuprofen 200mg: Only 8 units remaining (Batch: IB-2291)\n\n\
         Recommendation: Reorder these items immediately."
    );
}

#[tokio::test]
async fn test_stock_reorder_with_nothing_low() {
    let oracle = Arc::new(
        ScriptedOracle::new().reply(PromptPurpose::OperationClassification, "reorder alerts"),
    );
    let store = Arc::new(SeededStore::new());
    let coordinator = coordinator(&oracle, &store);

    let (text, _) = coordinator.process("anything to reorder", Some("stock")).await;

    assert_eq!(
        text,
        "[STOCK] All items are sufficiently stocked. No reorder alerts."
    );
}

#[tokio::test]
async fn test_scheduling_cancel_delegates_to_query_loop() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .reply(PromptPurpose::DomainClassification, "appointment")
            .reply(PromptPurpose::OperationClassification, "cancel")
            .reply(
                PromptPurpose::QuerySynthesis,
                "UPDATE prescriptions SET status = 'cancelled' WHERE patientId::text = 'p-17'",
            ),
    );
    let store = Arc::new(SeededStore::clinic());
    let coordinator = coordinator(&oracle, &store);

    let (text, domain) = coordinator
        .process("cancel my appointment today", None)
        .await;

    assert_eq!(domain, Domain::Scheduling);
    assert_eq!(
        text,
        "[SCHEDULING] No results found for your request: cancel my appointment today"
    );
    assert_eq!(oracle.calls(PromptPurpose::QuerySynthesis), 1);
    assert_eq!(
        store.statements(),
        vec![
            "UPDATE prescriptions SET status = 'cancelled' WHERE \"patientId\"::text = 'p-17'"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn test_delegated_loop_is_capped_by_handler_budget() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .reply(PromptPurpose::OperationClassification, "query")
            .always(PromptPurpose::QuerySynthesis, "SELECT \"productName\" FROM medicine"),
    );
    let store = Arc::new(
        SeededStore::clinic()
            .fail_next("relation \"medicine\" does not exist")
            .fail_next("relation \"medicine\" does not exist")
            .fail_next("relation \"medicine\" does not exist")
            .fail_next("relation \"medicine\" does not exist"),
    );
    let coordinator = coordinator(&oracle, &store);

    let (text, _) = coordinator.process("what is in stock", Some("stock")).await;

    assert!(text.starts_with("[STOCK] I couldn't complete that request after 3 attempts."));
    assert!(text.contains("does not exist"));
    assert_eq!(store.executions(), 3);
    assert_eq!(coordinator.metrics()["query_loop.exhausted"], 1);
}

#[tokio::test]
async fn test_standalone_run_reports_store_errors_as_text() {
    let oracle = Arc::new(
        ScriptedOracle::new().reply(PromptPurpose::OperationClassification, "inventory"),
    );
    let store = Arc::new(SeededStore::clinic().offline());
    let config = test_config();
    let query_loop = AdaptiveQueryLoop::from_config(
        &config,
        oracle.clone(),
        store.clone(),
        Arc::new(LoopMetrics::new()),
    );
    let context = HandlerContext::new(oracle, query_loop, config.handlers.clone());
    let handler = StockHandler::new(&context);

    let text = handler.run("show inventory levels").await;

    assert!(text.starts_with("Error processing stock request: Store error:"));
    assert!(text.contains("store is offline"));
}
