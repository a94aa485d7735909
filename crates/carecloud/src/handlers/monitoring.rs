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

use super::{
    extract_patient_id, run_template, DomainHandler, HandlerContext, HandlerError,
    OperationClassifier, OperationKind,
};
use crate::query::{AdaptiveQueryLoop, QueryExecutor};
use crate::router::{Domain, Request};
use crate::store::{field, Row};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringOperation {
    Vitals,
    History,
    Alerts,
    Monitoring,
    Query,
}

impl OperationKind for MonitoringOperation {
    const DEFAULT: Self = MonitoringOperation::Query;
    const LABELS: &'static [(&'static str, Self)] = &[
        ("vitals", MonitoringOperation::Vitals),
        ("history", MonitoringOperation::History),
        ("alerts", MonitoringOperation::Alerts),
        ("monitoring", MonitoringOperation::Monitoring),
        ("query", MonitoringOperation::Query),
    ];
    const DESCRIPTIONS: &'static str = "\
- vitals: checking blood pressure, heart rate, temperature, oxygen levels
- history: viewing medical records, past diagnoses, treatment history
- alerts: critical health alerts, abnormal readings, emergency notifications
- monitoring: continuous health monitoring, trend analysis, preventive care
- query: general patient information, demographics, basic health status";

    fn label(&self) -> &'static str {
        match self {
            MonitoringOperation::Vitals => "vitals",
            MonitoringOperation::History => "history",
            MonitoringOperation::Alerts => "alerts",
            MonitoringOperation::Monitoring => "monitoring",
            MonitoringOperation::Query => "query",
        }
    }
}

pub const PATIENT_BY_ID: &str = "SELECT * FROM patients WHERE id::text = $1";

pub const VITALS_FOR_PATIENT: &str = "SELECT * FROM medical_records \
     WHERE \"patientId\"::text = $1 AND \"recordType\" = 'vitals' \
     ORDER BY \"recordDate\" DESC LIMIT 5";

pub const VITALS_OVERVIEW: &str = "SELECT p.\"firstName\", p.\"lastName\", p.id, COUNT(mr.id) AS records \
     FROM patients p LEFT JOIN medical_records mr ON p.id = mr.\"patientId\" AND mr.\"recordType\" = 'vitals' \
     GROUP BY p.id, p.\"firstName\", p.\"lastName\" ORDER BY records DESC LIMIT 10";

pub const HISTORY_FOR_PATIENT: &str = "SELECT * FROM medical_records \
     WHERE \"patientId\"::text = $1 ORDER BY \"recordDate\" DESC LIMIT 10";

pub const PRESCRIPTION_COUNT: &str = "SELECT COUNT(pi.id) AS prescriptions \
     FROM prescriptions pr LEFT JOIN prescription_items pi ON pr.id = pi.\"prescriptionId\" \
     WHERE pr.\"patientId\"::text = $1";

pub const HISTORY_OVERVIEW: &str = "SELECT p.\"firstName\", p.\"lastName\", p.id, \
     COUNT(DISTINCT mr.id) AS records, COUNT(DISTINCT pr.id) AS prescriptions \
     FROM patients p LEFT JOIN medical_records mr ON p.id = mr.\"patientId\" \
     LEFT JOIN prescriptions pr ON p.id = pr.\"patientId\" \
     GROUP BY p.id, p.\"firstName\", p.\"lastName\" ORDER BY records DESC LIMIT 10";

pub const ALERTS_FOR_PATIENT: &str = "SELECT lr.*, lt.\"testName\" \
     FROM lab_results lr JOIN lab_tests lt ON lr.\"testId\" = lt.id \
     WHERE lr.\"patientId\"::text = $1 AND lr.\"isNormal\" = false \
     ORDER BY lr.\"testDate\" DESC LIMIT 5";

pub const ALERTS_OVERVIEW: &str = "SELECT p.\"firstName\", p.\"lastName\", p.id, COUNT(lr.id) AS abnormal_results \
     FROM patients p LEFT JOIN lab_results lr ON p.id = lr.\"patientId\" AND lr.\"isNormal\" = false \
     GROUP BY p.id, p.\"firstName\", p.\"lastName\" HAVING COUNT(lr.id) > 0 \
     ORDER BY abnormal_results DESC LIMIT 10";

pub const RECENT_RECORDS: &str = "SELECT * FROM medical_records \
     WHERE \"patientId\"::text = $1 ORDER BY \"recordDate\" DESC LIMIT 5";

pub const RECENT_LAB_RESULTS: &str = "SELECT lr.*, lt.\"testName\" \
     FROM lab_results lr JOIN lab_tests lt ON lr.\"testId\" = lt.id \
     WHERE lr.\"patientId\"::text = $1 ORDER BY lr.\"testDate\" DESC LIMIT 10";

pub const MISSING_PATIENT_ID: &str = "Please provide a valid patient ID for monitoring.";

fn full_name(row: &Row) -> String {
    format!("{} {}", field(row, "firstName"), field(row, "lastName"))
}

fn field_or(row: &Row, column: &str, fallback: &str) -> String {
    match row.get(column) {
        None | Some(Value::Null) => fallback.to_string(),
        Some(_) => field(row, column),
    }
}

fn patient_heading(title: &str, patient: Option<&Row>, patient_id: &str) -> String {
    match patient {
        Some(p) => format!("{title} for {} (ID: {patient_id})\n\n", full_name(p)),
        None => format!("{title} for patient ID: {patient_id}\n\n"),
    }
}

fn record_line(record: &Row) -> String {
    format!(
        "  - {}: {} - {}\n",
        field(record, "recordDate"),
        field(record, "recordType"),
        field(record, "description")
    )
}

pub fn format_patient_vitals(patient: Option<&Row>, vitals: &[Row], patient_id: &str) -> String {
    let mut out = patient_heading("Patient vitals", patient, patient_id);
    if vitals.is_empty() {
        out.push_str("No recent vitals records found for this patient.");
        return out;
    }
    out.push_str(&format!("Recent vitals ({} records):\n", vitals.len()));
    for vital in vitals {
        out.push_str(&format!(
            "  - {}: {}\n",
            field(vital, "recordDate"),
            field(vital, "description")
        ));
    }
    out.trim_end().to_string()
}

pub fn format_vitals_overview(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No patient vitals data available.".to_string();
    }
    let mut out = String::from("Patient vitals overview:\n");
    for row in rows {
        out.push_str(&format!(
            "  - {} (ID: {}): {} vitals records\n",
            full_name(row),
            field(row, "id"),
            field(row, "records")
        ));
    }
    out.push_str("\nSpecify a patient ID for detailed vitals information.");
    out
}

pub fn format_patient_history(
    patient: Option<&Row>,
    records: &[Row],
    prescriptions: Option<&Row>,
    patient_id: &str,
) -> String {
    let mut out = patient_heading("Medical history", patient, patient_id);
    if let Some(p) = patient {
        out.push_str(&format!(
            "Patient info: {}\nAllergies: {}\n\n",
            field_or(p, "medicalHistory", "No history recorded"),
            field_or(p, "allergies", "None listed")
        ));
    }
    if records.is_empty() {
        out.push_str("No medical records found.\n\n");
    } else {
        out.push_str(&format!("Medical records ({} found):\n", records.len()));
        for record in records {
            out.push_str(&record_line(record));
            if let Some(diagnosis) = record.get("diagnosis").filter(|v| !v.is_null()) {
                out.push_str(&format!("    Diagnosis: {}\n", crate::store::display_value(diagnosis)));
            }
            if let Some(treatment) = record.get("treatment").filter(|v| !v.is_null()) {
                out.push_str(&format!("    Treatment: {}\n", crate::store::display_value(treatment)));
            }
        }
        out.push('\n');
    }
    if let Some(count) = prescriptions {
        out.push_str(&format!(
            "Total prescriptions: {}\n",
            field_or(count, "prescriptions", "0")
        ));
    }
    out.trim_end().to_string()
}

pub fn format_history_overview(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No medical history data available.".to_string();
    }
    let mut out = String::from("Patient medical history overview:\n");
    for row in rows {
        out.push_str(&format!(
            "  - {} (ID: {}): {} records, {} prescriptions\n",
            full_name(row),
            field(row, "id"),
            field(row, "records"),
            field(row, "prescriptions")
        ));
    }
    out.push_str("\nSpecify a patient ID for detailed medical history.");
    out
}

pub fn format_patient_alerts(patient: Option<&Row>, alerts: &[Row], patient_id: &str) -> String {
    let mut out = patient_heading("Health alerts", patient, patient_id);
    if alerts.is_empty() {
        out.push_str("No critical health alerts found.\n");
    } else {
        out.push_str(&format!("Critical findings ({} alerts):\n", alerts.len()));
        for alert in alerts {
            out.push_str(&format!(
                "  - {} ({}): {} - {}\n",
                field_or(alert, "testName", "Unknown test"),
                field(alert, "testDate"),
                field(alert, "result"),
                field_or(alert, "notes", "Requires attention")
            ));
        }
    }
    if let Some(contact) = patient
        .and_then(|p| p.get("emergencyContact"))
        .filter(|v| !v.is_null())
    {
        out.push_str(&format!(
            "\nEmergency contact: {}\n",
            crate::store::display_value(contact)
        ));
    }
    out.trim_end().to_string()
}

pub fn format_alerts_overview(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No critical health alerts at this time.".to_string();
    }
    let mut out = String::from("Patients with health alerts:\n");
    for row in rows {
        out.push_str(&format!(
            "  - {} (ID: {}): {} abnormal results\n",
            full_name(row),
            field(row, "id"),
            field(row, "abnormal_results")
        ));
    }
    out.push_str("\nSpecify a patient ID for detailed alert information.");
    out
}

pub fn format_monitoring_report(
    patient: Option<&Row>,
    records: &[Row],
    labs: &[Row],
    patient_id: &str,
) -> String {
    let mut out = format!("Patient monitoring report for ID: {patient_id}\n\n");
    match patient {
        Some(p) => out.push_str(&format!(
            "Patient information:\n  Name: {}\n  DOB: {}\n  Blood type: {}\n  Allergies: {}\n\n",
            full_name(p),
            field(p, "dateOfBirth"),
            field(p, "bloodType"),
            field_or(p, "allergies", "None listed")
        )),
        None => out.push_str(&format!("Patient data not found for ID: {patient_id}\n\n")),
    }

    if records.is_empty() {
        out.push_str("No recent medical records found.\n\n");
    } else {
        out.push_str(&format!("Recent medical records ({} found):\n", records.len()));
        for record in records {
            out.push_str(&record_line(record));
        }
        out.push('\n');
    }

    if labs.is_empty() {
        out.push_str("No recent lab results found.");
    } else {
        out.push_str(&format!("Recent lab results ({} found):\n", labs.len()));
        for lab in labs {
            let status = match lab.get("isNormal") {
                Some(Value::Bool(true)) => "normal",
                _ => "abnormal",
            };
            out.push_str(&format!(
                "  - {} ({}): {} [{status}]\n",
                field_or(lab, "testName", "Unknown test"),
                field(lab, "testDate"),
                field(lab, "result")
            ));
        }
    }
    out.trim_end().to_string()
}

pub struct MonitoringHandler {
    classifier: OperationClassifier<MonitoringOperation>,
    executor: QueryExecutor,
    query_loop: AdaptiveQueryLoop,
}

impl MonitoringHandler {
    pub fn new(context: &HandlerContext) -> Self {
        Self {
            classifier: OperationClassifier::new(context.oracle.clone(), "patient monitoring"),
            executor: context.executor(),
            query_loop: context.delegated_loop(),
        }
    }

    async fn for_patient(
        &self,
        template: &str,
        statement: &str,
        patient_id: &str,
    ) -> Result<Vec<Row>, HandlerError> {
        let params = [Value::String(patient_id.to_string())];
        run_template(&self.executor, template, statement, &params).await
    }

    async fn patient(&self, patient_id: &str) -> Result<Option<Row>, HandlerError> {
        Ok(self
            .for_patient("monitoring.patient", PATIENT_BY_ID, patient_id)
            .await?
            .into_iter()
            .next())
    }

    async fn vitals(&self, patient_id: Option<String>) -> Result<String, HandlerError> {
        match patient_id {
            Some(id) => {
                let patient = self.patient(&id).await?;
                let vitals = self
                    .for_patient("monitoring.vitals", VITALS_FOR_PATIENT, &id)
                    .await?;
                Ok(format_patient_vitals(patient.as_ref(), &vitals, &id))
            }
            None => {
                let rows =
                    run_template(&self.executor, "monitoring.vitals_overview", VITALS_OVERVIEW, &[])
                        .await?;
                Ok(format_vitals_overview(&rows))
            }
        }
    }

    async fn history(&self, patient_id: Option<String>) -> Result<String, HandlerError> {
        match patient_id {
            Some(id) => {
                let patient = self.patient(&id).await?;
                let records = self
                    .for_patient("monitoring.history", HISTORY_FOR_PATIENT, &id)
                    .await?;
                let prescriptions = self
                    .for_patient("monitoring.prescription_count", PRESCRIPTION_COUNT, &id)
                    .await?;
                Ok(format_patient_history(
                    patient.as_ref(),
                    &records,
                    prescriptions.first(),
                    &id,
                ))
            }
            None => {
                let rows = run_template(
                    &self.executor,
                    "monitoring.history_overview",
                    HISTORY_OVERVIEW,
                    &[],
                )
                .await?;
                Ok(format_history_overview(&rows))
            }
        }
    }

    async fn alerts(&self, patient_id: Option<String>) -> Result<String, HandlerError> {
        match patient_id {
            Some(id) => {
                let patient = self.patient(&id).await?;
                let alerts = self
                    .for_patient("monitoring.alerts", ALERTS_FOR_PATIENT, &id)
                    .await?;
                Ok(format_patient_alerts(patient.as_ref(), &alerts, &id))
            }
            None => {
                let rows =
                    run_template(&self.executor, "monitoring.alerts_overview", ALERTS_OVERVIEW, &[])
                        .await?;
                Ok(format_alerts_overview(&rows))
            }
        }
    }

    async fn monitoring_report(&self, patient_id: Option<String>) -> Result<String, HandlerError> {
        let Some(id) = patient_id else {
            return Ok(MISSING_PATIENT_ID.to_string());
        };
        let patient = self.patient(&id).await?;
        let records = self
            .for_patient("monitoring.recent_records", RECENT_RECORDS, &id)
            .await?;
        let labs = self
            .for_patient("monitoring.recent_labs", RECENT_LAB_RESULTS, &id)
            .await?;
        Ok(format_monitoring_report(patient.as_ref(), &records, &labs, &id))
    }
}

#[async_trait]
impl DomainHandler for MonitoringHandler {
    fn name(&self) -> &str {
        "monitoring"
    }

    fn domain(&self) -> Domain {
        Domain::Monitoring
    }

    #[instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    async fn handle(&self, request: &Request) -> Result<String, HandlerError> {
        let operation = self.classifier.classify(&request.text).await;
        let patient_id = extract_patient_id(&request.text);
        info!(
            operation = operation.label(),
            has_patient_id = patient_id.is_some(),
            "Monitoring operation classified"
        );

        match operation {
            MonitoringOperation::Vitals => self.vitals(patient_id).await,
            MonitoringOperation::History => self.history(patient_id).await,
            MonitoringOperation::Alerts => self.alerts(patient_id).await,
            MonitoringOperation::Monitoring => self.monitoring_report(patient_id).await,
            MonitoringOperation::Query => Ok(self.query_loop.answer(&request.text).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::row;
    use serde_json::json;

    fn patient() -> Row {
        row(&[
            ("id", json!("3f2504e0-4f89-11d3-9a0c-0305e82c3301")),
            ("firstName", json!("Ada")),
            ("lastName", json!("Okafor")),
            ("emergencyContact", json!("+44 20 7946 0000")),
            ("allergies", Value::Null),
        ])
    }

    #[test]
    fn patient_templates_bind_the_id() {
        for statement in [
            PATIENT_BY_ID,
            VITALS_FOR_PATIENT,
            HISTORY_FOR_PATIENT,
            PRESCRIPTION_COUNT,
            ALERTS_FOR_PATIENT,
            RECENT_RECORDS,
            RECENT_LAB_RESULTS,
        ] {
            assert!(statement.contains("$1"), "{statement}");
        }
    }

    #[test]
    fn vitals_without_records_says_so() {
        let p = patient();
        let text = format_patient_vitals(Some(&p), &[], "3f2504e0-4f89-11d3-9a0c-0305e82c3301");
        assert!(text.starts_with("Patient vitals for Ada Okafor"));
        assert!(text.ends_with("No recent vitals records found for this patient."));
    }

    #[test]
    fn alerts_include_emergency_contact() {
        let p = patient();
        let alerts = vec![row(&[
            ("testName", json!("HbA1c")),
            ("testDate", json!("2026-10-01")),
            ("result", json!("9.1%")),
            ("notes", Value::Null),
        ])];
        let text = format_patient_alerts(Some(&p), &alerts, "id-1");
        assert!(text.contains("Critical findings (1 alerts):"));
        assert!(text.contains("HbA1c (2026-10-01): 9.1% - Requires attention"));
        assert!(text.contains("Emergency contact: +44 20 7946 0000"));
    }

    #[test]
    fn history_uses_placeholders_for_missing_fields() {
        let p = patient();
        let count = row(&[("prescriptions", json!(3))]);
        let text = format_patient_history(Some(&p), &[], Some(&count), "id-1");
        assert!(text.contains("Patient info: No history recorded"));
        assert!(text.contains("Allergies: None listed"));
        assert!(text.contains("No medical records found."));
        assert!(text.ends_with("Total prescriptions: 3"));
    }

    #[test]
    fn monitoring_report_marks_lab_status() {
        let labs = vec![
            row(&[("testName", json!("CBC")), ("isNormal", json!(true))]),
            row(&[("testName", json!("Lipids")), ("isNormal", json!(false))]),
        ];
        let text = format_monitoring_report(None, &[], &labs, "id-9");
        assert!(text.contains("Patient data not found for ID: id-9"));
        assert!(text.contains("CBC (N/A): N/A [normal]"));
        assert!(text.contains("Lipids (N/A): N/A [abnormal]"));
    }

    #[test]
    fn overviews_have_no_data_messages() {
        assert_eq!(format_vitals_overview(&[]), "No patient vitals data available.");
        assert_eq!(format_history_overview(&[]), "No medical history data available.");
        assert_eq!(format_alerts_overview(&[]), "No critical health alerts at this time.");
    }
}
