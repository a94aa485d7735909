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
pub enum SchedulingOperation {
    Schedule,
    Reschedule,
    Cancel,
    View,
    Query,
}

impl OperationKind for SchedulingOperation {
    const DEFAULT: Self = SchedulingOperation::Query;
    const LABELS: &'static [(&'static str, Self)] = &[
        ("reschedule", SchedulingOperation::Reschedule),
        ("schedule", SchedulingOperation::Schedule),
        ("cancel", SchedulingOperation::Cancel),
        ("view", SchedulingOperation::View),
        ("query", SchedulingOperation::Query),
    ];
    const DESCRIPTIONS: &'static str = "\
- schedule: booking new appointments, making reservations
- reschedule: changing appointment times, moving appointments
- cancel: canceling appointments, removing bookings
- view: checking existing appointments, viewing schedules
- query: general appointment information, availability, statistics";

    fn label(&self) -> &'static str {
        match self {
            SchedulingOperation::Schedule => "schedule",
            SchedulingOperation::Reschedule => "reschedule",
            SchedulingOperation::Cancel => "cancel",
            SchedulingOperation::View => "view",
            SchedulingOperation::Query => "query",
        }
    }
}

/// There is no appointments table; visits are approximated by prescriptions.
pub const VISIT_SUMMARY: &str = "SELECT p.\"firstName\", p.\"lastName\", COUNT(pr.id) AS appointments \
     FROM patients p LEFT JOIN prescriptions pr ON p.id = pr.\"patientId\" \
     GROUP BY p.id, p.\"firstName\", p.\"lastName\" ORDER BY appointments DESC LIMIT 10";

pub fn format_visit_summary(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No appointment data available.".to_string();
    }
    let mut out = String::from("Patient appointment summary (based on prescriptions):");
    for row in rows {
        out.push_str(&format!(
            "\n- {} {}: {} visits",
            field(row, "firstName"),
            field(row, "lastName"),
            field(row, "appointments")
        ));
    }
    out
}

pub struct SchedulingHandler {
    classifier: OperationClassifier<SchedulingOperation>,
    executor: QueryExecutor,
    query_loop: AdaptiveQueryLoop,
}

impl SchedulingHandler {
    pub fn new(context: &HandlerContext) -> Self {
        Self {
            classifier: OperationClassifier::new(context.oracle.clone(), "appointment"),
            executor: context.executor(),
            query_loop: context.delegated_loop(),
        }
    }
}

#[async_trait]
impl DomainHandler for SchedulingHandler {
    fn name(&self) -> &str {
        "scheduling"
    }

    fn domain(&self) -> Domain {
        Domain::Scheduling
    }

    #[instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    async fn handle(&self, request: &Request) -> Result<String, HandlerError> {
        let operation = self.classifier.classify(&request.text).await;
        info!(operation = operation.label(), "Scheduling operation classified");

        match operation {
            SchedulingOperation::View => {
                let rows = run_template(&self.executor, "scheduling.view", VISIT_SUMMARY, &[]).await?;
                Ok(format_visit_summary(&rows))
            }
            SchedulingOperation::Schedule
            | SchedulingOperation::Reschedule
            | SchedulingOperation::Cancel
            | SchedulingOperation::Query => Ok(self.query_loop.answer(&request.text).await),
        }
    }
}
