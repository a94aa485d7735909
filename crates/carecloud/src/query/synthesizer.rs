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

use super::adaptive::AttemptState;
use super::repair::{strip_code_fences, IdentifierRepair};
use super::schema::SchemaDescription;
use super::validator::StatementValidator;
use super::SynthesisError;
use llm_contracts::{PromptPurpose, TextOracle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A repaired, verb-checked statement ready to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub text: String,
    pub attempt: u32,
}

const QUERY_RULES: &str = "CRITICAL RULES - FOLLOW THESE EXACTLY:
1. ALWAYS wrap mixed-case column names in double quotes.
2. NEVER leave a mixed-case column unquoted. PostgreSQL folds it to lower case and the query fails.
3. Use lowercase WITHOUT quotes for: id, quantity, status, gender, phone, email, address, notes, reason, supplier
4. For JOINs, always use the correct foreign key relationships
5. Use table aliases (m, i, p, d, etc.) for readability

EXAMPLES OF CORRECT QUERIES:
SELECT m.\"productName\", i.\"expiryDate\", i.quantity FROM medicines m JOIN inventory i ON m.id = i.\"medicineId\" WHERE i.\"expiryDate\" < NOW()
SELECT p.\"firstName\", p.\"lastName\", COUNT(pr.id) as prescription_count FROM patients p LEFT JOIN prescriptions pr ON p.id = pr.\"patientId\" GROUP BY p.id, p.\"firstName\", p.\"lastName\"
SELECT d.\"firstName\", d.\"lastName\", d.specialization FROM doctors d

EXAMPLES OF INCORRECT QUERIES (will fail):
SELECT m.productName FROM medicines m  (missing quotes on productName)
SELECT p.name FROM patients p  (wrong column name, should be firstName/lastName)
SELECT m.id, medicineId FROM inventory i  (missing table alias and quotes)";

/// Turns a request plus the live schema into one candidate statement.
#[derive(Clone)]
pub struct QuerySynthesizer {
    oracle: Arc<dyn TextOracle>,
    validator: StatementValidator,
    configured_identifiers: Vec<String>,
    derive_from_schema: bool,
}

impl QuerySynthesizer {
    pub fn new(
        oracle: Arc<dyn TextOracle>,
        validator: StatementValidator,
        configured_identifiers: Vec<String>,
        derive_from_schema: bool,
    ) -> Self {
        Self {
            oracle,
            validator,
            configured_identifiers,
            derive_from_schema,
        }
    }

    /// Configured identifiers, plus the schema's mixed-case columns when enabled.
    pub fn repair_for(&self, schema: &SchemaDescription) -> IdentifierRepair {
        let mut identifiers = self.configured_identifiers.clone();
        if self.derive_from_schema {
            identifiers.extend(schema.mixed_case_columns());
        }
        IdentifierRepair::new(identifiers)
    }

    pub fn build_prompt(
        &self,
        request: &str,
        schema: &SchemaDescription,
        repair: &IdentifierRepair,
        state: &AttemptState,
    ) -> String {
        let quoted = repair
            .identifiers()
            .map(|id| format!("\"{id}\""))
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = format!(
            "Generate a PostgreSQL query for this request. Return only the SQL query, no explanations.\n\n\
             Request: {request}\n\n\
             DATABASE SCHEMA:\n{}\n\n\
             {QUERY_RULES}\n",
            schema.render()
        );
        if !quoted.is_empty() {
            prompt.push_str(&format!("\nColumns that must be double-quoted: {quoted}\n"));
        }
        if !state.accumulated_context.is_empty() {
            prompt.push_str("\nPREVIOUS ATTEMPTS FAILED. Do not repeat these mistakes:\n");
            for failure in &state.accumulated_context {
                prompt.push_str(&format!("- {failure}\n"));
            }
        }
        prompt
    }

    #[instrument(skip(self, request, schema, state), fields(attempt = state.attempt_number))]
    pub async fn synthesize(
        &self,
        request: &str,
        schema: &SchemaDescription,
        state: &AttemptState,
    ) -> Result<CandidateQuery, SynthesisError> {
        let repair = self.repair_for(schema);
        let prompt = self.build_prompt(request, schema, &repair, state);

        let reply = self
            .oracle
            .complete_text(&prompt, PromptPurpose::QuerySynthesis)
            .await?;
        let statement = strip_code_fences(&reply);
        if statement.is_empty() {
            warn!("Oracle returned an empty statement");
            return Err(SynthesisError::Empty);
        }

        let repaired = repair.repair(&statement);
        if let Err(e) = self.validator.validate(&repaired) {
            warn!(statement = %repaired, error = %e, "Generated statement rejected");
            return Err(e);
        }

        debug!(statement = %repaired, "Statement synthesised");
        Ok(CandidateQuery {
            text: repaired,
            attempt: state.attempt_number,
        })
    }
}
