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

use crate::oracle::{classify_with_default, normalise_label, LabelTable};
use llm_contracts::{PromptPurpose, TextOracle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

/// Closed set of request domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    Medicine,
    Monitoring,
    Stock,
    Scheduling,
    GenericDataAccess,
    CoordinatorInternal,
}

impl Domain {
    pub const ALL: [Domain; 6] = [
        Domain::Medicine,
        Domain::Monitoring,
        Domain::Stock,
        Domain::Scheduling,
        Domain::GenericDataAccess,
        Domain::CoordinatorInternal,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Domain::Medicine => "medicine",
            Domain::Monitoring => "monitoring",
            Domain::Stock => "stock",
            Domain::Scheduling => "scheduling",
            Domain::GenericDataAccess => "generic-data-access",
            Domain::CoordinatorInternal => "coordinator-internal",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDomain(pub String);

impl fmt::Display for UnknownDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown domain '{}'", self.0)
    }
}

impl std::error::Error for UnknownDomain {}

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalise_label(s).as_str() {
            "medicine" | "medicines" | "pharmacy" => Ok(Domain::Medicine),
            "monitoring" | "patient_monitoring" | "patient" => Ok(Domain::Monitoring),
            "stock" | "stock_management" | "inventory" => Ok(Domain::Stock),
            "scheduling" | "appointment" | "appointments" => Ok(Domain::Scheduling),
            "generic_data_access" | "database" | "data" | "generic" => {
                Ok(Domain::GenericDataAccess)
            }
            "coordinator_internal" | "coordinator" => Ok(Domain::CoordinatorInternal),
            _ => Err(UnknownDomain(s.to_string())),
        }
    }
}

/// Oracle replies checked in order; longer labels first.
const DOMAIN_LABELS: &[(&str, Domain)] = &[
    ("patient_monitoring", Domain::Monitoring),
    ("stock_management", Domain::Stock),
    ("generic_data_access", Domain::GenericDataAccess),
    ("coordinator_internal", Domain::CoordinatorInternal),
    ("appointment", Domain::Scheduling),
    ("scheduling", Domain::Scheduling),
    ("monitoring", Domain::Monitoring),
    ("medicine", Domain::Medicine),
    ("inventory", Domain::Stock),
    ("stock", Domain::Stock),
    ("database", Domain::GenericDataAccess),
    ("generate", Domain::GenericDataAccess),
    ("coordinator", Domain::CoordinatorInternal),
];

/// Maps request text to a domain with one oracle call.
#[derive(Clone)]
pub struct DomainClassifier {
    oracle: Arc<dyn TextOracle>,
    table: LabelTable<Domain>,
    default: Domain,
}

impl DomainClassifier {
    pub fn new(oracle: Arc<dyn TextOracle>, default: Domain) -> Self {
        Self {
            oracle,
            table: LabelTable::new(DOMAIN_LABELS),
            default,
        }
    }

    pub fn default_domain(&self) -> Domain {
        self.default
    }

    pub fn build_prompt(text: &str) -> String {
        format!(
            "Classify this healthcare request into one of these categories:\n\
             - medicine: Medicine inflow/outflow, expiry tracking, usage statistics, medicine information\n\
             - patient_monitoring: Patient vitals, medical history, health alerts, continuous monitoring\n\
             - stock_management: Inventory levels, reorder alerts, suppliers, stock transactions\n\
             - appointment: Scheduling, rescheduling, cancelling or viewing appointments\n\
             - database: General database queries and data retrieval\n\n\
             Request: {text}\n\n\
             Respond with only the category name."
        )
    }

    #[instrument(skip(self, text))]
    pub async fn classify(&self, text: &str) -> Domain {
        classify_with_default(
            self.oracle.as_ref(),
            &Self::build_prompt(text),
            PromptPurpose::DomainClassification,
            &self.table,
            self.default,
        )
        .await
    }
}
