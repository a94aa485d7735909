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

//! Layered configuration: compiled defaults, an optional TOML file, then
//! `CARECLOUD_*` environment overrides.

use crate::router::Domain;
use llm_contracts::{OracleConfig, Provider};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    pub fn invalid<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub router: RouterSettings,
    pub query_loop: QueryLoopSettings,
    pub handlers: HandlerSettings,
    pub renderer: RendererSettings,
    pub oracle: OracleConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub default_domain: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            request_timeout_ms: 60_000,
            default_domain: Domain::GenericDataAccess.label().to_string(),
        }
    }
}

impl RouterSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Falls back to generic data access when the label does not parse.
    pub fn default_domain(&self) -> Domain {
        Domain::from_str(&self.default_domain).unwrap_or(Domain::GenericDataAccess)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLoopSettings {
    pub max_attempts: u32,
    pub row_summary_limit: usize,
    pub min_summary_chars: usize,
    pub table_schema: String,
    pub allowed_verbs: Vec<String>,
    pub quoted_identifiers: Vec<String>,
    pub derive_identifiers_from_schema: bool,
}

/// Mixed-case columns of the clinic schema. Unquoted, Postgres folds them to
/// lower case and the statement fails.
pub const DEFAULT_QUOTED_IDENTIFIERS: &[&str] = &[
    "medicineId",
    "subCategory",
    "productName",
    "saltComposition",
    "productPrice",
    "productManufactured",
    "medicineDesc",
    "sideEffects",
    "drugInteractions",
    "batchNumber",
    "expiryDate",
    "unitPrice",
    "inventoryId",
    "transactionType",
    "transactionDate",
    "performedBy",
    "currentQuantity",
    "alertSent",
    "alertDate",
    "patientId",
    "doctorId",
    "prescriptionDate",
    "prescriptionId",
    "firstName",
    "lastName",
    "dateOfBirth",
    "emergencyContact",
    "licenseNumber",
    "yearsOfExperience",
];

impl Default for QueryLoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            row_summary_limit: 10,
            min_summary_chars: 10,
            table_schema: "public".to_string(),
            allowed_verbs: ["SELECT", "INSERT", "UPDATE", "DELETE"]
                .iter()
                .map(|v| v.to_string())
                .collect(),
            quoted_identifiers: DEFAULT_QUOTED_IDENTIFIERS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            derive_identifiers_from_schema: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerSettings {
    pub max_attempts: u32,
    pub low_stock_threshold: i64,
    pub expiry_window_days: u32,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            low_stock_threshold: 10,
            expiry_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub name_fields: Vec<String>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            name_fields: ["productName", "name", "firstName", "testName", "supplier"]
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            acquire_timeout_seconds: 10,
        }
    }
}

impl CoreConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        info!(path = %path.display(), "Loading configuration");
        Self::from_toml_str(&source)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup so tests never touch the
    /// process environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(provider) = lookup("CARECLOUD_ORACLE_PROVIDER") {
            let provider = Provider::from(provider);
            if provider == Provider::Ollama && self.oracle.provider != Provider::Ollama {
                let previous = std::mem::take(&mut self.oracle);
                self.oracle = OracleConfig {
                    max_tokens: previous.max_tokens,
                    temperature: previous.temperature,
                    timeout_seconds: previous.timeout_seconds,
                    ..OracleConfig::ollama(previous.model)
                };
            }
            self.oracle.provider = provider;
        }
        match self.oracle.provider {
            Provider::Ollama => {
                if let Some(endpoint) = lookup("OLLAMA_ENDPOINT") {
                    self.oracle.endpoint = endpoint;
                }
                if let Some(model) = lookup("OLLAMA_MODEL") {
                    self.oracle.model = model;
                }
            }
            _ => {
                if let Some(key) = lookup("ANTHROPIC_API_KEY") {
                    self.oracle.api_key = Some(key);
                }
                if let Some(model) = lookup("ANTHROPIC_MODEL") {
                    self.oracle.model = model;
                }
            }
        }
        if let Some(model) = lookup("CARECLOUD_ORACLE_MODEL") {
            self.oracle.model = model;
        }
        if let Some(value) = lookup("CARECLOUD_ROUTER_MAX_ATTEMPTS") {
            self.router.max_attempts = parse_number("CARECLOUD_ROUTER_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("CARECLOUD_RETRY_DELAY_MS") {
            self.router.retry_delay_ms = parse_number("CARECLOUD_RETRY_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("CARECLOUD_REQUEST_TIMEOUT_MS") {
            self.router.request_timeout_ms =
                parse_number("CARECLOUD_REQUEST_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("CARECLOUD_QUERY_MAX_ATTEMPTS") {
            self.query_loop.max_attempts = parse_number("CARECLOUD_QUERY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("CARECLOUD_DEFAULT_DOMAIN") {
            self.router.default_domain = value;
        }
        debug!(provider = %self.oracle.provider.as_str(), model = %self.oracle.model, "Environment overrides applied");
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.max_attempts == 0 {
            return Err(ConfigError::invalid("router.max_attempts", "must be at least 1"));
        }
        if self.query_loop.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "query_loop.max_attempts",
                "must be at least 1",
            ));
        }
        if self.handlers.max_attempts == 0 {
            return Err(ConfigError::invalid("handlers.max_attempts", "must be at least 1"));
        }
        if self.router.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "router.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.query_loop.allowed_verbs.is_empty() {
            return Err(ConfigError::invalid(
                "query_loop.allowed_verbs",
                "at least one verb must be allowed",
            ));
        }
        if Domain::from_str(&self.router.default_domain).is_err() {
            return Err(ConfigError::invalid(
                "router.default_domain",
                format!("unknown domain '{}'", self.router.default_domain),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{value}' is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.router.max_attempts, 3);
        assert_eq!(config.router.retry_delay_ms, 1000);
        assert_eq!(config.query_loop.max_attempts, 5);
        assert_eq!(config.query_loop.row_summary_limit, 10);
        assert_eq!(config.handlers.low_stock_threshold, 10);
        assert_eq!(config.handlers.expiry_window_days, 30);
        assert!(config
            .query_loop
            .quoted_identifiers
            .contains(&"productName".to_string()));
        assert_eq!(config.router.default_domain(), Domain::GenericDataAccess);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            [router]
            max_attempts = 2
            retry_delay_ms = 0

            [handlers]
            expiry_window_days = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.router.max_attempts, 2);
        assert_eq!(config.router.retry_delay(), Duration::ZERO);
        assert_eq!(config.router.request_timeout_ms, 60_000);
        assert_eq!(config.handlers.expiry_window_days, 60);
        assert_eq!(config.query_loop.max_attempts, 5);
    }

    #[test]
    fn bundled_sample_config_parses() {
        let config = CoreConfig::from_toml_str(include_str!("../config/carecloud.toml")).unwrap();
        assert_eq!(config.oracle.provider, Provider::Anthropic);
        assert_eq!(config.query_loop.allowed_verbs.len(), 4);
        assert_eq!(
            config.query_loop.quoted_identifiers.len(),
            DEFAULT_QUOTED_IDENTIFIERS.len()
        );
        assert!(config.database.url.is_none());
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let err = CoreConfig::from_toml_str("[query_loop]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "query_loop.max_attempts"));
    }

    #[test]
    fn unknown_default_domain_is_rejected() {
        let err = CoreConfig::from_toml_str("[router]\ndefault_domain = \"billing\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = CoreConfig::from_toml_str("[router\nmax_attempts = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn overrides_switch_provider_and_attempts() {
        let vars: HashMap<&str, &str> = [
            ("CARECLOUD_ORACLE_PROVIDER", "ollama"),
            ("OLLAMA_MODEL", "llama3.2"),
            ("CARECLOUD_ROUTER_MAX_ATTEMPTS", "4"),
            ("DATABASE_URL", "postgres://localhost/clinic"),
        ]
        .into_iter()
        .collect();

        let mut config = CoreConfig::default();
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.oracle.provider, Provider::Ollama);
        assert_eq!(config.oracle.model, "llama3.2");
        assert!(config.oracle.endpoint.contains("11434"));
        assert_eq!(config.router.max_attempts, 4);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/clinic"));
    }

    #[test]
    fn non_numeric_override_is_rejected() {
        let mut config = CoreConfig::default();
        let err = config
            .apply_overrides_from(|key| {
                (key == "CARECLOUD_QUERY_MAX_ATTEMPTS").then(|| "many".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
