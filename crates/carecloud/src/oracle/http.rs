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

use async_trait::async_trait;
use llm_contracts::{
    Completion, CompletionRequest, OracleConfig, OracleError, OracleResult, Provider, TextOracle,
    Usage,
};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static HTTP_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// Text oracle over the Anthropic messages API or the Ollama generate API.
pub struct HttpOracle {
    client: Client,
    config: OracleConfig,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> OracleResult<Self> {
        if config.provider == Provider::Anthropic && config.api_key.is_none() {
            return Err(OracleError::Configuration(
                "ANTHROPIC_API_KEY environment variable not set".to_string(),
            ));
        }
        if config.endpoint.is_empty() {
            return Err(OracleError::Configuration(
                "oracle endpoint is empty".to_string(),
            ));
        }

        let client = if config.timeout_seconds > 0 {
            Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .map_err(|e| OracleError::Configuration(e.to_string()))?
        } else {
            HTTP_CLIENT.clone()
        };

        info!(provider = %config.provider.as_str(), model = %config.model, "HTTP oracle initialised");
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn payload(&self, request: &CompletionRequest) -> Value {
        let max_tokens = request
            .generation_config
            .max_tokens
            .unwrap_or(self.config.max_tokens);
        let temperature = request
            .generation_config
            .temperature
            .unwrap_or(self.config.temperature);

        match self.config.provider {
            Provider::Ollama => json!({
                "model": self.config.model,
                "prompt": request.prompt,
                "stream": false,
                "options": {
                    "temperature": temperature,
                    "num_predict": max_tokens
                }
            }),
            _ => json!({
                "model": self.config.model,
                "max_tokens": max_tokens,
                "messages": [{
                    "role": "user",
                    "content": request.prompt
                }],
                "temperature": temperature
            }),
        }
    }
}

#[async_trait]
impl TextOracle for HttpOracle {
    #[instrument(skip(self, request), fields(purpose = request.purpose.as_str(), request_id = %request.id))]
    async fn complete(&self, request: CompletionRequest) -> OracleResult<Completion> {
        let provider = self.config.provider.as_str().to_string();
        let payload = self.payload(&request);
        debug!(payload = ?payload, "Sending request to oracle");

        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json");
        if self.config.provider != Provider::Ollama {
            if let Some(key) = &self.config.api_key {
                builder = builder.header("x-api-key", key);
            }
            builder = builder.header("anthropic-version", &self.config.api_version);
        }

        let response = builder.json(&payload).send().await.map_err(map_reqwest)?;
        let status = response.status();
        info!(%status, provider = %provider, "Received response from oracle");

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(%status, provider = %provider, "Oracle returned an error status");
            return Err(OracleError::Provider(format!(
                "{provider} API error {status}: {error_body}"
            )));
        }

        let body: Value = response.json().await.map_err(map_reqwest)?;
        let (content, usage) = extract_content(&self.config.provider, &body)?;

        reject_blank(Completion {
            request_id: request.id,
            content,
            provider_used: provider,
            model_used: self.config.model.clone(),
            usage,
            created_at: chrono::Utc::now(),
        })
    }

    fn name(&self) -> &str {
        self.config.provider.as_str()
    }
}

fn map_reqwest(err: reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else if err.is_decode() {
        OracleError::Serialisation(err.to_string())
    } else {
        OracleError::Network(err.to_string())
    }
}

fn reject_blank(completion: Completion) -> OracleResult<Completion> {
    if completion.is_blank() {
        warn!(provider = %completion.provider_used, "Oracle returned a blank completion");
        return Err(OracleError::EmptyResponse);
    }
    Ok(completion)
}

fn extract_content(provider: &Provider, body: &Value) -> OracleResult<(String, Usage)> {
    let anthropic = body["content"][0]["text"].as_str();
    let ollama = body["response"].as_str();
    let content = match provider {
        Provider::Anthropic => anthropic,
        Provider::Ollama => ollama,
        Provider::Custom(_) => anthropic.or(ollama),
    }
    .ok_or_else(|| {
        OracleError::Serialisation(format!(
            "Failed to extract content from {} response",
            provider.as_str()
        ))
    })?;

    let usage = match provider {
        Provider::Ollama => Usage {
            prompt_tokens: body["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
            completion_tokens: body["eval_count"].as_u64().unwrap_or(0) as u32,
        },
        _ => Usage {
            prompt_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        },
    };

    Ok((content.to_string(), usage))
}
