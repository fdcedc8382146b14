//! Built-in HTTP model adapter: the thin `Generate` bridge from a
//! `models[]` configuration entry to a running model backend.
//!
//! Model backend protocols themselves are an out-of-scope external
//! collaborator (SPEC_FULL.md §1); this adapter is deliberately just the
//! narrow `Generate(req) -> resp` bridge, not a reimplementation of any
//! particular backend's wire format. It speaks a llama.cpp-server-style
//! `/completion` contract, close enough to be runnable against a real
//! local backend. Unlike libloading-based plugins, adapters are
//! constructed directly from configuration and registered as providers at
//! startup — there is no source directory to build or hot-reload.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::ModelConfig;
use crate::error::{AfeError, Result};
use crate::plugin::{GenReq, GenResp, Provider};

const RETRY_ATTEMPTS: u32 = 2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_TOKENS: u32 = 512;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    stop: &'a [String],
    stream: bool,
}

#[derive(Deserialize, Default)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tokens_predicted: u32,
    #[serde(default)]
    stop: bool,
}

/// A `Provider` built directly from a `ModelConfig`, speaking HTTP to
/// whatever backend is listening at `endpoint`. Transient failures are
/// retried a bounded number of times inside the adapter, per the error
/// taxonomy's "transient provider/network call" recoverable case.
pub struct HttpModelAdapter {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpModelAdapter {
    pub fn from_config(config: &ModelConfig) -> Self {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| "http://localhost:8081".to_string());
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { name: config.name.clone(), endpoint, client }
    }
}

#[async_trait]
impl Provider for HttpModelAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    async fn generate(&self, req: GenReq) -> Result<GenResp> {
        let body = CompletionRequest {
            prompt: &req.prompt,
            n_predict: if req.max_tokens == 0 { DEFAULT_MAX_TOKENS } else { req.max_tokens },
            temperature: req.temperature,
            stop: &req.stop_tokens,
            stream: false,
        };

        let url = format!("{}/completion", self.endpoint.trim_end_matches('/'));
        let mut last_err = None;

        for attempt in 0..=RETRY_ATTEMPTS {
            match self.client.post(&url).json(&body).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => {
                        let parsed: CompletionResponse = response.json().await.map_err(AfeError::Request)?;
                        return Ok(GenResp {
                            text: parsed.content,
                            tokens: parsed.tokens_predicted,
                            finished: parsed.stop,
                            model: self.name.clone(),
                            error: None,
                        });
                    }
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e),
            }
            if attempt < RETRY_ATTEMPTS {
                warn!("provider {} generate attempt {attempt} failed, retrying", self.name);
            }
        }

        Err(AfeError::Request(last_err.expect("loop always runs at least once")))
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.endpoint.trim_end_matches('/'));
        self.client.get(&url).send().await.map_err(AfeError::Request)?.error_for_status().map_err(AfeError::Request)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_when_not_configured() {
        let config = ModelConfig { name: "llamacpp".to_string(), kind: "llamacpp".to_string(), endpoint: None, options: Value::Null };
        let adapter = HttpModelAdapter::from_config(&config);
        assert_eq!(adapter.endpoint, "http://localhost:8081");
        assert_eq!(adapter.name(), "llamacpp");
    }

    #[test]
    fn endpoint_is_taken_from_config_when_present() {
        let config = ModelConfig {
            name: "llamacpp".to_string(),
            kind: "llamacpp".to_string(),
            endpoint: Some("http://127.0.0.1:9999/".to_string()),
            options: Value::Null,
        };
        let adapter = HttpModelAdapter::from_config(&config);
        assert_eq!(adapter.endpoint, "http://127.0.0.1:9999/");
    }
}
