//! Local model backend over the Ollama `/api/generate` endpoint.
//!
//! The prompt is the same ordered parts the hosted backend sends, joined
//! with newlines into a single completion prompt.

use async_trait::async_trait;
use companion_config::BackendConfig;
use companion_core::error::GenerationError;
use companion_core::generator::{GenerationRequest, Generator};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::prompt;
use crate::retry::RetryPolicy;

pub struct LocalGenerator {
    base_url: String,
    model: String,
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    soft_max_words: usize,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl LocalGenerator {
    pub fn from_config(config: &BackendConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GenerationError::NotConfigured(e.to_string()))?;

        Ok(Self {
            base_url: config.local_url.trim_end_matches('/').to_string(),
            model: config.local_model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            num_predict: config.max_output_tokens,
            soft_max_words: config.soft_max_words,
            retry: RetryPolicy::from_config(config),
            client,
        })
    }

    fn build_body(&self, request: &GenerationRequest) -> ApiRequest {
        ApiRequest {
            model: self.model.clone(),
            prompt: prompt::render_parts(request).join("\n"),
            options: ApiOptions {
                temperature: self.temperature,
                top_p: self.top_p,
                num_predict: self.num_predict,
            },
            stream: false,
        }
    }

    async fn post(&self, body: &ApiRequest) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status_code: status,
                message: text.chars().take(300).collect(),
            });
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;

        Ok(parsed.response.trim().to_string())
    }
}

#[async_trait]
impl Generator for LocalGenerator {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let body = self.build_body(&request);
        debug!(model = %self.model, prompt_chars = body.prompt.len(), "Sending local request");

        let raw = self.retry.run("local", || self.post(&body)).await?;
        Ok(prompt::finalize(&raw, &request.ban_pattern, self.soft_max_words))
    }

    async fn health_check(&self) -> Result<bool, GenerationError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    prompt: String,
    options: ApiOptions,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    response: String,
}
