//! Hosted text-generation API backend (Gemini `generateContent`).

use async_trait::async_trait;
use companion_config::BackendConfig;
use companion_core::error::GenerationError;
use companion_core::generator::{GenerationRequest, Generator};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::prompt;
use crate::retry::RetryPolicy;

pub struct HostedGenerator {
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    soft_max_words: usize,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl HostedGenerator {
    /// Build from config. Fails when no API key is available.
    pub fn from_config(config: &BackendConfig) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GenerationError::NotConfigured("hosted backend needs an API key".into()))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GenerationError::NotConfigured(e.to_string()))?;

        Ok(Self {
            base_url: config.hosted_url.trim_end_matches('/').to_string(),
            model: config.hosted_model.clone(),
            api_key,
            temperature: config.temperature,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
            soft_max_words: config.soft_max_words,
            retry: RetryPolicy::from_config(config),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_body(&self, request: &GenerationRequest) -> ApiRequest {
        ApiRequest {
            contents: vec![ApiContent {
                parts: prompt::render_parts(request)
                    .into_iter()
                    .map(|text| ApiPart { text })
                    .collect(),
            }],
            generation_config: ApiGenerationConfig {
                temperature: self.temperature,
                top_p: self.top_p,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }

    async fn post(&self, body: &ApiRequest) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
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

        parsed.first_text().ok_or(GenerationError::EmptyResponse)
    }
}

#[async_trait]
impl Generator for HostedGenerator {
    fn name(&self) -> &str {
        "hosted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let body = self.build_body(&request);
        debug!(model = %self.model, parts = body.contents[0].parts.len(), "Sending hosted request");

        let raw = self.retry.run("hosted", || self.post(&body)).await?;
        Ok(prompt::finalize(&raw, &request.ban_pattern, self.soft_max_words))
    }

    async fn health_check(&self) -> Result<bool, GenerationError> {
        let url = format!("{}/models/{}", self.base_url, self.model);
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    generation_config: ApiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidate {
    content: Option<ApiContent>,
}

impl ApiResponse {
    fn first_text(self) -> Option<String> {
        let text = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text;
        Some(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::message::Turn;

    fn config_with_key() -> BackendConfig {
        BackendConfig {
            api_key: Some("k".into()),
            ..BackendConfig::default()
        }
    }

    #[test]
    fn missing_key_is_not_configured() {
        let err = HostedGenerator::from_config(&BackendConfig::default()).err().unwrap();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
    }

    #[test]
    fn endpoint_includes_model() {
        let generator = HostedGenerator::from_config(&config_with_key()).unwrap();
        assert_eq!(
            generator.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash-latest:generateContent"
        );
    }

    #[test]
    fn body_uses_camel_case_generation_config() {
        let generator = HostedGenerator::from_config(&config_with_key()).unwrap();
        let body = generator.build_body(&GenerationRequest::new(vec![Turn::user("hi")]));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 200);
        assert!(json["generationConfig"]["topP"].is_number());
        assert_eq!(json["contents"][0]["parts"][1]["text"], "User: hi");
    }

    #[test]
    fn parse_first_candidate_text() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"  hey there \n"}]}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.first_text().as_deref(), Some("hey there"));
    }

    #[test]
    fn parse_missing_candidates() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(parsed.first_text().is_none());
        let parsed: ApiResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert!(parsed.first_text().is_none());
    }
}
