// Google Gemini adapter (generateContent REST API)
// Handles both plain text prompts and multimodal prompts with inline images.
// API Reference: https://ai.google.dev/api/generate-content

use crate::llm::provider::LLMAdapter;
use crate::types::{ContentPart, LLMMessage, LLMRequest, LLMResponse, MessageContent, ProviderError, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter {
    client: Client,
    api_key: String,
    api_base: String,
}

// Request types for the Gemini API
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// Response types for the Gemini API
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Deserialize)]
struct GeminiError {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

impl GeminiAdapter {
    /// `api_base` is [`GEMINI_API_BASE`] unless a proxy or test server is configured.
    pub fn with_api_base(api_key: &str, api_base: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_base, model)
    }

    /// Convert internal message format to Gemini content
    fn convert_message(msg: &LLMMessage) -> GeminiContent {
        let parts = match &msg.content {
            MessageContent::Text(text) => vec![GeminiPart::Text { text: text.clone() }],
            MessageContent::Multimodal(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => GeminiPart::Text { text: text.clone() },
                    ContentPart::ImageBase64 { base64, media_type } => GeminiPart::InlineData {
                        inline_data: InlineData {
                            mime_type: media_type.clone(),
                            data: base64.clone(),
                        },
                    },
                })
                .collect(),
        };

        // Gemini only knows "user" and "model"
        let role = if msg.role == "assistant" { "model" } else { "user" };

        GeminiContent {
            role: Some(role.to_string()),
            parts,
        }
    }

    fn build_request(request: &LLMRequest) -> GeminiRequest {
        GeminiRequest {
            contents: request.messages.iter().map(Self::convert_message).collect(),
            system_instruction: request.system_instruction.as_ref().map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart::Text { text: text.clone() }],
            }),
            generation_config: Some(GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            }),
        }
    }
}

#[async_trait]
impl LLMAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn create_chat_completion(&self, request: &LLMRequest) -> Result<LLMResponse, ProviderError> {
        let body = Self::build_request(request);

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            if let Ok(error_response) = serde_json::from_str::<GeminiErrorResponse>(&error_text) {
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    body: format!(
                        "{} ({})",
                        error_response.error.message,
                        error_response.error.status.unwrap_or_default()
                    ),
                });
            }

            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("Failed to parse Gemini response: {}", e)))?;

        let candidate = gemini_response
            .candidates
            .first()
            .ok_or_else(|| ProviderError::Parse("Gemini returned no candidates".to_string()))?;

        let content: String = candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ProviderError::Empty);
        }

        let usage = gemini_response
            .usage_metadata
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        Ok(LLMResponse {
            content,
            finish_reason: candidate.finish_reason.clone().unwrap_or_else(|| "STOP".to_string()),
            usage,
        })
    }
}

/// Gemini models used by the advisory pipeline
pub mod models {
    pub const GEMINI_2_0_FLASH: &str = "gemini-2.0-flash";

    pub const DEFAULT_TEXT: &str = GEMINI_2_0_FLASH;
    /// Flash models accept inline images, so the same model serves vision
    pub const DEFAULT_VISION: &str = GEMINI_2_0_FLASH;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_request() -> LLMRequest {
        LLMRequest {
            model: models::DEFAULT_TEXT.to_string(),
            messages: vec![LLMMessage::user("When should I irrigate wheat?")],
            max_tokens: Some(256),
            temperature: Some(0.4),
            system_instruction: Some("You are an expert agricultural assistant.".to_string()),
        }
    }

    #[test]
    fn test_build_request_maps_inline_images() {
        let request = LLMRequest {
            messages: vec![LLMMessage::user_with_base64_image("diagnose", "AAAA", "image/jpeg")],
            ..text_request()
        };

        let body = serde_json::to_value(GeminiAdapter::build_request(&request)).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "diagnose");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(parts[1]["inline_data"]["data"], "AAAA");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are an expert agricultural assistant.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[tokio::test]
    async fn test_completion_joins_candidate_parts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"Irrigate at "},{"text":"crown root initiation."}]},"finishReason":"STOP"}],
                    "usageMetadata":{"promptTokenCount":10,"candidatesTokenCount":5,"totalTokenCount":15}}"#,
            )
            .create_async()
            .await;

        let adapter = GeminiAdapter::with_api_base("test-key", &server.url(), Duration::from_secs(5));
        let response = adapter.create_chat_completion(&text_request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "Irrigate at crown root initiation.");
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_error_status_maps_to_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .with_status(429)
            .with_body(r#"{"error":{"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#)
            .create_async()
            .await;

        let adapter = GeminiAdapter::with_api_base("test-key", &server.url(), Duration::from_secs(5));
        let err = adapter.create_chat_completion(&text_request()).await.unwrap_err();

        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("Quota exceeded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_candidate_text_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"   "}]}}]}"#)
            .create_async()
            .await;

        let adapter = GeminiAdapter::with_api_base("test-key", &server.url(), Duration::from_secs(5));
        let err = adapter.create_chat_completion(&text_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Empty));
    }
}
