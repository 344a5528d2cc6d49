//! HuggingFace Inference API client for hosted image-classification models.
//!
//! The raw image bytes are posted as the request body; the model answers with
//! an array of `{label, score}` pairs.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::llm::provider::{ClassifierLabel, ImageClassifier};
use crate::types::ProviderError;

pub const HF_INFERENCE_API_BASE: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_PLANT_DISEASE_MODEL: &str =
    "linkanjarad/mobilenet_v2_1.0_224-plant-disease-identification";

pub struct HuggingFaceClassifier {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

#[derive(Deserialize)]
struct HFErrorResponse {
    error: String,
}

impl HuggingFaceClassifier {
    pub fn with_api_base(api_key: &str, api_base: &str, model: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.api_base, self.model)
    }
}

#[async_trait]
impl ImageClassifier for HuggingFaceClassifier {
    fn name(&self) -> &str {
        "huggingface"
    }

    async fn classify_image(&self, image: &[u8]) -> Result<Vec<ClassifierLabel>, ProviderError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Model cold starts and quota errors come back as {"error": "..."}
            let message = serde_json::from_str::<HFErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: message,
            });
        }

        debug!(model = %self.model, bytes = body.len(), "Classifier response received");

        let labels: Vec<ClassifierLabel> = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Parse(format!("Unexpected classifier payload: {}", e)))?;

        if labels.is_empty() {
            return Err(ProviderError::Empty);
        }

        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "plant/disease";

    #[tokio::test]
    async fn test_classify_parses_label_scores() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/plant/disease")
            .match_header("authorization", "Bearer hf-key")
            .with_status(200)
            .with_body(r#"[{"label":"Tomato___Late_blight","score":0.91},{"label":"Tomato___healthy","score":0.05}]"#)
            .create_async()
            .await;

        let classifier = HuggingFaceClassifier::with_api_base("hf-key", &server.url(), MODEL, Duration::from_secs(5));
        let labels = classifier.classify_image(&[0xFF, 0xD8, 0xFF]).await.unwrap();

        mock.assert_async().await;
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].label, "Tomato___Late_blight");
        assert!((labels[0].score - 0.91).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_array_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/plant/disease")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let classifier = HuggingFaceClassifier::with_api_base("hf-key", &server.url(), MODEL, Duration::from_secs(5));
        let err = classifier.classify_image(&[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Empty));
    }

    #[tokio::test]
    async fn test_loading_model_surfaces_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/plant/disease")
            .with_status(503)
            .with_body(r#"{"error":"Model plant/disease is currently loading"}"#)
            .create_async()
            .await;

        let classifier = HuggingFaceClassifier::with_api_base("hf-key", &server.url(), MODEL, Duration::from_secs(5));
        match classifier.classify_image(&[1]).await.unwrap_err() {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 503);
                assert!(body.contains("currently loading"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
