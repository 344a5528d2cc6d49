use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ProviderConfig;
use crate::llm::gemini::GeminiAdapter;
use crate::llm::huggingface::HuggingFaceClassifier;
use crate::types::{LLMMessage, LLMRequest, LLMResponse, ProviderError};

/// Chat-completion style model endpoint. Used for both text and vision
/// requests; vision requests carry a multimodal message.
#[async_trait]
pub trait LLMAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn create_chat_completion(&self, request: &LLMRequest) -> Result<LLMResponse, ProviderError>;
}

/// One label/score pair from an image-classification model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassifierLabel {
    pub label: String,
    pub score: f64,
}

#[async_trait]
pub trait ImageClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify_image(&self, image: &[u8]) -> Result<Vec<ClassifierLabel>, ProviderError>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError>;
}

/// Stand-in for a provider whose credentials are missing. Every call
/// reports `Unavailable`, so the fallback chains advance without special
/// casing absent clients.
pub struct UnavailableProvider {
    name: String,
}

impl UnavailableProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl LLMAdapter for UnavailableProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_chat_completion(&self, _request: &LLMRequest) -> Result<LLMResponse, ProviderError> {
        Err(ProviderError::Unavailable(self.name.clone()))
    }
}

#[async_trait]
impl ImageClassifier for UnavailableProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify_image(&self, _image: &[u8]) -> Result<Vec<ClassifierLabel>, ProviderError> {
        Err(ProviderError::Unavailable(self.name.clone()))
    }
}

#[async_trait]
impl Translator for UnavailableProvider {
    async fn translate(&self, _text: &str, _target_language: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unavailable(self.name.clone()))
    }
}

/// Translation through a general-purpose language model.
pub struct LLMTranslator {
    adapter: Arc<dyn LLMAdapter>,
    model: String,
}

impl LLMTranslator {
    pub fn new(adapter: Arc<dyn LLMAdapter>, model: impl Into<String>) -> Self {
        Self {
            adapter,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Translator for LLMTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError> {
        let request = LLMRequest {
            model: self.model.clone(),
            messages: vec![LLMMessage::user(format!(
                "Translate the following agricultural advisory into the language with ISO code \"{target_language}\". \
                 Keep the markdown structure, numbers and disease names intact. Return only the translation.\n\n{text}"
            ))],
            max_tokens: Some(2048),
            temperature: Some(0.2),
            system_instruction: Some("You are a precise translator for farmers.".to_string()),
        };

        let response = self.adapter.create_chat_completion(&request).await?;
        let translated = response.content.trim();
        if translated.is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(translated.to_string())
    }
}

/// Process-wide provider handles, built once at startup and shared by the
/// orchestrators. Missing credentials yield `UnavailableProvider`s.
#[derive(Clone)]
pub struct ProviderSet {
    pub text: Arc<dyn LLMAdapter>,
    pub text_model: String,
    pub vision: Arc<dyn LLMAdapter>,
    pub vision_model: String,
    pub classifier: Arc<dyn ImageClassifier>,
    pub translator: Arc<dyn Translator>,
    pub timeout: Duration,
    pub translation_timeout: Duration,
}

impl ProviderSet {
    pub fn from_config(config: &ProviderConfig) -> Self {
        let gemini: Arc<dyn LLMAdapter> = match &config.gemini_api_key {
            Some(key) => {
                info!(model = %config.gemini_text_model, "Gemini provider configured");
                Arc::new(GeminiAdapter::with_api_base(key, &config.gemini_api_base, config.timeout()))
            }
            None => {
                warn!("GEMINI_API_KEY not set, text and vision tiers will fall back");
                Arc::new(UnavailableProvider::new("gemini"))
            }
        };

        let classifier: Arc<dyn ImageClassifier> = match &config.huggingface_api_key {
            Some(key) => {
                info!(model = %config.huggingface_model, "HuggingFace classifier configured");
                Arc::new(HuggingFaceClassifier::with_api_base(
                    key,
                    &config.huggingface_api_base,
                    &config.huggingface_model,
                    config.timeout(),
                ))
            }
            None => {
                warn!("HUGGINGFACE_API_KEY not set, classifier tier will be skipped");
                Arc::new(UnavailableProvider::new("huggingface"))
            }
        };

        let translator: Arc<dyn Translator> = if config.gemini_api_key.is_some() {
            Arc::new(LLMTranslator::new(gemini.clone(), config.gemini_text_model.clone()))
        } else {
            Arc::new(UnavailableProvider::new("translator"))
        };

        Self {
            text: gemini.clone(),
            text_model: config.gemini_text_model.clone(),
            vision: gemini,
            vision_model: config.gemini_vision_model.clone(),
            classifier,
            translator,
            timeout: config.timeout(),
            translation_timeout: config.translation_timeout(),
        }
    }

    /// A provider set where every tier is unavailable.
    pub fn unavailable() -> Self {
        Self {
            text: Arc::new(UnavailableProvider::new("text")),
            text_model: String::new(),
            vision: Arc::new(UnavailableProvider::new("vision")),
            vision_model: String::new(),
            classifier: Arc::new(UnavailableProvider::new("classifier")),
            translator: Arc::new(UnavailableProvider::new("translator")),
            timeout: Duration::from_secs(12),
            translation_timeout: Duration::from_secs(10),
        }
    }

    /// Names of the providers that are backed by real credentials.
    pub fn configured(config: &ProviderConfig) -> Vec<&'static str> {
        let mut names = Vec::new();
        if config.gemini_api_key.is_some() {
            names.push("gemini");
        }
        if config.huggingface_api_key.is_some() {
            names.push("huggingface");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_provider_reports_unavailable() {
        let provider = UnavailableProvider::new("gemini");
        let request = LLMRequest {
            model: "m".to_string(),
            messages: vec![LLMMessage::user("hello")],
            max_tokens: None,
            temperature: None,
            system_instruction: None,
        };

        let err = provider.create_chat_completion(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(name) if name == "gemini"));

        let err = provider.classify_image(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_from_config_without_credentials_builds_fallback_set() {
        let set = ProviderSet::from_config(&ProviderConfig::default());
        assert_eq!(set.text.name(), "gemini");
        assert_eq!(set.classifier.name(), "huggingface");
        assert!(ProviderSet::configured(&ProviderConfig::default()).is_empty());
    }
}
