//! Advisory Agent
//!
//! Answers free-text farming questions. Two tiers: the primary language
//! model, then a keyword responder that always produces an answer.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::llm::provider::LLMAdapter;
use crate::models::ProviderResult;
use crate::types::{LLMMessage, LLMRequest, ProviderError};
use crate::utils::with_timeout;

pub const SOURCE_PRIMARY_TEXT: &str = "primary-text";
pub const SOURCE_KEYWORD_FALLBACK: &str = "keyword-fallback";

const SYSTEM_FRAMING: &str = "You are an expert agricultural assistant. \
Give concise, practical advice that a smallholder farmer can act on.";

const WEATHER_TERMS: &[&str] = &["weather", "rain", "monsoon", "forecast", "temperature", "climate", "drought", "frost"];
const CROP_TERMS: &[&str] = &["crop", "planting", "sowing", "harvest", "seed", "fertilizer", "fertiliser", "yield", "irrigation"];
const PEST_TERMS: &[&str] = &["pest", "disease", "insect", "bug", "fungus", "fungal", "worm", "aphid", "blight", "mildew"];

const WEATHER_ANSWER: &str = "Weather guidance: check the local forecast for the next 5 days before sowing, \
spraying or irrigating. Avoid spraying when rain is expected within 24 hours, protect young plants from \
heat with mulching, and drain fields quickly after heavy rainfall to prevent root damage.";

const CROP_ANSWER: &str = "Crop guidance: choose varieties suited to your region and season, prepare the \
soil with well-decomposed organic manure, sow at the recommended spacing, and apply fertilizer based on a \
soil test. Irrigate at critical growth stages and keep fields weed-free during the first 30-45 days.";

const PEST_ANSWER: &str = "Pest and disease guidance: inspect plants regularly, remove and destroy affected \
leaves or plants, and use pheromone or sticky traps for monitoring. Prefer neem-based or biological \
controls first, and if chemical control is needed, use only recommended products at the labelled dose.";

const GENERIC_ANSWER: &str = "Thank you for your question. I could not prepare a detailed answer right now. \
For advice specific to your farm, please contact your local agricultural extension officer or the nearest \
Krishi Vigyan Kendra, who can guide you based on your soil, crop and local conditions.";

pub struct AdvisoryAgent {
    provider: Arc<dyn LLMAdapter>,
    model: String,
    timeout: Duration,
}

impl AdvisoryAgent {
    pub fn new(provider: Arc<dyn LLMAdapter>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
        }
    }

    /// Answer a question. Never fails and never returns an empty answer.
    pub async fn generate(&self, question: &str, context: &str) -> ProviderResult {
        match self.ask_primary(question, context).await {
            Ok(answer) => {
                info!(provider = self.provider.name(), answer_len = answer.len(), "Primary text tier answered");
                ProviderResult::text(answer, SOURCE_PRIMARY_TEXT, false)
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "Primary text tier failed, using keyword responder");
                ProviderResult::text(Self::keyword_fallback(question), SOURCE_KEYWORD_FALLBACK, true)
            }
        }
    }

    async fn ask_primary(&self, question: &str, context: &str) -> Result<String, ProviderError> {
        let request = LLMRequest {
            model: self.model.clone(),
            messages: vec![LLMMessage::user(Self::build_prompt(question, context))],
            max_tokens: Some(1024),
            temperature: Some(0.4),
            system_instruction: Some(SYSTEM_FRAMING.to_string()),
        };

        let response = with_timeout(self.timeout, self.provider.create_chat_completion(&request)).await?;
        let answer = response.content.trim();
        if answer.is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(answer.to_string())
    }

    fn build_prompt(question: &str, context: &str) -> String {
        if context.is_empty() {
            format!("Farmer's question: {question}")
        } else {
            format!("Relevant knowledge:\n{context}\n\nFarmer's question: {question}")
        }
    }

    /// Deterministic responder: weather, then crop, then pest terms; anything
    /// else gets the extension-officer referral.
    pub fn keyword_fallback(question: &str) -> String {
        let lower = question.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let mentions = |terms: &[&str]| words.iter().any(|w| terms.iter().any(|t| w.starts_with(t)));

        let answer = if mentions(WEATHER_TERMS) {
            WEATHER_ANSWER
        } else if mentions(CROP_TERMS) {
            CROP_ANSWER
        } else if mentions(PEST_TERMS) {
            PEST_ANSWER
        } else {
            GENERIC_ANSWER
        };
        answer.to_string()
    }

    pub fn generic_answer() -> &'static str {
        GENERIC_ANSWER
    }
}
