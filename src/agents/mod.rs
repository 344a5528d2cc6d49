//! Agent System
//!
//! The agents that turn a farmer's submission into a report:
//!
//! - **Context Retriever**: Pulls knowledge-base snippets matching the question
//! - **Advisory Agent**: Answers text questions (language model, then keyword responder)
//! - **Diagnosis Agent**: Identifies plant conditions from photos (vision, classifier, catalogue)
//! - **Report Formatter**: Renders the normalized result and localizes it
//!
//! ## Pipeline Overview
//!
//! ```text
//!   Text question                 Plant photo
//!        │                             │
//!        ▼                             │
//! ┌─────────────┐                      │
//! │   Context   │  → snippets          │
//! │  Retriever  │                      │
//! └─────────────┘                      │
//!        │                             │
//!        ▼                             ▼
//! ┌─────────────┐              ┌─────────────┐
//! │  Advisory   │              │  Diagnosis  │
//! │   Agent     │              │   Agent     │
//! └─────────────┘              └─────────────┘
//!        │                             │
//!        └──────────────┬──────────────┘
//!                       ▼
//!                ┌─────────────┐
//!                │   Report    │  → optional localization
//!                │  Formatter  │
//!                └─────────────┘
//!                       │
//!                       ▼
//!                 Report text
//! ```

pub mod advisory;
pub mod context;
pub mod diagnosis;
pub mod extract;
pub mod report;

pub use advisory::AdvisoryAgent;
pub use context::ContextRetriever;
pub use diagnosis::DiagnosisAgent;
pub use report::{RenderedReport, ReportFormatter};

use std::sync::Arc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::db::KnowledgeStore;
use crate::llm::provider::ProviderSet;
use crate::models::{DiagnosisOutcome, ProviderResult};

/// What the farmer sent in.
#[derive(Debug, Clone)]
pub enum Submission {
    Question {
        question: String,
    },
    Photo {
        image: Vec<u8>,
        media_type: Option<String>,
        note: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub result: ProviderResult,
    pub report: RenderedReport,
    /// Set for photo submissions
    pub diagnosis: Option<DiagnosisOutcome>,
}

impl PipelineOutcome {
    /// Metadata recorded on the job alongside the report.
    pub fn metadata(&self) -> serde_json::Value {
        let mut metadata = serde_json::json!({
            "source": self.result.source,
            "synthetic": self.result.synthetic,
            "capability": self.result.capability,
            "language": self.report.language,
            "translated": self.report.translated,
            "localization_fallback": self.report.localization_fallback,
        });
        if let (Some(diagnosis), Some(map)) = (&self.diagnosis, metadata.as_object_mut()) {
            if let Ok(value) = serde_json::to_value(diagnosis) {
                map.insert("diagnosis".to_string(), value);
            }
        }
        metadata
    }
}

/// Context retrieval, the matching fallback chain, then formatting.
pub struct AdvisoryPipeline {
    context: ContextRetriever,
    advisory: AdvisoryAgent,
    diagnosis: DiagnosisAgent,
    formatter: ReportFormatter,
    target_language: Option<String>,
}

impl AdvisoryPipeline {
    pub fn new(providers: &ProviderSet, knowledge: Arc<dyn KnowledgeStore>, config: &PipelineConfig) -> Self {
        Self {
            context: ContextRetriever::new(knowledge, config.context_max_terms, config.knowledge_limit),
            advisory: AdvisoryAgent::new(providers.text.clone(), providers.text_model.clone(), providers.timeout),
            diagnosis: DiagnosisAgent::new(
                providers.vision.clone(),
                providers.vision_model.clone(),
                providers.classifier.clone(),
                providers.timeout,
            ),
            formatter: ReportFormatter::new(providers.translator.clone(), providers.translation_timeout),
            target_language: config.localization_language().map(String::from),
        }
    }

    /// Always produces a non-empty report.
    pub async fn run(&self, submission: &Submission) -> PipelineOutcome {
        let (result, diagnosis) = match submission {
            Submission::Question { question } => {
                let context = self.context.retrieve(question).await;
                info!(context_len = context.len(), "Context retrieved");
                (self.advisory.generate(question, &context).await, None)
            }
            Submission::Photo { image, media_type, note } => {
                let outcome = self
                    .diagnosis
                    .identify_disease(image, media_type.as_deref(), note.as_deref())
                    .await;
                (outcome.to_result(), Some(outcome))
            }
        };

        let mut report = self.formatter.format(&result, self.target_language.as_deref()).await;
        if report.text.trim().is_empty() {
            report.text = AdvisoryAgent::generic_answer().to_string();
        }

        info!(
            source = %result.source,
            synthetic = result.synthetic,
            language = %report.language,
            report_len = report.text.len(),
            "Pipeline complete"
        );

        PipelineOutcome { result, report, diagnosis }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryKnowledgeStore;

    fn pipeline() -> AdvisoryPipeline {
        AdvisoryPipeline::new(
            &ProviderSet::unavailable(),
            Arc::new(MemoryKnowledgeStore::seeded()),
            &PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_question_without_providers_gets_referral() {
        let outcome = pipeline()
            .run(&Submission::Question {
                question: "What is the best time to plant tomatoes?".to_string(),
            })
            .await;

        assert_eq!(outcome.report.text, AdvisoryAgent::generic_answer());
        assert_eq!(outcome.result.source, advisory::SOURCE_KEYWORD_FALLBACK);
        assert_eq!(outcome.metadata()["synthetic"], true);
        assert!(outcome.metadata().get("diagnosis").is_none());
    }

    #[tokio::test]
    async fn test_photo_without_providers_uses_catalogue() {
        let outcome = pipeline()
            .run(&Submission::Photo {
                image: vec![0xff, 0xd8, 0xff, 0xe0, 0x00],
                media_type: Some("image/jpeg".to_string()),
                note: None,
            })
            .await;

        assert_eq!(outcome.result.source, diagnosis::SOURCE_CATALOGUE);
        assert!(outcome.report.text.contains("## Plant Health Diagnosis"));
        let metadata = outcome.metadata();
        assert_eq!(metadata["source"], diagnosis::SOURCE_CATALOGUE);
        assert_eq!(metadata["capability"], "vision");
        let diagnosis = &metadata["diagnosis"];
        assert_eq!(diagnosis["success"], true);
        assert_eq!(diagnosis["synthetic"], true);
        assert!(diagnosis["primaryDisease"]["label"].is_string());
        let predictions = diagnosis["predictions"].as_array().unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0], diagnosis["primaryDisease"]);
        assert!(predictions
            .iter()
            .all(|p| p["confidence"].as_u64().unwrap() >= 15));
    }
}
