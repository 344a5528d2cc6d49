use std::sync::Arc;

use crate::config::Config;
use crate::queue::JobQueue;
use crate::realtime::RoomHub;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub queue: Arc<JobQueue>,
    pub hub: Arc<RoomHub>,
    /// "postgres" or "memory"
    pub store_backend: &'static str,
}

// Core models
// Note: FromRow is used with runtime query_as (no DATABASE_URL at compile time)

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Answered,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Answered => "answered",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "answered" => Some(JobStatus::Answered),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Answered | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One advisory request and its lifecycle state (a.k.a. Query).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Job {
    pub id: uuid::Uuid,
    pub user_id: Option<String>,
    pub question: Option<String>,
    /// Content hash of the uploaded image; the bytes themselves are not stored.
    pub image_ref: Option<String>,
    pub room_id: Option<String>,
    pub status: JobStatus,
    pub result: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Fields supplied when a job is created.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub user_id: Option<String>,
    pub question: Option<String>,
    pub image_ref: Option<String>,
    pub room_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl Job {
    pub fn pending(new_job: NewJob) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            user_id: new_job.user_id,
            question: new_job.question,
            image_ref: new_job.image_ref,
            room_id: new_job.room_id,
            status: JobStatus::Pending,
            result: None,
            metadata: if new_job.metadata.is_null() {
                serde_json::json!({})
            } else {
                new_job.metadata
            },
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct KnowledgeSnippet {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
}

// Provider output, normalized

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Vision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    /// Bucket free text into a severity tier by whole-word keywords;
    /// text without any keyword is Medium.
    pub fn from_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has_any = |keywords: &[&str]| words.iter().any(|w| keywords.contains(w));

        if has_any(&["severe", "severely", "critical", "critically", "advanced", "serious", "seriously"]) {
            Severity::High
        } else if has_any(&["moderate", "moderately", "medium", "noticeable", "noticeably"]) {
            Severity::Medium
        } else if has_any(&["mild", "mildly", "slight", "slightly", "minor", "early"]) {
            Severity::Low
        } else if has_any(&["none", "healthy"]) {
            Severity::None
        } else {
            Severity::Medium
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::None => "None",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub label: String,
    /// Whole percent, always within 0..=100
    pub confidence: u8,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_tier: Option<String>,
}

impl Finding {
    pub fn new(label: impl Into<String>, confidence: f64, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            confidence: clamp_confidence(confidence),
            severity,
            description: description.into(),
            confidence_tier: None,
        }
    }
}

pub fn clamp_confidence(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Normalized output of any provider tier. Text answers carry the answer
/// in `raw_text` and have no findings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderResult {
    pub capability: Capability,
    pub success: bool,
    pub primary: Option<Finding>,
    pub alternatives: Vec<Finding>,
    pub source: String,
    /// Set when the result was produced without any model.
    pub synthetic: bool,
    pub raw_text: Option<String>,
}

impl ProviderResult {
    pub fn text(answer: impl Into<String>, source: impl Into<String>, synthetic: bool) -> Self {
        Self {
            capability: Capability::Text,
            success: true,
            primary: None,
            alternatives: Vec::new(),
            source: source.into(),
            synthetic,
            raw_text: Some(answer.into()),
        }
    }

    pub fn diagnosis(primary: Finding, alternatives: Vec<Finding>, source: impl Into<String>) -> Self {
        Self {
            capability: Capability::Vision,
            success: true,
            primary: Some(primary),
            alternatives,
            source: source.into(),
            synthetic: false,
            raw_text: None,
        }
    }
}

/// Caller-facing shape of a plant diagnosis.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisOutcome {
    pub success: bool,
    pub predictions: Vec<Finding>,
    pub primary_disease: Finding,
    pub source: String,
    pub synthetic: bool,
}

impl DiagnosisOutcome {
    pub fn from_result(result: &ProviderResult) -> Option<Self> {
        let primary = result.primary.clone()?;
        Some(Self::from_parts(
            primary,
            result.alternatives.clone(),
            result.source.clone(),
            result.synthetic,
        ))
    }

    pub fn from_parts(primary: Finding, alternatives: Vec<Finding>, source: impl Into<String>, synthetic: bool) -> Self {
        let mut predictions = Vec::with_capacity(1 + alternatives.len());
        predictions.push(primary.clone());
        predictions.extend(alternatives);

        Self {
            success: true,
            predictions,
            primary_disease: primary,
            source: source.into(),
            synthetic,
        }
    }

    /// Back to the normalized shape the report formatter renders.
    pub fn to_result(&self) -> ProviderResult {
        let mut result = ProviderResult::diagnosis(
            self.primary_disease.clone(),
            self.predictions.iter().skip(1).cloned().collect(),
            self.source.clone(),
        );
        result.synthetic = self.synthetic;
        result
    }
}

// API Request/Response types

#[derive(Debug, serde::Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub user_id: Option<String>,
    pub room_id: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct SubmitResponse {
    pub job_id: uuid::Uuid,
    pub status: JobStatus,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub store: String,
    pub providers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_buckets() {
        assert_eq!(Severity::from_text("severe damage visible"), Severity::High);
        assert_eq!(Severity::from_text("Critical"), Severity::High);
        assert_eq!(Severity::from_text("noticeable lesions"), Severity::Medium);
        assert_eq!(Severity::from_text("early stage"), Severity::Low);
        assert_eq!(Severity::from_text("none"), Severity::None);
        assert_eq!(Severity::from_text("unclear"), Severity::Medium);
        // whole words only: "mildew" is not "mild", "nearly" is not "early"
        assert_eq!(Severity::from_text("Powdery mildew, nearly everywhere"), Severity::Medium);
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(clamp_confidence(-4.0), 0);
        assert_eq!(clamp_confidence(85.4), 85);
        assert_eq!(clamp_confidence(250.0), 100);
        assert_eq!(clamp_confidence(f64::NAN), 0);
    }

    #[test]
    fn test_job_status_wire_format() {
        assert_eq!(serde_json::to_string(&JobStatus::Answered).unwrap(), "\"answered\"");
        assert_eq!(JobStatus::parse("error"), Some(JobStatus::Error));
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn test_diagnosis_outcome_lists_primary_first() {
        let result = ProviderResult::diagnosis(
            Finding::new("Late Blight", 85.0, Severity::High, "Water-soaked lesions"),
            vec![Finding::new("Leaf Spot", 30.0, Severity::Low, "")],
            "primary-vision",
        );

        let outcome = DiagnosisOutcome::from_result(&result).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.predictions.len(), 2);
        assert_eq!(outcome.predictions[0], outcome.primary_disease);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["primaryDisease"]["label"], "Late Blight");

        let back = outcome.to_result();
        assert_eq!(back.primary, result.primary);
        assert_eq!(back.alternatives, result.alternatives);
        assert_eq!(back.source, "primary-vision");
    }
}
