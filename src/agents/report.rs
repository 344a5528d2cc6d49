//! Report Formatter
//!
//! Turns a normalized `ProviderResult` into the text stored on the job and
//! pushed to the room, with an optional localization pass. A failed
//! translation never produces an empty report: a hand-written localized
//! report (or a marked English one) is used instead.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::llm::provider::Translator;
use crate::models::{Capability, Finding, ProviderResult, Severity};
use crate::utils::with_timeout;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RenderedReport {
    pub text: String,
    pub language: String,
    /// Translated by the translation provider
    pub translated: bool,
    /// Hand-written localized fallback (or marked English) was used
    pub localization_fallback: bool,
}

pub struct ReportFormatter {
    translator: Arc<dyn Translator>,
    timeout: Duration,
}

impl ReportFormatter {
    pub fn new(translator: Arc<dyn Translator>, timeout: Duration) -> Self {
        Self { translator, timeout }
    }

    pub async fn format(&self, result: &ProviderResult, language: Option<&str>) -> RenderedReport {
        let english = Self::render(result);

        let Some(language) = language else {
            return RenderedReport {
                text: english,
                language: "en".to_string(),
                translated: false,
                localization_fallback: false,
            };
        };

        match with_timeout(self.timeout, self.translator.translate(&english, language)).await {
            Ok(translated) if !translated.trim().is_empty() => {
                info!(language, "Report translated");
                RenderedReport {
                    text: translated,
                    language: language.to_string(),
                    translated: true,
                    localization_fallback: false,
                }
            }
            Ok(_) => {
                warn!(language, "Translation came back empty, using localized fallback");
                Self::localized_fallback(result, &english, language)
            }
            Err(e) => {
                warn!(language, error = %e, "Translation failed, using localized fallback");
                Self::localized_fallback(result, &english, language)
            }
        }
    }

    /// English report for any capability.
    pub fn render(result: &ProviderResult) -> String {
        match (result.capability, &result.primary) {
            (Capability::Vision, Some(primary)) => Self::render_diagnosis(result, primary),
            _ => result.raw_text.clone().unwrap_or_default(),
        }
    }

    fn render_diagnosis(result: &ProviderResult, primary: &Finding) -> String {
        let mut report = String::from("## Plant Health Diagnosis\n\n");
        report.push_str(&format!("**Condition:** {}\n", primary.label));
        report.push_str(&format!("**Confidence:** {}%", primary.confidence));
        if let Some(tier) = &primary.confidence_tier {
            report.push_str(&format!(" ({tier})"));
        }
        report.push('\n');
        report.push_str(&format!("**Severity:** {}\n", primary.severity));
        if !primary.description.is_empty() {
            report.push_str(&format!("\n{}\n", primary.description));
        }

        if !result.alternatives.is_empty() {
            report.push_str("\n### Other Possibilities\n\n");
            for alt in &result.alternatives {
                report.push_str(&format!("- {} ({}%)\n", alt.label, alt.confidence));
            }
        }

        report.push_str("\n### Recommended Next Steps\n\n");
        for step in next_steps(primary) {
            report.push_str(&format!("- {step}\n"));
        }

        if result.synthetic {
            report.push_str(
                "\n_This is an indicative assessment. Please confirm it with your local agricultural extension officer._\n",
            );
        }

        report
    }

    fn localized_fallback(result: &ProviderResult, english: &str, language: &str) -> RenderedReport {
        let canned = canned_templates(language);

        let text = match (canned, result.capability, &result.primary) {
            (Some(t), Capability::Vision, Some(primary)) => t
                .diagnosis
                .replace("{label}", &primary.label)
                .replace("{confidence}", &primary.confidence.to_string())
                .replace("{severity}", &primary.severity.to_string()),
            (Some(t), _, _) => format!("{}\n\n{}", t.advisory_note, english),
            (None, _, _) => format!("[Translation to '{language}' unavailable; showing English]\n\n{english}"),
        };

        RenderedReport {
            text,
            language: if canned.is_some() { language.to_string() } else { "en".to_string() },
            translated: false,
            localization_fallback: true,
        }
    }
}

fn next_steps(primary: &Finding) -> Vec<&'static str> {
    if primary.label.eq_ignore_ascii_case("healthy") || primary.severity == Severity::None {
        return vec![
            "Keep monitoring the crop every few days for new spots or discoloration.",
            "Maintain balanced nutrition and avoid waterlogging.",
        ];
    }

    match primary.severity {
        Severity::High => vec![
            "Remove and destroy badly affected leaves or plants to stop the spread.",
            "Apply a recommended fungicide or bactericide as advised for your crop.",
            "Contact your agricultural extension officer within 24-48 hours.",
        ],
        Severity::Medium => vec![
            "Prune affected leaves and keep them away from healthy plants.",
            "Avoid overhead irrigation and improve air circulation.",
            "Consider a recommended protective spray if symptoms spread.",
        ],
        _ => vec![
            "Monitor the affected plants closely over the next week.",
            "Remove the few affected leaves and keep the field clean.",
        ],
    }
}

struct CannedTemplates {
    diagnosis: &'static str,
    advisory_note: &'static str,
}

fn canned_templates(language: &str) -> Option<&'static CannedTemplates> {
    let code = language.split(['-', '_']).next().unwrap_or(language).to_lowercase();
    LOCALIZED
        .iter()
        .find(|(lang, _)| *lang == code)
        .map(|(_, templates)| templates)
}

const LOCALIZED: &[(&str, CannedTemplates)] = &[
    (
        "hi",
        CannedTemplates {
            diagnosis: "पौध स्वास्थ्य रिपोर्ट\n\nसंभावित समस्या: {label}\nविश्वास स्तर: {confidence}%\nगंभीरता: {severity}\n\nविस्तृत अनुवाद अभी उपलब्ध नहीं है। कृपया अपने नजदीकी कृषि विस्तार अधिकारी से संपर्क करें।",
            advisory_note: "अनुवाद अभी उपलब्ध नहीं है, इसलिए सलाह नीचे अंग्रेज़ी में दी गई है। अधिक जानकारी के लिए अपने नजदीकी कृषि विस्तार अधिकारी से संपर्क करें।",
        },
    ),
    (
        "mr",
        CannedTemplates {
            diagnosis: "पीक आरोग्य अहवाल\n\nसंभाव्य समस्या: {label}\nविश्वास पातळी: {confidence}%\nतीव्रता: {severity}\n\nसविस्तर भाषांतर सध्या उपलब्ध नाही. कृपया जवळच्या कृषी विस्तार अधिकाऱ्याशी संपर्क साधा.",
            advisory_note: "भाषांतर सध्या उपलब्ध नाही, म्हणून सल्ला खाली इंग्रजीत दिला आहे. अधिक माहितीसाठी जवळच्या कृषी विस्तार अधिकाऱ्याशी संपर्क साधा.",
        },
    ),
    (
        "ta",
        CannedTemplates {
            diagnosis: "பயிர் நல அறிக்கை\n\nசாத்தியமான பிரச்சனை: {label}\nநம்பகத்தன்மை: {confidence}%\nதீவிரம்: {severity}\n\nவிரிவான மொழிபெயர்ப்பு தற்போது கிடைக்கவில்லை. அருகிலுள்ள வேளாண் விரிவாக்க அலுவலரை தொடர்பு கொள்ளவும்.",
            advisory_note: "மொழிபெயர்ப்பு தற்போது கிடைக்கவில்லை, எனவே ஆலோசனை கீழே ஆங்கிலத்தில் உள்ளது. மேலும் தகவலுக்கு அருகிலுள்ள வேளாண் விரிவாக்க அலுவலரை தொடர்பு கொள்ளவும்.",
        },
    ),
    (
        "te",
        CannedTemplates {
            diagnosis: "పంట ఆరోగ్య నివేదిక\n\nసంభావ్య సమస్య: {label}\nనమ్మకం: {confidence}%\nతీవ్రత: {severity}\n\nవివరమైన అనువాదం ప్రస్తుతం అందుబాటులో లేదు. దయచేసి సమీప వ్యవసాయ విస్తరణ అధికారిని సంప్రదించండి.",
            advisory_note: "అనువాదం ప్రస్తుతం అందుబాటులో లేదు, కాబట్టి సలహా క్రింద ఆంగ్లంలో ఉంది. మరింత సమాచారం కోసం సమీప వ్యవసాయ విస్తరణ అధికారిని సంప్రదించండి.",
        },
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::UnavailableProvider;
    use crate::types::ProviderError;
    use async_trait::async_trait;

    struct EchoTranslator;

    #[async_trait]
    impl Translator for EchoTranslator {
        async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError> {
            Ok(format!("[{target_language}] {text}"))
        }
    }

    fn late_blight() -> ProviderResult {
        ProviderResult::diagnosis(
            Finding::new("Late Blight", 85.0, Severity::High, "Water-soaked lesions."),
            vec![
                Finding::new("Leaf Spot", 34.0, Severity::Low, ""),
                Finding::new("Nutrient Deficiency", 21.0, Severity::Low, ""),
            ],
            "primary-vision",
        )
    }

    fn formatter(translator: Arc<dyn Translator>) -> ReportFormatter {
        ReportFormatter::new(translator, Duration::from_secs(1))
    }

    #[test]
    fn test_render_diagnosis_sections() {
        let report = ReportFormatter::render(&late_blight());
        assert!(report.contains("**Condition:** Late Blight"));
        assert!(report.contains("**Confidence:** 85%"));
        assert!(report.contains("**Severity:** High"));
        assert!(report.contains("### Other Possibilities"));
        assert!(report.contains("- Leaf Spot (34%)"));
        assert!(report.contains("### Recommended Next Steps"));
        assert!(!report.contains("indicative assessment"));
    }

    #[test]
    fn test_render_text_passes_answer_through() {
        let result = ProviderResult::text("Irrigate in the evening.", "primary-text", false);
        assert_eq!(ReportFormatter::render(&result), "Irrigate in the evening.");
    }

    #[tokio::test]
    async fn test_no_language_means_english() {
        let report = formatter(Arc::new(EchoTranslator)).format(&late_blight(), None).await;
        assert_eq!(report.language, "en");
        assert!(!report.translated);
        assert!(!report.localization_fallback);
    }

    #[tokio::test]
    async fn test_successful_translation() {
        let report = formatter(Arc::new(EchoTranslator)).format(&late_blight(), Some("hi")).await;
        assert!(report.translated);
        assert!(report.text.starts_with("[hi] ## Plant Health Diagnosis"));
    }

    #[tokio::test]
    async fn test_failed_translation_uses_canned_localized_report() {
        let report = formatter(Arc::new(UnavailableProvider::new("translator")))
            .format(&late_blight(), Some("hi"))
            .await;
        assert!(report.localization_fallback);
        assert_eq!(report.language, "hi");
        assert!(report.text.contains("Late Blight"));
        assert!(report.text.contains("85%"));
        assert!(report.text.contains("गंभीरता"));
    }

    #[tokio::test]
    async fn test_failed_translation_of_text_keeps_answer_with_note() {
        let result = ProviderResult::text("Sow after the first rains.", "primary-text", false);
        let report = formatter(Arc::new(UnavailableProvider::new("translator")))
            .format(&result, Some("ta-IN"))
            .await;
        assert_eq!(report.language, "ta-IN");
        assert!(report.text.ends_with("Sow after the first rains."));
        assert!(report.text.starts_with("மொழிபெயர்ப்பு"));
    }

    #[tokio::test]
    async fn test_unknown_language_is_marked_english() {
        let report = formatter(Arc::new(UnavailableProvider::new("translator")))
            .format(&late_blight(), Some("xx"))
            .await;
        assert_eq!(report.language, "en");
        assert!(report.text.starts_with("[Translation to 'xx' unavailable; showing English]"));
        assert!(report.text.contains("Late Blight"));
    }
}
