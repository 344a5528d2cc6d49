//! Vision response parsing
//!
//! Vision models are asked for a JSON object but frequently answer in prose.
//! The JSON object is tried first; prose goes through pattern extraction.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use crate::models::{Finding, Severity};

pub const DEFAULT_CONFIDENCE: f64 = 70.0;

// A disease name ends at punctuation, a line break, or a joining word
const NAME_END: &str = r"(?:\s+(?:with|at|and|in|on|due|caused|because|which|that|from)\b|\s*[,.;:()\n]|\s*$)";
const NAME: &str = r"([a-z][a-z'\- ]*?)";

static DISEASE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"(?i)\bdisease\s*:\s*{NAME}{NAME_END}"),
        format!(r"(?i)\bcondition\s*:\s*{NAME}{NAME_END}"),
        format!(r"(?i)\bappears\s+to\s+be\s+(?:an?\s+|the\s+)?{NAME}{NAME_END}"),
        format!(r"(?i)\blikely\s+(?:an?\s+|the\s+)?{NAME}{NAME_END}"),
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static PERCENT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").ok());

// Captures that are grammar, not a disease name
const NOT_A_NAME: &[&str] = &["caused", "due", "from", "be", "that", "this", "to", "a", "an", "the"];

#[derive(Debug, Deserialize)]
struct RawVisionDiagnosis {
    disease: String,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parse the first `{...}` block of a model response.
pub fn parse_json_diagnosis(text: &str) -> Option<Finding> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let raw: RawVisionDiagnosis = serde_json::from_str(&text[start..=end]).ok()?;
    let label = raw.disease.trim();
    if label.is_empty() {
        return None;
    }

    let confidence = raw
        .confidence
        .as_ref()
        .and_then(confidence_from_json)
        .unwrap_or(DEFAULT_CONFIDENCE);
    let severity = raw
        .severity
        .as_deref()
        .map(Severity::from_text)
        .unwrap_or(Severity::Medium);

    Some(Finding::new(
        label,
        confidence,
        severity,
        raw.description.unwrap_or_default().trim(),
    ))
}

fn confidence_from_json(value: &serde_json::Value) -> Option<f64> {
    let (number, decimal) = match value {
        serde_json::Value::Number(n) => (n.as_f64()?, n.is_f64()),
        serde_json::Value::String(s) => {
            let literal = s.trim().trim_end_matches('%').trim();
            (literal.parse().ok()?, literal.contains('.'))
        }
        _ => return None,
    };
    // 0.85 and 85 both mean 85%, but a bare integer 1 stays 1%
    Some(if decimal && number > 0.0 && number <= 1.0 { number * 100.0 } else { number })
}

/// Pattern extraction over free text: disease name, a percentage and
/// severity keywords. `None` when no disease name can be found.
pub fn extract_from_text(text: &str) -> Option<Finding> {
    let label = DISEASE_PATTERNS.iter().find_map(|pattern| {
        pattern.captures_iter(text).find_map(|caps| {
            let name = caps.get(1)?.as_str().trim();
            let first_word = name.split_whitespace().next()?.to_lowercase();
            if name.is_empty() || name.len() > 60 || NOT_A_NAME.contains(&first_word.as_str()) {
                None
            } else {
                Some(name.to_string())
            }
        })
    })?;

    let confidence = PERCENT_PATTERN
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .unwrap_or(DEFAULT_CONFIDENCE);

    let description = text.trim().chars().take(400).collect::<String>();

    Some(Finding::new(label, confidence, Severity::from_text(text), description))
}

/// The two fixed lower-confidence alternatives shown next to a vision
/// diagnosis. Presentation filler, not model output.
pub fn presentation_alternatives(primary: &Finding) -> Vec<Finding> {
    let base = f64::from(primary.confidence);
    vec![
        Finding::new(
            "Leaf Spot",
            base * 0.4,
            Severity::Low,
            "Small brown or black spots on leaves, often fungal or bacterial.",
        ),
        Finding::new(
            "Nutrient Deficiency",
            base * 0.25,
            Severity::Low,
            "Yellowing or discoloration caused by a lack of nitrogen, potassium or micronutrients.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_inside_prose() {
        let text = r#"Here is my analysis:
```json
{"disease": "Powdery Mildew", "confidence": 0.82, "severity": "moderate", "description": "White powder on leaves"}
```"#;
        let finding = parse_json_diagnosis(text).unwrap();
        assert_eq!(finding.label, "Powdery Mildew");
        assert_eq!(finding.confidence, 82);
        assert_eq!(finding.severity, Severity::Medium);
        assert_eq!(finding.description, "White powder on leaves");
    }

    #[test]
    fn test_json_confidence_as_percent_string() {
        let finding = parse_json_diagnosis(r#"{"disease":"Leaf Rust","confidence":"64%","severity":"Severe"}"#).unwrap();
        assert_eq!(finding.confidence, 64);
        assert_eq!(finding.severity, Severity::High);
    }

    #[test]
    fn test_integer_confidence_is_a_percentage() {
        let confidence = |raw: &str| {
            parse_json_diagnosis(&format!(r#"{{"disease":"Leaf Rust","confidence":{raw}}}"#))
                .unwrap()
                .confidence
        };
        assert_eq!(confidence("1"), 1);
        assert_eq!(confidence(r#""1%""#), 1);
        assert_eq!(confidence("1.0"), 100);
        assert_eq!(confidence("0.85"), 85);
        assert_eq!(confidence(r#""0.5""#), 50);
        assert_eq!(confidence("85"), 85);
    }

    #[test]
    fn test_json_without_disease_is_rejected() {
        assert!(parse_json_diagnosis(r#"{"confidence": 90}"#).is_none());
        assert!(parse_json_diagnosis("no braces here").is_none());
        assert!(parse_json_diagnosis("} backwards {").is_none());
    }

    #[test]
    fn test_extract_late_blight_sentence() {
        let finding = extract_from_text(
            "This leaf appears to be Late Blight with about 85% confidence, severe damage visible.",
        )
        .unwrap();
        assert_eq!(finding.label, "Late Blight");
        assert_eq!(finding.confidence, 85);
        assert_eq!(finding.severity, Severity::High);
    }

    #[test]
    fn test_extract_labelled_disease_defaults_confidence() {
        let finding = extract_from_text("Disease: Bacterial Leaf Spot. The infection looks mild.").unwrap();
        assert_eq!(finding.label, "Bacterial Leaf Spot");
        assert_eq!(finding.confidence, 70);
        assert_eq!(finding.severity, Severity::Low);
    }

    #[test]
    fn test_extract_likely_pattern() {
        let finding = extract_from_text("The yellow streaks are most likely Mosaic Virus, spread by aphids.").unwrap();
        assert_eq!(finding.label, "Mosaic Virus");
        assert_eq!(finding.severity, Severity::Medium);
    }

    #[test]
    fn test_extract_gives_up_without_a_name() {
        assert!(extract_from_text("I cannot tell from this picture.").is_none());
        assert!(extract_from_text("").is_none());
    }

    #[test]
    fn test_presentation_alternatives_are_lower() {
        let primary = Finding::new("Late Blight", 85.0, Severity::High, "");
        let alternatives = presentation_alternatives(&primary);
        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[0].label, "Leaf Spot");
        assert_eq!(alternatives[1].label, "Nutrient Deficiency");
        assert!(alternatives.iter().all(|a| a.confidence < primary.confidence));
    }
}
