//! JSON parsing helpers for AI responses
//!
//! Models often wrap the JSON payload in prose or code fences, so the
//! parser takes the outermost `{...}` span.

use crate::error::{Error, Result};

use super::types::AiClassification;

fn truncate(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

/// Extract the outermost JSON object from a response
fn json_span(response: &str) -> Result<&str> {
    let response = response.trim();
    match (response.find('{'), response.rfind('}')) {
        (Some(s), Some(e)) if s < e => Ok(&response[s..=e]),
        _ => Err(Error::InvalidData(format!(
            "No JSON found in AI response | Raw: {}",
            truncate(response)
        ))),
    }
}

/// Parse a `{category, confidence, reasoning}` reply
///
/// Confidence may be expressed as a fraction or a percentage; it comes back
/// as a fraction clamped to 0..=1.
pub fn parse_classification(response: &str) -> Result<AiClassification> {
    let json_str = json_span(response)?;
    let mut parsed: AiClassification = serde_json::from_str(json_str).map_err(|e| {
        Error::InvalidData(format!(
            "Invalid JSON from AI: {} | Raw: {}",
            e,
            truncate(json_str)
        ))
    })?;

    if parsed.category.trim().is_empty() {
        return Err(Error::InvalidData("AI returned an empty category".into()));
    }
    if !parsed.confidence.is_finite() || parsed.confidence < 0.0 {
        return Err(Error::InvalidData(format!(
            "AI returned an invalid confidence: {}",
            parsed.confidence
        )));
    }

    if parsed.confidence > 1.0 {
        parsed.confidence /= 100.0;
    }
    parsed.confidence = parsed.confidence.clamp(0.0, 1.0);
    parsed.category = parsed.category.trim().to_string();
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let parsed = parse_classification(
            r#"{"category": "Transporte", "confidence": 0.92, "reasoning": "ride hailing"}"#,
        )
        .unwrap();
        assert_eq!(parsed.category, "Transporte");
        assert!((parsed.confidence - 0.92).abs() < 1e-9);
        assert_eq!(parsed.reasoning.as_deref(), Some("ride hailing"));
    }

    #[test]
    fn test_parse_wrapped_json_with_percentage() {
        let parsed = parse_classification(
            "Sure! Here it is:\n```json\n{\"category\": \" Fornecedores \", \"confidence\": 85}\n```",
        )
        .unwrap();
        assert_eq!(parsed.category, "Fornecedores");
        assert!((parsed.confidence - 0.85).abs() < 1e-9);
        assert_eq!(parsed.reasoning, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_classification("I cannot help with that").is_err());
        assert!(parse_classification(r#"{"category": ""}"#).is_err());
        assert!(parse_classification(r#"{"category": "X", "confidence": -1}"#).is_err());

        let long = format!("{{\"nope\": \"{}\"}}", "x".repeat(500));
        let err = parse_classification(&long).unwrap_err().to_string();
        assert!(err.contains("..."));
    }
}
