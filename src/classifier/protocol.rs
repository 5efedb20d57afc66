use serde::Serialize;

use crate::domain::AnalysisResult;

#[derive(Debug, Serialize)]
pub struct ScoreRequest<'a> {
    pub text: &'a str,
}

pub fn build_request(text: &str) -> ScoreRequest<'_> {
    ScoreRequest { text }
}

pub fn parse_response(body: &[u8]) -> Result<AnalysisResult, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Label;

    #[test]
    fn parse_ignores_extra_fields_and_clamps() {
        let result =
            parse_response(br#"{"label":"toxic","score":1.4,"text_length":52}"#).unwrap();
        assert_eq!(result.label, Label::Toxic);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn parse_rejects_missing_score() {
        assert!(parse_response(br#"{"label":"safe"}"#).is_err());
        assert!(parse_response(b"<html>busy</html>").is_err());
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_string(&build_request("hello there")).unwrap();
        assert_eq!(body, r#"{"text":"hello there"}"#);
    }
}
