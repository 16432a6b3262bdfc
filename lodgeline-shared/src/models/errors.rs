use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// RFC 7807 problem body returned by every failing API call.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
pub struct ErrorResponse {
    /// Problem type URI.
    #[serde(rename = "type")]
    pub problem_type: String,
    /// Canonical reason phrase of the status code.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Stable machine-readable code such as `validation_failed`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Optional structured details, e.g. the offending field.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<serde_json::Value>,
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_parses_problem_body() {
        let body = r#"{
            "type": "https://lodgeline.dev/problems/validation_failed",
            "title": "Bad Request",
            "status": 400,
            "code": "validation_failed",
            "message": "content must not be empty",
            "details": { "field": "content" }
        }"#;

        let parsed: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, 400);
        assert_eq!(parsed.code, "validation_failed");
        assert_eq!(
            parsed.to_string(),
            "validation_failed (400): content must not be empty"
        );
    }

    #[test]
    fn test_error_response_details_optional() {
        let body = r#"{"type":"t","title":"Not Found","status":404,"code":"not_found","message":"missing"}"#;
        let parsed: ErrorResponse = serde_json::from_str(body).unwrap();

        assert!(parsed.details.is_none());
    }
}
