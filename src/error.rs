//! Error types surfaced by the conversational assistant.
//!
//! Errors are classified by recoverability:
//! - Retryable: the completion service failed or timed out
//! - RequiresUserAction: no completion credentials are configured

use thiserror::Error;

/// Errors returned by `AgronomistAssistant::chat`.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Assistant is disabled: no completion API key configured")]
    Disabled,

    #[error("Assistant unavailable: {0}")]
    Unavailable(String),
}

impl AssistantError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, AssistantError::Unavailable(_))
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(self, AssistantError::Disabled)
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            AssistantError::Disabled => {
                "Set completion.apiKey in ~/.agro-insight/config.json or export AGRO_COMPLETION_API_KEY."
            }
            AssistantError::Unavailable(_) => {
                "The completion service did not answer. Wait a moment and try again."
            }
        }
    }
}

/// Serializable error representation for callers
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantErrorPayload {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Retryable,
    RequiresUserAction,
}

impl From<&AssistantError> for AssistantErrorPayload {
    fn from(err: &AssistantError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else {
            ErrorType::Retryable
        };

        AssistantErrorPayload {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_requires_user_action() {
        let err = AssistantError::Disabled;
        assert!(!err.is_retryable());
        let payload = AssistantErrorPayload::from(&err);
        assert_eq!(payload.error_type, ErrorType::RequiresUserAction);
        assert!(!payload.can_retry);
        assert!(payload.recovery_suggestion.contains("AGRO_COMPLETION_API_KEY"));
    }

    #[test]
    fn test_unavailable_is_retryable() {
        let err = AssistantError::Unavailable("timed out".into());
        let payload = AssistantErrorPayload::from(&err);
        assert!(payload.can_retry);
        assert_eq!(payload.error_type, ErrorType::Retryable);
        assert_eq!(payload.message, "Assistant unavailable: timed out");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["errorType"], "retryable");
        assert_eq!(json["canRetry"], true);
    }
}
