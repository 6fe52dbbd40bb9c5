use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::files::ClassifyError;
use crate::store::StoreError;

/// Response envelope shared by every endpoint. `error` carries a stable
/// machine code from [`codes`]; `field` names the offending input on
/// validation and attachment failures.
#[derive(Debug, Serialize, ToSchema)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
            field: None,
        }
    }

    /// Success with no payload. Used by the public slug lookup when no
    /// agent matches, so callers cannot probe existence via status codes.
    pub fn ok_empty(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
            field: None,
        }
    }

    pub fn err(code: &str, message: impl Into<String>, field: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(code.to_string()),
            field,
        }
    }
}

/// Error codes used across the API
pub mod codes {
    pub const AUTHENTICATION_REQUIRED: &str = "authentication_required";
    pub const AUTHORIZATION_DENIED: &str = "authorization_denied";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const STEP_MISMATCH: &str = "step_mismatch";
    pub const ATTACHMENT_REJECTED: &str = "attachment_rejected";
    pub const NOT_FOUND: &str = "not_found";
    pub const GENERATION_EXHAUSTED: &str = "generation_exhausted";
    pub const STORE_FAILURE: &str = "store_failure";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const RATE_LIMITED: &str = "rate_limited";
}

/// Failures surfaced by the agent builder operations.
///
/// Cross-identity access intentionally maps to [`AgentError::NotFound`]
/// rather than a dedicated authorization error, so a caller probing
/// foreign agent ids cannot distinguish "exists but not yours" from
/// "does not exist".
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("cannot update step {requested}: agent is at step {current}")]
    StepMismatch { requested: u8, current: u8 },

    #[error("agent not found")]
    NotFound,

    #[error("could not generate a unique slug after {attempts} attempts")]
    SlugExhausted { attempts: u32 },

    #[error(transparent)]
    Attachment(#[from] ClassifyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AgentError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine code for the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Validation { .. } => codes::VALIDATION_FAILED,
            AgentError::StepMismatch { .. } => codes::STEP_MISMATCH,
            AgentError::NotFound => codes::NOT_FOUND,
            AgentError::SlugExhausted { .. } => codes::GENERATION_EXHAUSTED,
            AgentError::Attachment(_) => codes::ATTACHMENT_REJECTED,
            AgentError::Store(_) => codes::STORE_FAILURE,
        }
    }

    /// The offending field, when one can be named.
    pub fn field(&self) -> Option<&str> {
        match self {
            AgentError::Validation { field, .. } => Some(field),
            AgentError::Attachment(err) => Some(err.field()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_ok_carries_data_and_no_error() {
        let env = Envelope::ok("done", 42);
        assert!(env.success);
        assert_eq!(env.data, Some(42));
        assert!(env.error.is_none());
    }

    #[test]
    fn envelope_err_serializes_code_and_field() {
        let env = Envelope::<()>::err(
            codes::VALIDATION_FAILED,
            "colorTheme must be a valid hex color code",
            Some("colorTheme".to_string()),
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "validation_failed");
        assert_eq!(json["field"], "colorTheme");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn empty_success_omits_data() {
        let env = Envelope::<String>::ok_empty("no agent found for the provided slug");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("data").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn agent_error_codes_are_stable() {
        assert_eq!(
            AgentError::validation("tone", "bad tone").code(),
            codes::VALIDATION_FAILED
        );
        assert_eq!(
            AgentError::StepMismatch {
                requested: 3,
                current: 1
            }
            .code(),
            codes::STEP_MISMATCH
        );
        assert_eq!(AgentError::NotFound.code(), codes::NOT_FOUND);
        assert_eq!(
            AgentError::SlugExhausted { attempts: 20 }.code(),
            codes::GENERATION_EXHAUSTED
        );
    }
}
