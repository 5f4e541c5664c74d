//! Error types.

use thiserror::Error;

/// Errors surfaced by the forms engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormsError {
    /// A synchronous cell was requested from a stream that did not emit
    /// while being subscribed.
    #[error("to_cell_sync requires the source to emit synchronously on subscribe")]
    SyncEmissionRequired,

    #[error("invalid definition for field `{field}`: {reason}")]
    InvalidFieldDefinition { field: String, reason: String },

    #[error("no control at path `{0}`")]
    ControlNotFound(String),
}

impl FormsError {
    pub(crate) fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFieldDefinition {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = FormsError> = std::result::Result<T, E>;

/// An external input is not available yet.
///
/// Returned by definitions and validation computations that read a source
/// which has not produced a value. The run is skipped and retried on the
/// next change; it is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("source not ready")]
pub struct NotReady;

/// Why a validation computation produced no validators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeFailure {
    #[error(transparent)]
    NotReady(#[from] NotReady),

    #[error("{0}")]
    Failed(String),
}

impl From<String> for ComputeFailure {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for ComputeFailure {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<FormsError> for ComputeFailure {
    fn from(error: FormsError) -> Self {
        Self::Failed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_field() {
        let err = FormsError::invalid_field("address", "expected an object");
        assert_eq!(
            err.to_string(),
            "invalid definition for field `address`: expected an object"
        );
        assert_eq!(
            FormsError::ControlNotFound("a.b".into()).to_string(),
            "no control at path `a.b`"
        );
    }

    #[test]
    fn failures_convert() {
        assert_eq!(ComputeFailure::from(NotReady), ComputeFailure::NotReady(NotReady));
        assert_eq!(
            ComputeFailure::from("boom"),
            ComputeFailure::Failed("boom".to_string())
        );
        let from_forms: ComputeFailure = FormsError::SyncEmissionRequired.into();
        assert!(matches!(from_forms, ComputeFailure::Failed(_)));
    }
}
