use thiserror::Error;

/// Top-level error type for the Memento decision-memory subsystem.
///
/// Subsystem crates map their backend failures (SQLite, ONNX, HTTP) into one
/// of these variants so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MementoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimension { expected: usize, actual: usize },

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Invalid decision event: {0}")]
    Validation(#[from] ValidationError),

    #[error("Profile build error: {0}")]
    Profile(String),

    #[error("Narrative generation failed: {0}")]
    Narrative(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl MementoError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Malformed input and configuration problems are permanent; dependency
    /// failures (embedding, a stopped or starting store, timeouts) are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MementoError::Embedding(_)
                | MementoError::StoreUnavailable(_)
                | MementoError::Timeout(_)
                | MementoError::Queue(_)
                | MementoError::Io(_)
        )
    }
}

impl From<toml::de::Error> for MementoError {
    fn from(err: toml::de::Error) -> Self {
        MementoError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MementoError {
    fn from(err: toml::ser::Error) -> Self {
        MementoError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MementoError {
    fn from(err: serde_json::Error) -> Self {
        MementoError::Serialization(err.to_string())
    }
}

/// Why a decision event was rejected before reaching the vector store.
///
/// Every variant maps to a stable reason code that is persisted alongside the
/// dead-lettered payload, so operators can group failures without parsing
/// free text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("event_id is missing or blank")]
    MissingEventId,

    #[error("subject_ref is missing or blank")]
    MissingSubjectRef,

    #[error("context_text is missing or blank")]
    MissingContextText,

    #[error("payload kind `{payload}` does not match event type `{event_type}`")]
    PayloadMismatch { event_type: String, payload: String },

    #[error("caption payload has no text")]
    EmptyCaption,

    #[error("context_text is {len} bytes, limit is {limit}")]
    ContextTooLong { len: usize, limit: usize },
}

impl ValidationError {
    /// Machine-readable reason code recorded with dead-letter entries.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ValidationError::MissingEventId => "missing_event_id",
            ValidationError::MissingSubjectRef => "missing_subject_ref",
            ValidationError::MissingContextText => "missing_context_text",
            ValidationError::PayloadMismatch { .. } => "payload_mismatch",
            ValidationError::EmptyCaption => "empty_caption",
            ValidationError::ContextTooLong { .. } => "context_too_long",
        }
    }
}

/// A specialized `Result` type for Memento operations.
pub type Result<T> = std::result::Result<T, MementoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MementoError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MementoError = io_err.into();
        assert!(matches!(err, MementoError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_dimension_error_display() {
        let err = MementoError::EmbeddingDimension {
            expected: 1024,
            actual: 384,
        };
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 1024, got 384"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(MementoError::Embedding("timeout".into()).is_transient());
        assert!(MementoError::StoreUnavailable("stopped".into()).is_transient());
        assert!(MementoError::Timeout(500).is_transient());
        assert!(!MementoError::Validation(ValidationError::MissingEventId).is_transient());
        assert!(!MementoError::Config("bad".into()).is_transient());
        assert!(!MementoError::Serialization("bad json".into()).is_transient());
    }

    #[test]
    fn test_validation_reason_codes() {
        let cases = vec![
            (ValidationError::MissingEventId, "missing_event_id"),
            (ValidationError::MissingSubjectRef, "missing_subject_ref"),
            (ValidationError::MissingContextText, "missing_context_text"),
            (
                ValidationError::PayloadMismatch {
                    event_type: "caption-choice".into(),
                    payload: "verdict".into(),
                },
                "payload_mismatch",
            ),
            (ValidationError::EmptyCaption, "empty_caption"),
            (
                ValidationError::ContextTooLong { len: 10, limit: 5 },
                "context_too_long",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.reason_code(), code);
        }
    }

    #[test]
    fn test_validation_error_converts() {
        let err: MementoError = ValidationError::EmptyCaption.into();
        assert!(matches!(err, MementoError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "Invalid decision event: caption payload has no text"
        );
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let converted: MementoError = err.unwrap_err().into();
        assert!(matches!(converted, MementoError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let converted: MementoError = err.unwrap_err().into();
        assert!(matches!(converted, MementoError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
