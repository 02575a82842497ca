use serde::Serialize;

/// Services that are constructed lazily on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    EmbeddingGenerator,
    VectorStore,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::EmbeddingGenerator => write!(f, "embedding generator"),
            ServiceKind::VectorStore => write!(f, "vector store"),
        }
    }
}

/// Errors surfaced by the search and browse paths.
#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    /// The caller supplied something unusable: malformed bytes, a bad URL,
    /// or parameters outside their valid range.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced image could not be obtained or read from the remote side.
    #[error("image acquisition failed: {0}")]
    ImageAcquisition(String),

    /// A lazily constructed service failed to come up.
    #[error("{service} failed to initialize: {reason}")]
    Initialization { service: ServiceKind, reason: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("search backend error: {0}")]
    SearchBackend(String),

    #[error("unexpected error: {0}")]
    Internal(String),
}

/// Wire-level error category. Initialization failures are reported under
/// the failing collaborator's category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    ImageAcquisition,
    Embedding,
    SearchBackend,
    Internal,
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::InvalidInput(_) => ErrorKind::InvalidInput,
            SearchError::ImageAcquisition(_) => ErrorKind::ImageAcquisition,
            SearchError::Initialization {
                service: ServiceKind::EmbeddingGenerator,
                ..
            } => ErrorKind::Embedding,
            SearchError::Initialization {
                service: ServiceKind::VectorStore,
                ..
            } => ErrorKind::SearchBackend,
            SearchError::Embedding(_) => ErrorKind::Embedding,
            SearchError::SearchBackend(_) => ErrorKind::SearchBackend,
            SearchError::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_failure_reports_collaborator_kind() {
        let err = SearchError::Initialization {
            service: ServiceKind::EmbeddingGenerator,
            reason: "model download failed".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Embedding);

        let err = SearchError::Initialization {
            service: ServiceKind::VectorStore,
            reason: "sidecar unreadable".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::SearchBackend);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let kind = serde_json::to_value(ErrorKind::ImageAcquisition).unwrap();
        assert_eq!(kind, serde_json::json!("image_acquisition"));
        let kind = serde_json::to_value(ErrorKind::InvalidInput).unwrap();
        assert_eq!(kind, serde_json::json!("invalid_input"));
    }

    #[test]
    fn test_messages_name_the_service() {
        let err = SearchError::Initialization {
            service: ServiceKind::VectorStore,
            reason: "corrupt header".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "vector store failed to initialize: corrupt header"
        );
    }
}
