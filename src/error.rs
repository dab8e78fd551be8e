use thiserror::Error;

/// Error taxonomy for the chat backend.
///
/// `Validation`, `Authorization` and `EmptyDocument` are rejected immediately
/// and never retried. `Upstream` and `CompletionFailure` surface external
/// service failures; document processing treats them as terminal for that
/// document. Retrieval swallows its own failures into an empty context and
/// never raises these to the caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("document has no extractable text")]
    EmptyDocument,

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream {service} error: {message}")]
    Upstream { service: String, message: String },

    #[error("chat completion failed: {0}")]
    CompletionFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("qdrant error: {0}")]
    Qdrant(String),
}

impl Error {
    pub fn upstream(service: &str, message: impl ToString) -> Self {
        Error::Upstream {
            service: service.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Qdrant(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
