use crate::services::gateway::GenerationKind;
use thiserror::Error;

pub type StoryResult<T> = std::result::Result<T, StoryError>;

/// Failure talking to one of the generation backends. The message carries
/// the upstream detail verbatim so the user can decide whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{kind} request to the text model failed: {message}")]
    Text { kind: GenerationKind, message: String },
    #[error("image request failed: {message}")]
    Image { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("structured framework response is not valid JSON: {0}")]
    InvalidStructure(String),
    #[error("model response contained no {0}")]
    Empty(&'static str),
}

#[derive(Debug, Error)]
pub enum StoryError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Validation(String),
    #[error("page {page} failed: {source}")]
    PageFailed {
        page: usize,
        #[source]
        source: Box<StoryError>,
    },
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
    #[error("export failed: {0}")]
    Export(String),
}

impl StoryError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoryError::Validation(message.into())
    }

    /// Page index reported by an aborted auto run, if any.
    pub fn failed_page(&self) -> Option<usize> {
        match self {
            StoryError::PageFailed { page, .. } => Some(*page),
            _ => None,
        }
    }
}
