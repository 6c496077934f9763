use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the artifact store and the estimator.
#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("artifact {artifact} is corrupt: {reason}")]
    ArtifactCorrupt { artifact: String, reason: String },

    #[error("artifacts are not loaded")]
    NotLoaded,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl EstimateError {
    pub(crate) fn corrupt(artifact: impl Into<String>, reason: impl ToString) -> Self {
        Self::ArtifactCorrupt {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }

    /// Client-side mistakes; everything else is a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// A malformed or missing request field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid numeric field {field} ({value:?}): {cause}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        cause: String,
    },
}

impl ValidationError {
    /// Name of the offending request field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingField { field } | Self::InvalidNumber { field, .. } => field,
        }
    }
}

pub type Result<T> = std::result::Result<T, EstimateError>;
