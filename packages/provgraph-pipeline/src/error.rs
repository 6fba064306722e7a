use provgraph_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Reimport failed: {0}")]
    Reimport(String),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn reimport<E: std::fmt::Display>(e: E) -> Self {
        Self::Reimport(e.to_string())
    }

    pub fn staging<E: std::fmt::Display>(e: E) -> Self {
        Self::Staging(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// How the failure affects retry of the whole job.
    pub fn disposition(&self) -> FailureDisposition {
        match self {
            // A failed reimport leaves the staged file in place; the
            // protocol is safe to re-run in its entirety.
            PipelineError::Reimport(_) => FailureDisposition::Retryable,
            _ => FailureDisposition::Fatal,
        }
    }
}

/// Whether a failed job may be retried against its retained staged state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureDisposition {
    /// Retry re-enters the staging protocol from the start
    Retryable,
    /// Transaction/serialization failures: job is done, state unwound
    Fatal,
}

impl FailureDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureDisposition::Retryable => "retryable",
            FailureDisposition::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for FailureDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
