use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load model: {reason}")]
    ModelLoad { reason: String },

    #[error("failed to save model: {0}")]
    ModelSave(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("worker pool is closed")]
    PoolClosed,

    #[error("failed to start worker pool: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("prediction cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn model_load(reason: impl Into<String>) -> Self {
        Error::ModelLoad {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
