use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Payment gateway error: {0}")]
    Gateway(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    /// A compensating action failed and left orphaned or divergent rows behind.
    #[error("Inconsistent state: {0}")]
    Inconsistency(String),
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("Could not parse event: {0}")]
    Parse(String),
    #[error("Reconciliation queue is full")]
    QueueFull,
    #[error("Reconciliation queue is closed")]
    QueueClosed,
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for ServiceError {
    fn from(err: rocksdb::Error) -> Self {
        ServiceError::Persistence(err.to_string())
    }
}

impl ServiceError {
    /// HTTP-style status code reported to synchronous callers.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::Forbidden(_) => 403,
            ServiceError::NotFound(_) => 404,
            ServiceError::QueueFull | ServiceError::QueueClosed => 503,
            ServiceError::Gateway(_)
            | ServiceError::Persistence(_)
            | ServiceError::Inconsistency(_)
            | ServiceError::InvalidSignature(_)
            | ServiceError::Parse(_)
            | ServiceError::Csv(_)
            | ServiceError::Io(_) => 500,
        }
    }

    /// Whether a background reconciliation that failed with this error may succeed later.
    ///
    /// `NotFound` is retryable: an intent event can arrive before the checkout flow
    /// has written its Payment row.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::NotFound(_)
                | ServiceError::Gateway(_)
                | ServiceError::Persistence(_)
                | ServiceError::Inconsistency(_)
                | ServiceError::Io(_)
        )
    }
}
