use headcount_core::CountError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed row {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

impl From<StorageError> for CountError {
    fn from(err: StorageError) -> Self {
        CountError::Snapshot(err.to_string())
    }
}
