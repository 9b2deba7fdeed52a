use std::{io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("malformed row {row} in {path:?}: {reason}")]
    Malformed {
        path: PathBuf,
        row: usize,
        reason: String,
    },

    #[error("no row with timestamp {timestamp} in {path:?}")]
    RowNotFound { path: PathBuf, timestamp: String },
}

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Io { .. } => "io",
            StorageError::Csv { .. } => "csv",
            StorageError::Malformed { .. } => "malformed_row",
            StorageError::RowNotFound { .. } => "row_not_found",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| StorageError::Io { path, source }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>) -> impl FnOnce(csv::Error) -> Self {
        let path = path.into();
        move |source| StorageError::Csv { path, source }
    }
}
