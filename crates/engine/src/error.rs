#![forbid(unsafe_code)]

use fl_storage::StoreError;

#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
    UnknownSchema(String),
    DuplicateSchema(String),
    UnknownFile(String),
    /// Transient plugin failure; the scheduler retries on the next tick.
    Plugin { file_id: String, message: String },
    /// Blob is not a valid embedded database; sticky until a later write
    /// corrects it.
    MalformedBlob { file_id: String, message: String },
    InvalidReport { file_id: String, message: String },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "store: {err}"),
            Self::UnknownSchema(schema_key) => write!(f, "unknown schema key: {schema_key}"),
            Self::DuplicateSchema(schema_key) => {
                write!(f, "schema key already registered: {schema_key}")
            }
            Self::UnknownFile(file_id) => write!(f, "file is not tracked: {file_id}"),
            Self::Plugin { file_id, message } => {
                write!(f, "diff plugin failed (file={file_id}): {message}")
            }
            Self::MalformedBlob { file_id, message } => {
                write!(f, "malformed blob (file={file_id}): {message}")
            }
            Self::InvalidReport { file_id, message } => {
                write!(f, "invalid diff report (file={file_id}): {message}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
