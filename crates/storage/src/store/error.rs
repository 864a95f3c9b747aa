#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Json(serde_json::Error),
    InvalidInput(&'static str),
    UnknownSnapshot,
    UnknownChange,
    UnknownChangeSet,
    UnknownBranch,
    UnknownLabel,
    UnknownFile,
    BranchAlreadyExists,
    ParentNotHead {
        entity_id: String,
        declared: String,
        head: Option<String>,
    },
    StaleBranch {
        branch: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    AmbiguousHead {
        entity_id: String,
        candidates: Vec<String>,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownSnapshot => write!(f, "unknown snapshot"),
            Self::UnknownChange => write!(f, "unknown change"),
            Self::UnknownChangeSet => write!(f, "unknown changeset"),
            Self::UnknownBranch => write!(f, "unknown branch"),
            Self::UnknownLabel => write!(f, "unknown label"),
            Self::UnknownFile => write!(f, "unknown file"),
            Self::BranchAlreadyExists => write!(f, "branch already exists"),
            Self::ParentNotHead {
                entity_id,
                declared,
                head,
            } => write!(
                f,
                "declared parent is not the entity head (entity={entity_id}, declared={declared}, head={head:?})"
            ),
            Self::StaleBranch {
                branch,
                expected,
                actual,
            } => write!(
                f,
                "stale branch head (branch={branch}, expected={expected:?}, actual={actual:?})"
            ),
            Self::AmbiguousHead {
                entity_id,
                candidates,
            } => write!(
                f,
                "ambiguous head (entity={entity_id}, candidates={candidates:?}); add branch scoping"
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
