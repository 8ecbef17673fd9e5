use thiserror::Error;

/// Failures reported by a room or profile backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("room not found: {0}")]
    NotFound(String),
    #[error("only the host can start the match")]
    NotHost,
    #[error("at least {required} players required, got {count}")]
    NotEnoughPlayers { count: usize, required: usize },
    #[error("unknown power type: {0}")]
    UnknownPower(String),
    #[error("not in a room")]
    NoRoom,
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(code) => RoomError::NotFound(code),
            other => RoomError::Store(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("profile store error: {0}")]
    Store(#[from] StoreError),
}
