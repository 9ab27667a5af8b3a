use uuid::Uuid;

/// Errors surfaced by `ProgressStore` implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("progress record not found")]
    NotFound,
    #[error("version conflict for learner {learner_id} card {card_id}")]
    Conflict { learner_id: Uuid, card_id: Uuid },
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the scheduling engine to its callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("concurrent write conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
    #[error("deadline exceeded for {0}")]
    Timeout(&'static str),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => EngineError::NotFound("progress record not found".to_string()),
            StoreError::Conflict {
                learner_id,
                card_id,
            } => EngineError::Conflict(format!(
                "concurrent update on learner {learner_id} card {card_id}"
            )),
            other => EngineError::Storage(other),
        }
    }
}
