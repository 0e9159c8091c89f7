use leadroute_core::error::CoreError;
use leadroute_core::types::DbId;
use leadroute_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The pass was abandoned; the lead stays `evaluating` until resumed.
    #[error("Distribution of lead {lead_id} timed out after {timeout_ms} ms")]
    Timeout { lead_id: DbId, timeout_ms: u64 },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether the error is a lost compare-and-swap race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_conflict())
    }
}
