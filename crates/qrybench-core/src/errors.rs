use std::fmt;

/// Errors surfaced at the engine's public boundary. Individual query
/// failures are never errors here; they are recorded on the execution row.
#[derive(Debug)]
pub enum EngineError {
    /// Bad input: missing run or set, empty query set, out-of-range
    /// parameters, run not in the required state, mismatched query sets.
    Validation(String),
    /// The per-user concurrent-run ceiling was hit. The caller may retry
    /// once one of its runs reaches a terminal state.
    CapacityExceeded { user_id: i64, limit: usize },
    /// A store failure during orchestration setup or comparison.
    Storage(anyhow::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation error: {}", msg),
            EngineError::CapacityExceeded { user_id, limit } => write!(
                f,
                "capacity exceeded: user {} already has {} running runs",
                user_id, limit
            ),
            EngineError::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Storage(e)
    }
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}
