use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Head/tail/cycle invariant of the page list does not hold.
    #[error("page graph inconsistent for lesson {lesson_id}: {reason}")]
    GraphInconsistent { lesson_id: i64, reason: String },

    #[error("invalid jump from page {from} to {target}")]
    InvalidJump { from: i64, target: i64 },

    #[error("{kind} {id} not found")]
    MissingRecord { kind: &'static str, id: i64 },

    #[error("{0}")]
    BadInput(String),

    #[error("lesson {0} does not allow retakes")]
    RetakeNotAllowed(i64),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn graph(lesson_id: i64, reason: impl Into<String>) -> Self {
        Self::GraphInconsistent {
            lesson_id,
            reason: reason.into(),
        }
    }

    pub fn missing(kind: &'static str, id: i64) -> Self {
        Self::MissingRecord { kind, id }
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::BadInput(message.into())
    }

    /// Stable wire code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::GraphInconsistent { .. } => "graph_inconsistent",
            Self::InvalidJump { .. } => "invalid_jump",
            Self::MissingRecord { .. } => "not_found",
            Self::BadInput(_) => "bad_params",
            Self::RetakeNotAllowed(_) => "retake_not_allowed",
            Self::Db(_) => "db_query_failed",
            Self::Json(_) => "bad_json",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::GraphInconsistent { lesson_id, .. } => Some(json!({ "lessonId": lesson_id })),
            Self::InvalidJump { from, target } => Some(json!({ "from": from, "target": target })),
            Self::MissingRecord { kind, id } => Some(json!({ "kind": kind, "id": id })),
            Self::RetakeNotAllowed(lesson_id) => Some(json!({ "lessonId": lesson_id })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::graph(1, "two heads").code(), "graph_inconsistent");
        assert_eq!(EngineError::missing("page", 9).code(), "not_found");
        assert_eq!(
            EngineError::InvalidJump { from: 1, target: 2 }.code(),
            "invalid_jump"
        );
        let d = EngineError::missing("page", 9).details().expect("details");
        assert_eq!(d["kind"], "page");
        assert_eq!(d["id"], 9);
    }
}
