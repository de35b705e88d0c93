use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::domain::EntityKind;
use super::repository::RepositoryError;
use super::resolution::StatusCandidate;

/// Error taxonomy shared by every rule engine operation.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(
        "{} candidate statuses tie at priority {}",
        .candidates.len(),
        describe_priority(.priority)
    )]
    Ambiguous {
        priority: Option<i32>,
        candidates: Vec<StatusCandidate>,
    },
    #[error("rule storage unavailable: {0}")]
    Unavailable(String),
}

fn describe_priority(priority: &Option<i32>) -> String {
    match priority {
        Some(value) => value.to_string(),
        None => "unset".to_string(),
    }
}

impl RuleError {
    pub fn not_found(kind: EntityKind, id: impl Display) -> Self {
        RuleError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RuleError::NotFound { .. } => StatusCode::NOT_FOUND,
            RuleError::InvalidReference(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RuleError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            RuleError::Conflict(_) | RuleError::Ambiguous { .. } => StatusCode::CONFLICT,
            RuleError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<RepositoryError> for RuleError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { kind, key } => {
                RuleError::Conflict(format!("{kind} '{key}' already exists"))
            }
            RepositoryError::NotFound { kind, key } => RuleError::NotFound { kind, id: key },
            RepositoryError::Unavailable(reason) => RuleError::Unavailable(reason),
        }
    }
}

impl IntoResponse for RuleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            RuleError::Ambiguous { candidates, .. } => json!({
                "error": self.to_string(),
                "candidates": candidates,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
