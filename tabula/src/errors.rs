use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::db::DbError;

/// Everything that can go wrong in one table operation. Each failure is
/// scoped to a single table; none of them stop other tables from rendering.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No primary key found for table {0}. Editing is disabled.")]
    Metadata(String),

    #[error("Error loading table {table}: {source}")]
    Load {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Error saving changes: {source}")]
    Persistence {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Error saving changes: {0}")]
    Rejected(String),

    #[error("No changes to save for table {0}")]
    NoChanges(String),

    #[error("Table not found: {0}")]
    NotFound(String),

    #[error("User token not found in request headers")]
    Unauthorized,
}

impl EditorError {
    pub const fn code(&self) -> &'static str {
        match self {
            EditorError::Config(_) => "config_error",
            EditorError::Metadata(_) => "metadata_error",
            EditorError::Load { .. } => "load_error",
            EditorError::Persistence { .. } | EditorError::Rejected(_) => "persistence_error",
            EditorError::NoChanges(_) => "no_changes",
            EditorError::NotFound(_) => "not_found",
            EditorError::Unauthorized => "unauthorized",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            EditorError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EditorError::Metadata(_) | EditorError::NoChanges(_) => StatusCode::CONFLICT,
            EditorError::Load { .. } | EditorError::Persistence { .. } => StatusCode::BAD_GATEWAY,
            EditorError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EditorError::NotFound(_) => StatusCode::NOT_FOUND,
            EditorError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn load(table: impl ToString, source: DbError) -> Self {
        EditorError::Load {
            table: table.to_string(),
            source,
        }
    }

    pub fn persistence(table: impl ToString, source: DbError) -> Self {
        EditorError::Persistence {
            table: table.to_string(),
            source,
        }
    }
}

impl IntoResponse for EditorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type EditorResult<T> = Result<T, EditorError>;
