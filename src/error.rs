use std::collections::HashMap;

use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Span, error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Course '{course}' is full")]
    CapacityExceeded { course: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Course {course_id} still has {registrations} registration(s) and cannot be deleted")]
    CourseInUse { course_id: i64, registrations: i64 },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
    pub errors: HashMap<String, Vec<String>>,
}

impl ErrorResponse {
    pub fn new(message: &str, errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.to_string(),
            errors,
        }
    }

    pub fn with_error(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::new(message, errors)
    }
}

impl AppError {
    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        let error_kind = match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
                "database_error"
            }
            AppError::Validation(msg) => {
                warn!(message = %msg, context = %ctx, "Validation error");
                "validation_error"
            }
            AppError::CapacityExceeded { course } => {
                warn!(course = %course, context = %ctx, "Course capacity exceeded");
                "capacity_exceeded"
            }
            AppError::NotFound(msg) => {
                warn!(message = %msg, context = %ctx, "Not found error");
                "not_found_error"
            }
            AppError::Conflict(msg) => {
                warn!(message = %msg, context = %ctx, "Conflict error");
                "conflict_error"
            }
            AppError::CourseInUse {
                course_id,
                registrations,
            } => {
                warn!(course_id, registrations, context = %ctx, "Course still referenced");
                "course_in_use"
            }
            AppError::Authentication(msg) => {
                warn!(message = %msg, context = %ctx, "Authentication error");
                "authentication_error"
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error");
                "internal_error"
            }
        };

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(error_kind));
            current_span.record("error.message", tracing::field::display(&message));

            if self.is_server_error() {
                current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
            }
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Internal(_))
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Validation(_) => Status::BadRequest,
            AppError::CapacityExceeded { .. } => Status::BadRequest,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Conflict(_) => Status::Conflict,
            AppError::CourseInUse { .. } => Status::Conflict,
            AppError::Authentication(_) => Status::Unauthorized,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }

    /// Client-facing body. Storage and internal failures are reported
    /// generically; their detail only goes to the log.
    pub fn to_error_response(&self) -> ErrorResponse {
        let (field, message) = match self {
            AppError::Database(_) | AppError::Internal(_) => {
                ("server", "Internal server error".to_string())
            }
            AppError::Validation(msg) => ("request", msg.clone()),
            AppError::CapacityExceeded { .. } => ("courses", self.to_string()),
            AppError::NotFound(msg) => ("resource", msg.clone()),
            AppError::Conflict(msg) => ("resource", msg.clone()),
            AppError::CourseInUse { .. } => ("course", self.to_string()),
            AppError::Authentication(msg) => ("authentication", msg.clone()),
        };

        ErrorResponse::with_error(field, &message)
    }

    pub fn to_custom_with_log(&self, context: &str) -> Custom<Json<ErrorResponse>> {
        self.log_and_record(context);
        Custom(self.status_code(), Json(self.to_error_response()))
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        self.to_custom_with_log(&format!("Request to {} {}", req.method(), req.uri()))
            .respond_to(req)
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {}", error))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, field_errors)| {
                field_errors.iter().map(move |error| {
                    let message = error
                        .message
                        .clone()
                        .unwrap_or_else(|| "Invalid value".into());
                    format!("{}: {}", field, message)
                })
            })
            .collect();
        messages.sort();

        AppError::Validation(messages.join("; "))
    }
}
