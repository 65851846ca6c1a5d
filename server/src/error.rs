use derive_more::derive::Display;
use reqwest::StatusCode;
use sea_orm::{DbErr, SqlErr};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Display)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
    RequestTimeout,
    TooManyRequests,
    DbError(DbErr),
    Conflict(String),
    Unauthorized(String),
}

impl std::error::Error for AppError {}

impl AppError {
    /// Errors that must abort an ingestion run instead of being folded into
    /// per-item counters.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Unauthorized(_))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        tracing::error!("Reqwest error: {:?}", error);
        if error.is_timeout() {
            return AppError::RequestTimeout;
        }
        match error.status() {
            Some(StatusCode::BAD_REQUEST) => AppError::BadRequest(error.to_string()),
            Some(StatusCode::UNAUTHORIZED) => AppError::Unauthorized(error.to_string()),
            Some(StatusCode::REQUEST_TIMEOUT) => AppError::RequestTimeout,
            Some(StatusCode::TOO_MANY_REQUESTS) => AppError::TooManyRequests,
            _ => AppError::Internal(error.into()),
        }
    }
}

impl From<DbErr> for AppError {
    fn from(error: DbErr) -> Self {
        if is_unique_violation(&error) {
            return AppError::Conflict(error.to_string());
        }
        AppError::DbError(error)
    }
}

pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
