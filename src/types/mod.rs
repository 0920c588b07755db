//! Core types used throughout the GitMatch server.
//!
//! This module contains the common data structures used for:
//! - Pagination
//! - Error handling and HTTP status mapping
//!
//! Domain-specific request/response models live next to their services
//! (`search::models`, `feed`, `events`).

use serde::{Deserialize, Serialize};

/// Default page size for paginated endpoints.
pub const DEFAULT_PAGE_SIZE: i64 = 20;
/// Maximum page size for paginated endpoints.
pub const MAX_PAGE_SIZE: i64 = 50;

// ============= Pagination =============

/// Pagination query parameters shared by feed and listing endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PageParams {
    /// 1-indexed page number.
    #[serde(default = "default_page")]
    pub page: i64,
    /// Results per page (clamped to [`MAX_PAGE_SIZE`]).
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageParams {
    /// Clamp page and page_size into their valid ranges.
    pub fn clamped(self) -> Self {
        let page = self.page.max(1);
        let page_size = if self.page_size < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size.min(MAX_PAGE_SIZE)
        };
        Self { page, page_size }
    }

    /// Row offset for the current page.
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    /// Whether a further page exists given a total row count.
    pub fn has_more(&self, total: i64) -> bool {
        self.page * self.page_size < total
    }
}

// ============= Error Types =============

/// Application-wide error type.
///
/// This is the closed error taxonomy; the HTTP boundary translates each
/// variant to a status code exactly once in `IntoResponse`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Requested resource was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input validation failed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authentication is missing, expired, or invalid.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Caller exceeded its token-bucket budget. Carries the retry delay in seconds.
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// A required backing service (cache) is unavailable.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// External service call failed.
    #[error("External service error: {0}")]
    External(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::DependencyUnavailable(err.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        // 4xx responses carry {"detail": ...}; 5xx responses are sparse and
        // never leak internal messages.
        let (status, detail) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, Some(msg.clone())),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, Some(msg.clone())),
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, Some(msg.clone())),
            AppError::RateLimited(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                Some("Rate limit exceeded".to_string()),
            ),
            AppError::DependencyUnavailable(msg) => {
                tracing::warn!(error = %msg, "dependency unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            AppError::Configuration(msg) => {
                tracing::error!(error = %msg, "configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            AppError::External(msg) => {
                tracing::error!(error = %msg, "upstream error");
                (StatusCode::BAD_GATEWAY, None)
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = match detail {
            Some(detail) => serde_json::json!({ "detail": detail }),
            None => serde_json::json!({ "detail": "Internal error" }),
        };

        let mut response = (status, axum::Json(body)).into_response();

        if let AppError::RateLimited(retry_after) = self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// A specialized Result type for GitMatch operations.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn page_params_clamp_to_bounds() {
        let p = PageParams {
            page: 0,
            page_size: 500,
        }
        .clamped();
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, MAX_PAGE_SIZE);

        let p = PageParams { page: 3, page_size: 0 }.clamped();
        assert_eq!(p.page, 3);
        assert_eq!(p.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn page_params_offset_and_has_more() {
        let p = PageParams {
            page: 2,
            page_size: 20,
        };
        assert_eq!(p.offset(), 20);
        assert!(p.has_more(41));
        assert!(!p.has_more(40));
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = AppError::RateLimited(30).into_response();
        assert_eq!(response.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::RETRY_AFTER)
                .unwrap(),
            "30"
        );
    }

    #[test]
    fn internal_error_is_sparse() {
        let response = AppError::Database("secret connection string".into()).into_response();
        assert_eq!(
            response.status(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
