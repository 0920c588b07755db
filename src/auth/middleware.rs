//! Session authentication middleware and extractors.
//!
//! The core treats identity as a narrow collaborator: a Bearer token is
//! hashed and matched against the sessions table. Auth checks run before
//! input validation; missing, expired, or revoked sessions are 401.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::{AppError, Result};
use crate::utils::audit::{log_audit_event, AuditEvent};
use crate::AppState;

/// The authenticated user id, inserted into request extensions.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

fn bearer_token(request: &Request) -> Result<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthenticated("missing bearer token".to_string()))
}

async fn resolve_session(state: &AppState, token: &str) -> Result<Uuid> {
    let token_hash = hex::encode(Sha256::digest(token.as_bytes()));

    #[derive(sqlx::FromRow)]
    struct SessionRow {
        user_id: Uuid,
        expired: bool,
    }

    let session = sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT user_id, (expires_at <= now()) AS expired
        FROM sessions
        WHERE token_hash = $1 AND revoked_at IS NULL
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(&state.pool)
    .await?;

    match session {
        Some(session) if !session.expired => Ok(session.user_id),
        Some(session) => {
            log_audit_event(AuditEvent::SessionEvicted, Some(session.user_id), None);
            Err(AppError::Unauthenticated("session expired".to_string()))
        }
        None => Err(AppError::Unauthenticated("invalid session".to_string())),
    }
}

/// Require a valid session; 401 otherwise.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = bearer_token(&request)?;
    let user_id = resolve_session(&state, token).await?;
    request.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(request).await)
}

/// Resolve a session when one is presented; anonymous requests pass through.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    if let Ok(token) = bearer_token(&request) {
        // A presented-but-invalid token is still a 401: silently downgrading
        // to anonymous would mask expired sessions.
        let user_id = resolve_session(&state, token).await?;
        request.extensions_mut().insert(CurrentUser(user_id));
    }
    Ok(next.run(request).await)
}

/// Extractor for handlers behind `require_auth`.
pub struct AuthUser(pub Uuid);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<CurrentUser>()
            .map(|user| AuthUser(user.0))
            .ok_or_else(|| AppError::Unauthenticated("authentication required".to_string()))
    }
}

/// Extractor for mixed-auth handlers behind `optional_auth`.
pub struct MaybeAuthUser(pub Option<Uuid>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(
            parts.extensions.get::<CurrentUser>().map(|user| user.0),
        ))
    }
}
