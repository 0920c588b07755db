//! Issue detail and similar-issue endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::catalog::issues::{
    get_issue_by_node_id, get_similar_issues, IssueDetail, SimilarIssue, DEFAULT_SIMILAR_LIMIT,
};
use crate::types::{AppError, Result};
use crate::AppState;

/// GET /issues/{node_id}
pub async fn issue_detail(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(node_id): Path<String>,
) -> Result<Json<IssueDetail>> {
    let issue = get_issue_by_node_id(&state.pool, &node_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Issue not found".to_string()))?;

    Ok(Json(issue))
}

#[derive(Debug, Deserialize)]
pub struct SimilarParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SimilarIssuesResponse {
    pub issues: Vec<SimilarIssue>,
}

/// GET /issues/{node_id}/similar
///
/// Top-K open issues by vector similarity. Empty when the source issue has
/// no embedding yet or nothing clears the similarity threshold.
pub async fn similar_issues(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(node_id): Path<String>,
    Query(params): Query<SimilarParams>,
) -> Result<Json<SimilarIssuesResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT);

    let issues = get_similar_issues(&state.pool, &node_id, limit)
        .await?
        .ok_or_else(|| AppError::NotFound("Issue not found".to_string()))?;

    Ok(Json(SimilarIssuesResponse { issues }))
}
