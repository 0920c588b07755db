//! Taxonomy reference endpoints: language and stack-area whitelists.

use axum::Json;
use serde::Serialize;

use crate::taxonomy::{languages, stack_areas, StackAreaInfo};

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LanguagesResponse {
    pub languages: Vec<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StackAreasResponse {
    pub stack_areas: Vec<StackAreaInfo>,
}

/// GET /taxonomy/languages
pub async fn get_languages() -> Json<LanguagesResponse> {
    Json(LanguagesResponse {
        languages: languages(),
    })
}

/// GET /taxonomy/stack-areas
pub async fn get_stack_areas() -> Json<StackAreasResponse> {
    Json(StackAreasResponse {
        stack_areas: stack_areas(),
    })
}
