//! Signup keyword administration.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AdminAuth;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::keywords;
use crate::models::SignupKeyword;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordBody {
    pub keyword: String,
    pub auto_response: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub list_id: Option<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordView {
    pub id: String,
    pub keyword: String,
    pub auto_response: String,
    pub is_active: bool,
    pub list_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SignupKeyword> for KeywordView {
    fn from(k: SignupKeyword) -> Self {
        Self {
            id: k.id,
            keyword: k.keyword,
            auto_response: k.auto_response,
            is_active: k.is_active,
            list_id: k.list_id,
            created_at: k.created_at,
        }
    }
}

/// Normalize and validate an incoming keyword body; shared by create and
/// update.
async fn validate_body(pool: &DbPool, body: &KeywordBody) -> Result<String, ApiError> {
    let normalized = keywords::normalize(&body.keyword);
    if normalized.is_empty() {
        return Err(ApiError::InvalidInput("Keyword is required".to_string()));
    }
    if body.auto_response.trim().is_empty() {
        return Err(ApiError::InvalidInput(
            "Auto-response is required".to_string(),
        ));
    }
    if let Some(list_id) = &body.list_id {
        if db::find_list(pool, list_id).await?.is_none() {
            return Err(ApiError::InvalidInput(format!("Unknown list: {list_id}")));
        }
    }
    Ok(normalized)
}

/// GET /api/keywords
pub async fn list_keywords(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
) -> Result<Json<Vec<KeywordView>>, ApiError> {
    let rows = db::list_keywords(&pool).await?;
    Ok(Json(rows.into_iter().map(KeywordView::from).collect()))
}

/// POST /api/keywords
pub async fn create_keyword(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Json(body): Json<KeywordBody>,
) -> Result<Json<KeywordView>, ApiError> {
    let normalized = validate_body(&pool, &body).await?;

    if db::keyword_text_taken(&pool, &normalized, None).await? {
        return Err(ApiError::Conflict(format!(
            "Keyword {normalized} already exists"
        )));
    }

    let created = db::create_keyword(
        &pool,
        &normalized,
        body.auto_response.trim(),
        body.is_active,
        body.list_id.as_deref(),
    )
    .await
    .map_err(|e| {
        // The unique index backstops the pre-check under races.
        if db::is_unique_violation(&e) {
            ApiError::Conflict(format!("Keyword {normalized} already exists"))
        } else {
            ApiError::Internal(e)
        }
    })?;

    Ok(Json(created.into()))
}

/// PUT /api/keywords/{id}
pub async fn update_keyword(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
    Json(body): Json<KeywordBody>,
) -> Result<Json<KeywordView>, ApiError> {
    if db::find_keyword(&pool, &id).await?.is_none() {
        return Err(ApiError::NotFound("Keyword not found".to_string()));
    }

    let normalized = validate_body(&pool, &body).await?;

    if db::keyword_text_taken(&pool, &normalized, Some(&id)).await? {
        return Err(ApiError::Conflict(format!(
            "Keyword {normalized} already exists"
        )));
    }

    let updated = db::update_keyword(
        &pool,
        &id,
        &normalized,
        body.auto_response.trim(),
        body.is_active,
        body.list_id.as_deref(),
    )
    .await
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            ApiError::Conflict(format!("Keyword {normalized} already exists"))
        } else {
            ApiError::Internal(e)
        }
    })?
    .ok_or_else(|| ApiError::NotFound("Keyword not found".to_string()))?;

    Ok(Json(updated.into()))
}

/// DELETE /api/keywords/{id}
pub async fn delete_keyword(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = db::delete_keyword(&pool, &id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Keyword not found".to_string()));
    }
    Ok(Json(json!({"success": true})))
}
