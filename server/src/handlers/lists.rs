//! Subscriber list administration and membership management.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AdminAuth;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::handlers::inbox::clamp_page;
use crate::handlers::subscribers::SubscriberView;

#[derive(Debug, Deserialize)]
pub struct ListBody {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberBody {
    pub subscriber_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub member_count: i64,
}

/// GET /api/lists
pub async fn list_lists(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
) -> Result<Json<Vec<ListView>>, ApiError> {
    let lists = db::list_lists(&pool).await?;
    Ok(Json(
        lists
            .into_iter()
            .map(|l| ListView {
                id: l.id,
                name: l.name,
                description: l.description,
                created_at: l.created_at,
                member_count: l.member_count,
            })
            .collect(),
    ))
}

/// POST /api/lists
pub async fn create_list(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Json(body): Json<ListBody>,
) -> Result<Json<ListView>, ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::InvalidInput("List name is required".to_string()));
    }

    if db::list_name_taken(&pool, name).await? {
        return Err(ApiError::Conflict(format!("List {name} already exists")));
    }

    let created = db::create_list(&pool, name, body.description.as_deref())
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                ApiError::Conflict(format!("List {name} already exists"))
            } else {
                ApiError::Internal(e)
            }
        })?;

    Ok(Json(ListView {
        id: created.id,
        name: created.name,
        description: created.description,
        created_at: created.created_at,
        member_count: 0,
    }))
}

/// DELETE /api/lists/{id}
///
/// Rejected while any signup keyword references the list; the store does
/// not cascade that reference.
pub async fn delete_list(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if db::find_list(&pool, &id).await?.is_none() {
        return Err(ApiError::NotFound("List not found".to_string()));
    }

    let references = db::keyword_references_to_list(&pool, &id).await?;
    if references > 0 {
        return Err(ApiError::Conflict(format!(
            "List is referenced by {references} signup keyword(s)"
        )));
    }

    db::delete_list(&pool, &id).await?;
    Ok(Json(json!({"success": true})))
}

/// GET /api/lists/{id}/members
pub async fn list_members(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<SubscriberView>>, ApiError> {
    if db::find_list(&pool, &id).await?.is_none() {
        return Err(ApiError::NotFound("List not found".to_string()));
    }

    let (limit, offset) = clamp_page(params.limit, params.offset);
    let members = db::list_members(&pool, &id, limit, offset).await?;
    Ok(Json(members.into_iter().map(SubscriberView::from).collect()))
}

/// POST /api/lists/{id}/members
pub async fn add_member(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
    Json(body): Json<AddMemberBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if db::find_list(&pool, &id).await?.is_none() {
        return Err(ApiError::NotFound("List not found".to_string()));
    }
    if db::find_subscriber(&pool, &body.subscriber_id).await?.is_none() {
        return Err(ApiError::NotFound("Subscriber not found".to_string()));
    }

    let added = db::add_membership(&pool, &body.subscriber_id, &id, "manual").await?;
    Ok(Json(json!({"success": true, "added": added})))
}

/// DELETE /api/lists/{id}/members/{subscriberId}
pub async fn remove_member(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path((id, subscriber_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if db::find_list(&pool, &id).await?.is_none() {
        return Err(ApiError::NotFound("List not found".to_string()));
    }

    let removed = db::remove_membership(&pool, &subscriber_id, &id).await?;
    Ok(Json(json!({"success": true, "removed": removed > 0})))
}
