//! Operator inbox: conversation listing, unread stats, and read-state
//! toggles.

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
use crate::phone;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct InboxParams {
    pub filter: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub content: String,
    pub direction: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: String,
    pub phone_number: String,
    pub display_phone: String,
    pub has_unread: bool,
    pub last_read_at: Option<DateTime<Utc>>,
    pub preview: MessagePreview,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxResponse {
    pub conversations: Vec<ConversationView>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxStats {
    pub unread_count: i64,
    pub total_conversations: i64,
}

pub fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// GET /api/inbox
pub async fn get_inbox(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Query(params): Query<InboxParams>,
) -> Result<Json<InboxResponse>, ApiError> {
    let filter = params.filter.as_deref().unwrap_or("all");
    if !matches!(filter, "all" | "unread" | "read") {
        return Err(ApiError::InvalidInput(
            "filter must be one of all, unread, read".to_string(),
        ));
    }

    let search = params.search.as_deref().unwrap_or("");
    let (limit, offset) = clamp_page(params.limit, params.offset);

    let rows = db::list_conversations(&pool, filter, search, limit, offset).await?;
    let conversations = rows
        .into_iter()
        .map(|row| ConversationView {
            display_phone: phone::format_display(&row.phone_number),
            id: row.id,
            phone_number: row.phone_number,
            has_unread: row.has_unread,
            last_read_at: row.last_read_at,
            preview: MessagePreview {
                content: row.last_message_content,
                direction: row.last_message_direction,
                created_at: row.last_message_at,
            },
        })
        .collect();

    Ok(Json(InboxResponse {
        conversations,
        limit,
        offset,
    }))
}

/// GET /api/inbox/stats
pub async fn get_inbox_stats(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
) -> Result<Json<InboxStats>, ApiError> {
    let unread_count = db::unread_conversation_count(&pool).await?;
    let total_conversations = db::total_conversation_count(&pool).await?;

    Ok(Json(InboxStats {
        unread_count,
        total_conversations,
    }))
}

/// POST /api/conversations/{id}/mark-read
pub async fn mark_read(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_subscriber(&pool, &id).await?;
    db::mark_read(&pool, &id).await?;
    Ok(Json(json!({"success": true})))
}

/// POST /api/conversations/{id}/mark-unread
pub async fn mark_unread(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_subscriber(&pool, &id).await?;
    db::mark_unread(&pool, &id).await?;
    Ok(Json(json!({"success": true})))
}

/// POST /api/conversations/mark-all-read
pub async fn mark_all_read(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = db::mark_all_read(&pool).await?;
    Ok(Json(json!({"success": true, "updated": updated})))
}

async fn require_subscriber(pool: &DbPool, id: &str) -> Result<(), ApiError> {
    if db::find_subscriber(pool, id).await?.is_none() {
        return Err(ApiError::NotFound("Subscriber not found".to_string()));
    }
    Ok(())
}
