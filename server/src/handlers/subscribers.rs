//! Subscriber roster administration: listing, adds, bulk import,
//! conversation history, and operator replies.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::auth::AdminAuth;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::gateway::SmsGateway;
use crate::handlers::inbox::clamp_page;
use crate::models::{Message, Subscriber};
use crate::phone;

/// Bulk import cap per request.
pub const MAX_BULK_IMPORT: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct SubscriberListParams {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriberBody {
    pub phone_number: String,
    pub list_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkImportBody {
    pub phone_numbers: Vec<String>,
    pub list_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyBody {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberView {
    pub id: String,
    pub phone_number: String,
    pub display_phone: String,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub joined_via_keyword: Option<String>,
}

impl From<Subscriber> for SubscriberView {
    fn from(s: Subscriber) -> Self {
        Self {
            display_phone: phone::format_display(&s.phone_number),
            id: s.id,
            phone_number: s.phone_number,
            is_active: s.is_active,
            joined_at: s.joined_at,
            joined_via_keyword: s.joined_via_keyword,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub content: String,
    pub direction: String,
    pub created_at: DateTime<Utc>,
    pub delivery_status: String,
    pub broadcast_id: Option<String>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            content: m.content,
            direction: m.direction,
            created_at: m.created_at,
            delivery_status: m.delivery_status,
            broadcast_id: m.broadcast_id,
        }
    }
}

/// Per-entry outcome of a bulk import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportOutcome {
    Added,
    SkippedDuplicate,
    RejectedInvalidFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportEntry {
    pub phone_number: String,
    pub outcome: ImportOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkImportResponse {
    pub success: bool,
    pub added: usize,
    pub skipped_duplicate: usize,
    pub rejected_invalid_format: usize,
    pub results: Vec<ImportEntry>,
}

/// GET /api/subscribers
pub async fn list_subscribers(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Query(params): Query<SubscriberListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (limit, offset) = clamp_page(params.limit, params.offset);
    let search = params.search.as_deref().unwrap_or("");

    let subscribers = db::list_subscribers(&pool, search, limit, offset).await?;
    let total = db::count_subscribers(&pool).await?;

    let views: Vec<SubscriberView> = subscribers.into_iter().map(SubscriberView::from).collect();
    Ok(Json(json!({
        "subscribers": views,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

/// POST /api/subscribers
pub async fn create_subscriber(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Json(body): Json<CreateSubscriberBody>,
) -> Result<Json<SubscriberView>, ApiError> {
    let Some(canonical) = phone::normalize(&body.phone_number) else {
        return Err(ApiError::InvalidInput(format!(
            "Invalid US phone number: {}",
            body.phone_number
        )));
    };

    if let Some(list_id) = &body.list_id {
        if db::find_list(&pool, list_id).await?.is_none() {
            return Err(ApiError::InvalidInput(format!("Unknown list: {list_id}")));
        }
    }

    let Some(subscriber) = db::insert_subscriber_if_new(&pool, &canonical).await? else {
        return Err(ApiError::Conflict(format!(
            "Subscriber {canonical} already exists"
        )));
    };

    if let Some(list_id) = &body.list_id {
        db::add_membership(&pool, &subscriber.id, list_id, "manual").await?;
    }

    Ok(Json(subscriber.into()))
}

/// POST /api/subscribers/bulk
///
/// Accepts up to 5000 candidate numbers; each gets exactly one outcome.
/// With a list id, added AND pre-existing subscribers are enrolled.
pub async fn bulk_import(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Json(body): Json<BulkImportBody>,
) -> Result<Json<BulkImportResponse>, ApiError> {
    if body.phone_numbers.is_empty() {
        return Err(ApiError::InvalidInput(
            "phoneNumbers must not be empty".to_string(),
        ));
    }
    if body.phone_numbers.len() > MAX_BULK_IMPORT {
        return Err(ApiError::InvalidInput(format!(
            "At most {MAX_BULK_IMPORT} numbers per import"
        )));
    }
    if let Some(list_id) = &body.list_id {
        if db::find_list(&pool, list_id).await?.is_none() {
            return Err(ApiError::InvalidInput(format!("Unknown list: {list_id}")));
        }
    }

    let mut results = Vec::with_capacity(body.phone_numbers.len());
    let (mut added, mut skipped, mut rejected) = (0, 0, 0);

    for raw in &body.phone_numbers {
        let Some(canonical) = phone::normalize(raw) else {
            rejected += 1;
            results.push(ImportEntry {
                phone_number: raw.clone(),
                outcome: ImportOutcome::RejectedInvalidFormat,
            });
            continue;
        };

        let (subscriber_id, outcome) = match db::insert_subscriber_if_new(&pool, &canonical).await?
        {
            Some(subscriber) => {
                added += 1;
                (Some(subscriber.id), ImportOutcome::Added)
            }
            None => {
                skipped += 1;
                let existing = db::find_subscriber_by_phone(&pool, &canonical).await?;
                (existing.map(|s| s.id), ImportOutcome::SkippedDuplicate)
            }
        };

        if let (Some(list_id), Some(subscriber_id)) = (&body.list_id, &subscriber_id) {
            if let Err(e) = db::add_membership(&pool, subscriber_id, list_id, "bulk-import").await {
                warn!(error = %e, phone = %canonical, "Bulk enrollment failed");
            }
        }

        results.push(ImportEntry {
            phone_number: canonical,
            outcome,
        });
    }

    Ok(Json(BulkImportResponse {
        success: true,
        added,
        skipped_duplicate: skipped,
        rejected_invalid_format: rejected,
        results,
    }))
}

/// GET /api/subscribers/{id}
pub async fn get_subscriber(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let subscriber = db::find_subscriber(&pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Subscriber not found".to_string()))?;

    let lists = db::lists_for_subscriber(&pool, &id).await?;
    let list_views: Vec<serde_json::Value> = lists
        .into_iter()
        .map(|l| json!({"id": l.id, "name": l.name}))
        .collect();

    let view = SubscriberView::from(subscriber);
    Ok(Json(json!({
        "subscriber": view,
        "lists": list_views,
    })))
}

/// DELETE /api/subscribers/{id}
///
/// Deactivates; subscriber rows are never physically deleted here.
pub async fn deactivate_subscriber(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if db::find_subscriber(&pool, &id).await?.is_none() {
        return Err(ApiError::NotFound("Subscriber not found".to_string()));
    }

    db::deactivate_subscriber(&pool, &id).await?;
    Ok(Json(json!({"success": true})))
}

/// GET /api/subscribers/{id}/messages
pub async fn get_messages(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let subscriber = db::find_subscriber(&pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Subscriber not found".to_string()))?;

    let (limit, offset) = clamp_page(params.limit, params.offset);
    let messages = db::conversation_messages(&pool, &subscriber.phone_number, limit, offset).await?;

    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}

/// POST /api/subscribers/{id}/reply
///
/// Operator reply into one conversation. The reply closes the unread window:
/// the operator has necessarily read the thread to answer it.
pub async fn reply(
    State(pool): State<DbPool>,
    State(gateway): State<Arc<dyn SmsGateway>>,
    _auth: AdminAuth,
    Path(id): Path<String>,
    Json(body): Json<ReplyBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::InvalidInput("Message is required".to_string()));
    }

    let subscriber = db::find_subscriber(&pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Subscriber not found".to_string()))?;

    let outcome = gateway
        .send(&subscriber.phone_number, &body.message)
        .await
        .map_err(|e| ApiError::Dependency(format!("SMS send failed: {e}")))?;

    if let Err(e) = db::insert_outbound_message(
        &pool,
        &subscriber.phone_number,
        &body.message,
        None,
        Some(&outcome.provider_id),
        outcome.initial_status,
    )
    .await
    {
        warn!(error = %e, "Reply message row insert failed");
    }

    if let Err(e) = db::mark_read(&pool, &subscriber.id).await {
        warn!(error = %e, "Read watermark update after reply failed");
    }

    Ok(Json(json!({
        "success": true,
        "providerId": outcome.provider_id,
    })))
}
