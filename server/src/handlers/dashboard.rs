//! Operator dashboard counters and the recent-message feed.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AdminAuth;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::handlers::subscribers::MessageView;
use crate::phone;

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_subscribers: i64,
    pub active_subscribers: i64,
    pub total_broadcasts: i64,
    pub total_messages: i64,
    pub messages_last_24h: i64,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMessageView {
    pub display_phone: String,
    pub phone_number: String,
    #[serde(flatten)]
    pub message: MessageView,
}

/// GET /api/dashboard/stats
pub async fn get_stats(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
) -> Result<Json<DashboardStats>, ApiError> {
    let since = Utc::now() - Duration::hours(24);

    Ok(Json(DashboardStats {
        total_subscribers: db::count_subscribers(&pool).await?,
        active_subscribers: db::count_active_subscribers(&pool).await?,
        total_broadcasts: db::count_broadcasts(&pool).await?,
        total_messages: db::count_messages(&pool).await?,
        messages_last_24h: db::count_messages_since(&pool, since).await?,
        unread_count: db::unread_conversation_count(&pool).await?,
    }))
}

/// GET /api/dashboard/messages
pub async fn get_messages(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Query(params): Query<FeedParams>,
) -> Result<Json<Vec<FeedMessageView>>, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);

    let messages = db::recent_messages(&pool, limit).await?;
    Ok(Json(
        messages
            .into_iter()
            .map(|m| FeedMessageView {
                display_phone: phone::format_display(&m.phone_number),
                phone_number: m.phone_number.clone(),
                message: m.into(),
            })
            .collect(),
    ))
}
