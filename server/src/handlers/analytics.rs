//! Broadcast performance analytics.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AdminAuth;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::handlers::inbox::clamp_page;

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastAnalyticsView {
    pub id: String,
    pub name: Option<String>,
    pub message: String,
    pub sent_count: i32,
    /// Dollar cost as a 2-decimal string.
    pub total_cost: String,
    pub target_all: bool,
    pub created_at: DateTime<Utc>,
    pub delivered_count: i64,
    pub failed_count: i64,
    pub click_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsTotals {
    pub broadcasts: i64,
    pub subscribers: i64,
    pub active_subscribers: i64,
    pub messages: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub broadcasts: Vec<BroadcastAnalyticsView>,
    pub totals: AnalyticsTotals,
}

/// GET /api/analytics
pub async fn get_analytics(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let (limit, offset) = clamp_page(params.limit, params.offset);

    let rows = db::broadcast_analytics(&pool, limit, offset).await?;
    let broadcasts = rows
        .into_iter()
        .map(|b| BroadcastAnalyticsView {
            id: b.id,
            name: b.name,
            message: b.message,
            sent_count: b.sent_count,
            total_cost: format!("{:.2}", b.total_cost),
            target_all: b.target_all,
            created_at: b.created_at,
            delivered_count: b.delivered_count,
            failed_count: b.failed_count,
            click_count: b.click_count,
        })
        .collect();

    let totals = AnalyticsTotals {
        broadcasts: db::count_broadcasts(&pool).await?,
        subscribers: db::count_subscribers(&pool).await?,
        active_subscribers: db::count_active_subscribers(&pool).await?,
        messages: db::count_messages(&pool).await?,
    };

    Ok(Json(AnalyticsResponse { broadcasts, totals }))
}
