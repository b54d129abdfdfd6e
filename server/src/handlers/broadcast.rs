//! Operator broadcast endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AdminAuth;
use crate::broadcast::{self, BroadcastRequest, BroadcastSummary};
use crate::config::Config;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::gateway::SmsGateway;

const MAX_RESULTS_IN_RESPONSE: usize = 10;
const MAX_ERRORS_IN_RESPONSE: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastBody {
    pub message: String,
    pub campaign_name: Option<String>,
    pub approved_links: Option<Vec<String>>,
    #[serde(default)]
    pub target_all: bool,
    #[serde(default)]
    pub target_list_ids: Vec<String>,
    #[serde(default)]
    pub exclude_list_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestBroadcastBody {
    pub message: String,
    pub phone_number: String,
    pub campaign_name: Option<String>,
    pub approved_links: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResultView {
    pub phone_number: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub success: bool,
    pub broadcast_id: Option<String>,
    pub campaign_name: Option<String>,
    pub sent_to: usize,
    pub failed: usize,
    /// Dollar cost as a 2-decimal string.
    pub total_cost: String,
    pub segment_count: usize,
    pub links_tracked: usize,
    pub target_all: bool,
    pub targeted_lists: usize,
    pub results: Vec<SendResultView>,
    pub errors: Vec<String>,
}

impl BroadcastResponse {
    fn from_summary(summary: BroadcastSummary) -> Self {
        Self {
            success: true,
            broadcast_id: summary.broadcast_id,
            campaign_name: summary.campaign_name,
            sent_to: summary.sent_to,
            failed: summary.failed,
            total_cost: format!("{:.2}", summary.total_cost),
            segment_count: summary.segment_count,
            links_tracked: summary.links_tracked,
            target_all: summary.target_all,
            targeted_lists: summary.targeted_list_count,
            results: summary
                .results
                .into_iter()
                .take(MAX_RESULTS_IN_RESPONSE)
                .map(|r| SendResultView {
                    phone_number: r.phone_number,
                    success: r.success,
                    provider_id: r.provider_id,
                })
                .collect(),
            errors: summary
                .errors
                .into_iter()
                .take(MAX_ERRORS_IN_RESPONSE)
                .collect(),
        }
    }
}

/// POST /api/broadcast
pub async fn send_broadcast(
    State(pool): State<DbPool>,
    State(config): State<Arc<Config>>,
    State(gateway): State<Arc<dyn SmsGateway>>,
    _auth: AdminAuth,
    Json(body): Json<BroadcastBody>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let request = BroadcastRequest {
        message: body.message,
        campaign_name: body.campaign_name,
        approved_links: body.approved_links,
        target_all: body.target_all,
        target_list_ids: body.target_list_ids,
        exclude_list_ids: body.exclude_list_ids,
    };

    let summary = broadcast::run_broadcast(&pool, gateway.as_ref(), &config, &request).await?;
    Ok(Json(BroadcastResponse::from_summary(summary)))
}

/// POST /api/broadcast/test
pub async fn send_test_broadcast(
    State(pool): State<DbPool>,
    State(config): State<Arc<Config>>,
    State(gateway): State<Arc<dyn SmsGateway>>,
    _auth: AdminAuth,
    Json(body): Json<TestBroadcastBody>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let summary = broadcast::run_test_broadcast(
        &pool,
        gateway.as_ref(),
        &config,
        &body.phone_number,
        &body.message,
        body.campaign_name.as_deref(),
        body.approved_links.as_deref(),
    )
    .await?;

    Ok(Json(BroadcastResponse::from_summary(summary)))
}
