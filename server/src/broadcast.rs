//! Broadcast fan-out pipeline: audience resolution, cost estimation, link
//! tokenization, and per-recipient sends.

use std::collections::HashSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::gateway::SmsGateway;
use crate::links;
use crate::models::{DeliveryStatus, Subscriber, TargetType};
use crate::phone;

/// Fixed carrier rate per SMS segment, in dollars.
pub const COST_PER_SEGMENT: f64 = 0.0083;

/// Characters per billing segment.
pub const SEGMENT_LENGTH: usize = 160;

/// Hard cap on draft length.
pub const MAX_MESSAGE_LENGTH: usize = 1600;

/// An operator's broadcast request after HTTP decoding.
#[derive(Debug, Clone, Default)]
pub struct BroadcastRequest {
    pub message: String,
    pub campaign_name: Option<String>,
    pub approved_links: Option<Vec<String>>,
    pub target_all: bool,
    pub target_list_ids: Vec<String>,
    pub exclude_list_ids: Vec<String>,
}

/// Per-recipient send record for the response summary.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub phone_number: String,
    pub success: bool,
    pub provider_id: Option<String>,
}

/// Campaign outcome returned to the operator.
#[derive(Debug, Clone)]
pub struct BroadcastSummary {
    /// `None` when the analytics header insert failed (the send still ran).
    pub broadcast_id: Option<String>,
    pub campaign_name: Option<String>,
    pub sent_to: usize,
    pub failed: usize,
    pub total_cost: f64,
    pub segment_count: usize,
    pub links_tracked: usize,
    pub target_all: bool,
    pub targeted_list_count: usize,
    pub results: Vec<SendResult>,
    pub errors: Vec<String>,
}

/// Billing segments for a draft: ceil(len/160), with the empty draft billed
/// as one segment.
pub fn segment_count(message: &str) -> usize {
    let len = message.chars().count();
    if len == 0 {
        1
    } else {
        len.div_ceil(SEGMENT_LENGTH)
    }
}

/// INCLUDE \ EXCLUDE preserving the include ordering.
fn apply_exclusions(include: Vec<Subscriber>, excluded: &HashSet<String>) -> Vec<Subscriber> {
    include
        .into_iter()
        .filter(|s| !excluded.contains(&s.id))
        .collect()
}

fn validate(request: &BroadcastRequest) -> Result<(), ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::InvalidInput("Message is required".to_string()));
    }
    if request.message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Message exceeds {MAX_MESSAGE_LENGTH} characters"
        )));
    }
    if !request.target_all
        && request.target_list_ids.is_empty()
        && request.exclude_list_ids.is_empty()
    {
        return Err(ApiError::InvalidInput(
            "Select lists to target, lists to exclude, or all subscribers".to_string(),
        ));
    }
    Ok(())
}

/// Resolve the audience by list algebra over active subscribers, in stable
/// joined_at order. Exclusion wins on overlap.
pub async fn resolve_audience(
    pool: &DbPool,
    request: &BroadcastRequest,
) -> Result<Vec<Subscriber>, ApiError> {
    let include = if request.target_all || request.target_list_ids.is_empty() {
        db::all_active_subscribers(pool).await?
    } else {
        db::active_subscribers_in_lists(pool, &request.target_list_ids).await?
    };

    let audience = if request.exclude_list_ids.is_empty() {
        include
    } else {
        let excluded: HashSet<String> = db::subscriber_ids_in_lists(pool, &request.exclude_list_ids)
            .await?
            .into_iter()
            .collect();
        apply_exclusions(include, &excluded)
    };

    if audience.is_empty() {
        return Err(ApiError::InvalidInput(
            "No active subscribers match the selected audience".to_string(),
        ));
    }

    Ok(audience)
}

/// Run a broadcast end to end.
///
/// The analytics envelope (header row, target rows, link rows, per-message
/// rows, totals) is best-effort throughout; only validation failures and an
/// empty audience abort before any send.
pub async fn run_broadcast(
    pool: &DbPool,
    gateway: &dyn SmsGateway,
    config: &Config,
    request: &BroadcastRequest,
) -> Result<BroadcastSummary, ApiError> {
    validate(request)?;

    let audience = resolve_audience(pool, request).await?;

    let segments = segment_count(&request.message);
    let total_cost = segments as f64 * audience.len() as f64 * COST_PER_SEGMENT;

    let header = match db::insert_broadcast(
        pool,
        request.campaign_name.as_deref(),
        &request.message,
        request.target_all,
    )
    .await
    {
        Ok(broadcast) => Some(broadcast),
        Err(e) => {
            warn!(error = %e, "Broadcast header insert failed, sending without analytics");
            None
        }
    };

    if let Some(broadcast) = &header {
        record_targets(pool, &broadcast.id, request).await;
    }

    let tokenized = match &header {
        Some(broadcast) => {
            links::tokenize_links(
                pool,
                &broadcast.id,
                &request.message,
                request.approved_links.as_deref(),
                &config.public_base_url,
            )
            .await
        }
        None => links::TokenizedDraft {
            body: request.message.clone(),
            links: Vec::new(),
        },
    };

    let broadcast_id = header.as_ref().map(|b| b.id.as_str());
    let mut results = Vec::with_capacity(audience.len());
    let mut errors = Vec::new();
    let mut sent_to = 0;
    let mut failed = 0;

    for recipient in &audience {
        match gateway.send(&recipient.phone_number, &tokenized.body).await {
            Ok(outcome) => {
                sent_to += 1;
                if let Err(e) = db::insert_outbound_message(
                    pool,
                    &recipient.phone_number,
                    &tokenized.body,
                    broadcast_id,
                    Some(&outcome.provider_id),
                    outcome.initial_status,
                )
                .await
                {
                    warn!(error = %e, phone = %recipient.phone_number, "Outbound message row insert failed");
                }
                results.push(SendResult {
                    phone_number: recipient.phone_number.clone(),
                    success: true,
                    provider_id: Some(outcome.provider_id),
                });
            }
            Err(e) => {
                failed += 1;
                errors.push(format!("{}: {e}", phone::format_display(&recipient.phone_number)));
                if let Err(e2) = db::insert_outbound_message(
                    pool,
                    &recipient.phone_number,
                    &tokenized.body,
                    broadcast_id,
                    None,
                    DeliveryStatus::Failed,
                )
                .await
                {
                    warn!(error = %e2, phone = %recipient.phone_number, "Failed-send row insert failed");
                }
                results.push(SendResult {
                    phone_number: recipient.phone_number.clone(),
                    success: false,
                    provider_id: None,
                });
            }
        }
    }

    if let Some(broadcast) = &header {
        // sent_count records recipients attempted.
        if let Err(e) =
            db::update_broadcast_totals(pool, &broadcast.id, audience.len() as i32, total_cost)
                .await
        {
            warn!(error = %e, "Broadcast totals update failed");
        }
    }

    info!(
        broadcast_id = broadcast_id.unwrap_or("untracked"),
        sent_to,
        failed,
        links = tokenized.links.len(),
        "Broadcast complete"
    );

    Ok(BroadcastSummary {
        broadcast_id: header.as_ref().map(|b| b.id.clone()),
        campaign_name: request.campaign_name.clone(),
        sent_to,
        failed,
        total_cost,
        segment_count: segments,
        links_tracked: tokenized.links.len(),
        target_all: request.target_all,
        targeted_list_count: request.target_list_ids.len() + request.exclude_list_ids.len(),
        results,
        errors,
    })
}

/// Send a test broadcast to one explicit phone. Runs the same pipeline with
/// a `[TEST]`-prefixed header and no audience resolution.
pub async fn run_test_broadcast(
    pool: &DbPool,
    gateway: &dyn SmsGateway,
    config: &Config,
    to_phone: &str,
    message: &str,
    campaign_name: Option<&str>,
    approved_links: Option<&[String]>,
) -> Result<BroadcastSummary, ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::InvalidInput("Message is required".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Message exceeds {MAX_MESSAGE_LENGTH} characters"
        )));
    }
    let Some(to_phone) = phone::normalize(to_phone) else {
        return Err(ApiError::InvalidInput(
            "Test phone number must be a valid US number".to_string(),
        ));
    };

    let name = format!("[TEST] {}", campaign_name.unwrap_or("Test broadcast"));
    let segments = segment_count(message);
    let total_cost = segments as f64 * COST_PER_SEGMENT;

    let header = match db::insert_broadcast(pool, Some(&name), message, false).await {
        Ok(broadcast) => Some(broadcast),
        Err(e) => {
            warn!(error = %e, "Test broadcast header insert failed");
            None
        }
    };

    let tokenized = match &header {
        Some(broadcast) => {
            links::tokenize_links(
                pool,
                &broadcast.id,
                message,
                approved_links,
                &config.public_base_url,
            )
            .await
        }
        None => links::TokenizedDraft {
            body: message.to_string(),
            links: Vec::new(),
        },
    };

    let broadcast_id = header.as_ref().map(|b| b.id.as_str());
    let mut results = Vec::new();
    let mut errors = Vec::new();
    let (sent_to, failed) = match gateway.send(&to_phone, &tokenized.body).await {
        Ok(outcome) => {
            if let Err(e) = db::insert_outbound_message(
                pool,
                &to_phone,
                &tokenized.body,
                broadcast_id,
                Some(&outcome.provider_id),
                outcome.initial_status,
            )
            .await
            {
                warn!(error = %e, "Test outbound message row insert failed");
            }
            results.push(SendResult {
                phone_number: to_phone.clone(),
                success: true,
                provider_id: Some(outcome.provider_id),
            });
            (1, 0)
        }
        Err(e) => {
            errors.push(format!("{}: {e}", phone::format_display(&to_phone)));
            if let Err(e2) = db::insert_outbound_message(
                pool,
                &to_phone,
                &tokenized.body,
                broadcast_id,
                None,
                DeliveryStatus::Failed,
            )
            .await
            {
                warn!(error = %e2, "Test failed-send row insert failed");
            }
            results.push(SendResult {
                phone_number: to_phone.clone(),
                success: false,
                provider_id: None,
            });
            (0, 1)
        }
    };

    if let Some(broadcast) = &header {
        if let Err(e) = db::update_broadcast_totals(pool, &broadcast.id, 1, total_cost).await {
            warn!(error = %e, "Test broadcast totals update failed");
        }
    }

    Ok(BroadcastSummary {
        broadcast_id: header.as_ref().map(|b| b.id.clone()),
        campaign_name: Some(name),
        sent_to,
        failed,
        total_cost,
        segment_count: segments,
        links_tracked: tokenized.links.len(),
        target_all: false,
        targeted_list_count: 0,
        results,
        errors,
    })
}

async fn record_targets(pool: &DbPool, broadcast_id: &str, request: &BroadcastRequest) {
    for list_id in &request.target_list_ids {
        if let Err(e) =
            db::insert_broadcast_target(pool, broadcast_id, list_id, TargetType::Include).await
        {
            warn!(error = %e, list_id = %list_id, "Include target insert failed");
        }
    }
    for list_id in &request.exclude_list_ids {
        if let Err(e) =
            db::insert_broadcast_target(pool, broadcast_id, list_id, TargetType::Exclude).await
        {
            warn!(error = %e, list_id = %list_id, "Exclude target insert failed");
        }
    }
}
