//! Delivery-status reconciliation: provider callbacks applied to outbound
//! message rows keyed by provider message id.

use anyhow::Result;
use tracing::{debug, warn};

use crate::db::{self, DbPool};
use crate::models::DeliveryStatus;

/// A provider delivery-status callback.
#[derive(Debug, Clone)]
pub struct DeliveryUpdate {
    pub provider_message_id: String,
    pub provider_status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Map a provider status string to the canonical delivery status.
/// Unrecognized statuses map to `None` and are ignored by reconciliation.
pub fn map_provider_status(provider_status: &str) -> Option<DeliveryStatus> {
    match provider_status {
        "delivered" => Some(DeliveryStatus::Delivered),
        "failed" => Some(DeliveryStatus::Failed),
        "undelivered" => Some(DeliveryStatus::Undelivered),
        "sent" | "queued" | "sending" | "receiving" | "accepted" => Some(DeliveryStatus::Sent),
        _ => None,
    }
}

/// Apply a callback to the matching outbound message row. Unknown provider
/// ids succeed silently; the message may predate tracking.
pub async fn reconcile(pool: &DbPool, update: &DeliveryUpdate) -> Result<()> {
    if let Some(code) = &update.error_code {
        warn!(
            provider_message_id = %update.provider_message_id,
            error_code = %code,
            error_message = update.error_message.as_deref().unwrap_or(""),
            "Provider reported delivery error"
        );
    }

    let Some(status) = map_provider_status(&update.provider_status) else {
        warn!(
            provider_status = %update.provider_status,
            "Unrecognized provider delivery status, ignoring"
        );
        return Ok(());
    };

    let updated = db::update_delivery_status(pool, &update.provider_message_id, status).await?;
    if updated == 0 {
        debug!(
            provider_message_id = %update.provider_message_id,
            "Delivery callback for untracked message"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_mapping_matches_the_provider_vocabulary() {
        assert_eq!(
            map_provider_status("delivered"),
            Some(DeliveryStatus::Delivered)
        );
        assert_eq!(map_provider_status("failed"), Some(DeliveryStatus::Failed));
        assert_eq!(
            map_provider_status("undelivered"),
            Some(DeliveryStatus::Undelivered)
        );
        for transitional in ["sent", "queued", "sending", "receiving", "accepted"] {
            assert_eq!(
                map_provider_status(transitional),
                Some(DeliveryStatus::Sent),
                "{transitional} should map to SENT"
            );
        }
        assert_eq!(map_provider_status("scheduled"), None);
    }
}
