//! Provider webhooks: inbound SMS and delivery-status callbacks.
//!
//! Both handlers swallow internal errors into the 2xx shape the provider
//! expects; anything else triggers provider-side retry storms. The only
//! exception is the strict schema check on the inbound form.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::delivery::{self, DeliveryUpdate};
use crate::gateway::{verify_twilio_signature, SmsGateway};
use crate::inbound;
use crate::models::DeliveryStatus;
use crate::notifier::Notifier;
use crate::phone;

const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Render the provider-facing XML response, with or without a reply message.
fn twiml_response(message: Option<&str>) -> Response {
    let body = match message {
        Some(text) => format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
            xml_escape(text)
        ),
        None => "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>".to_string(),
    };

    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn form_value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Verify the provider signature for a webhook at `path`. Fails closed when
/// verification is enabled but the auth token is missing.
fn signature_ok(
    config: &Config,
    path: &str,
    headers: &HeaderMap,
    params: &[(String, String)],
) -> bool {
    let Some(auth_token) = config.twilio_auth_token.as_deref() else {
        warn!("Signature verification enabled but no auth token configured");
        return false;
    };
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let url = format!("{}{path}", config.public_base_url);
    verify_twilio_signature(auth_token, &url, params, signature)
}

/// POST /api/webhooks/sms
///
/// Classifies and processes one inbound message, answering with TwiML. The
/// auto-reply rides the response; the provider delivers it, so the handler
/// records the OUTBOUND row itself and then advances the read watermark.
pub async fn inbound_sms(
    State(pool): State<DbPool>,
    State(config): State<Arc<Config>>,
    State(gateway): State<Arc<dyn SmsGateway>>,
    State(notifier): State<Arc<dyn Notifier>>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let (from, to, body) = (
        form_value(&params, "From"),
        form_value(&params, "To"),
        form_value(&params, "Body"),
    );
    let (Some(from), Some(_to), Some(body)) = (from, to, body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing required fields"})),
        )
            .into_response();
    };

    if config.verify_webhook_signatures
        && !signature_ok(&config, "/api/webhooks/sms", &headers, &params)
    {
        warn!("Rejected inbound SMS webhook with bad signature");
        return StatusCode::FORBIDDEN.into_response();
    }

    let Some(from_phone) = phone::normalize(from) else {
        warn!(from = %from, "Inbound webhook from unparseable phone");
        return twiml_response(None);
    };

    let decision = match inbound::process_inbound(
        &pool,
        gateway.as_ref(),
        notifier.as_ref(),
        &config,
        &from_phone,
        body,
    )
    .await
    {
        Ok(decision) => decision,
        Err(e) => {
            error!(error = %e, phone = %from_phone, "Inbound processing failed");
            return twiml_response(None);
        }
    };

    if let Some(reply) = &decision.auto_reply {
        if let Err(e) = db::insert_outbound_message(
            &pool,
            &from_phone,
            reply,
            None,
            None,
            DeliveryStatus::Sent,
        )
        .await
        {
            warn!(error = %e, "Auto-reply message row insert failed");
        }
    }

    // The watermark moves only after the reply is on its way out.
    if decision.mark_read_now {
        if let Some(subscriber_id) = &decision.subscriber_id {
            if let Err(e) = db::mark_read(&pool, subscriber_id).await {
                warn!(error = %e, "Read watermark update failed");
            }
        }
    }

    twiml_response(decision.auto_reply.as_deref())
}

/// POST /api/webhooks/delivery-status
///
/// Always answers 200 JSON; reconciliation is best-effort.
pub async fn delivery_status(
    State(pool): State<DbPool>,
    State(config): State<Arc<Config>>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    if config.verify_webhook_signatures
        && !signature_ok(&config, "/api/webhooks/delivery-status", &headers, &params)
    {
        warn!("Rejected delivery-status webhook with bad signature");
        return StatusCode::FORBIDDEN.into_response();
    }

    let (sid, status) = (
        form_value(&params, "MessageSid"),
        form_value(&params, "MessageStatus"),
    );
    let (Some(sid), Some(status)) = (sid, status) else {
        warn!("Delivery-status webhook missing MessageSid or MessageStatus");
        return Json(json!({"success": true})).into_response();
    };

    let update = DeliveryUpdate {
        provider_message_id: sid.to_string(),
        provider_status: status.to_string(),
        error_code: form_value(&params, "ErrorCode").map(|s| s.to_string()),
        error_message: form_value(&params, "ErrorMessage").map(|s| s.to_string()),
    };

    if let Err(e) = delivery::reconcile(&pool, &update).await {
        error!(error = %e, provider_message_id = %update.provider_message_id, "Delivery reconciliation failed");
    }

    Json(json!({"success": true})).into_response()
}
