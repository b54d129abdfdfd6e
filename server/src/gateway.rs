//! SMS gateway abstraction and the Twilio-backed implementation.
//!
//! The gateway is an explicit interface: production wires `TwilioGateway`,
//! tests inject `FakeGateway`. There is no environment-sniffing mock mode;
//! a deployment without credentials gets `DisabledGateway`, whose sends fail
//! and are recorded as such.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::delivery::map_provider_status;
use crate::models::DeliveryStatus;

/// Per-call timeout for provider HTTP requests.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Result of a successful gateway send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub provider_id: String,
    pub initial_status: DeliveryStatus,
}

/// Outbound SMS transport.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Send one message. `to` is a canonical `+1XXXXXXXXXX` phone.
    async fn send(&self, to: &str, body: &str) -> Result<SendOutcome>;

    fn provider_name(&self) -> &'static str;
}

/// Twilio Messages API client.
pub struct TwilioGateway {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    messaging_service_sid: String,
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorResponse {
    code: Option<i64>,
    message: Option<String>,
}

impl TwilioGateway {
    /// Build from configuration; `None` when any credential is missing.
    pub fn from_config(config: &Config) -> Option<Self> {
        let account_sid = config.twilio_account_sid.clone()?;
        let auth_token = config.twilio_auth_token.clone()?;
        let messaging_service_sid = config.twilio_messaging_service_sid.clone()?;

        let client = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .ok()?;

        Some(Self {
            client,
            account_sid,
            auth_token,
            messaging_service_sid,
        })
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    async fn send(&self, to: &str, body: &str) -> Result<SendOutcome> {
        let url = format!(
            "{TWILIO_API_BASE}/Accounts/{}/Messages.json",
            self.account_sid
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("To", to),
                ("Body", body),
                ("MessagingServiceSid", self.messaging_service_sid.as_str()),
            ])
            .send()
            .await
            .context("Twilio request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let err: TwilioErrorResponse = response.json().await.unwrap_or(TwilioErrorResponse {
                code: None,
                message: None,
            });
            return Err(anyhow!(
                "Twilio rejected send ({status}): code={:?} message={:?}",
                err.code,
                err.message
            ));
        }

        let message: TwilioMessageResponse = response
            .json()
            .await
            .context("Failed to parse Twilio response")?;

        Ok(SendOutcome {
            provider_id: message.sid,
            initial_status: map_provider_status(&message.status).unwrap_or(DeliveryStatus::Sent),
        })
    }

    fn provider_name(&self) -> &'static str {
        "twilio"
    }
}

/// Stand-in for deployments without provider credentials. Every send fails
/// with a descriptive error so the per-recipient FAILED path is exercised
/// rather than silently pretending delivery happened.
pub struct DisabledGateway;

#[async_trait]
impl SmsGateway for DisabledGateway {
    async fn send(&self, to: &str, _body: &str) -> Result<SendOutcome> {
        info!(to = %to, "SMS gateway not configured, dropping send");
        Err(anyhow!("SMS gateway is not configured"))
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Verify Twilio's `X-Twilio-Signature` header: base64(HMAC-SHA1(auth_token,
/// url + concat(params sorted by key))). Returns false on any mismatch.
pub fn verify_twilio_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    signature: &str,
) -> bool {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut data = url.to_string();
    for (key, value) in sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()) else {
        return false;
    };
    mac.update(data.as_bytes());

    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    expected == signature
}

/// Recording gateway for tests: collects sends and fails configured numbers.
#[cfg(test)]
pub struct FakeGateway {
    pub sent: parking_lot::Mutex<Vec<(String, String)>>,
    pub fail_numbers: Vec<String>,
}

#[cfg(test)]
impl FakeGateway {
    pub fn new() -> Self {
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            fail_numbers: Vec::new(),
        }
    }

    pub fn failing(numbers: &[&str]) -> Self {
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            fail_numbers: numbers.iter().map(|n| n.to_string()).collect(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SmsGateway for FakeGateway {
    async fn send(&self, to: &str, body: &str) -> Result<SendOutcome> {
        if self.fail_numbers.iter().any(|n| n == to) {
            return Err(anyhow!("simulated gateway failure"));
        }
        self.sent.lock().push((to.to_string(), body.to_string()));
        Ok(SendOutcome {
            provider_id: format!("SM{}", uuid::Uuid::new_v4().simple()),
            initial_status: DeliveryStatus::Sent,
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verification_accepts_a_known_good_signature() {
        // Fixture follows the shape of Twilio's documented worked example.
        let url = "https://mycompany.com/myapp.php?foo=1&bar=2";
        let params = vec![
            ("CallSid".to_string(), "CA1234567890ABCDE".to_string()),
            ("Caller".to_string(), "+12349013030".to_string()),
            ("Digits".to_string(), "1234".to_string()),
            ("From".to_string(), "+12349013030".to_string()),
            ("To".to_string(), "+18005551212".to_string()),
        ];
        let auth_token = "12345";

        assert!(verify_twilio_signature(
            auth_token,
            url,
            &params,
            "0/KCTR6DLpKmkAf8muzZqo1nDgQ="
        ));
    }

    #[test]
    fn signature_verification_rejects_tampered_params() {
        let url = "https://mycompany.com/myapp.php?foo=1&bar=2";
        let params = vec![("Digits".to_string(), "9999".to_string())];

        assert!(!verify_twilio_signature(
            "12345",
            url,
            &params,
            "0/KCTR6DLpKmkAf8muzZqo1nDgQ="
        ));
    }

    #[tokio::test]
    async fn disabled_gateway_always_fails() {
        let gateway = DisabledGateway;
        assert!(gateway.send("+15551234567", "hello").await.is_err());
        assert_eq!(gateway.provider_name(), "disabled");
    }

    #[tokio::test]
    async fn fake_gateway_records_sends_and_fails_on_request() {
        let gateway = FakeGateway::failing(&["+15550000000"]);

        let ok = gateway.send("+15551234567", "hi").await;
        assert!(ok.is_ok());
        let outcome = ok.expect("send succeeds");
        assert!(outcome.provider_id.starts_with("SM"));

        assert!(gateway.send("+15550000000", "hi").await.is_err());
        assert_eq!(gateway.sent.lock().len(), 1);
    }
}
