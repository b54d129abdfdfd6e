//! Environment configuration.
//!
//! All options are read once at startup; the resulting `Config` is shared
//! through the router state. Missing provider credentials do not prevent
//! startup: the corresponding integration degrades to a disabled state and
//! logs what it would have done.

/// Runtime configuration assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL minted into shortened links and admin deep links.
    pub public_base_url: String,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_messaging_service_sid: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_channel: Option<String>,
    /// Optional courtesy-SMS target for conversational inbound messages.
    pub admin_phone_number: Option<String>,
    pub sms_notifications_enabled: bool,
    pub verify_webhook_signatures: bool,
    pub admin_api_token: Option<String>,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            public_base_url: resolve_base_url(),
            twilio_account_sid: env_opt("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: env_opt("TWILIO_AUTH_TOKEN"),
            twilio_messaging_service_sid: env_opt("TWILIO_MESSAGING_SERVICE_SID"),
            slack_bot_token: env_opt("SLACK_BOT_TOKEN"),
            slack_channel: env_opt("SLACK_CHANNEL"),
            admin_phone_number: env_opt("ADMIN_PHONE_NUMBER"),
            sms_notifications_enabled: std::env::var("ENABLE_SMS_NOTIFICATIONS")
                .map(|v| v != "false")
                .unwrap_or(true),
            // Safe default: verification on in release builds, off for local
            // development where requests are hand-crafted.
            verify_webhook_signatures: std::env::var("VERIFY_WEBHOOK_SIGNATURES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(!cfg!(debug_assertions)),
            admin_api_token: env_opt("ADMIN_API_TOKEN"),
            server_port: std::env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// First of {PUBLIC_BASE_URL, VERCEL_PROJECT_PRODUCTION_URL, VERCEL_URL,
/// NEXTAUTH_URL}, falling back to localhost. Vercel host values carry no
/// scheme, so one is prepended when absent.
fn resolve_base_url() -> String {
    let raw = env_opt("PUBLIC_BASE_URL")
        .or_else(|| env_opt("VERCEL_PROJECT_PRODUCTION_URL"))
        .or_else(|| env_opt("VERCEL_URL"))
        .or_else(|| env_opt("NEXTAUTH_URL"))
        .unwrap_or_else(|| "http://localhost:3000".to_string());

    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw
    } else {
        format!("https://{raw}")
    };

    with_scheme.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_scheme_and_loses_trailing_slash() {
        // resolve_base_url reads the environment, so exercise the shaping
        // rules through a scoped variable.
        std::env::set_var("PUBLIC_BASE_URL", "sanctuary.example.org/");
        assert_eq!(resolve_base_url(), "https://sanctuary.example.org");

        std::env::set_var("PUBLIC_BASE_URL", "http://localhost:3000");
        assert_eq!(resolve_base_url(), "http://localhost:3000");
        std::env::remove_var("PUBLIC_BASE_URL");
    }
}
