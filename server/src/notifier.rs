//! Chat-notification sink abstraction and the Slack-backed implementation.
//!
//! Posts are best-effort everywhere they are used: a failed or disabled
//! notifier never blocks the messaging path.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::config::Config;

const NOTIFIER_TIMEOUT: Duration = Duration::from_secs(10);

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Chat-notification sink. `post` returns the thread reference the message
/// landed in, or `None` when the sink is disabled and nothing was posted.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, text: &str, thread_ref: Option<&str>) -> Result<Option<String>>;

    fn provider_name(&self) -> &'static str;
}

/// Slack `chat.postMessage` notifier. Replies are threaded when a thread
/// reference (a Slack message `ts`) is supplied; a top-level post returns
/// its own `ts` as the new thread reference.
pub struct SlackNotifier {
    client: reqwest::Client,
    bot_token: String,
    channel: String,
}

#[derive(Debug, Deserialize)]
struct SlackPostResponse {
    ok: bool,
    ts: Option<String>,
    error: Option<String>,
}

impl SlackNotifier {
    pub fn from_config(config: &Config) -> Option<Self> {
        let bot_token = config.slack_bot_token.clone()?;
        let channel = config.slack_channel.clone()?;

        let client = reqwest::Client::builder()
            .timeout(NOTIFIER_TIMEOUT)
            .build()
            .ok()?;

        Some(Self {
            client,
            bot_token,
            channel,
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn post(&self, text: &str, thread_ref: Option<&str>) -> Result<Option<String>> {
        let mut payload = serde_json::json!({
            "channel": self.channel,
            "text": text,
        });
        if let Some(ts) = thread_ref {
            payload["thread_ts"] = serde_json::json!(ts);
        }

        let response = self
            .client
            .post(SLACK_POST_MESSAGE_URL)
            .bearer_auth(&self.bot_token)
            .json(&payload)
            .send()
            .await
            .context("Slack request failed")?;

        let body: SlackPostResponse = response
            .json()
            .await
            .context("Failed to parse Slack response")?;

        if !body.ok {
            return Err(anyhow!(
                "Slack rejected post: {}",
                body.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }

        // A threaded reply stays in its thread; a fresh post starts one.
        Ok(match thread_ref {
            Some(ts) => Some(ts.to_string()),
            None => body.ts,
        })
    }

    fn provider_name(&self) -> &'static str {
        "slack"
    }
}

/// Sink for deployments without notifier credentials.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn post(&self, text: &str, _thread_ref: Option<&str>) -> Result<Option<String>> {
        info!(text = %text, "Notifier not configured, dropping post");
        Ok(None)
    }

    fn provider_name(&self) -> &'static str {
        "null"
    }
}

/// Recording notifier for tests.
#[cfg(test)]
pub struct FakeNotifier {
    pub posts: parking_lot::Mutex<Vec<(String, Option<String>)>>,
}

#[cfg(test)]
impl FakeNotifier {
    pub fn new() -> Self {
        Self {
            posts: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for FakeNotifier {
    async fn post(&self, text: &str, thread_ref: Option<&str>) -> Result<Option<String>> {
        let mut posts = self.posts.lock();
        posts.push((text.to_string(), thread_ref.map(|s| s.to_string())));
        Ok(Some(match thread_ref {
            Some(ts) => ts.to_string(),
            None => format!("ts-{}", posts.len()),
        }))
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_notifier_posts_nothing() {
        let notifier = NullNotifier;
        let result = notifier.post("hello", None).await.expect("post");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn fake_notifier_threads_and_mints_refs() {
        let notifier = FakeNotifier::new();

        let first = notifier.post("new message", None).await.expect("post");
        assert_eq!(first.as_deref(), Some("ts-1"));

        let reply = notifier.post("reply", Some("ts-1")).await.expect("post");
        assert_eq!(reply.as_deref(), Some("ts-1"));

        assert_eq!(notifier.posts.lock().len(), 2);
    }
}
