//! Inbound-message state machine: keyword-driven opt-in / opt-out /
//! conversational routing.
//!
//! `process_inbound` persists the inbound row, applies the subscriber and
//! membership writes, posts notifications, and returns a [`Decision`]. The
//! webhook handler effects the rest: it stores the outbound auto-reply row,
//! applies the read watermark after the reply, and renders the response.

use anyhow::Result;
use chrono::Utc;
use tracing::warn;

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::gateway::SmsGateway;
use crate::keywords::{self, Intent};
use crate::models::{AppSettings, SignupKeyword, Subscriber};
use crate::notifier::Notifier;
use crate::phone;

const ALREADY_SUBSCRIBED_REPLY: &str = "You're already subscribed. Text STOP to unsubscribe.";
const NOT_SUBSCRIBED_REPLY: &str = "You're not currently subscribed.";

/// A notification destined for the chat sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub thread_ref: Option<String>,
}

/// Outcome of processing one inbound message.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Auto-reply text; rides the webhook response back to the provider.
    pub auto_reply: Option<String>,
    /// Notification that was posted (or attempted) to the chat sink.
    pub notify: Option<Notification>,
    /// Set the subscriber's read watermark after the reply goes out.
    pub mark_read_now: bool,
    pub subscriber_id: Option<String>,
}

/// Opt-out confirmation, listing the active keywords that rejoin.
pub fn unsubscribe_reply(keyword_texts: &[String]) -> String {
    match join_keywords(keyword_texts) {
        Some(joined) => format!("You've been unsubscribed. Text {joined} to rejoin."),
        None => "You've been unsubscribed.".to_string(),
    }
}

/// Prompt sent to non-subscribers who text something conversational.
/// `None` when no keyword exists to point them at.
pub fn subscribe_prompt(keyword_texts: &[String]) -> Option<String> {
    join_keywords(keyword_texts).map(|joined| format!("Text {joined} to subscribe."))
}

fn join_keywords(keyword_texts: &[String]) -> Option<String> {
    if keyword_texts.is_empty() {
        None
    } else {
        Some(keyword_texts.join(" or "))
    }
}

/// Active keyword texts plus the legacy opt-in keyword when configured.
async fn active_keywords_with_legacy(
    pool: &DbPool,
    settings: &AppSettings,
) -> Result<Vec<String>> {
    let mut texts = db::active_keyword_texts(pool).await?;
    if let Some(legacy) = &settings.legacy_opt_in_keyword {
        let normalized = keywords::normalize(legacy);
        if !normalized.is_empty() && !texts.contains(&normalized) {
            texts.push(normalized);
        }
    }
    Ok(texts)
}

/// Look up the keyword for a normalized body. Falls back to the legacy
/// opt-in keyword from app config when no active row matches.
async fn lookup_keyword(
    pool: &DbPool,
    settings: &AppSettings,
    normalized: &str,
) -> Result<Option<SignupKeyword>> {
    if let Some(keyword) = db::find_active_keyword(pool, normalized).await? {
        return Ok(Some(keyword));
    }

    if let Some(legacy) = &settings.legacy_opt_in_keyword {
        if keywords::normalize(legacy) == normalized && !normalized.is_empty() {
            return Ok(Some(SignupKeyword {
                id: "legacy".to_string(),
                keyword: normalized.to_string(),
                auto_response: settings.legacy_opt_in_response.clone().unwrap_or_default(),
                is_active: true,
                list_id: None,
                created_at: Utc::now(),
            }));
        }
    }

    Ok(None)
}

/// Run the inbound state machine for one webhook delivery.
///
/// Subscriber reads and writes propagate errors (the webhook handler still
/// answers the provider with an empty 2xx); notifier posts and the courtesy
/// admin SMS are logged and non-fatal.
pub async fn process_inbound(
    pool: &DbPool,
    gateway: &dyn SmsGateway,
    notifier: &dyn Notifier,
    config: &Config,
    from_phone: &str,
    body: &str,
) -> Result<Decision> {
    db::insert_inbound_message(pool, from_phone, body).await?;

    let settings = db::get_app_settings(pool).await?;
    let normalized = keywords::normalize(body);
    let keyword = lookup_keyword(pool, &settings, &normalized).await?;

    match keywords::classify(body, keyword) {
        Intent::OptIn(k) => opt_in(pool, notifier, &settings, from_phone, &k).await,
        Intent::OptOut => opt_out(pool, notifier, &settings, from_phone).await,
        Intent::Conversational => {
            conversational(pool, gateway, notifier, config, &settings, from_phone, body).await
        }
    }
}

async fn opt_in(
    pool: &DbPool,
    notifier: &dyn Notifier,
    settings: &AppSettings,
    from_phone: &str,
    keyword: &SignupKeyword,
) -> Result<Decision> {
    let display = phone::format_display(from_phone);
    let welcome = if keyword.auto_response.trim().is_empty() {
        settings.default_welcome_message.clone()
    } else {
        keyword.auto_response.clone()
    };

    let existing = db::find_subscriber_by_phone(pool, from_phone).await?;
    let (subscriber, auto_reply, notify_text) = match existing {
        Some(s) if s.is_active => {
            let reply = settings
                .legacy_already_subscribed_response
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| ALREADY_SUBSCRIBED_REPLY.to_string());
            (s, reply, None)
        }
        Some(_) => {
            let s = db::opt_in_subscriber(pool, from_phone, &keyword.keyword).await?;
            let text = format!("Subscriber {display} rejoined via {}", keyword.keyword);
            (s, welcome, Some(text))
        }
        None => {
            let s = db::opt_in_subscriber(pool, from_phone, &keyword.keyword).await?;
            let text = format!("New subscriber {display} joined via {}", keyword.keyword);
            (s, welcome, Some(text))
        }
    };

    if let Some(list_id) = &keyword.list_id {
        let via = format!("keyword:{}", keyword.keyword);
        db::add_membership(pool, &subscriber.id, list_id, &via).await?;
    }

    let notify = notify_text.map(|text| Notification {
        text,
        thread_ref: None,
    });
    if let Some(n) = &notify {
        post_notification(notifier, n).await;
    }

    Ok(Decision {
        auto_reply: Some(auto_reply),
        notify,
        mark_read_now: true,
        subscriber_id: Some(subscriber.id),
    })
}

async fn opt_out(
    pool: &DbPool,
    notifier: &dyn Notifier,
    settings: &AppSettings,
    from_phone: &str,
) -> Result<Decision> {
    let existing = db::find_subscriber_by_phone(pool, from_phone).await?;

    let Some(subscriber) = existing.filter(|s| s.is_active) else {
        return Ok(Decision {
            auto_reply: Some(NOT_SUBSCRIBED_REPLY.to_string()),
            notify: None,
            mark_read_now: false,
            subscriber_id: None,
        });
    };

    db::deactivate_subscriber(pool, &subscriber.id).await?;

    let rejoin_keywords = active_keywords_with_legacy(pool, settings).await?;
    let notify = Notification {
        text: format!(
            "Subscriber {} unsubscribed",
            phone::format_display(from_phone)
        ),
        thread_ref: None,
    };
    post_notification(notifier, &notify).await;

    Ok(Decision {
        auto_reply: Some(unsubscribe_reply(&rejoin_keywords)),
        notify: Some(notify),
        mark_read_now: false,
        subscriber_id: Some(subscriber.id),
    })
}

async fn conversational(
    pool: &DbPool,
    gateway: &dyn SmsGateway,
    notifier: &dyn Notifier,
    config: &Config,
    settings: &AppSettings,
    from_phone: &str,
    body: &str,
) -> Result<Decision> {
    let display = phone::format_display(from_phone);
    let existing = db::find_subscriber_by_phone(pool, from_phone).await?;

    let Some(subscriber) = existing.filter(|s| s.is_active) else {
        let prompt_keywords = active_keywords_with_legacy(pool, settings).await?;
        return Ok(Decision {
            auto_reply: subscribe_prompt(&prompt_keywords),
            notify: None,
            mark_read_now: false,
            subscriber_id: None,
        });
    };

    let notify = Notification {
        text: format!("Message from {display}: {body}"),
        thread_ref: subscriber.notifier_thread_ref.clone(),
    };

    match notifier.post(&notify.text, notify.thread_ref.as_deref()).await {
        Ok(Some(thread_ref)) if subscriber.notifier_thread_ref.is_none() => {
            if let Err(e) =
                db::set_notifier_thread_ref_if_unset(pool, &subscriber.id, &thread_ref).await
            {
                warn!(error = %e, "Failed to store notifier thread ref");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Notifier post failed"),
    }

    courtesy_admin_sms(gateway, config, &display, &subscriber).await;

    Ok(Decision {
        auto_reply: None,
        notify: Some(notify),
        mark_read_now: false,
        subscriber_id: Some(subscriber.id),
    })
}

/// Courtesy SMS to the configured admin phone with a deep link into the
/// conversation. Best-effort.
async fn courtesy_admin_sms(
    gateway: &dyn SmsGateway,
    config: &Config,
    display: &str,
    subscriber: &Subscriber,
) {
    if !config.sms_notifications_enabled {
        return;
    }
    let Some(admin_phone) = &config.admin_phone_number else {
        return;
    };

    let deep_link = format!(
        "{}/conversations/{}",
        config.public_base_url, subscriber.id
    );
    let text = format!("New message from {display}. View: {deep_link}");

    if let Err(e) = gateway.send(admin_phone, &text).await {
        warn!(error = %e, "Courtesy admin SMS failed");
    }
}

async fn post_notification(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier
        .post(&notification.text, notification.thread_ref.as_deref())
        .await
    {
        warn!(error = %e, "Notifier post failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FakeGateway;
    use crate::notifier::FakeNotifier;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn unsubscribe_reply_joins_keywords_with_or() {
        let keywords = vec!["TRIBE".to_string(), "HELP".to_string()];
        assert_eq!(
            unsubscribe_reply(&keywords),
            "You've been unsubscribed. Text TRIBE or HELP to rejoin."
        );
        assert_eq!(unsubscribe_reply(&[]), "You've been unsubscribed.");
    }

    #[test]
    fn subscribe_prompt_requires_keywords() {
        let keywords = vec!["TRIBE".to_string()];
        assert_eq!(
            subscribe_prompt(&keywords).as_deref(),
            Some("Text TRIBE to subscribe.")
        );
        assert_eq!(subscribe_prompt(&[]), None);
    }

    fn test_config() -> Config {
        Config {
            public_base_url: "http://localhost:3000".to_string(),
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_messaging_service_sid: None,
            slack_bot_token: None,
            slack_channel: None,
            admin_phone_number: None,
            sms_notifications_enabled: true,
            verify_webhook_signatures: false,
            admin_api_token: None,
            server_port: 8080,
        }
    }

    async fn test_pool() -> Option<DbPool> {
        let Ok(db_url) = std::env::var("TEST_DATABASE_URL") else {
            return None;
        };
        Some(
            crate::db::init_db(crate::db::DbConfig {
                database_url: db_url,
                max_connections: 5,
                min_connections: 1,
                acquire_timeout: Duration::from_secs(5),
                idle_timeout: Duration::from_secs(30),
            })
            .await
            .expect("test setup"),
        )
    }

    fn unique_phone() -> String {
        let n = Uuid::new_v4().as_u128() % 10_000_000_000;
        format!("+1{n:010}")
    }

    fn unique_keyword() -> String {
        let n = Uuid::new_v4().as_u128() % 1_000_000;
        format!("KW{n:06}")
    }

    #[tokio::test]
    async fn opt_in_opt_out_opt_in_round_trip() {
        let Some(pool) = test_pool().await else { return };
        let gateway = FakeGateway::new();
        let notifier = FakeNotifier::new();
        let config = test_config();

        let phone = unique_phone();
        let kw = unique_keyword();
        let list = db::create_list(&pool, &format!("kwlist-{}", Uuid::new_v4()), None)
            .await
            .expect("list");
        db::create_keyword(&pool, &kw, "Welcome to the tribe!", true, Some(&list.id))
            .await
            .expect("keyword");

        // Fresh opt-in creates an active subscriber and enrolls it.
        let first = process_inbound(&pool, &gateway, &notifier, &config, &phone, &kw.to_lowercase())
            .await
            .expect("opt in");
        assert_eq!(first.auto_reply.as_deref(), Some("Welcome to the tribe!"));
        assert!(first.mark_read_now);

        let sub = db::find_subscriber_by_phone(&pool, &phone)
            .await
            .expect("find")
            .expect("exists");
        assert!(sub.is_active);
        assert_eq!(sub.joined_via_keyword.as_deref(), Some(kw.as_str()));

        // Second opt-in is an "already subscribed" no-op.
        let second = process_inbound(&pool, &gateway, &notifier, &config, &phone, &kw)
            .await
            .expect("re-opt-in");
        assert_eq!(
            second.auto_reply.as_deref(),
            Some("You're already subscribed. Text STOP to unsubscribe.")
        );
        assert!(second.notify.is_none());

        // Opt-out deactivates and offers the rejoin keyword.
        let out = process_inbound(&pool, &gateway, &notifier, &config, &phone, "STOP")
            .await
            .expect("opt out");
        let reply = out.auto_reply.expect("reply");
        assert!(reply.contains("unsubscribed"));
        assert!(reply.contains(&kw));

        let gone = db::find_subscriber_by_phone(&pool, &phone)
            .await
            .expect("find")
            .expect("exists");
        assert!(!gone.is_active);

        // Rejoin keeps the same subscriber id and does not duplicate the
        // membership.
        let back = process_inbound(&pool, &gateway, &notifier, &config, &phone, &kw)
            .await
            .expect("rejoin");
        assert_eq!(back.subscriber_id.as_deref(), Some(sub.id.as_str()));

        let members = db::list_members(&pool, &list.id, 100, 0).await.expect("members");
        assert_eq!(members.iter().filter(|m| m.id == sub.id).count(), 1);
    }

    #[tokio::test]
    async fn opt_out_of_unknown_phone_is_polite_and_writes_nothing() {
        let Some(pool) = test_pool().await else { return };
        let gateway = FakeGateway::new();
        let notifier = FakeNotifier::new();
        let config = test_config();

        let phone = unique_phone();
        let decision = process_inbound(&pool, &gateway, &notifier, &config, &phone, "stop")
            .await
            .expect("opt out");

        assert_eq!(
            decision.auto_reply.as_deref(),
            Some("You're not currently subscribed.")
        );
        assert!(decision.notify.is_none());
        assert!(db::find_subscriber_by_phone(&pool, &phone)
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn conversational_message_threads_and_stores_the_ref() {
        let Some(pool) = test_pool().await else { return };
        let gateway = FakeGateway::new();
        let notifier = FakeNotifier::new();
        let config = test_config();

        let phone = unique_phone();
        let kw = unique_keyword();
        db::create_keyword(&pool, &kw, "Welcome!", true, None)
            .await
            .expect("keyword");

        process_inbound(&pool, &gateway, &notifier, &config, &phone, &kw)
            .await
            .expect("opt in");

        let chat = process_inbound(&pool, &gateway, &notifier, &config, &phone, "see you at 6?")
            .await
            .expect("conversational");
        assert!(chat.auto_reply.is_none());
        let notify = chat.notify.expect("notify");
        assert!(notify.text.contains("see you at 6?"));

        // First post minted a thread ref; it must now be pinned.
        let sub = db::find_subscriber_by_phone(&pool, &phone)
            .await
            .expect("find")
            .expect("exists");
        let pinned = sub.notifier_thread_ref.clone().expect("thread ref");

        let again =
            process_inbound(&pool, &gateway, &notifier, &config, &phone, "still coming")
                .await
                .expect("conversational");
        assert_eq!(
            again.notify.expect("notify").thread_ref.as_deref(),
            Some(pinned.as_str())
        );
    }

    #[tokio::test]
    async fn conversational_from_stranger_gets_the_subscribe_prompt() {
        let Some(pool) = test_pool().await else { return };
        let gateway = FakeGateway::new();
        let notifier = FakeNotifier::new();
        let config = test_config();

        let kw = unique_keyword();
        db::create_keyword(&pool, &kw, "Welcome!", true, None)
            .await
            .expect("keyword");

        let phone = unique_phone();
        let decision = process_inbound(&pool, &gateway, &notifier, &config, &phone, "hello?")
            .await
            .expect("conversational");

        let reply = decision.auto_reply.expect("prompt");
        assert!(reply.starts_with("Text "));
        assert!(reply.ends_with(" to subscribe."));
        assert!(decision.notify.is_none());
        assert_eq!(notifier.posts.lock().len(), 0);
    }
}
