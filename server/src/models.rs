//! Database models for the roster, messaging, and analytics tables.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Direction of a message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "INBOUND",
            Direction::Outbound => "OUTBOUND",
        }
    }

    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "INBOUND" => Some(Direction::Inbound),
            "OUTBOUND" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// Delivery lifecycle of an outbound message.
///
/// `Pending` is never persisted: the first stored state is `Sent`, and the
/// provider's status callbacks drive the terminal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Undelivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Undelivered => "UNDELIVERED",
            DeliveryStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<DeliveryStatus> {
        match s {
            "PENDING" => Some(DeliveryStatus::Pending),
            "SENT" => Some(DeliveryStatus::Sent),
            "DELIVERED" => Some(DeliveryStatus::Delivered),
            "UNDELIVERED" => Some(DeliveryStatus::Undelivered),
            "FAILED" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// Include/exclude role of a broadcast target list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Include,
    Exclude,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Include => "include",
            TargetType::Exclude => "exclude",
        }
    }
}

/// Database representation of a subscriber
/// Maps to `subscribers` table
#[derive(Debug, Clone, FromRow)]
pub struct Subscriber {
    pub id: String,
    pub phone_number: String,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub joined_via_keyword: Option<String>,
    pub notifier_thread_ref: Option<String>,
}

/// Database representation of a subscriber list
/// Maps to `lists` table
#[derive(Debug, Clone, FromRow)]
pub struct SubscriberList {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// List row joined with its member count, for the admin list view
#[derive(Debug, Clone, FromRow)]
pub struct ListWithCount {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub member_count: i64,
}

/// Database representation of a list membership
/// Maps to `list_memberships` table; (subscriber_id, list_id) is unique
#[derive(Debug, Clone, FromRow)]
pub struct ListMembership {
    pub subscriber_id: String,
    pub list_id: String,
    pub joined_at: DateTime<Utc>,
    pub joined_via: String,
}

/// Database representation of a signup keyword
/// Maps to `signup_keywords` table; keyword is persisted uppercase
#[derive(Debug, Clone, FromRow)]
pub struct SignupKeyword {
    pub id: String,
    pub keyword: String,
    pub auto_response: String,
    pub is_active: bool,
    pub list_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Database representation of a message
/// Maps to `messages` table
#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: String,
    pub phone_number: String,
    pub content: String,
    pub direction: String,
    pub created_at: DateTime<Utc>,
    pub broadcast_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub delivery_status: String,
}

impl Message {
    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound.as_str()
    }

    pub fn status(&self) -> DeliveryStatus {
        DeliveryStatus::parse(&self.delivery_status).unwrap_or(DeliveryStatus::Sent)
    }
}

/// Database representation of a broadcast header
/// Maps to `broadcasts` table; `message` is the operator draft, not the
/// link-rewritten body
#[derive(Debug, Clone, FromRow)]
pub struct Broadcast {
    pub id: String,
    pub name: Option<String>,
    pub message: String,
    pub sent_count: i32,
    pub total_cost: f64,
    pub target_all: bool,
    pub created_at: DateTime<Utc>,
}

/// Database representation of a shortened link
/// Maps to `links` table
#[derive(Debug, Clone, FromRow)]
pub struct Link {
    pub id: String,
    pub broadcast_id: String,
    pub original_url: String,
    pub short_code: String,
}

/// Database representation of a link click
/// Maps to `link_clicks` table
#[derive(Debug, Clone, FromRow)]
pub struct LinkClick {
    pub id: String,
    pub link_id: String,
    pub subscriber_id: Option<String>,
    pub clicked_at: DateTime<Utc>,
}

/// Singleton application configuration row
/// Maps to `app_config` (id is always 1); the legacy fields are the fallback
/// responses used when no active signup keyword matches
#[derive(Debug, Clone, FromRow)]
pub struct AppSettings {
    pub default_welcome_message: String,
    pub legacy_opt_in_keyword: Option<String>,
    pub legacy_opt_in_response: Option<String>,
    pub legacy_already_subscribed_response: Option<String>,
}

/// Inbox projection row: a subscriber with unread state and the most recent
/// message in either direction as preview
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: String,
    pub phone_number: String,
    pub last_read_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
    pub has_unread: bool,
    pub last_message_content: String,
    pub last_message_direction: String,
    pub last_message_at: DateTime<Utc>,
}

/// Broadcast row joined with delivery and click counters, for analytics
#[derive(Debug, Clone, FromRow)]
pub struct BroadcastAnalyticsRow {
    pub id: String,
    pub name: Option<String>,
    pub message: String,
    pub sent_count: i32,
    pub total_cost: f64,
    pub target_all: bool,
    pub created_at: DateTime<Utc>,
    pub delivered_count: i64,
    pub failed_count: i64,
    pub click_count: i64,
}
