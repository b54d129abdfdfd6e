use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{
    AppSettings, Broadcast, BroadcastAnalyticsRow, ConversationRow, DeliveryStatus, Link,
    ListWithCount, Message, SignupKeyword, Subscriber, SubscriberList, TargetType,
};

pub type DbPool = PgPool;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/sanctuary".to_string()),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Initialize the long-lived connection pool and run migrations.
pub async fn init_db(config: DbConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    Ok(pool)
}

/// Initialize database with default configuration
pub async fn init_db_default() -> Result<DbPool> {
    init_db(DbConfig::default()).await
}

/// Whether an error (possibly context-wrapped) is a unique-constraint
/// violation. Used by handlers to map races on unique columns to 409.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .and_then(|db| db.code())
        .as_deref()
        == Some("23505")
}

// =============================================================================
// Subscriber Operations
// =============================================================================

pub async fn find_subscriber_by_phone(pool: &DbPool, phone: &str) -> Result<Option<Subscriber>> {
    let subscriber = sqlx::query_as::<_, Subscriber>(
        "SELECT id, phone_number, is_active, joined_at, last_read_at, joined_via_keyword, notifier_thread_ref
         FROM subscribers WHERE phone_number = $1",
    )
    .bind(phone)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch subscriber by phone")?;

    Ok(subscriber)
}

pub async fn find_subscriber(pool: &DbPool, id: &str) -> Result<Option<Subscriber>> {
    let subscriber = sqlx::query_as::<_, Subscriber>(
        "SELECT id, phone_number, is_active, joined_at, last_read_at, joined_via_keyword, notifier_thread_ref
         FROM subscribers WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch subscriber")?;

    Ok(subscriber)
}

/// Create or reactivate a subscriber through the keyword opt-in path.
///
/// Upsert on (phone_number) so two concurrent opt-in webhooks for the same
/// phone cannot race into a duplicate row or a half-updated one.
pub async fn opt_in_subscriber(
    pool: &DbPool,
    phone: &str,
    via_keyword: &str,
) -> Result<Subscriber> {
    let subscriber = sqlx::query_as::<_, Subscriber>(
        "INSERT INTO subscribers (id, phone_number, is_active, joined_at, joined_via_keyword)
         VALUES ($1, $2, TRUE, $3, $4)
         ON CONFLICT (phone_number)
         DO UPDATE SET is_active = TRUE, joined_via_keyword = $4
         RETURNING id, phone_number, is_active, joined_at, last_read_at, joined_via_keyword, notifier_thread_ref",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(phone)
    .bind(Utc::now())
    .bind(via_keyword)
    .fetch_one(pool)
    .await
    .context("Failed to opt in subscriber")?;

    Ok(subscriber)
}

/// Insert a subscriber if the phone is not yet known. Returns `None` when the
/// phone already exists (the admin-add and bulk-import duplicate case).
pub async fn insert_subscriber_if_new(pool: &DbPool, phone: &str) -> Result<Option<Subscriber>> {
    let subscriber = sqlx::query_as::<_, Subscriber>(
        "INSERT INTO subscribers (id, phone_number, is_active, joined_at)
         VALUES ($1, $2, TRUE, $3)
         ON CONFLICT (phone_number) DO NOTHING
         RETURNING id, phone_number, is_active, joined_at, last_read_at, joined_via_keyword, notifier_thread_ref",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(phone)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
    .context("Failed to insert subscriber")?;

    Ok(subscriber)
}

pub async fn deactivate_subscriber(pool: &DbPool, id: &str) -> Result<()> {
    sqlx::query("UPDATE subscribers SET is_active = FALSE WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to deactivate subscriber")?;

    Ok(())
}

/// First-write-wins: only sets the thread ref when none is stored yet.
pub async fn set_notifier_thread_ref_if_unset(
    pool: &DbPool,
    id: &str,
    thread_ref: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE subscribers SET notifier_thread_ref = $2
         WHERE id = $1 AND notifier_thread_ref IS NULL",
    )
    .bind(id)
    .bind(thread_ref)
    .execute(pool)
    .await
    .context("Failed to set notifier thread ref")?;

    Ok(())
}

pub async fn list_subscribers(
    pool: &DbPool,
    search: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Subscriber>> {
    let subscribers = sqlx::query_as::<_, Subscriber>(
        "SELECT id, phone_number, is_active, joined_at, last_read_at, joined_via_keyword, notifier_thread_ref
         FROM subscribers
         WHERE ($1 = '' OR phone_number LIKE '%' || $1 || '%')
         ORDER BY joined_at DESC
         LIMIT $2 OFFSET $3",
    )
    .bind(search)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to list subscribers")?;

    Ok(subscribers)
}

pub async fn count_subscribers(pool: &DbPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM subscribers")
        .fetch_one(pool)
        .await
        .context("Failed to count subscribers")
}

pub async fn count_active_subscribers(pool: &DbPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM subscribers WHERE is_active = TRUE")
        .fetch_one(pool)
        .await
        .context("Failed to count active subscribers")
}

// =============================================================================
// Read-State Operations (inbox watermark)
// =============================================================================

pub async fn mark_read(pool: &DbPool, id: &str) -> Result<()> {
    sqlx::query("UPDATE subscribers SET last_read_at = $2 WHERE id = $1")
        .bind(id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to mark conversation read")?;

    Ok(())
}

pub async fn mark_unread(pool: &DbPool, id: &str) -> Result<()> {
    sqlx::query("UPDATE subscribers SET last_read_at = NULL WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to mark conversation unread")?;

    Ok(())
}

pub async fn mark_all_read(pool: &DbPool) -> Result<u64> {
    let result = sqlx::query("UPDATE subscribers SET last_read_at = $1")
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to mark all conversations read")?;

    Ok(result.rows_affected())
}

// =============================================================================
// List Operations
// =============================================================================

pub async fn create_list(
    pool: &DbPool,
    name: &str,
    description: Option<&str>,
) -> Result<SubscriberList> {
    let list = sqlx::query_as::<_, SubscriberList>(
        "INSERT INTO lists (id, name, description, created_at)
         VALUES ($1, $2, $3, $4)
         RETURNING id, name, description, created_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(description)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("Failed to create list")?;

    Ok(list)
}

pub async fn find_list(pool: &DbPool, id: &str) -> Result<Option<SubscriberList>> {
    let list = sqlx::query_as::<_, SubscriberList>(
        "SELECT id, name, description, created_at FROM lists WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch list")?;

    Ok(list)
}

pub async fn list_name_taken(pool: &DbPool, name: &str) -> Result<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM lists WHERE name = $1)")
        .bind(name)
        .fetch_one(pool)
        .await
        .context("Failed to check list name")
}

/// All lists with their active-member counts.
pub async fn list_lists(pool: &DbPool) -> Result<Vec<ListWithCount>> {
    let lists = sqlx::query_as::<_, ListWithCount>(
        "SELECT l.id, l.name, l.description, l.created_at, COUNT(s.id) AS member_count
         FROM lists l
         LEFT JOIN list_memberships m ON m.list_id = l.id
         LEFT JOIN subscribers s ON s.id = m.subscriber_id AND s.is_active = TRUE
         GROUP BY l.id, l.name, l.description, l.created_at
         ORDER BY l.created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list lists")?;

    Ok(lists)
}

pub async fn delete_list(pool: &DbPool, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM lists WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete list")?;

    Ok(result.rows_affected())
}

/// Number of signup keywords bound to a list. The store does not cascade
/// keyword references, so list deletion is gated on this at the code level.
pub async fn keyword_references_to_list(pool: &DbPool, list_id: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM signup_keywords WHERE list_id = $1")
        .bind(list_id)
        .fetch_one(pool)
        .await
        .context("Failed to count keyword references")
}

// =============================================================================
// Membership Operations
// =============================================================================

/// Idempotent enrollment: re-inserting an existing (subscriber, list) pair is
/// a no-op. Returns whether a new membership row was created.
pub async fn add_membership(
    pool: &DbPool,
    subscriber_id: &str,
    list_id: &str,
    joined_via: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO list_memberships (subscriber_id, list_id, joined_at, joined_via)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (subscriber_id, list_id) DO NOTHING",
    )
    .bind(subscriber_id)
    .bind(list_id)
    .bind(Utc::now())
    .bind(joined_via)
    .execute(pool)
    .await
    .context("Failed to add membership")?;

    Ok(result.rows_affected() > 0)
}

pub async fn remove_membership(pool: &DbPool, subscriber_id: &str, list_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM list_memberships WHERE subscriber_id = $1 AND list_id = $2",
    )
    .bind(subscriber_id)
    .bind(list_id)
    .execute(pool)
    .await
    .context("Failed to remove membership")?;

    Ok(result.rows_affected())
}

pub async fn list_members(
    pool: &DbPool,
    list_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Subscriber>> {
    let members = sqlx::query_as::<_, Subscriber>(
        "SELECT s.id, s.phone_number, s.is_active, s.joined_at, s.last_read_at,
                s.joined_via_keyword, s.notifier_thread_ref
         FROM subscribers s
         JOIN list_memberships m ON m.subscriber_id = s.id
         WHERE m.list_id = $1
         ORDER BY m.joined_at ASC
         LIMIT $2 OFFSET $3",
    )
    .bind(list_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to list members")?;

    Ok(members)
}

pub async fn lists_for_subscriber(pool: &DbPool, subscriber_id: &str) -> Result<Vec<SubscriberList>> {
    let lists = sqlx::query_as::<_, SubscriberList>(
        "SELECT l.id, l.name, l.description, l.created_at
         FROM lists l
         JOIN list_memberships m ON m.list_id = l.id
         WHERE m.subscriber_id = $1
         ORDER BY m.joined_at ASC",
    )
    .bind(subscriber_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch subscriber lists")?;

    Ok(lists)
}

// =============================================================================
// Keyword Operations
// =============================================================================

pub async fn find_active_keyword(pool: &DbPool, keyword: &str) -> Result<Option<SignupKeyword>> {
    let row = sqlx::query_as::<_, SignupKeyword>(
        "SELECT id, keyword, auto_response, is_active, list_id, created_at
         FROM signup_keywords WHERE keyword = $1 AND is_active = TRUE",
    )
    .bind(keyword)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch keyword")?;

    Ok(row)
}

pub async fn find_keyword(pool: &DbPool, id: &str) -> Result<Option<SignupKeyword>> {
    let row = sqlx::query_as::<_, SignupKeyword>(
        "SELECT id, keyword, auto_response, is_active, list_id, created_at
         FROM signup_keywords WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch keyword")?;

    Ok(row)
}

pub async fn list_keywords(pool: &DbPool) -> Result<Vec<SignupKeyword>> {
    let rows = sqlx::query_as::<_, SignupKeyword>(
        "SELECT id, keyword, auto_response, is_active, list_id, created_at
         FROM signup_keywords ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list keywords")?;

    Ok(rows)
}

/// Active keyword texts in creation order, for the rejoin/subscribe prompts.
pub async fn active_keyword_texts(pool: &DbPool) -> Result<Vec<String>> {
    let texts = sqlx::query_scalar(
        "SELECT keyword FROM signup_keywords WHERE is_active = TRUE ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list active keyword texts")?;

    Ok(texts)
}

/// Whether a keyword text is already used, optionally ignoring one row (the
/// row being updated collides only against OTHER rows).
pub async fn keyword_text_taken(
    pool: &DbPool,
    keyword: &str,
    exclude_id: Option<&str>,
) -> Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM signup_keywords
             WHERE keyword = $1 AND ($2::TEXT IS NULL OR id <> $2)
         )",
    )
    .bind(keyword)
    .bind(exclude_id)
    .fetch_one(pool)
    .await
    .context("Failed to check keyword collision")
}

pub async fn create_keyword(
    pool: &DbPool,
    keyword: &str,
    auto_response: &str,
    is_active: bool,
    list_id: Option<&str>,
) -> Result<SignupKeyword> {
    let row = sqlx::query_as::<_, SignupKeyword>(
        "INSERT INTO signup_keywords (id, keyword, auto_response, is_active, list_id, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, keyword, auto_response, is_active, list_id, created_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(keyword)
    .bind(auto_response)
    .bind(is_active)
    .bind(list_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("Failed to create keyword")?;

    Ok(row)
}

pub async fn update_keyword(
    pool: &DbPool,
    id: &str,
    keyword: &str,
    auto_response: &str,
    is_active: bool,
    list_id: Option<&str>,
) -> Result<Option<SignupKeyword>> {
    let row = sqlx::query_as::<_, SignupKeyword>(
        "UPDATE signup_keywords
         SET keyword = $2, auto_response = $3, is_active = $4, list_id = $5
         WHERE id = $1
         RETURNING id, keyword, auto_response, is_active, list_id, created_at",
    )
    .bind(id)
    .bind(keyword)
    .bind(auto_response)
    .bind(is_active)
    .bind(list_id)
    .fetch_optional(pool)
    .await
    .context("Failed to update keyword")?;

    Ok(row)
}

pub async fn delete_keyword(pool: &DbPool, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM signup_keywords WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete keyword")?;

    Ok(result.rows_affected())
}

// =============================================================================
// Message Operations
// =============================================================================

pub async fn insert_inbound_message(pool: &DbPool, phone: &str, content: &str) -> Result<Message> {
    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages (id, phone_number, content, direction, created_at, delivery_status)
         VALUES ($1, $2, $3, 'INBOUND', $4, 'DELIVERED')
         RETURNING id, phone_number, content, direction, created_at, broadcast_id, provider_message_id, delivery_status",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(phone)
    .bind(content)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("Failed to insert inbound message")?;

    Ok(message)
}

pub async fn insert_outbound_message(
    pool: &DbPool,
    phone: &str,
    content: &str,
    broadcast_id: Option<&str>,
    provider_message_id: Option<&str>,
    status: DeliveryStatus,
) -> Result<Message> {
    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages (id, phone_number, content, direction, created_at, broadcast_id, provider_message_id, delivery_status)
         VALUES ($1, $2, $3, 'OUTBOUND', $4, $5, $6, $7)
         RETURNING id, phone_number, content, direction, created_at, broadcast_id, provider_message_id, delivery_status",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(phone)
    .bind(content)
    .bind(Utc::now())
    .bind(broadcast_id)
    .bind(provider_message_id)
    .bind(status.as_str())
    .fetch_one(pool)
    .await
    .context("Failed to insert outbound message")?;

    Ok(message)
}

/// Apply a delivery-status transition keyed by provider message id.
/// Returns the number of rows updated; zero means the id predates tracking.
pub async fn update_delivery_status(
    pool: &DbPool,
    provider_message_id: &str,
    status: DeliveryStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE messages SET delivery_status = $2 WHERE provider_message_id = $1",
    )
    .bind(provider_message_id)
    .bind(status.as_str())
    .execute(pool)
    .await
    .context("Failed to update delivery status")?;

    Ok(result.rows_affected())
}

pub async fn conversation_messages(
    pool: &DbPool,
    phone: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(
        "SELECT id, phone_number, content, direction, created_at, broadcast_id, provider_message_id, delivery_status
         FROM messages
         WHERE phone_number = $1
         ORDER BY created_at ASC
         LIMIT $2 OFFSET $3",
    )
    .bind(phone)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to fetch conversation messages")?;

    Ok(messages)
}

pub async fn recent_messages(pool: &DbPool, limit: i64) -> Result<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(
        "SELECT id, phone_number, content, direction, created_at, broadcast_id, provider_message_id, delivery_status
         FROM messages
         ORDER BY created_at DESC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch recent messages")?;

    Ok(messages)
}

pub async fn count_messages(pool: &DbPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(pool)
        .await
        .context("Failed to count messages")
}

pub async fn count_messages_since(pool: &DbPool, since: DateTime<Utc>) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE created_at >= $1")
        .bind(since)
        .fetch_one(pool)
        .await
        .context("Failed to count recent messages")
}

// =============================================================================
// Audience Queries
// =============================================================================

/// All active subscribers in stable joined_at order.
pub async fn all_active_subscribers(pool: &DbPool) -> Result<Vec<Subscriber>> {
    let subscribers = sqlx::query_as::<_, Subscriber>(
        "SELECT id, phone_number, is_active, joined_at, last_read_at, joined_via_keyword, notifier_thread_ref
         FROM subscribers
         WHERE is_active = TRUE
         ORDER BY joined_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch active subscribers")?;

    Ok(subscribers)
}

/// Active subscribers holding a membership in any of the given lists, in
/// stable joined_at order. Subscribers in several lists appear once.
pub async fn active_subscribers_in_lists(
    pool: &DbPool,
    list_ids: &[String],
) -> Result<Vec<Subscriber>> {
    let subscribers = sqlx::query_as::<_, Subscriber>(
        "SELECT id, phone_number, is_active, joined_at, last_read_at, joined_via_keyword, notifier_thread_ref
         FROM subscribers s
         WHERE s.is_active = TRUE
           AND EXISTS (
               SELECT 1 FROM list_memberships m
               WHERE m.subscriber_id = s.id AND m.list_id = ANY($1)
           )
         ORDER BY joined_at ASC",
    )
    .bind(list_ids)
    .fetch_all(pool)
    .await
    .context("Failed to fetch list audience")?;

    Ok(subscribers)
}

/// Distinct subscriber ids holding a membership in any of the given lists
/// (active or not), for exclusion algebra.
pub async fn subscriber_ids_in_lists(pool: &DbPool, list_ids: &[String]) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT DISTINCT subscriber_id FROM list_memberships WHERE list_id = ANY($1)",
    )
    .bind(list_ids)
    .fetch_all(pool)
    .await
    .context("Failed to fetch excluded subscriber ids")?;

    Ok(ids)
}

// =============================================================================
// Broadcast Operations
// =============================================================================

pub async fn insert_broadcast(
    pool: &DbPool,
    name: Option<&str>,
    message: &str,
    target_all: bool,
) -> Result<Broadcast> {
    let broadcast = sqlx::query_as::<_, Broadcast>(
        "INSERT INTO broadcasts (id, name, message, sent_count, total_cost, target_all, created_at)
         VALUES ($1, $2, $3, 0, 0, $4, $5)
         RETURNING id, name, message, sent_count, total_cost, target_all, created_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(message)
    .bind(target_all)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("Failed to insert broadcast")?;

    Ok(broadcast)
}

pub async fn update_broadcast_totals(
    pool: &DbPool,
    id: &str,
    sent_count: i32,
    total_cost: f64,
) -> Result<()> {
    sqlx::query("UPDATE broadcasts SET sent_count = $2, total_cost = $3 WHERE id = $1")
        .bind(id)
        .bind(sent_count)
        .bind(total_cost)
        .execute(pool)
        .await
        .context("Failed to update broadcast totals")?;

    Ok(())
}

pub async fn insert_broadcast_target(
    pool: &DbPool,
    broadcast_id: &str,
    list_id: &str,
    target_type: TargetType,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO broadcast_targets (broadcast_id, list_id, target_type)
         VALUES ($1, $2, $3)
         ON CONFLICT (broadcast_id, list_id, target_type) DO NOTHING",
    )
    .bind(broadcast_id)
    .bind(list_id)
    .bind(target_type.as_str())
    .execute(pool)
    .await
    .context("Failed to insert broadcast target")?;

    Ok(())
}

pub async fn count_broadcasts(pool: &DbPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM broadcasts")
        .fetch_one(pool)
        .await
        .context("Failed to count broadcasts")
}

/// Broadcast headers joined with delivery and click counters, newest first.
pub async fn broadcast_analytics(
    pool: &DbPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<BroadcastAnalyticsRow>> {
    let rows = sqlx::query_as::<_, BroadcastAnalyticsRow>(
        "SELECT b.id, b.name, b.message, b.sent_count, b.total_cost, b.target_all, b.created_at,
                (SELECT COUNT(*) FROM messages m
                 WHERE m.broadcast_id = b.id AND m.delivery_status = 'DELIVERED') AS delivered_count,
                (SELECT COUNT(*) FROM messages m
                 WHERE m.broadcast_id = b.id AND m.delivery_status IN ('FAILED', 'UNDELIVERED')) AS failed_count,
                (SELECT COUNT(*) FROM link_clicks c
                 JOIN links l ON l.id = c.link_id
                 WHERE l.broadcast_id = b.id) AS click_count
         FROM broadcasts b
         ORDER BY b.created_at DESC
         LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to fetch broadcast analytics")?;

    Ok(rows)
}

// =============================================================================
// Link Operations
// =============================================================================

/// Insert a link row. Returns `None` on a short-code collision so the caller
/// can retry with a fresh code; every other failure is an error.
pub async fn insert_link(
    pool: &DbPool,
    broadcast_id: &str,
    original_url: &str,
    short_code: &str,
) -> Result<Option<Link>> {
    let result = sqlx::query_as::<_, Link>(
        "INSERT INTO links (id, broadcast_id, original_url, short_code)
         VALUES ($1, $2, $3, $4)
         RETURNING id, broadcast_id, original_url, short_code",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(broadcast_id)
    .bind(original_url)
    .bind(short_code)
    .fetch_one(pool)
    .await;

    match result {
        Ok(link) => Ok(Some(link)),
        Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => Ok(None),
        Err(e) => Err(e).context("Failed to insert link"),
    }
}

pub async fn find_link_by_code(pool: &DbPool, short_code: &str) -> Result<Option<Link>> {
    let link = sqlx::query_as::<_, Link>(
        "SELECT id, broadcast_id, original_url, short_code FROM links WHERE short_code = $1",
    )
    .bind(short_code)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch link")?;

    Ok(link)
}

pub async fn insert_link_click(
    pool: &DbPool,
    link_id: &str,
    subscriber_id: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO link_clicks (id, link_id, subscriber_id, clicked_at)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(link_id)
    .bind(subscriber_id)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("Failed to insert link click")?;

    Ok(())
}

// =============================================================================
// Inbox Projection
// =============================================================================

const UNREAD_PREDICATE: &str = "EXISTS (
    SELECT 1 FROM messages mi
    WHERE mi.phone_number = s.phone_number
      AND mi.direction = 'INBOUND'
      AND mi.created_at > COALESCE(s.last_read_at, 'epoch'::timestamptz)
)";

/// Count of active subscribers with at least one inbound message newer than
/// their read watermark.
pub async fn unread_conversation_count(pool: &DbPool) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM subscribers s WHERE s.is_active = TRUE AND {UNREAD_PREDICATE}"
    );

    sqlx::query_scalar(&sql)
        .fetch_one(pool)
        .await
        .context("Failed to count unread conversations")
}

/// Count of active subscribers with at least one message in either direction.
pub async fn total_conversation_count(pool: &DbPool) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM subscribers s
         WHERE s.is_active = TRUE
           AND EXISTS (SELECT 1 FROM messages m WHERE m.phone_number = s.phone_number)",
    )
    .fetch_one(pool)
    .await
    .context("Failed to count conversations")
}

/// Conversation listing: active subscribers with messages, most recent
/// activity first, filtered by read state and phone substring.
pub async fn list_conversations(
    pool: &DbPool,
    filter: &str,
    search: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<ConversationRow>> {
    let sql = format!(
        "SELECT s.id, s.phone_number, s.last_read_at, s.joined_at,
                {UNREAD_PREDICATE} AS has_unread,
                lm.content AS last_message_content,
                lm.direction AS last_message_direction,
                lm.created_at AS last_message_at
         FROM subscribers s
         JOIN LATERAL (
             SELECT m.content, m.direction, m.created_at
             FROM messages m
             WHERE m.phone_number = s.phone_number
             ORDER BY m.created_at DESC
             LIMIT 1
         ) lm ON TRUE
         WHERE s.is_active = TRUE
           AND ($1 = '' OR s.phone_number LIKE '%' || $1 || '%')
           AND ($2 = 'all'
                OR ($2 = 'unread' AND {UNREAD_PREDICATE})
                OR ($2 = 'read' AND NOT {UNREAD_PREDICATE}))
         ORDER BY lm.created_at DESC
         LIMIT $3 OFFSET $4"
    );

    let rows = sqlx::query_as::<_, ConversationRow>(&sql)
        .bind(search)
        .bind(filter)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("Failed to list conversations")?;

    Ok(rows)
}

// =============================================================================
// App Config (singleton)
// =============================================================================

pub async fn get_app_settings(pool: &DbPool) -> Result<AppSettings> {
    let settings = sqlx::query_as::<_, AppSettings>(
        "SELECT default_welcome_message, legacy_opt_in_keyword, legacy_opt_in_response,
                legacy_already_subscribed_response
         FROM app_config WHERE id = 1",
    )
    .fetch_one(pool)
    .await
    .context("Failed to fetch app settings")?;

    Ok(settings)
}

pub async fn update_app_settings(pool: &DbPool, settings: &AppSettings) -> Result<AppSettings> {
    let updated = sqlx::query_as::<_, AppSettings>(
        "UPDATE app_config
         SET default_welcome_message = $1, legacy_opt_in_keyword = $2,
             legacy_opt_in_response = $3, legacy_already_subscribed_response = $4
         WHERE id = 1
         RETURNING default_welcome_message, legacy_opt_in_keyword, legacy_opt_in_response,
                   legacy_already_subscribed_response",
    )
    .bind(&settings.default_welcome_message)
    .bind(&settings.legacy_opt_in_keyword)
    .bind(&settings.legacy_opt_in_response)
    .bind(&settings.legacy_already_subscribed_response)
    .fetch_one(pool)
    .await
    .context("Failed to update app settings")?;

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> Option<DbPool> {
        let Ok(db_url) = std::env::var("TEST_DATABASE_URL") else {
            return None;
        };
        Some(
            init_db(DbConfig {
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
        // Ten digits derived from a v4 uuid so parallel tests never collide.
        let n = Uuid::new_v4().as_u128() % 10_000_000_000;
        format!("+1{n:010}")
    }

    #[tokio::test]
    async fn opt_in_upsert_reactivates_and_preserves_id() {
        let Some(pool) = test_pool().await else { return };
        let phone = unique_phone();

        let created = opt_in_subscriber(&pool, &phone, "TRIBE").await.expect("opt in");
        assert!(created.is_active);
        assert_eq!(created.joined_via_keyword.as_deref(), Some("TRIBE"));

        deactivate_subscriber(&pool, &created.id).await.expect("deactivate");
        let rejoined = opt_in_subscriber(&pool, &phone, "HELP").await.expect("rejoin");

        assert_eq!(rejoined.id, created.id);
        assert!(rejoined.is_active);
        assert_eq!(rejoined.joined_via_keyword.as_deref(), Some("HELP"));
    }

    #[tokio::test]
    async fn membership_insert_is_idempotent() {
        let Some(pool) = test_pool().await else { return };
        let phone = unique_phone();

        let sub = opt_in_subscriber(&pool, &phone, "TRIBE").await.expect("opt in");
        let list = create_list(&pool, &format!("test-list-{}", Uuid::new_v4()), None)
            .await
            .expect("list");

        let first = add_membership(&pool, &sub.id, &list.id, "manual").await.expect("add");
        let second = add_membership(&pool, &sub.id, &list.id, "bulk-import")
            .await
            .expect("re-add");

        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn thread_ref_is_first_write_wins() {
        let Some(pool) = test_pool().await else { return };
        let phone = unique_phone();

        let sub = opt_in_subscriber(&pool, &phone, "TRIBE").await.expect("opt in");
        set_notifier_thread_ref_if_unset(&pool, &sub.id, "ts-1").await.expect("set");
        set_notifier_thread_ref_if_unset(&pool, &sub.id, "ts-2").await.expect("set again");

        let found = find_subscriber(&pool, &sub.id).await.expect("find").expect("exists");
        assert_eq!(found.notifier_thread_ref.as_deref(), Some("ts-1"));
    }

    #[tokio::test]
    async fn delivery_status_update_is_silent_for_unknown_ids() {
        let Some(pool) = test_pool().await else { return };

        let updated = update_delivery_status(&pool, "SM-never-seen", DeliveryStatus::Delivered)
            .await
            .expect("update");
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn unread_watermark_drives_the_predicate() {
        let Some(pool) = test_pool().await else { return };
        let phone = unique_phone();

        let sub = opt_in_subscriber(&pool, &phone, "TRIBE").await.expect("opt in");
        insert_inbound_message(&pool, &phone, "hello").await.expect("inbound");

        let before = unread_conversation_count(&pool).await.expect("count");
        assert!(before >= 1);

        mark_read(&pool, &sub.id).await.expect("mark read");
        insert_inbound_message(&pool, &phone, "hello again").await.expect("inbound");

        mark_read(&pool, &sub.id).await.expect("mark read again");
        mark_unread(&pool, &sub.id).await.expect("mark unread");

        let found = find_subscriber(&pool, &sub.id).await.expect("find").expect("exists");
        assert!(found.last_read_at.is_none());
    }
}
