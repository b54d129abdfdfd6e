//! End-to-end webhook scenarios driven through the router.
//!
//! Gated on TEST_DATABASE_URL; each test uses unique phone numbers and
//! keywords so the suite can run in parallel against one database.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::FromRef,
    http::{header, Request, StatusCode},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use sanctuary_server::{
    config::Config,
    db, handlers,
    gateway::{SendOutcome, SmsGateway},
    models::DeliveryStatus,
    notifier::Notifier,
};

struct RecordingGateway {
    sent: parking_lot::Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SmsGateway for RecordingGateway {
    async fn send(&self, to: &str, body: &str) -> Result<SendOutcome> {
        self.sent.lock().push((to.to_string(), body.to_string()));
        Ok(SendOutcome {
            provider_id: format!("SM{}", Uuid::new_v4().simple()),
            initial_status: DeliveryStatus::Sent,
        })
    }

    fn provider_name(&self) -> &'static str {
        "recording"
    }
}

struct RecordingNotifier {
    posts: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post(&self, text: &str, thread_ref: Option<&str>) -> Result<Option<String>> {
        self.posts.lock().push(text.to_string());
        Ok(Some(thread_ref.unwrap_or("ts-test").to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "recording"
    }
}

#[derive(Clone)]
struct TestState {
    pool: PgPool,
    config: Arc<Config>,
    gateway: Arc<dyn SmsGateway>,
    notifier: Arc<dyn Notifier>,
}

impl FromRef<TestState> for PgPool {
    fn from_ref(state: &TestState) -> PgPool {
        state.pool.clone()
    }
}

impl FromRef<TestState> for Arc<Config> {
    fn from_ref(state: &TestState) -> Arc<Config> {
        state.config.clone()
    }
}

impl FromRef<TestState> for Arc<dyn SmsGateway> {
    fn from_ref(state: &TestState) -> Arc<dyn SmsGateway> {
        state.gateway.clone()
    }
}

impl FromRef<TestState> for Arc<dyn Notifier> {
    fn from_ref(state: &TestState) -> Arc<dyn Notifier> {
        state.notifier.clone()
    }
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
        admin_api_token: Some("test-token".to_string()),
        server_port: 8080,
    }
}

async fn test_app() -> Option<(Router, PgPool)> {
    let db_url = std::env::var("TEST_DATABASE_URL").ok()?;

    let pool = db::init_db(db::DbConfig {
        database_url: db_url,
        max_connections: 10,
        min_connections: 1,
        acquire_timeout: std::time::Duration::from_secs(10),
        idle_timeout: std::time::Duration::from_secs(60),
    })
    .await
    .expect("Failed to initialize test database");

    let state = TestState {
        pool: pool.clone(),
        config: Arc::new(test_config()),
        gateway: Arc::new(RecordingGateway {
            sent: parking_lot::Mutex::new(Vec::new()),
        }),
        notifier: Arc::new(RecordingNotifier {
            posts: parking_lot::Mutex::new(Vec::new()),
        }),
    };

    let app = Router::new()
        .route("/api/webhooks/sms", post(handlers::webhooks::inbound_sms))
        .route(
            "/api/webhooks/delivery-status",
            post(handlers::webhooks::delivery_status),
        )
        .route("/sanctuary/{code}", get(handlers::redirect::follow_link))
        .with_state(state);

    Some((app, pool))
}

fn unique_phone() -> String {
    let n = Uuid::new_v4().as_u128() % 10_000_000_000;
    format!("+1{n:010}")
}

fn unique_keyword() -> String {
    let n = Uuid::new_v4().as_u128() % 1_000_000;
    format!("KW{n:06}")
}

fn sms_webhook_request(from: &str, body: &str) -> Request<Body> {
    let form = format!(
        "MessageSid=SM{}&From={}&To=%2B15559990000&Body={}",
        Uuid::new_v4().simple(),
        urlencode(from),
        urlencode(body),
    );

    Request::builder()
        .method("POST")
        .uri("/api/webhooks/sms")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .expect("request")
}

fn urlencode(s: &str) -> String {
    let mut out = String::new();
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[tokio::test]
async fn new_opt_in_creates_subscriber_and_replies_with_welcome() {
    let Some((app, pool)) = test_app().await else { return };

    let phone = unique_phone();
    let kw = unique_keyword();
    db::create_keyword(&pool, &kw, "Welcome!", true, None)
        .await
        .expect("keyword");

    let response = app
        .oneshot(sms_webhook_request(&phone, &kw.to_lowercase()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/xml")
    );
    let body = body_string(response).await;
    assert_eq!(
        body,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>Welcome!</Message></Response>"
    );

    let subscriber = db::find_subscriber_by_phone(&pool, &phone)
        .await
        .expect("lookup")
        .expect("subscriber created");
    assert!(subscriber.is_active);
    assert_eq!(subscriber.joined_via_keyword.as_deref(), Some(kw.as_str()));

    let messages = db::conversation_messages(&pool, &phone, 10, 0)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert!(messages[0].is_inbound());
    assert!(!messages[1].is_inbound());

    // The welcome closed the unread window.
    let last_read = subscriber.last_read_at.expect("watermark set");
    assert!(last_read >= messages[1].created_at);
}

#[tokio::test]
async fn opt_out_of_a_stranger_is_polite_and_creates_nothing() {
    let Some((app, pool)) = test_app().await else { return };

    let phone = unique_phone();
    let response = app
        .oneshot(sms_webhook_request(&phone, "STOP"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<Message>You're not currently subscribed.</Message>"));

    assert!(db::find_subscriber_by_phone(&pool, &phone)
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn missing_required_fields_is_a_400() {
    let Some((app, _pool)) = test_app().await else { return };

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/sms")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("From=%2B15551234567"))
        .expect("request");

    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("Missing required fields"));
}

#[tokio::test]
async fn short_code_redirect_records_an_attributed_click() {
    let Some((app, pool)) = test_app().await else { return };

    let broadcast = db::insert_broadcast(&pool, Some("clicks"), "See link", true)
        .await
        .expect("broadcast");
    let code: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    let link = db::insert_link(&pool, &broadcast.id, "https://example.com/x", &code)
        .await
        .expect("insert")
        .expect("no collision");

    let subscriber = db::opt_in_subscriber(&pool, &unique_phone(), "T")
        .await
        .expect("subscriber");

    let request = Request::builder()
        .method("GET")
        .uri(format!("/sanctuary/{code}?sid={}", subscriber.id))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok()),
        Some("https://example.com/x")
    );

    let clicks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM link_clicks WHERE link_id = $1 AND subscriber_id = $2")
            .bind(&link.id)
            .bind(&subscriber.id)
            .fetch_one(&pool)
            .await
            .expect("count");
    assert_eq!(clicks, 1);

    // Unknown codes render the 404 page and record nothing.
    let request = Request::builder()
        .method("GET")
        .uri("/sanctuary/zzzzzzzz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delivery_callback_reconciles_the_message_row() {
    let Some((app, pool)) = test_app().await else { return };

    let phone = unique_phone();
    let provider_id = format!("SM{}", Uuid::new_v4().simple());
    db::insert_outbound_message(
        &pool,
        &phone,
        "broadcast body",
        None,
        Some(&provider_id),
        DeliveryStatus::Sent,
    )
    .await
    .expect("outbound row");

    let form = format!(
        "MessageSid={provider_id}&MessageStatus=delivered&To={}&From=%2B15559990000",
        urlencode(&phone)
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/delivery-status")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .expect("request");

    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let status: String =
        sqlx::query_scalar("SELECT delivery_status FROM messages WHERE provider_message_id = $1")
            .bind(&provider_id)
            .fetch_one(&pool)
            .await
            .expect("status");
    assert_eq!(status, "DELIVERED");
}

#[tokio::test]
async fn duplicate_webhook_deliveries_converge_on_the_same_subscriber_state() {
    let Some((app, pool)) = test_app().await else { return };

    let phone = unique_phone();
    let kw = unique_keyword();
    db::create_keyword(&pool, &kw, "Welcome!", true, None)
        .await
        .expect("keyword");

    let first = app
        .clone()
        .oneshot(sms_webhook_request(&phone, &kw))
        .await
        .expect("first");
    assert_eq!(first.status(), StatusCode::OK);
    let after_first = db::find_subscriber_by_phone(&pool, &phone)
        .await
        .expect("lookup")
        .expect("exists");

    let second = app
        .oneshot(sms_webhook_request(&phone, &kw))
        .await
        .expect("second");
    assert_eq!(second.status(), StatusCode::OK);
    let after_second = db::find_subscriber_by_phone(&pool, &phone)
        .await
        .expect("lookup")
        .expect("exists");

    assert_eq!(after_first.id, after_second.id);
    assert!(after_second.is_active);
    assert!(after_second.joined_at <= Utc::now());
}
