use axum::{
    extract::FromRef,
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sanctuary_server::{
    config::Config,
    db, handlers, health,
    gateway::{DisabledGateway, SmsGateway, TwilioGateway},
    middleware,
    notifier::{Notifier, NullNotifier, SlackNotifier},
};

#[derive(Clone, FromRef)]
struct AppState {
    db_pool: PgPool,
    config: Arc<Config>,
    gateway: Arc<dyn SmsGateway>,
    notifier: Arc<dyn Notifier>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Default to warn in production, debug in development
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }

        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Sanctuary SMS server");

    let config = Arc::new(Config::from_env());
    tracing::info!(
        base_url = %config.public_base_url,
        sms_gateway_configured = config.twilio_account_sid.is_some(),
        notifier_configured = config.slack_bot_token.is_some(),
        verify_webhook_signatures = config.verify_webhook_signatures,
        admin_auth_configured = config.admin_api_token.is_some(),
        "Configuration loaded"
    );

    let db_pool = db::init_db_default().await?;
    tracing::info!("Database initialized");

    let gateway: Arc<dyn SmsGateway> = match TwilioGateway::from_config(&config) {
        Some(twilio) => Arc::new(twilio),
        None => {
            tracing::warn!("Twilio credentials missing, outbound SMS disabled");
            Arc::new(DisabledGateway)
        }
    };

    let notifier: Arc<dyn Notifier> = match SlackNotifier::from_config(&config) {
        Some(slack) => Arc::new(slack),
        None => {
            tracing::warn!("Slack credentials missing, chat notifications disabled");
            Arc::new(NullNotifier)
        }
    };

    let app_state = AppState {
        db_pool,
        config: config.clone(),
        gateway,
        notifier,
    };

    let app = Router::new()
        // Health check endpoints
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // Provider webhooks
        .route("/api/webhooks/sms", post(handlers::webhooks::inbound_sms))
        .route(
            "/api/webhooks/delivery-status",
            post(handlers::webhooks::delivery_status),
        )
        // Public short-link redirect
        .route("/sanctuary/{code}", get(handlers::redirect::follow_link))
        // Broadcasts
        .route("/api/broadcast", post(handlers::broadcast::send_broadcast))
        .route(
            "/api/broadcast/test",
            post(handlers::broadcast::send_test_broadcast),
        )
        // Inbox and read state
        .route("/api/inbox", get(handlers::inbox::get_inbox))
        .route("/api/inbox/stats", get(handlers::inbox::get_inbox_stats))
        .route(
            "/api/conversations/mark-all-read",
            post(handlers::inbox::mark_all_read),
        )
        .route(
            "/api/conversations/{id}/mark-read",
            post(handlers::inbox::mark_read),
        )
        .route(
            "/api/conversations/{id}/mark-unread",
            post(handlers::inbox::mark_unread),
        )
        // Keyword administration
        .route(
            "/api/keywords",
            get(handlers::keywords::list_keywords).post(handlers::keywords::create_keyword),
        )
        .route(
            "/api/keywords/{id}",
            put(handlers::keywords::update_keyword).delete(handlers::keywords::delete_keyword),
        )
        // List administration
        .route(
            "/api/lists",
            get(handlers::lists::list_lists).post(handlers::lists::create_list),
        )
        .route("/api/lists/{id}", axum::routing::delete(handlers::lists::delete_list))
        .route(
            "/api/lists/{id}/members",
            get(handlers::lists::list_members).post(handlers::lists::add_member),
        )
        .route(
            "/api/lists/{id}/members/{subscriber_id}",
            axum::routing::delete(handlers::lists::remove_member),
        )
        // Subscriber administration
        .route(
            "/api/subscribers",
            get(handlers::subscribers::list_subscribers)
                .post(handlers::subscribers::create_subscriber),
        )
        .route(
            "/api/subscribers/bulk",
            post(handlers::subscribers::bulk_import),
        )
        .route(
            "/api/subscribers/{id}",
            get(handlers::subscribers::get_subscriber)
                .delete(handlers::subscribers::deactivate_subscriber),
        )
        .route(
            "/api/subscribers/{id}/messages",
            get(handlers::subscribers::get_messages),
        )
        .route(
            "/api/subscribers/{id}/reply",
            post(handlers::subscribers::reply),
        )
        // Settings, analytics, dashboard
        .route(
            "/api/settings",
            get(handlers::settings::get_settings).put(handlers::settings::update_settings),
        )
        .route("/api/analytics", get(handlers::analytics::get_analytics))
        .route("/api/dashboard/stats", get(handlers::dashboard::get_stats))
        .route(
            "/api/dashboard/messages",
            get(handlers::dashboard::get_messages),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            middleware::logging::log_requests_middleware,
        ))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
