//! Admin authentication for the operator API.
//!
//! A static bearer token guards every `/api` admin endpoint. The extractor
//! fails closed: a deployment without `ADMIN_API_TOKEN` rejects admin calls
//! instead of exposing them.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingAuthHeader,

    #[error("Invalid authorization header format")]
    InvalidAuthFormat,

    #[error("Invalid admin token")]
    InvalidToken,

    #[error("Admin API token is not configured")]
    NotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        };

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Proof that the request carried the admin bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl<S> FromRequestParts<S> for AdminAuth
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<Config>::from_ref(state);
        let Some(expected) = config.admin_api_token.as_deref() else {
            return Err(AuthError::NotConfigured);
        };

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?;
        let value = header.to_str().map_err(|_| AuthError::InvalidAuthFormat)?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthFormat)?;

        if token != expected {
            return Err(AuthError::InvalidToken);
        }

        Ok(AdminAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[derive(Clone)]
    struct TestState(Arc<Config>);

    impl FromRef<TestState> for Arc<Config> {
        fn from_ref(state: &TestState) -> Arc<Config> {
            state.0.clone()
        }
    }

    fn state_with_token(token: Option<&str>) -> TestState {
        TestState(Arc::new(Config {
            public_base_url: "http://localhost:3000".to_string(),
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_messaging_service_sid: None,
            slack_bot_token: None,
            slack_channel: None,
            admin_phone_number: None,
            sms_notifications_enabled: true,
            verify_webhook_signatures: false,
            admin_api_token: token.map(|t| t.to_string()),
            server_port: 8080,
        }))
    }

    async fn extract(auth_header: Option<&str>, state: &TestState) -> Result<AdminAuth, AuthError> {
        let mut builder = Request::builder().uri("/api/keywords");
        if let Some(value) = auth_header {
            builder = builder.header(AUTHORIZATION, value);
        }
        let request = builder.body(()).expect("request");
        let (mut parts, _) = request.into_parts();
        AdminAuth::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn accepts_the_configured_token() {
        let state = state_with_token(Some("hunter2"));
        assert!(extract(Some("Bearer hunter2"), &state).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_wrong_missing_and_malformed_tokens() {
        let state = state_with_token(Some("hunter2"));
        assert!(matches!(
            extract(Some("Bearer nope"), &state).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            extract(None, &state).await,
            Err(AuthError::MissingAuthHeader)
        ));
        assert!(matches!(
            extract(Some("Basic hunter2"), &state).await,
            Err(AuthError::InvalidAuthFormat)
        ));
    }

    #[tokio::test]
    async fn fails_closed_without_a_configured_token() {
        let state = state_with_token(None);
        assert!(matches!(
            extract(Some("Bearer anything"), &state).await,
            Err(AuthError::NotConfigured)
        ));
    }
}
