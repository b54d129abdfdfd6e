//! App-config singleton: welcome message and legacy keyword responses.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::auth::AdminAuth;
use crate::db::{self, DbPool};
use crate::error::ApiError;
use crate::models::AppSettings;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub default_welcome_message: String,
    pub legacy_opt_in_keyword: Option<String>,
    pub legacy_opt_in_response: Option<String>,
    pub legacy_already_subscribed_response: Option<String>,
}

impl From<AppSettings> for SettingsView {
    fn from(s: AppSettings) -> Self {
        Self {
            default_welcome_message: s.default_welcome_message,
            legacy_opt_in_keyword: s.legacy_opt_in_keyword,
            legacy_opt_in_response: s.legacy_opt_in_response,
            legacy_already_subscribed_response: s.legacy_already_subscribed_response,
        }
    }
}

/// Partial update: absent fields keep their stored values.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsBody {
    pub default_welcome_message: Option<String>,
    pub legacy_opt_in_keyword: Option<String>,
    pub legacy_opt_in_response: Option<String>,
    pub legacy_already_subscribed_response: Option<String>,
}

/// GET /api/settings
pub async fn get_settings(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
) -> Result<Json<SettingsView>, ApiError> {
    let settings = db::get_app_settings(&pool).await?;
    Ok(Json(settings.into()))
}

/// PUT /api/settings
pub async fn update_settings(
    State(pool): State<DbPool>,
    _auth: AdminAuth,
    Json(body): Json<SettingsBody>,
) -> Result<Json<SettingsView>, ApiError> {
    let mut settings = db::get_app_settings(&pool).await?;

    if let Some(welcome) = body.default_welcome_message {
        if welcome.trim().is_empty() {
            return Err(ApiError::InvalidInput(
                "Default welcome message must not be empty".to_string(),
            ));
        }
        settings.default_welcome_message = welcome;
    }
    if let Some(keyword) = body.legacy_opt_in_keyword {
        let normalized = crate::keywords::normalize(&keyword);
        settings.legacy_opt_in_keyword = (!normalized.is_empty()).then_some(normalized);
    }
    if let Some(response) = body.legacy_opt_in_response {
        settings.legacy_opt_in_response = (!response.trim().is_empty()).then_some(response);
    }
    if let Some(response) = body.legacy_already_subscribed_response {
        settings.legacy_already_subscribed_response =
            (!response.trim().is_empty()).then_some(response);
    }

    let updated = db::update_app_settings(&pool, &settings).await?;
    Ok(Json(updated.into()))
}
