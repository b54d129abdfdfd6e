//! Public short-link redirect with click attribution.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{error, warn};

use crate::db::{self, DbPool};

const NOT_FOUND_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Link not found</title></head>
<body>
<h1>Link not found</h1>
<p>This link doesn't exist or has expired.</p>
</body>
</html>"#;

#[derive(Debug, Deserialize)]
pub struct RedirectParams {
    /// Optional subscriber attribution.
    pub sid: Option<String>,
}

/// GET /sanctuary/{code}
///
/// Permanent redirect to the original URL; the click row is best-effort and
/// never blocks the redirect.
pub async fn follow_link(
    State(pool): State<DbPool>,
    Path(code): Path<String>,
    Query(params): Query<RedirectParams>,
) -> Response {
    let link = match db::find_link_by_code(&pool, &code).await {
        Ok(Some(link)) => link,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE)).into_response();
        }
        Err(e) => {
            error!(error = %e, code = %code, "Link lookup failed");
            return (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE)).into_response();
        }
    };

    if let Err(e) = db::insert_link_click(&pool, &link.id, params.sid.as_deref()).await {
        warn!(error = %e, link_id = %link.id, "Click insert failed");
    }

    Redirect::permanent(&link.original_url).into_response()
}
