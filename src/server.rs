//! Axum HTTP surface.
//!
//! - `GET  /api/health`: liveness
//! - `GET  /api/bot-key`: display-safe status of the session's key
//! - `POST /api/bot-key/regenerate`: issue or rotate, returns the new key once
//! - `POST /api/bot-key/reveal`: rate-limited decrypt of the current key
//! - `POST /api/webhook`: bot submissions authenticated by `x-api-key`
//!
//! Account routes take an `Authorization: Bearer <session token>` header.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::credentials::{CredentialCipher, CredentialManager, CredentialStatus, Keyring};
use crate::db::Database;
use crate::error::BotKeyError;
use crate::identity::{SessionAuthenticator, SessionTokens};
use crate::ingest::{IngestService, SubmissionRequest};
use crate::ratelimit::FixedWindowLimiter;
use crate::secrets::Secrets;

/// Header carrying the bot key on the webhook.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shown alongside every freshly issued key.
pub const SAVE_KEY_WARNING: &str = "Save this key securely. It will NOT be shown again.";

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Key lifecycle.
    pub credentials: Arc<CredentialManager>,
    /// Submission ingestion.
    pub ingest: Arc<IngestService>,
    /// Session resolution for the account routes.
    pub sessions: Arc<dyn SessionAuthenticator>,
}

impl AppState {
    /// Wire the production services from config, secrets and an open database.
    ///
    /// # Errors
    ///
    /// Returns [`BotKeyError::Config`] if the master key is missing or malformed.
    pub fn build(config: &Config, secrets: &Secrets, db: &Database) -> Result<Self, BotKeyError> {
        let keyring = Keyring::from_config(&config.crypto, secrets)?;
        let cipher = Arc::new(CredentialCipher::new(keyring));
        let store = Arc::new(db.clone());

        let credentials = Arc::new(CredentialManager::new(
            cipher,
            store.clone(),
            Arc::new(FixedWindowLimiter::new(config.limits.reveal.policy())),
        ));
        let ingest = Arc::new(IngestService::new(
            Arc::clone(&credentials),
            Arc::new(FixedWindowLimiter::new(config.limits.ingest.policy())),
            store,
            config.links.clone(),
        ));
        let sessions = Arc::new(SessionTokens::new(db.clone(), config.sessions.ttl_hours));

        Ok(Self {
            credentials,
            ingest,
            sessions,
        })
    }
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/bot-key", get(status_handler))
        .route("/api/bot-key/regenerate", post(regenerate_handler))
        .route("/api/bot-key/reveal", post(reveal_handler))
        .route("/api/webhook", post(webhook_handler))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct IssuedKeyResponse {
    api_key: String,
    last4: String,
    warning: &'static str,
}

#[derive(Serialize)]
struct RevealResponse {
    api_key: String,
    last4: String,
}

#[derive(Serialize)]
struct WebhookResponse {
    ok: bool,
    submission_id: String,
    links_accepted: usize,
    links_dropped: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CredentialStatus>, BotKeyError> {
    let owner_id = session_owner(&state, &headers).await?;
    Ok(Json(state.credentials.status(&owner_id).await?))
}

async fn regenerate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<IssuedKeyResponse>, BotKeyError> {
    let owner_id = session_owner(&state, &headers).await?;
    let issued = state.credentials.issue_or_rotate(&owner_id).await?;
    Ok(Json(IssuedKeyResponse {
        api_key: issued.secret.expose().to_owned(),
        last4: issued.last4,
        warning: SAVE_KEY_WARNING,
    }))
}

async fn reveal_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RevealResponse>, BotKeyError> {
    let owner_id = session_owner(&state, &headers).await?;
    let revealed = state.credentials.reveal(&owner_id).await?;
    Ok(Json(RevealResponse {
        api_key: revealed.secret.expose().to_owned(),
        last4: revealed.last4,
    }))
}

async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, BotKeyError> {
    let request = SubmissionRequest::from_json(&body)?;
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let receipt = state.ingest.submit(presented, request).await?;
    Ok(Json(WebhookResponse {
        ok: true,
        submission_id: receipt.submission_id,
        links_accepted: receipt.links_accepted,
        links_dropped: receipt.links_dropped,
    }))
}

async fn session_owner(state: &AppState, headers: &HeaderMap) -> Result<String, BotKeyError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(BotKeyError::Authentication)?;
    state
        .sessions
        .resolve(token.trim())
        .await?
        .ok_or(BotKeyError::Authentication)
}

impl IntoResponse for BotKeyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Authentication => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            Self::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Config(_) | Self::Storage(_) => {
                error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_owned(),
                )
            }
        };

        let mut response = (status, Json(ErrorBody { error: message })).into_response();
        if let Self::RateLimited { retry_after } = self {
            let secs = if retry_after.subsec_nanos() > 0 {
                retry_after.as_secs().saturating_add(1)
            } else {
                retry_after.as_secs()
            };
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}
