use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use pastewords_transfer::{Broker, BrokerError, ErrorKind, Payload, SenderSession, Upload};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Header a client uses to tie its sends to one sender session.
pub const SESSION_HEADER: &str = "x-pastewords-session";

/// Slack for JSON framing and the metadata fields around the payload.
const ENVELOPE_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub session_ttl: Duration,
    pub max_sessions: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            max_sessions: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    content_type: String,
    payload_base64: String,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    code: String,
    size_bytes: usize,
}

struct SessionEntry {
    session: Arc<SenderSession>,
    created: Instant,
}

#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub settings: HttpSettings,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl AppState {
    pub fn new(broker: Broker, settings: HttpSettings) -> Self {
        Self {
            broker,
            settings,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The session named by the request header, or a fresh unguarded one.
    async fn session_for(&self, headers: &HeaderMap) -> Arc<SenderSession> {
        let key = headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty());
        let Some(key) = key else {
            return Arc::new(SenderSession::new());
        };

        let now = Instant::now();
        let ttl = self.settings.session_ttl;
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get(key) {
            if now.duration_since(entry.created) < ttl {
                return entry.session.clone();
            }
        }

        if !sessions.contains_key(key) && sessions.len() >= self.settings.max_sessions {
            sessions.retain(|_, entry| now.duration_since(entry.created) < ttl);
            if sessions.len() >= self.settings.max_sessions {
                let oldest = sessions
                    .iter()
                    .min_by_key(|(_, entry)| entry.created)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    sessions.remove(&oldest);
                }
            }
        }

        let session = Arc::new(SenderSession::new());
        sessions.insert(
            key.to_string(),
            SessionEntry {
                session: session.clone(),
                created: now,
            },
        );
        session
    }

    /// Drop sessions older than the TTL, returning how many went.
    pub async fn purge_expired_sessions(&self) -> usize {
        let now = Instant::now();
        let ttl = self.settings.session_ttl;
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.created) < ttl);
        before - sessions.len()
    }

    pub fn spawn_session_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            loop {
                timer.tick().await;
                let removed = state.purge_expired_sessions().await;
                if removed > 0 {
                    debug!(removed, "expired sender sessions dropped");
                }
            }
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit =
        state.broker.limits().max_payload_bytes.div_ceil(3) * 4 + ENVELOPE_OVERHEAD_BYTES;

    Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/v1/transfers", post(post_transfer))
        .route("/v1/transfers/{code}/receive", post(receive_transfer))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health_live() -> impl IntoResponse {
    Json(json!({
        "status": "live",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.broker.ping().await.is_ok();
    let payload = Json(json!({
        "status": if ready { "ready" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339()
    }));

    if ready {
        (StatusCode::OK, payload).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, payload).into_response()
    }
}

async fn post_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let bytes = BASE64.decode(request.payload_base64.as_bytes()).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_payload_encoding", "detail": e.to_string() })),
        )
    })?;

    let session = state.session_for(&headers).await;
    let receipt = state
        .broker
        .send(
            &session,
            Upload {
                file_name: request.file_name,
                content_type: request.content_type,
                bytes,
            },
        )
        .await
        .map_err(broker_error)?;

    info!(
        transfer_id = %receipt.transfer_id,
        size_bytes = receipt.size_bytes,
        "transfer accepted"
    );
    Ok((
        StatusCode::CREATED,
        Json(SendResponse {
            code: receipt.code.into_string(),
            size_bytes: receipt.size_bytes,
        }),
    ))
}

async fn receive_transfer(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let payload = state.broker.receive(&code).await.map_err(broker_error)?;
    Ok(file_response(payload))
}

fn file_response(payload: Payload) -> Response {
    let content_type = HeaderValue::from_str(&payload.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        ascii_file_name(&payload.file_name)
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        payload.bytes,
    )
        .into_response()
}

fn ascii_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn broker_error(error: BrokerError) -> (StatusCode, Json<Value>) {
    let status = match &error {
        BrokerError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        BrokerError::InvalidCode(_) | BrokerError::InvalidContentType { .. } => {
            StatusCode::BAD_REQUEST
        }
        BrokerError::SessionSpent | BrokerError::AlreadyFilled | BrokerError::NotReady => {
            StatusCode::CONFLICT
        }
        BrokerError::NotFound => StatusCode::NOT_FOUND,
        BrokerError::PoolExhausted { .. } | BrokerError::Store(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    if error.kind() == ErrorKind::Store {
        warn!(error = %error, "request failed on store");
    } else {
        debug!(error = %error, "request rejected");
    }

    (
        status,
        Json(json!({
            "error": error.reason(),
            "detail": error.to_string(),
            "retryable": error.is_retryable()
        })),
    )
}
