#![deny(unsafe_code)]

pub mod config;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use crate::config::{CollaboratorsConfig, ServerConfig, ServiceConfig, StorageConfig};
use esign_adapters::{
    HttpCollaborators, HttpCollaboratorsConfig, HttpSetupError, InMemoryContractDirectory,
    InMemoryStateSync, LoggingNotificationSink,
};
use esign_core::{
    ArtifactStore, Clock, ContractDirectory, ContractId, ContractSnapshot, ContractStateSync,
    DocumentKind, FileArtifactStore, InMemorySignatureStore, IntegrityReport, IssuedSession,
    Notification, NotificationCategory, NotificationOutbox, NotificationSink, OutboxDispatcher,
    PdfDocumentRenderer, PostgresSignatureStore, ReconcileSummary, Recipient, SessionId,
    SessionView, SignatureStore, SigningComponents, SigningError, SigningOrchestrator,
    StorageError, SystemClock, TokenGenerator,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const MAX_RECONCILE_LIMIT: usize = 500;

/// Contract data, state transitions and notification delivery, however they are reached.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn ContractDirectory>,
    pub state_sync: Arc<dyn ContractStateSync>,
    pub sink: Arc<dyn NotificationSink>,
}

impl Collaborators {
    pub fn from_config(config: &CollaboratorsConfig) -> Result<Self, ServiceError> {
        match config {
            CollaboratorsConfig::Memory { fixtures } => {
                let directory = match fixtures {
                    Some(path) => {
                        let raw = std::fs::read(path).map_err(|e| {
                            ServiceError::Fixtures(format!("{}: {e}", path.display()))
                        })?;
                        let snapshots: Vec<ContractSnapshot> = serde_json::from_slice(&raw)
                            .map_err(|e| {
                                ServiceError::Fixtures(format!("{}: {e}", path.display()))
                            })?;
                        InMemoryContractDirectory::with_contracts(snapshots)
                    }
                    None => InMemoryContractDirectory::new(),
                };
                tracing::info!(contracts = directory.len(), "using in-memory collaborators");
                Ok(Self {
                    directory: Arc::new(directory),
                    state_sync: Arc::new(InMemoryStateSync::new()),
                    sink: Arc::new(LoggingNotificationSink),
                })
            }
            CollaboratorsConfig::Http {
                base_url,
                timeout_secs,
                service_token,
            } => {
                let client = Arc::new(HttpCollaborators::new(HttpCollaboratorsConfig {
                    base_url: base_url.clone(),
                    timeout: Duration::from_secs(*timeout_secs),
                    service_token: service_token.clone(),
                })?);
                tracing::info!(base_url = %base_url, "using http collaborators");
                Ok(Self {
                    directory: client.clone(),
                    state_sync: client.clone(),
                    sink: client,
                })
            }
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub orchestrator: Arc<SigningOrchestrator>,
    pub dispatcher: Arc<OutboxDispatcher>,
    sink: Arc<dyn NotificationSink>,
    server: ServerConfig,
    expose_token: bool,
    reconcile_interval: Duration,
    reconcile_batch: usize,
    storage_backend: &'static str,
    span: tracing::Span,
}

impl ServiceState {
    pub async fn bootstrap(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let collaborators = Collaborators::from_config(&config.collaborators)?;
        Self::assemble(config, collaborators).await
    }

    /// Wires storage, rendering and the orchestrator around the given collaborators.
    pub async fn assemble(
        config: &ServiceConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ServiceError> {
        let span = tracing::info_span!("esign");

        let (store, outbox, storage_backend): (
            Arc<dyn SignatureStore>,
            Arc<dyn NotificationOutbox>,
            &'static str,
        ) = match &config.storage {
            StorageConfig::Memory => {
                let store = Arc::new(InMemorySignatureStore::new());
                (store.clone(), store, "memory")
            }
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                let store = Arc::new(
                    PostgresSignatureStore::connect_with_options(
                        url,
                        *max_connections,
                        *connect_timeout_secs,
                    )
                    .await?,
                );
                (store.clone(), store, "postgres")
            }
        };

        let signing = &config.signing;
        let tokens = TokenGenerator::new(&signing.token_alphabet, signing.token_length)
            .ok_or_else(|| {
                ServiceError::Config(
                    "token alphabet must be non-empty uppercase and token length positive"
                        .to_string(),
                )
            })?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(FileArtifactStore::new(config.documents.root.clone()));
        let renderer = Arc::new(PdfDocumentRenderer::new(
            collaborators.directory.clone(),
            artifacts.clone(),
            clock.clone(),
            signing.render_timeout(),
            span.clone(),
        ));

        let orchestrator = SigningOrchestrator::new(
            signing.signing_config(),
            SigningComponents {
                store,
                outbox: outbox.clone(),
                renderer,
                artifacts,
                state_sync: collaborators.state_sync.clone(),
                tokens,
                clock: clock.clone(),
            },
            span.clone(),
        );
        let dispatcher = OutboxDispatcher::new(
            outbox,
            collaborators.sink.clone(),
            config.notifications.dispatcher_config(),
            clock,
            span.clone(),
        );

        if signing.expose_token_in_response {
            tracing::warn!("signing codes are returned in API responses");
        }

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            dispatcher: Arc::new(dispatcher),
            sink: collaborators.sink,
            server: config.server.clone(),
            expose_token: signing.expose_token_in_response,
            reconcile_interval: Duration::from_secs(signing.reconcile_interval_secs),
            reconcile_batch: signing.reconcile_batch.clamp(1, MAX_RECONCILE_LIMIT),
            storage_backend,
            span,
        })
    }

    /// Periodically re-applies state transitions that failed after signing.
    /// Returns `None` when the interval is zero.
    pub fn spawn_reconciler(&self, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self.reconcile_interval.is_zero() {
            return None;
        }
        let orchestrator = self.orchestrator.clone();
        let interval = self.reconcile_interval;
        let batch = self.reconcile_batch;
        let span = self.span.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = orchestrator.reconcile_state_sync(batch).await {
                            tracing::warn!(parent: &span, error = %err, "state sync reconciliation failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Hands a fresh code to its owner through the sink and records the delivery.
    ///
    /// The code travels only through this direct call, never the outbox. A failed delivery
    /// leaves `token_sent_at` unset so the caller can resend.
    async fn deliver_token(&self, issued: &IssuedSession) -> SessionView {
        let session = &issued.session;
        let notification = Notification::new(
            Recipient::User(issued.owner_user_id.clone()),
            NotificationCategory::TokenIssued,
            "Your contract signing code",
            format!(
                "Use code {} to sign your contract. It expires at {}.",
                issued.token.expose(),
                session.token_expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
        )
        .for_contract(&session.contract_id)
        .for_session(session.session_id)
        .for_connection(session.connection_id.as_deref());

        if let Err(err) = self.sink.deliver(&notification).await {
            tracing::warn!(
                parent: &self.span,
                session_id = %session.session_id,
                error = %err,
                "signing code delivery failed"
            );
            return session.clone();
        }
        match self.orchestrator.mark_token_sent(&session.session_id).await {
            Ok(updated) => updated,
            Err(err) => {
                tracing::warn!(
                    parent: &self.span,
                    session_id = %session.session_id,
                    error = %err,
                    "signing code delivered but not recorded"
                );
                session.clone()
            }
        }
    }

    async fn issued_response(&self, issued: IssuedSession) -> IssuedResponse {
        if self.expose_token {
            return IssuedResponse {
                session: issued.session,
                token: Some(issued.token.expose().to_string()),
                token_delivered: false,
            };
        }
        let session = self.deliver_token(&issued).await;
        IssuedResponse {
            token_delivered: session.token_sent_at.is_some(),
            session,
            token: None,
        }
    }
}

pub fn build_router(state: ServiceState) -> Router {
    let server = state.server.clone();
    let router = Router::new()
        .route("/v1/health", get(health))
        .route(
            "/v1/contracts/:contract_id/signing-sessions",
            post(initiate_session),
        )
        .route("/v1/signing-sessions/:session_id", get(get_session))
        .route(
            "/v1/signing-sessions/:session_id/signature",
            post(capture_signature),
        )
        .route("/v1/signing-sessions/:session_id/validate", post(validate_token))
        .route("/v1/signing-sessions/:session_id/resend", post(resend_token))
        .route(
            "/v1/signing-sessions/:session_id/token-sent",
            post(mark_token_sent),
        )
        .route("/v1/signing-sessions/:session_id/document", get(get_document))
        .route("/v1/signing-sessions/:session_id/verify", get(verify_documents))
        .route("/v1/admin/state-sync/reconcile", post(reconcile_state_sync))
        .with_state(state)
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_secs.max(1),
        )))
        .layer(TraceLayer::new_for_http());

    if server.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Runs a mutating operation on its own task so a dropped connection cannot cancel it midway.
async fn detached<T, F>(work: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| ApiError::Internal(format!("request task failed: {e}")))?
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw).ok_or_else(|| ApiError::not_found("signing session not found"))
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("storage setup failed: {0}")]
    Storage(#[from] StorageError),
    #[error("collaborator setup failed: {0}")]
    Collaborators(#[from] HttpSetupError),
    #[error("contract fixtures unreadable: {0}")]
    Fixtures(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

const UNAVAILABLE_MESSAGE: &str = "the signing service is temporarily unavailable, retry later";

fn signing_error_response(err: SigningError) -> Response {
    let message = err.to_string();
    let (status, body) = match &err {
        SigningError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": message, "code": "not_found" }),
        ),
        SigningError::DocumentUnavailable { .. } => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": message, "code": "document_unavailable" }),
        ),
        SigningError::DuplicateSession { .. } => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": message, "code": "duplicate_session" }),
        ),
        SigningError::AlreadySigned { .. } => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": message, "code": "already_signed" }),
        ),
        SigningError::SigningInProgress { .. } => (
            StatusCode::CONFLICT,
            serde_json::json!({ "error": message, "code": "signing_in_progress" }),
        ),
        SigningError::SignatureMissing => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({ "error": message, "code": "signature_missing" }),
        ),
        SigningError::InvalidSignatureImage(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({ "error": message, "code": "invalid_signature_image" }),
        ),
        SigningError::InvalidToken { remaining_attempts } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({
                "error": message,
                "code": "invalid_token",
                "remaining_attempts": remaining_attempts,
            }),
        ),
        SigningError::TokenExpired { expired_at } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({
                "error": message,
                "code": "token_expired",
                "expired_at": expired_at,
            }),
        ),
        SigningError::AttemptsExceeded { max_attempts } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({
                "error": message,
                "code": "attempts_exceeded",
                "max_attempts": max_attempts,
            }),
        ),
        SigningError::ResendNotAllowed {
            token_expires_at,
            remaining_attempts,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::json!({
                "error": message,
                "code": "resend_not_allowed",
                "token_expires_at": token_expires_at,
                "remaining_attempts": remaining_attempts,
            }),
        ),
        SigningError::Render(_) | SigningError::Storage(_) => {
            tracing::error!(error = %err, "signing operation failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "error": UNAVAILABLE_MESSAGE, "code": "unavailable" }),
            )
        }
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Signing(err) => signing_error_response(err),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedResponse {
    pub session: SessionView,
    /// Present only when the service is configured to expose codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub token_delivered: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "esign-service",
        storage_backend: state.storage_backend,
    })
}

async fn initiate_session(
    State(state): State<ServiceState>,
    Path(contract_id): Path<String>,
) -> Result<(StatusCode, Json<IssuedResponse>), ApiError> {
    let contract_id = ContractId::new(contract_id.trim());
    if contract_id.as_str().is_empty() {
        return Err(ApiError::bad_request("contract id is required"));
    }
    let response = detached(async move {
        let issued = state.orchestrator.initiate_session(&contract_id).await?;
        Ok::<_, ApiError>(state.issued_response(issued).await)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_session(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    Ok(Json(state.orchestrator.get_session(&session_id).await?))
}

#[derive(Debug, Deserialize)]
struct CaptureRequest {
    /// Data URI or bare base64.
    image: String,
}

async fn capture_signature(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let signer_ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    let signer_user_agent = user_agent(&headers);
    let view = detached(async move {
        Ok::<_, ApiError>(state
            .orchestrator
            .capture_signature(&session_id, &request.image, signer_ip, signer_user_agent)
            .await?)
    })
    .await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
struct ValidateRequest {
    token: String,
}

async fn validate_token(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let view = detached(async move {
        Ok::<_, ApiError>(state
            .orchestrator
            .validate_token_and_sign(&session_id, &request.token)
            .await?)
    })
    .await?;
    Ok(Json(view))
}

async fn resend_token(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
) -> Result<Json<IssuedResponse>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let response = detached(async move {
        let issued = state.orchestrator.resend_token(&session_id).await?;
        Ok::<_, ApiError>(state.issued_response(issued).await)
    })
    .await?;
    Ok(Json(response))
}

async fn mark_token_sent(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let view = detached(async move {
        Ok::<_, ApiError>(state.orchestrator.mark_token_sent(&session_id).await?)
    })
    .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
struct DocumentQuery {
    disposition: Option<String>,
}

async fn get_document(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
    Query(query): Query<DocumentQuery>,
) -> Result<Response, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let disposition = match query.disposition.as_deref() {
        None | Some("inline") => "inline",
        Some("attachment") => "attachment",
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "invalid disposition '{other}', expected inline or attachment"
            )))
        }
    };

    let document = state.orchestrator.resolve_document(&session_id).await?;
    let kind = match document.kind {
        DocumentKind::Original => "original",
        DocumentKind::Signed => "signed",
    };
    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("{disposition}; filename=\"contract-{session_id}-{kind}.pdf\""),
        ),
        (
            HeaderName::from_static("x-content-hash"),
            document.artifact.hash,
        ),
    ];
    Ok((headers, document.bytes).into_response())
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    intact: bool,
    #[serde(flatten)]
    report: IntegrityReport,
}

async fn verify_documents(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let session_id = parse_session_id(&session_id)?;
    let report = state.orchestrator.verify_documents(&session_id).await?;
    Ok(Json(VerifyResponse {
        intact: report.intact(),
        report,
    }))
}

#[derive(Debug, Deserialize)]
struct ReconcileQuery {
    limit: Option<usize>,
}

async fn reconcile_state_sync(
    State(state): State<ServiceState>,
    Query(query): Query<ReconcileQuery>,
) -> Result<Json<ReconcileSummary>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(state.reconcile_batch)
        .clamp(1, MAX_RECONCILE_LIMIT);
    let summary = detached(async move {
        Ok::<_, ApiError>(state.orchestrator.reconcile_state_sync(limit).await?)
    })
    .await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use base64::Engine;
    use esign_adapters::RecordingNotificationSink;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        sink: Arc<RecordingNotificationSink>,
        state_sync: Arc<InMemoryStateSync>,
        _documents: tempfile::TempDir,
    }

    fn snapshot(contract: &str) -> ContractSnapshot {
        serde_json::from_value(serde_json::json!({
            "contract_id": contract,
            "contract_number": format!("CT-{contract}"),
            "owner_user_id": "user-42",
            "connection_id": "conn-9",
            "customer": {
                "full_name": "Rosa Huamán",
                "document_type": "DNI",
                "document_number": "40112233",
                "email": "rosa@example.com"
            },
            "service_address": {
                "line1": "Calle Tacna 310",
                "district": "Castilla",
                "city": "Piura",
                "region": "Piura"
            },
            "plan": {
                "name": "Fiber 100",
                "download_mbps": 100,
                "upload_mbps": 50,
                "monthly_price_minor": 6990,
                "currency": "PEN"
            },
            "company": {
                "legal_name": "Norte Fibra S.A.C.",
                "tax_id": "20601234567",
                "address": "Jr. Lima 455, Piura",
                "support_email": "soporte@nortefibra.pe"
            },
            "approved_at": "2025-03-01T09:00:00Z"
        }))
        .unwrap()
    }

    async fn app(expose_token: bool) -> TestApp {
        let documents = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::default();
        config.documents.root = documents.path().to_path_buf();
        config.signing.expose_token_in_response = expose_token;

        let sink = Arc::new(RecordingNotificationSink::new());
        let state_sync = Arc::new(InMemoryStateSync::new());
        let collaborators = Collaborators {
            directory: Arc::new(InMemoryContractDirectory::with_contracts([snapshot("C-100")])),
            state_sync: state_sync.clone(),
            sink: sink.clone(),
        };
        let state = ServiceState::assemble(&config, collaborators).await.unwrap();
        TestApp {
            router: build_router(state),
            sink,
            state_sync,
            _documents: documents,
        }
    }

    /// 64x32 baseline JPEG header; embedded as-is.
    fn jpeg_payload() -> String {
        let bytes = [
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46, 0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00,
            0x20, 0x00, 0x40, 0x01, 0x01, 0x11, 0x00, 0xFF, 0xD9,
        ];
        format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, HeaderMap, Vec<u8>) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("user-agent", "esign-tests/1.0");
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    fn json(bytes: &[u8]) -> serde_json::Value {
        serde_json::from_slice(bytes).unwrap()
    }

    async fn initiate(app: &TestApp) -> IssuedResponse {
        let (status, _, body) = send(
            &app.router,
            "POST",
            "/v1/contracts/C-100/signing-sessions",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_backend() {
        let app = app(false).await;
        let (status, _, body) = send(&app.router, "GET", "/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["storage_backend"], "memory");
    }

    #[tokio::test]
    async fn full_signing_flow_over_http() {
        let app = app(true).await;
        let issued = initiate(&app).await;
        let session_id = issued.session.session_id;
        let token = issued.token.clone().unwrap();
        assert!(!issued.token_delivered);

        let (status, headers, original) = send(
            &app.router,
            "GET",
            &format!("/v1/signing-sessions/{session_id}/document"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("inline;"));
        assert_eq!(
            headers["x-content-hash"].to_str().unwrap(),
            issued.session.original_document.hash
        );
        assert!(original.starts_with(b"%PDF"));

        let (status, _, body) = send(
            &app.router,
            "POST",
            &format!("/v1/signing-sessions/{session_id}/signature"),
            Some(serde_json::json!({ "image": jpeg_payload() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let captured = json(&body);
        assert_eq!(captured["signature_captured"], true);
        assert_eq!(captured["signer_user_agent"], "esign-tests/1.0");

        let (status, _, body) = send(
            &app.router,
            "POST",
            &format!("/v1/signing-sessions/{session_id}/validate"),
            Some(serde_json::json!({ "token": token.to_lowercase() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let signed: SessionView = serde_json::from_slice(&body).unwrap();
        assert!(signed.signed);
        let signed_hash = signed.signed_document.as_ref().unwrap().hash.clone();

        let (status, headers, _) = send(
            &app.router,
            "GET",
            &format!("/v1/signing-sessions/{session_id}/document?disposition=attachment"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-content-hash"].to_str().unwrap(), signed_hash);
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("signed.pdf"));

        let (status, _, body) = send(
            &app.router,
            "GET",
            &format!("/v1/signing-sessions/{session_id}/verify"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let report = json(&body);
        assert_eq!(report["intact"], true);
        assert_eq!(report["checks"].as_array().unwrap().len(), 2);

        assert_eq!(
            app.state_sync.contract_state(&ContractId::new("C-100")),
            Some(esign_core::ContractState::Active)
        );

        let (status, _, body) = send(
            &app.router,
            "POST",
            &format!("/v1/signing-sessions/{session_id}/validate"),
            Some(serde_json::json!({ "token": token })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json(&body)["code"], "already_signed");
    }

    #[tokio::test]
    async fn token_is_delivered_to_owner_when_not_exposed() {
        let app = app(false).await;
        let issued = initiate(&app).await;
        assert!(issued.token.is_none());
        assert!(issued.token_delivered);
        assert!(issued.session.token_sent_at.is_some());

        let delivered = app.sink.delivered();
        let code = delivered
            .iter()
            .find(|n| n.category == NotificationCategory::TokenIssued)
            .unwrap();
        assert_eq!(code.recipient, Recipient::User("user-42".to_string()));
        assert_eq!(code.session_id, Some(issued.session.session_id));
    }

    #[tokio::test]
    async fn second_session_for_contract_conflicts() {
        let app = app(true).await;
        initiate(&app).await;
        let (status, _, body) = send(
            &app.router,
            "POST",
            "/v1/contracts/C-100/signing-sessions",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json(&body)["code"], "duplicate_session");
    }

    #[tokio::test]
    async fn unknown_contract_and_session_are_not_found() {
        let app = app(true).await;
        let (status, _, _) = send(
            &app.router,
            "POST",
            "/v1/contracts/C-404/signing-sessions",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(&app.router, "GET", "/v1/signing-sessions/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(
            &app.router,
            "GET",
            &format!("/v1/signing-sessions/{}", SessionId::generate()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_token_reports_remaining_attempts() {
        let app = app(true).await;
        let issued = initiate(&app).await;
        let session_id = issued.session.session_id;

        let (status, _, body) = send(
            &app.router,
            "POST",
            &format!("/v1/signing-sessions/{session_id}/validate"),
            Some(serde_json::json!({ "token": "ZZZZZZ" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json(&body)["code"], "signature_missing");

        send(
            &app.router,
            "POST",
            &format!("/v1/signing-sessions/{session_id}/signature"),
            Some(serde_json::json!({ "image": jpeg_payload() })),
        )
        .await;

        let wrong = if issued.token.as_deref() == Some("ZZZZZZ") {
            "YYYYYY"
        } else {
            "ZZZZZZ"
        };
        let (status, _, body) = send(
            &app.router,
            "POST",
            &format!("/v1/signing-sessions/{session_id}/validate"),
            Some(serde_json::json!({ "token": wrong })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body = json(&body);
        assert_eq!(body["code"], "invalid_token");
        assert_eq!(body["remaining_attempts"], 2);
        assert!(!body.to_string().contains(issued.token.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn resend_refused_while_token_is_current() {
        let app = app(true).await;
        let issued = initiate(&app).await;
        let (status, _, body) = send(
            &app.router,
            "POST",
            &format!("/v1/signing-sessions/{}/resend", issued.session.session_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body = json(&body);
        assert_eq!(body["code"], "resend_not_allowed");
        assert_eq!(body["remaining_attempts"], 3);
    }

    #[tokio::test]
    async fn invalid_signature_image_is_rejected() {
        let app = app(true).await;
        let issued = initiate(&app).await;
        let (status, _, body) = send(
            &app.router,
            "POST",
            &format!("/v1/signing-sessions/{}/signature", issued.session.session_id),
            Some(serde_json::json!({ "image": "data:image/gif;base64,R0lGODlhAQABAAAAACw=" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json(&body)["code"], "invalid_signature_image");
    }

    #[tokio::test]
    async fn bad_disposition_is_a_client_error() {
        let app = app(true).await;
        let issued = initiate(&app).await;
        let (status, _, _) = send(
            &app.router,
            "GET",
            &format!(
                "/v1/signing-sessions/{}/document?disposition=download",
                issued.session.session_id
            ),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reconcile_endpoint_reports_summary() {
        let app = app(true).await;
        let (status, _, body) = send(
            &app.router,
            "POST",
            "/v1/admin/state-sync/reconcile?limit=10",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let summary: serde_json::Value = json(&body);
        assert_eq!(summary["examined"], 0);
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.5:5000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("10.0.0.5"));

        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(
            client_ip(&headers, Some(peer)).as_deref(),
            Some("198.51.100.4")
        );

        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(
            client_ip(&headers, Some(peer)).as_deref(),
            Some("203.0.113.7")
        );
    }
}
