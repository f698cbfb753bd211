//! Signing session lifecycle.
//!
//! The orchestrator never trusts state it read earlier: every write carries the version it
//! was decided on, and a lost race is re-evaluated from a fresh read. Signing itself is
//! guarded by a short lease so only one request renders the signed document.

use crate::artifacts::{content_hash, ArtifactStore};
use crate::clock::Clock;
use crate::error::{RenderError, SigningError, StorageError};
use crate::image::{decode_signature_image, SignatureImage};
use crate::notify::{Notification, NotificationCategory, Recipient};
use crate::render::{short_nonce, DocumentRenderer};
use crate::store::{
    NotificationOutbox, SignatureCapture, SignatureStore, SignedArtifact, TokenReissue,
};
use crate::sync::{ConnectionState, ContractState, ContractStateSync};
use crate::token::{SigningToken, TokenGenerator};
use crate::types::{
    ContractId, DocumentArtifact, DocumentKind, SessionId, SessionView, SigningMethod,
    SigningSession,
};
use chrono::Duration;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tracing::Instrument;

/// Optimistic-concurrency retries before a contended operation gives up.
pub const MAX_CAS_RETRIES: usize = 4;

#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub token_ttl: Duration,
    pub max_attempts: u32,
    /// How long a validating request may hold the exclusive right to sign.
    pub signing_lease: Duration,
    pub max_signature_bytes: usize,
    /// Role notified when a signed contract awaits technical configuration.
    pub operations_role: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::hours(24),
            max_attempts: 3,
            signing_lease: Duration::seconds(120),
            max_signature_bytes: 2 * 1024 * 1024,
            operations_role: "fulfillment".to_string(),
        }
    }
}

/// Collaborators the orchestrator drives.
pub struct SigningComponents {
    pub store: Arc<dyn SignatureStore>,
    pub outbox: Arc<dyn NotificationOutbox>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub state_sync: Arc<dyn ContractStateSync>,
    pub tokens: TokenGenerator,
    pub clock: Arc<dyn Clock>,
}

/// A session together with its freshly issued plaintext token.
///
/// The token is handed back exactly once, for out-of-band delivery.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: SessionView,
    pub owner_user_id: String,
    pub token: SigningToken,
}

#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub session_id: SessionId,
    pub kind: DocumentKind,
    pub artifact: DocumentArtifact,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactCheck {
    pub kind: DocumentKind,
    pub path: String,
    pub recorded_hash: String,
    /// `None` when the artifact is missing from storage.
    pub actual_hash: Option<String>,
    pub intact: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub session_id: SessionId,
    pub checks: Vec<ArtifactCheck>,
}

impl IntegrityReport {
    pub fn intact(&self) -> bool {
        self.checks.iter().all(|check| check.intact)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub examined: usize,
    pub synced: usize,
    pub failed: usize,
}

pub struct SigningOrchestrator {
    config: SigningConfig,
    store: Arc<dyn SignatureStore>,
    outbox: Arc<dyn NotificationOutbox>,
    renderer: Arc<dyn DocumentRenderer>,
    artifacts: Arc<dyn ArtifactStore>,
    state_sync: Arc<dyn ContractStateSync>,
    tokens: TokenGenerator,
    clock: Arc<dyn Clock>,
    span: tracing::Span,
}

impl SigningOrchestrator {
    pub fn new(config: SigningConfig, components: SigningComponents, span: tracing::Span) -> Self {
        Self {
            config,
            store: components.store,
            outbox: components.outbox,
            renderer: components.renderer,
            artifacts: components.artifacts,
            state_sync: components.state_sync,
            tokens: components.tokens,
            clock: components.clock,
            span,
        }
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    /// Renders the original document and opens a session with a fresh token.
    pub async fn initiate_session(
        &self,
        contract_id: &ContractId,
    ) -> Result<IssuedSession, SigningError> {
        let span = tracing::info_span!(parent: &self.span, "initiate_session", contract_id = %contract_id);
        async {
            if self.store.find_unsigned_session(contract_id).await?.is_some() {
                return Err(SigningError::DuplicateSession {
                    contract_id: contract_id.to_string(),
                });
            }

            let rendered = self
                .renderer
                .render_original(contract_id)
                .await
                .map_err(|err| {
                    tracing::error!(error = %err, "original rendering failed");
                    SigningError::from_render(err)
                })?;

            let now = self.clock.now();
            let token = self.tokens.generate();
            let session = SigningSession {
                id: SessionId::generate(),
                contract_id: contract_id.clone(),
                owner_user_id: rendered.owner_user_id.clone(),
                connection_id: rendered.connection_id.clone(),
                original: rendered.artifact.clone(),
                signed_document: None,
                signature_image_path: None,
                signing_method: SigningMethod::CanvasWithToken,
                token: token.clone(),
                token_expires_at: now + self.config.token_ttl,
                attempt_count: 0,
                signed: false,
                signed_at: None,
                signer_ip: None,
                signer_user_agent: None,
                document_generated_at: rendered.generated_at,
                token_sent_at: None,
                signing_lease_until: None,
                state_synced_at: None,
                version: 0,
                created_at: now,
                updated_at: now,
            };

            if let Err(err) = self.store.create_session(session.clone()).await {
                self.discard_artifact(&rendered.artifact.path).await;
                return Err(match err {
                    StorageError::Conflict(_) => SigningError::DuplicateSession {
                        contract_id: contract_id.to_string(),
                    },
                    other => other.into(),
                });
            }

            self.enqueue(
                Notification::new(
                    Recipient::User(session.owner_user_id.clone()),
                    NotificationCategory::DocumentReady,
                    "Your contract is ready to sign",
                    format!(
                        "The contract document for {contract_id} is ready. Review it and sign \
                         with the code sent to you."
                    ),
                )
                .for_contract(contract_id)
                .for_session(session.id)
                .for_connection(session.connection_id.as_deref()),
            )
            .await;

            tracing::info!(
                session_id = %session.id,
                document_hash = %session.original.hash,
                expires_at = %session.token_expires_at,
                "signing session opened"
            );
            Ok(IssuedSession {
                session: session.view(self.config.max_attempts),
                owner_user_id: session.owner_user_id,
                token,
            })
        }
        .instrument(span)
        .await
    }

    /// Stores a decoded signature image and records signer metadata.
    ///
    /// A later capture replaces an earlier one as long as the session is unsigned.
    pub async fn capture_signature(
        &self,
        session_id: &SessionId,
        payload: &str,
        signer_ip: Option<String>,
        signer_user_agent: Option<String>,
    ) -> Result<SessionView, SigningError> {
        let span = tracing::info_span!(parent: &self.span, "capture_signature", session_id = %session_id);
        async {
            let session = self.load(session_id).await?;
            ensure_unsigned(&session)?;
            if session.signing_leased(self.clock.now()) {
                return Err(SigningError::SigningInProgress {
                    session_id: session_id.to_string(),
                });
            }

            let image = decode_signature_image(payload, self.config.max_signature_bytes)?;
            let key = format!(
                "sessions/{session_id}/signature-{}.{}",
                short_nonce(),
                image.format.extension()
            );
            self.artifacts
                .put(&key, &image.bytes)
                .await
                .map_err(|e| storage_io("write signature image", e))?;

            let mut current = session;
            let mut outcome = None;
            for _ in 0..MAX_CAS_RETRIES {
                if current.signing_leased(self.clock.now()) {
                    outcome = Some(Err(SigningError::SigningInProgress {
                        session_id: session_id.to_string(),
                    }));
                    break;
                }
                let capture = SignatureCapture {
                    image_path: key.clone(),
                    signer_ip: signer_ip.clone(),
                    signer_user_agent: signer_user_agent.clone(),
                    captured_at: self.clock.now(),
                };
                match self
                    .store
                    .record_signature(session_id, current.version, capture)
                    .await
                {
                    Ok(updated) => {
                        outcome = Some(Ok((current.signature_image_path.clone(), updated)));
                        break;
                    }
                    Err(StorageError::Conflict(_)) => {
                        current = self.load(session_id).await?;
                        if let Err(err) = ensure_unsigned(&current) {
                            outcome = Some(Err(err));
                            break;
                        }
                    }
                    Err(other) => {
                        outcome = Some(Err(other.into()));
                        break;
                    }
                }
            }

            let (previous, updated) = match outcome {
                Some(Ok(done)) => done,
                Some(Err(err)) => {
                    self.discard_artifact(&key).await;
                    return Err(err);
                }
                None => {
                    self.discard_artifact(&key).await;
                    return Err(contended(session_id));
                }
            };
            if let Some(previous) = previous.filter(|p| !p.is_empty() && *p != key) {
                self.discard_artifact(&previous).await;
            }

            tracing::info!(
                image = %key,
                width = image.width,
                height = image.height,
                signer_ip = updated.signer_ip.as_deref().unwrap_or("-"),
                "signature captured"
            );
            self.enqueue(
                Notification::new(
                    Recipient::User(updated.owner_user_id.clone()),
                    NotificationCategory::SignatureCaptured,
                    "Signature received",
                    "Enter the code sent to you to complete the signature of your contract.",
                )
                .for_contract(&updated.contract_id)
                .for_session(updated.id)
                .for_connection(updated.connection_id.as_deref()),
            )
            .await;
            Ok(updated.view(self.config.max_attempts))
        }
        .instrument(span)
        .await
    }

    /// Checks the submitted code and, when it is correct and current, signs the contract.
    pub async fn validate_token_and_sign(
        &self,
        session_id: &SessionId,
        submitted_token: &str,
    ) -> Result<SessionView, SigningError> {
        let span = tracing::info_span!(parent: &self.span, "validate_token", session_id = %session_id);
        async {
            for _ in 0..MAX_CAS_RETRIES {
                let session = self.load(session_id).await?;
                let now = self.clock.now();

                ensure_unsigned(&session)?;
                if !session.has_signature() {
                    return Err(SigningError::SignatureMissing);
                }
                if session.attempt_count >= self.config.max_attempts {
                    return Err(SigningError::AttemptsExceeded {
                        max_attempts: self.config.max_attempts,
                    });
                }
                if session.signing_leased(now) {
                    return Err(SigningError::SigningInProgress {
                        session_id: session_id.to_string(),
                    });
                }

                if !session.token.matches(submitted_token) {
                    match self
                        .store
                        .record_failed_attempt(session_id, session.version, now)
                        .await
                    {
                        Ok(updated) => {
                            let remaining = updated.remaining_attempts(self.config.max_attempts);
                            tracing::warn!(
                                attempts = updated.attempt_count,
                                remaining,
                                "invalid signing token"
                            );
                            return Err(SigningError::InvalidToken {
                                remaining_attempts: remaining,
                            });
                        }
                        Err(StorageError::Conflict(_)) => continue,
                        Err(other) => return Err(other.into()),
                    }
                }

                // A correct but stale code does not consume an attempt.
                if session.token_expired(now) {
                    return Err(SigningError::TokenExpired {
                        expired_at: session.token_expires_at,
                    });
                }

                let lease_until = now + self.config.signing_lease;
                match self
                    .store
                    .acquire_signing_lease(session_id, session.version, lease_until, now)
                    .await
                {
                    Ok(leased) => return self.sign_leased(leased).await,
                    Err(StorageError::Conflict(_)) => continue,
                    Err(other) => return Err(other.into()),
                }
            }
            Err(contended(session_id))
        }
        .instrument(span)
        .await
    }

    async fn sign_leased(&self, session: SigningSession) -> Result<SessionView, SigningError> {
        let image = match self.load_signature(&session).await {
            Ok(image) => image,
            Err(err) => {
                self.release_lease(&session).await;
                return Err(err);
            }
        };

        let signed_at = self.clock.now();
        let rendered = match self
            .renderer
            .render_signed(&session, &image, signed_at)
            .await
        {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::error!(error = %err, "signed rendering failed");
                self.release_lease(&session).await;
                return Err(SigningError::from_render(err));
            }
        };

        let artifact = SignedArtifact {
            document: rendered.artifact.clone(),
            signed_at,
        };
        let signed = match self
            .store
            .mark_signed(&session.id, session.version, artifact)
            .await
        {
            Ok(signed) => signed,
            Err(err) => {
                // The write may have committed before the error surfaced, so the stored
                // state decides whether the rendition is ours to delete.
                match self.store.get_session(&session.id).await {
                    Ok(Some(current)) if current.signed => {
                        let ours = current
                            .signed_document
                            .as_ref()
                            .is_some_and(|doc| doc.path == rendered.artifact.path);
                        if !ours {
                            self.discard_artifact(&rendered.artifact.path).await;
                            return Err(SigningError::AlreadySigned {
                                session_id: session.id.to_string(),
                            });
                        }
                        tracing::warn!(error = %err, "signed state committed despite store error");
                        current
                    }
                    Ok(Some(current)) => {
                        self.discard_artifact(&rendered.artifact.path).await;
                        self.release_lease(&current).await;
                        tracing::error!(error = %err, "failed to persist signed state");
                        return Err(err.into());
                    }
                    Ok(None) => {
                        self.discard_artifact(&rendered.artifact.path).await;
                        tracing::error!(error = %err, "failed to persist signed state");
                        return Err(err.into());
                    }
                    Err(reread) => {
                        // Outcome unknown; keep the rendition and let the lease lapse.
                        tracing::error!(
                            error = %err,
                            reread_error = %reread,
                            path = %rendered.artifact.path,
                            "failed to persist signed state"
                        );
                        return Err(err.into());
                    }
                }
            }
        };

        tracing::info!(
            signed_document = %rendered.artifact.path,
            signed_hash = %rendered.artifact.hash,
            signed_at = %signed_at,
            "contract signed"
        );

        let signed = self.sync_state(signed).await;
        self.notify_signed(&signed).await;
        Ok(signed.view(self.config.max_attempts))
    }

    async fn load_signature(&self, session: &SigningSession) -> Result<SignatureImage, SigningError> {
        let path = session
            .signature_image_path
            .as_deref()
            .ok_or(SigningError::SignatureMissing)?;
        let bytes = self.artifacts.get(path).await.map_err(|e| {
            tracing::error!(path, error = %e, "signature image unreadable");
            storage_io("read signature image", e)
        })?;
        SignatureImage::from_bytes(bytes).map_err(|e| SigningError::Render(RenderError::Image(e)))
    }

    /// Issues a new code once the current one is expired or its attempts are used up.
    pub async fn resend_token(&self, session_id: &SessionId) -> Result<IssuedSession, SigningError> {
        let span = tracing::info_span!(parent: &self.span, "resend_token", session_id = %session_id);
        async {
            for _ in 0..MAX_CAS_RETRIES {
                let session = self.load(session_id).await?;
                let now = self.clock.now();
                let remaining = session.remaining_attempts(self.config.max_attempts);

                let exhausted = session.attempt_count >= self.config.max_attempts;
                if session.signed || !(session.token_expired(now) || exhausted) {
                    return Err(SigningError::ResendNotAllowed {
                        token_expires_at: session.token_expires_at,
                        remaining_attempts: remaining,
                    });
                }
                if session.signing_leased(now) {
                    return Err(SigningError::SigningInProgress {
                        session_id: session_id.to_string(),
                    });
                }

                let token = self.tokens.generate();
                let reissue = TokenReissue {
                    token: token.clone(),
                    expires_at: now + self.config.token_ttl,
                    issued_at: now,
                };
                let updated = match self
                    .store
                    .reissue_token(session_id, session.version, reissue)
                    .await
                {
                    Ok(updated) => updated,
                    Err(StorageError::Conflict(_)) => continue,
                    Err(other) => return Err(other.into()),
                };

                tracing::info!(expires_at = %updated.token_expires_at, "signing token reissued");
                self.enqueue(
                    Notification::new(
                        Recipient::User(updated.owner_user_id.clone()),
                        NotificationCategory::TokenResent,
                        "New signing code issued",
                        "A new signing code was issued for your contract. Previous codes no \
                         longer work.",
                    )
                    .for_contract(&updated.contract_id)
                    .for_session(updated.id)
                    .for_connection(updated.connection_id.as_deref()),
                )
                .await;
                return Ok(IssuedSession {
                    session: updated.view(self.config.max_attempts),
                    owner_user_id: updated.owner_user_id,
                    token,
                });
            }
            Err(contended(session_id))
        }
        .instrument(span)
        .await
    }

    /// Records that the current code has been delivered to the signer.
    pub async fn mark_token_sent(&self, session_id: &SessionId) -> Result<SessionView, SigningError> {
        let span = tracing::debug_span!(parent: &self.span, "mark_token_sent", session_id = %session_id);
        async {
            for _ in 0..MAX_CAS_RETRIES {
                let session = self.load(session_id).await?;
                let now = self.clock.now();
                ensure_unsigned(&session)?;
                if session.signing_leased(now) {
                    return Err(SigningError::SigningInProgress {
                        session_id: session_id.to_string(),
                    });
                }
                match self
                    .store
                    .mark_token_sent(session_id, session.version, now)
                    .await
                {
                    Ok(updated) => return Ok(updated.view(self.config.max_attempts)),
                    Err(StorageError::Conflict(_)) => continue,
                    Err(other) => return Err(other.into()),
                }
            }
            Err(contended(session_id))
        }
        .instrument(span)
        .await
    }

    pub async fn get_session(&self, session_id: &SessionId) -> Result<SessionView, SigningError> {
        Ok(self.load(session_id).await?.view(self.config.max_attempts))
    }

    /// The signed document once signed, the original before that.
    pub async fn resolve_document(
        &self,
        session_id: &SessionId,
    ) -> Result<ResolvedDocument, SigningError> {
        let session = self.load(session_id).await?;
        let unavailable = || SigningError::DocumentUnavailable {
            session_id: session_id.to_string(),
        };

        let (kind, artifact) = match (&session.signed_document, session.signed) {
            (Some(signed), true) => (DocumentKind::Signed, signed.clone()),
            _ if !session.original.path.is_empty() => {
                (DocumentKind::Original, session.original.clone())
            }
            _ => return Err(unavailable()),
        };

        let bytes = match self.artifacts.get(&artifact.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(parent: &self.span, session_id = %session_id, path = %artifact.path, "document missing from storage");
                return Err(unavailable());
            }
            Err(e) => return Err(storage_io("read document", e)),
        };
        Ok(ResolvedDocument {
            session_id: *session_id,
            kind,
            artifact,
            bytes,
        })
    }

    /// Recomputes the digest of every stored rendition and compares it to the recorded one.
    pub async fn verify_documents(
        &self,
        session_id: &SessionId,
    ) -> Result<IntegrityReport, SigningError> {
        let session = self.load(session_id).await?;
        let mut artifacts = vec![(DocumentKind::Original, session.original.clone())];
        if let Some(signed) = session.signed_document.clone() {
            artifacts.push((DocumentKind::Signed, signed));
        }

        let mut checks = Vec::with_capacity(artifacts.len());
        for (kind, artifact) in artifacts {
            let actual_hash = match self.artifacts.get(&artifact.path).await {
                Ok(bytes) => Some(content_hash(&bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(storage_io("read document", e)),
            };
            let intact = actual_hash.as_deref() == Some(artifact.hash.as_str());
            if !intact {
                tracing::warn!(
                    parent: &self.span,
                    session_id = %session_id,
                    path = %artifact.path,
                    "document digest mismatch"
                );
            }
            checks.push(ArtifactCheck {
                kind,
                path: artifact.path,
                recorded_hash: artifact.hash,
                actual_hash,
                intact,
            });
        }
        Ok(IntegrityReport {
            session_id: *session_id,
            checks,
        })
    }

    /// Re-applies contract and connection transitions for signed sessions whose sync failed.
    pub async fn reconcile_state_sync(&self, limit: usize) -> Result<ReconcileSummary, SigningError> {
        let span = tracing::info_span!(parent: &self.span, "reconcile_state_sync", limit);
        async {
            let pending = self.store.list_unsynced_signed(limit).await?;
            let mut summary = ReconcileSummary {
                examined: pending.len(),
                ..ReconcileSummary::default()
            };
            for session in pending {
                let session = self.sync_state(session).await;
                if session.state_synced_at.is_some() {
                    summary.synced += 1;
                } else {
                    summary.failed += 1;
                }
            }
            if summary.examined > 0 {
                tracing::info!(
                    examined = summary.examined,
                    synced = summary.synced,
                    failed = summary.failed,
                    "state sync reconciliation finished"
                );
            }
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Advances the contract and its connection. Failures are logged and left for
    /// reconciliation; the signature stands either way.
    async fn sync_state(&self, mut session: SigningSession) -> SigningSession {
        let contract = self
            .state_sync
            .set_contract_state(&session.contract_id, ContractState::Active)
            .await;
        if let Err(err) = &contract {
            tracing::error!(
                contract_id = %session.contract_id,
                error = %err,
                "contract state sync failed"
            );
        }

        let connection = match session.connection_id.as_deref() {
            Some(connection_id) => {
                let result = self
                    .state_sync
                    .set_connection_state(
                        connection_id,
                        ConnectionState::PendingTechnicalConfiguration,
                    )
                    .await;
                if let Err(err) = &result {
                    tracing::error!(connection_id, error = %err, "connection state sync failed");
                }
                result
            }
            None => Ok(()),
        };

        if contract.is_ok() && connection.is_ok() {
            let now = self.clock.now();
            match self.store.mark_state_synced(&session.id, now).await {
                Ok(()) => session.state_synced_at = Some(now),
                Err(err) => {
                    tracing::warn!(session_id = %session.id, error = %err, "could not record state sync")
                }
            }
        }
        session
    }

    async fn notify_signed(&self, session: &SigningSession) {
        self.enqueue(
            Notification::new(
                Recipient::User(session.owner_user_id.clone()),
                NotificationCategory::Signed,
                "Contract signed",
                format!(
                    "Your contract {} was signed successfully. We will contact you to schedule \
                     the installation.",
                    session.contract_id
                ),
            )
            .for_contract(&session.contract_id)
            .for_session(session.id)
            .for_connection(session.connection_id.as_deref()),
        )
        .await;
        self.enqueue(
            Notification::new(
                Recipient::Role(self.config.operations_role.clone()),
                NotificationCategory::AwaitingConfiguration,
                "New signed contract",
                format!(
                    "Contract {} was signed and its connection awaits technical configuration.",
                    session.contract_id
                ),
            )
            .for_contract(&session.contract_id)
            .for_session(session.id)
            .for_connection(session.connection_id.as_deref()),
        )
        .await;
    }

    async fn enqueue(&self, notification: Notification) {
        let category = notification.category;
        if let Err(err) = self.outbox.enqueue(notification, self.clock.now()).await {
            tracing::warn!(category = category.as_str(), error = %err, "failed to enqueue notification");
        }
    }

    async fn load(&self, session_id: &SessionId) -> Result<SigningSession, SigningError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SigningError::NotFound(format!("signing session {session_id}")))
    }

    async fn release_lease(&self, session: &SigningSession) {
        if let Err(err) = self
            .store
            .release_signing_lease(&session.id, session.version, self.clock.now())
            .await
        {
            tracing::warn!(session_id = %session.id, error = %err, "signing lease not released, it will lapse");
        }
    }

    async fn discard_artifact(&self, path: &str) {
        if let Err(err) = self.artifacts.remove(path).await {
            tracing::warn!(path, error = %err, "failed to remove orphaned artifact");
        }
    }
}

fn ensure_unsigned(session: &SigningSession) -> Result<(), SigningError> {
    if session.signed {
        return Err(SigningError::AlreadySigned {
            session_id: session.id.to_string(),
        });
    }
    Ok(())
}

fn contended(session_id: &SessionId) -> SigningError {
    SigningError::Storage(StorageError::Conflict(format!(
        "signing session {session_id} is under heavy contention"
    )))
}

fn storage_io(action: &str, err: io::Error) -> SigningError {
    SigningError::Storage(StorageError::Backend(format!("{action}: {err}")))
}
