//! Signing session persistence.
//!
//! Every mutating operation is a compare-and-set against the session's `version` and its
//! `signed` flag. A lost race surfaces as [`StorageError::Conflict`]; callers re-read and
//! re-evaluate instead of writing over a state they did not observe.
//!
//! [`StorageError::Conflict`]: crate::error::StorageError::Conflict

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::StorageResult;
use crate::notify::Notification;
use crate::token::SigningToken;
use crate::types::{ContractId, DocumentArtifact, SessionId, SigningSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Captured signature metadata recorded against an unsigned session.
#[derive(Debug, Clone)]
pub struct SignatureCapture {
    pub image_path: String,
    pub signer_ip: Option<String>,
    pub signer_user_agent: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Terminal signing result.
#[derive(Debug, Clone)]
pub struct SignedArtifact {
    pub document: DocumentArtifact,
    pub signed_at: DateTime<Utc>,
}

/// Fresh token replacing the current one wholesale.
#[derive(Debug, Clone)]
pub struct TokenReissue {
    pub token: SigningToken,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

/// Storage contract for signing sessions.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Insert a new session. Fails with `Conflict` when the contract already has an
    /// unsigned session; the check and the insert are one atomic step.
    async fn create_session(&self, session: SigningSession) -> StorageResult<()>;

    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SigningSession>>;

    async fn find_unsigned_session(
        &self,
        contract_id: &ContractId,
    ) -> StorageResult<Option<SigningSession>>;

    async fn record_signature(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        capture: SignatureCapture,
    ) -> StorageResult<SigningSession>;

    async fn record_failed_attempt(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession>;

    /// Replace the token, reset the attempt counter and clear `token_sent_at`.
    async fn reissue_token(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        reissue: TokenReissue,
    ) -> StorageResult<SigningSession>;

    async fn mark_token_sent(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession>;

    /// Claim the exclusive right to render the signed document until `until`.
    async fn acquire_signing_lease(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession>;

    async fn release_signing_lease(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession>;

    /// Flip `signed` to true and record the signed artifact. Succeeds at most once.
    async fn mark_signed(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        signed: SignedArtifact,
    ) -> StorageResult<SigningSession>;

    /// Record that contract/connection state has been synchronized for a signed session.
    async fn mark_state_synced(&self, session_id: &SessionId, at: DateTime<Utc>)
        -> StorageResult<()>;

    /// Signed sessions whose state sync has not been confirmed, oldest signature first.
    async fn list_unsynced_signed(&self, limit: usize) -> StorageResult<Vec<SigningSession>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A queued notification and its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub entry_id: Uuid,
    pub notification: Notification,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Durable outbound notification queue with at-least-once delivery.
#[async_trait]
pub trait NotificationOutbox: Send + Sync {
    async fn enqueue(
        &self,
        notification: Notification,
        at: DateTime<Utc>,
    ) -> StorageResult<OutboxEntry>;

    /// Claim pending entries due at `now`, hiding them from other claimers until
    /// `lease_until`. An entry whose worker dies becomes due again when the lease passes.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Vec<OutboxEntry>>;

    async fn mark_delivered(&self, entry_id: Uuid, at: DateTime<Utc>) -> StorageResult<()>;

    /// Count a failed attempt. `retry_at = None` parks the entry as dead.
    async fn mark_failed(
        &self,
        entry_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    async fn list_outbox(
        &self,
        status: Option<OutboxStatus>,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>>;
}
