//! In-memory session store and outbox.
//!
//! Deterministic and test-friendly. Each operation holds the write lock for its whole
//! read-check-write, which gives the same compare-and-set semantics as the SQL backend.

use super::{
    NotificationOutbox, OutboxEntry, OutboxStatus, SignatureCapture, SignatureStore,
    SignedArtifact, TokenReissue,
};
use crate::error::{StorageError, StorageResult};
use crate::notify::Notification;
use crate::types::{ContractId, SessionId, SigningSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Delivered and dead outbox entries kept for inspection before the oldest are dropped.
pub const DEFAULT_RETAINED_OUTBOX_ENTRIES: usize = 1024;

pub struct InMemorySignatureStore {
    sessions: RwLock<HashMap<SessionId, SigningSession>>,
    outbox: RwLock<Vec<OutboxEntry>>,
    retained_finished: usize,
}

impl Default for InMemorySignatureStore {
    fn default() -> Self {
        Self {
            sessions: RwLock::default(),
            outbox: RwLock::default(),
            retained_finished: DEFAULT_RETAINED_OUTBOX_ENTRIES,
        }
    }
}

impl InMemorySignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps how many delivered or dead outbox entries stay listed. Pending entries are
    /// never dropped.
    pub fn with_retained_outbox_entries(mut self, retained: usize) -> Self {
        self.retained_finished = retained;
        self
    }

    /// Applies `mutate` to an unsigned session at `expected_version` and bumps the version.
    fn update_unsigned<F>(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
        mutate: F,
    ) -> StorageResult<SigningSession>
    where
        F: FnOnce(&mut SigningSession) -> StorageResult<()>,
    {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| StorageError::NotFound(format!("signing session {session_id}")))?;

        if session.signed {
            return Err(StorageError::Conflict(format!(
                "signing session {session_id} is already signed"
            )));
        }
        if session.version != expected_version {
            return Err(StorageError::Conflict(format!(
                "signing session {session_id} changed: expected version {expected_version}, found {}",
                session.version
            )));
        }

        let mut next = session.clone();
        mutate(&mut next)?;
        next.version += 1;
        next.updated_at = at;
        *session = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl SignatureStore for InMemorySignatureStore {
    async fn create_session(&self, session: SigningSession) -> StorageResult<()> {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;

        if guard.contains_key(&session.id) {
            return Err(StorageError::Conflict(format!(
                "signing session {} already exists",
                session.id
            )));
        }
        if guard
            .values()
            .any(|existing| existing.contract_id == session.contract_id && !existing.signed)
        {
            return Err(StorageError::Conflict(format!(
                "contract {} already has an unsigned signing session",
                session.contract_id
            )));
        }

        guard.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SigningSession>> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        Ok(guard.get(session_id).cloned())
    }

    async fn find_unsigned_session(
        &self,
        contract_id: &ContractId,
    ) -> StorageResult<Option<SigningSession>> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        Ok(guard
            .values()
            .find(|session| &session.contract_id == contract_id && !session.signed)
            .cloned())
    }

    async fn record_signature(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        capture: SignatureCapture,
    ) -> StorageResult<SigningSession> {
        if capture.image_path.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "signature image path is empty".to_string(),
            ));
        }
        self.update_unsigned(session_id, expected_version, capture.captured_at, |session| {
            session.signature_image_path = Some(capture.image_path);
            session.signer_ip = capture.signer_ip;
            session.signer_user_agent = capture.signer_user_agent;
            Ok(())
        })
    }

    async fn record_failed_attempt(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession> {
        self.update_unsigned(session_id, expected_version, at, |session| {
            session.attempt_count = session.attempt_count.saturating_add(1);
            Ok(())
        })
    }

    async fn reissue_token(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        reissue: TokenReissue,
    ) -> StorageResult<SigningSession> {
        self.update_unsigned(session_id, expected_version, reissue.issued_at, |session| {
            session.token = reissue.token;
            session.token_expires_at = reissue.expires_at;
            session.attempt_count = 0;
            session.token_sent_at = None;
            Ok(())
        })
    }

    async fn mark_token_sent(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession> {
        self.update_unsigned(session_id, expected_version, at, |session| {
            session.token_sent_at = Some(at);
            Ok(())
        })
    }

    async fn acquire_signing_lease(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession> {
        self.update_unsigned(session_id, expected_version, at, |session| {
            if session.signing_leased(at) {
                return Err(StorageError::Conflict(format!(
                    "signing session {} is leased by another signer",
                    session.id
                )));
            }
            session.signing_lease_until = Some(until);
            Ok(())
        })
    }

    async fn release_signing_lease(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession> {
        self.update_unsigned(session_id, expected_version, at, |session| {
            session.signing_lease_until = None;
            Ok(())
        })
    }

    async fn mark_signed(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        signed: SignedArtifact,
    ) -> StorageResult<SigningSession> {
        self.update_unsigned(session_id, expected_version, signed.signed_at, |session| {
            if !session.has_signature() {
                return Err(StorageError::InvariantViolation(format!(
                    "signing session {} has no captured signature",
                    session.id
                )));
            }
            session.signed = true;
            session.signed_at = Some(signed.signed_at);
            session.signed_document = Some(signed.document);
            session.signing_lease_until = None;
            Ok(())
        })
    }

    async fn mark_state_synced(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| StorageError::NotFound(format!("signing session {session_id}")))?;
        if !session.signed {
            return Err(StorageError::InvariantViolation(format!(
                "signing session {session_id} is not signed"
            )));
        }
        session.state_synced_at = Some(at);
        session.version += 1;
        session.updated_at = at;
        Ok(())
    }

    async fn list_unsynced_signed(&self, limit: usize) -> StorageResult<Vec<SigningSession>> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        let mut pending: Vec<SigningSession> = guard
            .values()
            .filter(|session| session.signed && session.state_synced_at.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|session| session.signed_at);
        pending.truncate(limit);
        Ok(pending)
    }
}

#[async_trait]
impl NotificationOutbox for InMemorySignatureStore {
    async fn enqueue(
        &self,
        notification: Notification,
        at: DateTime<Utc>,
    ) -> StorageResult<OutboxEntry> {
        let entry = OutboxEntry {
            entry_id: Uuid::new_v4(),
            notification,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: at,
            last_error: None,
            created_at: at,
            delivered_at: None,
        };
        let mut guard = self
            .outbox
            .write()
            .map_err(|_| StorageError::Backend("outbox lock poisoned".to_string()))?;
        guard.push(entry.clone());
        Ok(entry)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let mut guard = self
            .outbox
            .write()
            .map_err(|_| StorageError::Backend("outbox lock poisoned".to_string()))?;
        let mut claimed = Vec::new();
        for entry in guard
            .iter_mut()
            .filter(|entry| entry.status == OutboxStatus::Pending && entry.next_attempt_at <= now)
            .take(limit)
        {
            entry.next_attempt_at = lease_until;
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    async fn mark_delivered(&self, entry_id: Uuid, at: DateTime<Utc>) -> StorageResult<()> {
        let mut guard = self
            .outbox
            .write()
            .map_err(|_| StorageError::Backend("outbox lock poisoned".to_string()))?;
        let entry = guard
            .iter_mut()
            .find(|entry| entry.entry_id == entry_id)
            .ok_or_else(|| StorageError::NotFound(format!("outbox entry {entry_id}")))?;
        entry.status = OutboxStatus::Delivered;
        entry.delivered_at = Some(at);
        prune_finished(&mut guard, self.retained_finished);
        Ok(())
    }

    async fn mark_failed(
        &self,
        entry_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let mut guard = self
            .outbox
            .write()
            .map_err(|_| StorageError::Backend("outbox lock poisoned".to_string()))?;
        let entry = guard
            .iter_mut()
            .find(|entry| entry.entry_id == entry_id)
            .ok_or_else(|| StorageError::NotFound(format!("outbox entry {entry_id}")))?;
        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_error = Some(error.to_string());
        match retry_at {
            Some(at) => entry.next_attempt_at = at,
            None => {
                entry.status = OutboxStatus::Dead;
                prune_finished(&mut guard, self.retained_finished);
            }
        }
        Ok(())
    }

    async fn list_outbox(
        &self,
        status: Option<OutboxStatus>,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let guard = self
            .outbox
            .read()
            .map_err(|_| StorageError::Backend("outbox lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .filter(|entry| status.map(|s| entry.status == s).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Drops the oldest finished entries beyond `keep`.
fn prune_finished(entries: &mut Vec<OutboxEntry>, keep: usize) {
    let finished = entries
        .iter()
        .filter(|entry| entry.status != OutboxStatus::Pending)
        .count();
    let mut excess = finished.saturating_sub(keep);
    if excess == 0 {
        return;
    }
    entries.retain(|entry| {
        if excess > 0 && entry.status != OutboxStatus::Pending {
            excess -= 1;
            return false;
        }
        true
    });
}
