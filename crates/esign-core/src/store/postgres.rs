//! PostgreSQL session store and outbox.
//!
//! Mutations are single `UPDATE ... WHERE version = $n AND NOT signed` statements. When no
//! row matches, the current row is re-read to tell a missing session apart from a lost race.
//! A partial unique index enforces at most one unsigned session per contract.

use super::{
    NotificationOutbox, OutboxEntry, OutboxStatus, SignatureCapture, SignatureStore,
    SignedArtifact, TokenReissue,
};
use crate::error::{StorageError, StorageResult};
use crate::notify::Notification;
use crate::token::SigningToken;
use crate::types::{ContractId, DocumentArtifact, SessionId, SigningMethod, SigningSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

macro_rules! session_columns {
    () => {
        "session_id, contract_id, owner_user_id, connection_id, original_path, original_hash, \
         signed_path, signed_hash, signature_image_path, signing_method, token, token_expires_at, \
         attempt_count, signed, signed_at, signer_ip, signer_user_agent, document_generated_at, \
         token_sent_at, signing_lease_until, state_synced_at, version, created_at, updated_at"
    };
}

macro_rules! outbox_columns {
    () => {
        "entry_id, notification, status, attempts, next_attempt_at, last_error, created_at, \
         delivered_at"
    };
}

#[derive(Clone)]
pub struct PostgresSignatureStore {
    pool: PgPool,
}

impl PostgresSignatureStore {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS esign_signing_sessions (
                session_id TEXT PRIMARY KEY,
                contract_id TEXT NOT NULL,
                owner_user_id TEXT NOT NULL,
                connection_id TEXT,
                original_path TEXT NOT NULL,
                original_hash TEXT NOT NULL,
                signed_path TEXT,
                signed_hash TEXT,
                signature_image_path TEXT,
                signing_method TEXT NOT NULL,
                token TEXT NOT NULL,
                token_expires_at TIMESTAMPTZ NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                signed BOOLEAN NOT NULL DEFAULT FALSE,
                signed_at TIMESTAMPTZ,
                signer_ip TEXT,
                signer_user_agent TEXT,
                document_generated_at TIMESTAMPTZ NOT NULL,
                token_sent_at TIMESTAMPTZ,
                signing_lease_until TIMESTAMPTZ,
                state_synced_at TIMESTAMPTZ,
                version BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS esign_one_unsigned_session_per_contract
                ON esign_signing_sessions (contract_id)
             WHERE NOT signed
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS esign_sessions_unsynced
                ON esign_signing_sessions (signed_at)
             WHERE signed AND state_synced_at IS NULL
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS esign_notification_outbox (
                entry_id TEXT PRIMARY KEY,
                notification JSONB NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TIMESTAMPTZ NOT NULL,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                delivered_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS esign_outbox_due
                ON esign_notification_outbox (next_attempt_at)
             WHERE status = 'pending'
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    /// Explains why a conditional update matched no row.
    async fn explain_miss(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        precondition: fn(&SigningSession) -> StorageError,
    ) -> StorageError {
        let current = match self.get_session(session_id).await {
            Ok(current) => current,
            Err(err) => return err,
        };
        match current {
            None => StorageError::NotFound(format!("signing session {session_id}")),
            Some(session) if session.signed => StorageError::Conflict(format!(
                "signing session {session_id} is already signed"
            )),
            Some(session) if session.version != expected_version => {
                StorageError::Conflict(format!(
                    "signing session {session_id} changed: expected version {expected_version}, found {}",
                    session.version
                ))
            }
            Some(session) => precondition(&session),
        }
    }

    async fn finish_update(
        &self,
        row: Option<PgRow>,
        session_id: &SessionId,
        expected_version: u64,
        precondition: fn(&SigningSession) -> StorageError,
    ) -> StorageResult<SigningSession> {
        match row {
            Some(row) => session_from_row(&row),
            None => Err(self
                .explain_miss(session_id, expected_version, precondition)
                .await),
        }
    }
}

fn unexpected_miss(session: &SigningSession) -> StorageError {
    StorageError::Conflict(format!("signing session {} changed concurrently", session.id))
}

fn lease_held(session: &SigningSession) -> StorageError {
    StorageError::Conflict(format!(
        "signing session {} is leased by another signer",
        session.id
    ))
}

fn signature_absent(session: &SigningSession) -> StorageError {
    StorageError::InvariantViolation(format!(
        "signing session {} has no captured signature",
        session.id
    ))
}

#[async_trait]
impl SignatureStore for PostgresSignatureStore {
    async fn create_session(&self, session: SigningSession) -> StorageResult<()> {
        sqlx::query(concat!(
            "INSERT INTO esign_signing_sessions (",
            session_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21, $22, $23, $24)"
        ))
        .bind(session.id.to_string())
        .bind(session.contract_id.as_str())
        .bind(&session.owner_user_id)
        .bind(&session.connection_id)
        .bind(&session.original.path)
        .bind(&session.original.hash)
        .bind(session.signed_document.as_ref().map(|d| d.path.clone()))
        .bind(session.signed_document.as_ref().map(|d| d.hash.clone()))
        .bind(&session.signature_image_path)
        .bind(session.signing_method.as_str())
        .bind(session.token.expose())
        .bind(session.token_expires_at)
        .bind(to_i32(session.attempt_count)?)
        .bind(session.signed)
        .bind(session.signed_at)
        .bind(&session.signer_ip)
        .bind(&session.signer_user_agent)
        .bind(session.document_generated_at)
        .bind(session.token_sent_at)
        .bind(session.signing_lease_until)
        .bind(session.state_synced_at)
        .bind(to_i64(session.version)?)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SigningSession>> {
        let row = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            " FROM esign_signing_sessions WHERE session_id = $1"
        ))
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_unsigned_session(
        &self,
        contract_id: &ContractId,
    ) -> StorageResult<Option<SigningSession>> {
        let row = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            " FROM esign_signing_sessions WHERE contract_id = $1 AND NOT signed"
        ))
        .bind(contract_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.as_ref().map(session_from_row).transpose()
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
        let row = sqlx::query(concat!(
            r#"
            UPDATE esign_signing_sessions
               SET signature_image_path = $3,
                   signer_ip = $4,
                   signer_user_agent = $5,
                   version = version + 1,
                   updated_at = $6
             WHERE session_id = $1 AND version = $2 AND NOT signed
         RETURNING "#,
            session_columns!()
        ))
        .bind(session_id.to_string())
        .bind(to_i64(expected_version)?)
        .bind(&capture.image_path)
        .bind(&capture.signer_ip)
        .bind(&capture.signer_user_agent)
        .bind(capture.captured_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.finish_update(row, session_id, expected_version, unexpected_miss)
            .await
    }

    async fn record_failed_attempt(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession> {
        let row = sqlx::query(concat!(
            r#"
            UPDATE esign_signing_sessions
               SET attempt_count = attempt_count + 1,
                   version = version + 1,
                   updated_at = $3
             WHERE session_id = $1 AND version = $2 AND NOT signed
         RETURNING "#,
            session_columns!()
        ))
        .bind(session_id.to_string())
        .bind(to_i64(expected_version)?)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.finish_update(row, session_id, expected_version, unexpected_miss)
            .await
    }

    async fn reissue_token(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        reissue: TokenReissue,
    ) -> StorageResult<SigningSession> {
        let row = sqlx::query(concat!(
            r#"
            UPDATE esign_signing_sessions
               SET token = $3,
                   token_expires_at = $4,
                   attempt_count = 0,
                   token_sent_at = NULL,
                   version = version + 1,
                   updated_at = $5
             WHERE session_id = $1 AND version = $2 AND NOT signed
         RETURNING "#,
            session_columns!()
        ))
        .bind(session_id.to_string())
        .bind(to_i64(expected_version)?)
        .bind(reissue.token.expose())
        .bind(reissue.expires_at)
        .bind(reissue.issued_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.finish_update(row, session_id, expected_version, unexpected_miss)
            .await
    }

    async fn mark_token_sent(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession> {
        let row = sqlx::query(concat!(
            r#"
            UPDATE esign_signing_sessions
               SET token_sent_at = $3,
                   version = version + 1,
                   updated_at = $3
             WHERE session_id = $1 AND version = $2 AND NOT signed
         RETURNING "#,
            session_columns!()
        ))
        .bind(session_id.to_string())
        .bind(to_i64(expected_version)?)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.finish_update(row, session_id, expected_version, unexpected_miss)
            .await
    }

    async fn acquire_signing_lease(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession> {
        let row = sqlx::query(concat!(
            r#"
            UPDATE esign_signing_sessions
               SET signing_lease_until = $3,
                   version = version + 1,
                   updated_at = $4
             WHERE session_id = $1 AND version = $2 AND NOT signed
               AND (signing_lease_until IS NULL OR signing_lease_until <= $4)
         RETURNING "#,
            session_columns!()
        ))
        .bind(session_id.to_string())
        .bind(to_i64(expected_version)?)
        .bind(until)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.finish_update(row, session_id, expected_version, lease_held)
            .await
    }

    async fn release_signing_lease(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        at: DateTime<Utc>,
    ) -> StorageResult<SigningSession> {
        let row = sqlx::query(concat!(
            r#"
            UPDATE esign_signing_sessions
               SET signing_lease_until = NULL,
                   version = version + 1,
                   updated_at = $3
             WHERE session_id = $1 AND version = $2 AND NOT signed
         RETURNING "#,
            session_columns!()
        ))
        .bind(session_id.to_string())
        .bind(to_i64(expected_version)?)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.finish_update(row, session_id, expected_version, unexpected_miss)
            .await
    }

    async fn mark_signed(
        &self,
        session_id: &SessionId,
        expected_version: u64,
        signed: SignedArtifact,
    ) -> StorageResult<SigningSession> {
        let row = sqlx::query(concat!(
            r#"
            UPDATE esign_signing_sessions
               SET signed = TRUE,
                   signed_at = $3,
                   signed_path = $4,
                   signed_hash = $5,
                   signing_lease_until = NULL,
                   version = version + 1,
                   updated_at = $3
             WHERE session_id = $1 AND version = $2 AND NOT signed
               AND signature_image_path IS NOT NULL AND signature_image_path <> ''
         RETURNING "#,
            session_columns!()
        ))
        .bind(session_id.to_string())
        .bind(to_i64(expected_version)?)
        .bind(signed.signed_at)
        .bind(&signed.document.path)
        .bind(&signed.document.hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        self.finish_update(row, session_id, expected_version, signature_absent)
            .await
    }

    async fn mark_state_synced(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE esign_signing_sessions
               SET state_synced_at = $2,
                   version = version + 1,
                   updated_at = $2
             WHERE session_id = $1 AND signed
            "#,
        )
        .bind(session_id.to_string())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists = self.get_session(session_id).await?.is_some();
            if exists {
                return Err(StorageError::InvariantViolation(format!(
                    "signing session {session_id} is not signed"
                )));
            }
            return Err(StorageError::NotFound(format!(
                "signing session {session_id}"
            )));
        }
        Ok(())
    }

    async fn list_unsynced_signed(&self, limit: usize) -> StorageResult<Vec<SigningSession>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            session_columns!(),
            " FROM esign_signing_sessions WHERE signed AND state_synced_at IS NULL \
             ORDER BY signed_at ASC LIMIT $1"
        ))
        .bind(to_i64(limit as u64)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.iter().map(session_from_row).collect()
    }
}

#[async_trait]
impl NotificationOutbox for PostgresSignatureStore {
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
        let payload = serde_json::to_value(&entry.notification)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(concat!(
            "INSERT INTO esign_notification_outbox (",
            outbox_columns!(),
            ") VALUES ($1, $2, $3, 0, $4, NULL, $4, NULL)"
        ))
        .bind(entry.entry_id.to_string())
        .bind(payload)
        .bind(entry.status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(entry)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let rows = sqlx::query(concat!(
            r#"
            UPDATE esign_notification_outbox
               SET next_attempt_at = $3
             WHERE entry_id IN (
                    SELECT entry_id
                      FROM esign_notification_outbox
                     WHERE status = 'pending' AND next_attempt_at <= $1
                     ORDER BY next_attempt_at ASC
                     LIMIT $2
                       FOR UPDATE SKIP LOCKED
                   )
         RETURNING "#,
            outbox_columns!()
        ))
        .bind(now)
        .bind(to_i64(limit as u64)?)
        .bind(lease_until)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.iter().map(outbox_from_row).collect()
    }

    async fn mark_delivered(&self, entry_id: Uuid, at: DateTime<Utc>) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE esign_notification_outbox
               SET status = 'delivered', delivered_at = $2
             WHERE entry_id = $1
            "#,
        )
        .bind(entry_id.to_string())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("outbox entry {entry_id}")));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        entry_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE esign_notification_outbox
               SET attempts = attempts + 1,
                   last_error = $2,
                   status = CASE WHEN $3::TIMESTAMPTZ IS NULL THEN 'dead' ELSE status END,
                   next_attempt_at = COALESCE($3, next_attempt_at)
             WHERE entry_id = $1
            "#,
        )
        .bind(entry_id.to_string())
        .bind(error)
        .bind(retry_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("outbox entry {entry_id}")));
        }
        Ok(())
    }

    async fn list_outbox(
        &self,
        status: Option<OutboxStatus>,
        limit: usize,
    ) -> StorageResult<Vec<OutboxEntry>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            outbox_columns!(),
            " FROM esign_notification_outbox WHERE ($1::TEXT IS NULL OR status = $1) \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(status.map(OutboxStatus::as_str))
        .bind(to_i64(limit as u64)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.iter().map(outbox_from_row).collect()
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StorageError::Backend(e.to_string()))
}

fn session_from_row(row: &PgRow) -> StorageResult<SigningSession> {
    let raw_id: String = column(row, "session_id")?;
    let id = SessionId::parse(&raw_id)
        .ok_or_else(|| StorageError::Serialization(format!("invalid session id '{raw_id}'")))?;
    let method: String = column(row, "signing_method")?;
    let signing_method = SigningMethod::parse(&method)
        .ok_or_else(|| StorageError::Serialization(format!("unknown signing method '{method}'")))?;

    let signed_path: Option<String> = column(row, "signed_path")?;
    let signed_hash: Option<String> = column(row, "signed_hash")?;
    let signed_document = match (signed_path, signed_hash) {
        (Some(path), Some(hash)) => Some(DocumentArtifact { path, hash }),
        _ => None,
    };
    let attempts: i32 = column(row, "attempt_count")?;
    let version: i64 = column(row, "version")?;

    Ok(SigningSession {
        id,
        contract_id: ContractId::new(column::<String>(row, "contract_id")?),
        owner_user_id: column(row, "owner_user_id")?,
        connection_id: column(row, "connection_id")?,
        original: DocumentArtifact {
            path: column(row, "original_path")?,
            hash: column(row, "original_hash")?,
        },
        signed_document,
        signature_image_path: column(row, "signature_image_path")?,
        signing_method,
        token: SigningToken::new(column::<String>(row, "token")?),
        token_expires_at: column(row, "token_expires_at")?,
        attempt_count: u32::try_from(attempts)
            .map_err(|_| StorageError::Serialization(format!("negative attempt count {attempts}")))?,
        signed: column(row, "signed")?,
        signed_at: column(row, "signed_at")?,
        signer_ip: column(row, "signer_ip")?,
        signer_user_agent: column(row, "signer_user_agent")?,
        document_generated_at: column(row, "document_generated_at")?,
        token_sent_at: column(row, "token_sent_at")?,
        signing_lease_until: column(row, "signing_lease_until")?,
        state_synced_at: column(row, "state_synced_at")?,
        version: u64::try_from(version)
            .map_err(|_| StorageError::Serialization(format!("negative version {version}")))?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn outbox_from_row(row: &PgRow) -> StorageResult<OutboxEntry> {
    let raw_id: String = column(row, "entry_id")?;
    let entry_id = Uuid::parse_str(&raw_id)
        .map_err(|e| StorageError::Serialization(format!("invalid outbox id '{raw_id}': {e}")))?;
    let payload: serde_json::Value = column(row, "notification")?;
    let notification: Notification = serde_json::from_value(payload)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let raw_status: String = column(row, "status")?;
    let status = OutboxStatus::parse(&raw_status)
        .ok_or_else(|| StorageError::Serialization(format!("unknown outbox status '{raw_status}'")))?;
    let attempts: i32 = column(row, "attempts")?;

    Ok(OutboxEntry {
        entry_id,
        notification,
        status,
        attempts: u32::try_from(attempts).unwrap_or(0),
        next_attempt_at: column(row, "next_attempt_at")?,
        last_error: column(row, "last_error")?,
        created_at: column(row, "created_at")?,
        delivered_at: column(row, "delivered_at")?,
    })
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: u64) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| StorageError::InvalidInput("value too large".to_string()))
}

fn to_i32(value: u32) -> StorageResult<i32> {
    i32::try_from(value).map_err(|_| StorageError::InvalidInput("value too large".to_string()))
}
