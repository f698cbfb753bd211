//! Outbound user and operations notifications.
//!
//! The signing path never talks to a sink directly for lifecycle notices: it appends to
//! the [`NotificationOutbox`] and the [`OutboxDispatcher`] drains it with retries. A failed
//! delivery can therefore never roll back or fail a signature.

use crate::clock::Clock;
use crate::error::{NotificationError, StorageResult};
use crate::store::{NotificationOutbox, OutboxEntry};
use crate::types::{ContractId, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Who receives a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    User(String),
    /// Everyone holding an operations role, e.g. the fulfillment team.
    Role(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    DocumentReady,
    /// Out-of-band delivery of a freshly issued code. Never written to the outbox.
    TokenIssued,
    TokenResent,
    SignatureCaptured,
    Signed,
    AwaitingConfiguration,
}

impl NotificationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentReady => "document_ready",
            Self::TokenIssued => "token_issued",
            Self::TokenResent => "token_resent",
            Self::SignatureCaptured => "signature_captured",
            Self::Signed => "signed",
            Self::AwaitingConfiguration => "awaiting_configuration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub category: NotificationCategory,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub contract_id: Option<ContractId>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

impl Notification {
    pub fn new(
        recipient: Recipient,
        category: NotificationCategory,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient,
            category,
            title: title.into(),
            message: message.into(),
            contract_id: None,
            session_id: None,
            connection_id: None,
        }
    }

    pub fn for_contract(mut self, contract_id: &ContractId) -> Self {
        self.contract_id = Some(contract_id.clone());
        self
    }

    pub fn for_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn for_connection(mut self, connection_id: Option<&str>) -> Self {
        self.connection_id = connection_id.map(str::to_string);
        self
    }
}

/// Delivery channel (in-app, email, SMS gateway...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Attempts before an entry is parked as dead.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// How long a claimed entry stays hidden from other dispatchers.
    pub claim_lease: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 32,
            max_attempts: 8,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(15 * 60),
            claim_lease: Duration::from_secs(60),
        }
    }
}

/// Counters for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
}

/// Drains the outbox into a sink with exponential backoff.
pub struct OutboxDispatcher {
    outbox: Arc<dyn NotificationOutbox>,
    sink: Arc<dyn NotificationSink>,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    span: tracing::Span,
}

impl OutboxDispatcher {
    pub fn new(
        outbox: Arc<dyn NotificationOutbox>,
        sink: Arc<dyn NotificationSink>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        span: tracing::Span,
    ) -> Self {
        Self {
            outbox,
            sink,
            config,
            clock,
            span,
        }
    }

    /// Claims one batch of due entries and attempts each once.
    pub async fn run_once(&self) -> StorageResult<DispatchSummary> {
        let span = tracing::debug_span!(parent: &self.span, "outbox_drain");
        async {
            let now = self.clock.now();
            let lease_until = now + to_chrono(self.config.claim_lease);
            let claimed = self
                .outbox
                .claim_due(now, self.config.batch_size, lease_until)
                .await?;

            let mut summary = DispatchSummary {
                claimed: claimed.len(),
                ..DispatchSummary::default()
            };
            for entry in claimed {
                self.dispatch(entry, &mut summary).await?;
            }
            if summary.claimed > 0 {
                tracing::debug!(
                    claimed = summary.claimed,
                    delivered = summary.delivered,
                    retried = summary.retried,
                    dead = summary.dead,
                    "outbox batch processed"
                );
            }
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, entry: OutboxEntry, summary: &mut DispatchSummary) -> StorageResult<()> {
        match self.sink.deliver(&entry.notification).await {
            Ok(()) => {
                self.outbox
                    .mark_delivered(entry.entry_id, self.clock.now())
                    .await?;
                summary.delivered += 1;
            }
            Err(err) => {
                let attempts = entry.attempts + 1;
                let retry_at = (attempts < self.config.max_attempts)
                    .then(|| self.clock.now() + self.backoff(attempts));
                self.outbox
                    .mark_failed(entry.entry_id, &err.to_string(), retry_at)
                    .await?;
                match retry_at {
                    Some(at) => {
                        summary.retried += 1;
                        tracing::warn!(
                            entry_id = %entry.entry_id,
                            category = entry.notification.category.as_str(),
                            attempts,
                            retry_at = %at,
                            error = %err,
                            "notification delivery failed, will retry"
                        );
                    }
                    None => {
                        summary.dead += 1;
                        tracing::error!(
                            entry_id = %entry.entry_id,
                            category = entry.notification.category.as_str(),
                            attempts,
                            error = %err,
                            "notification delivery abandoned"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// `base * 2^(attempts-1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempts: u32) -> chrono::Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let delay = self
            .config
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_backoff);
        to_chrono(delay)
    }

    /// Polls until `shutdown` flips to true or its sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once().await {
                            tracing::warn!(parent: &self.span, error = %err, "outbox drain failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!(parent: &self.span, "outbox dispatcher stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::InMemorySignatureStore;
    use crate::store::OutboxStatus;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FlakySink {
        failures_left: AtomicUsize,
        delivered: Mutex<Vec<Notification>>,
    }

    impl FlakySink {
        fn failing(times: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(times),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(NotificationError::Unavailable("smtp down".into()));
            }
            self.delivered.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn signed_notice() -> Notification {
        Notification::new(
            Recipient::User("user-7".into()),
            NotificationCategory::Signed,
            "Contract signed",
            "Your contract has been signed.",
        )
        .for_contract(&ContractId::new("C1"))
    }

    fn dispatcher(
        store: Arc<InMemorySignatureStore>,
        sink: Arc<FlakySink>,
        clock: Arc<ManualClock>,
        max_attempts: u32,
    ) -> OutboxDispatcher {
        OutboxDispatcher::new(
            store,
            sink,
            DispatcherConfig {
                max_attempts,
                base_backoff: Duration::from_secs(10),
                max_backoff: Duration::from_secs(60),
                ..DispatcherConfig::default()
            },
            clock,
            tracing::Span::none(),
        )
    }

    #[tokio::test]
    async fn delivers_pending_entries_once() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemorySignatureStore::new());
        let sink = Arc::new(FlakySink::default());
        store.enqueue(signed_notice(), clock.now()).await.unwrap();

        let dispatcher = dispatcher(store.clone(), sink.clone(), clock.clone(), 3);
        let first = dispatcher.run_once().await.unwrap();
        assert_eq!(first.delivered, 1);
        let second = dispatcher.run_once().await.unwrap();
        assert_eq!(second.claimed, 0);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);

        let delivered = store
            .list_outbox(Some(OutboxStatus::Delivered), 10)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_after_backoff() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemorySignatureStore::new());
        let sink = Arc::new(FlakySink::failing(1));
        store.enqueue(signed_notice(), clock.now()).await.unwrap();

        let dispatcher = dispatcher(store.clone(), sink.clone(), clock.clone(), 3);
        assert_eq!(dispatcher.run_once().await.unwrap().retried, 1);

        // not due yet
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(dispatcher.run_once().await.unwrap().claimed, 0);

        clock.advance(chrono::Duration::seconds(6));
        assert_eq!(dispatcher.run_once().await.unwrap().delivered, 1);
        assert_eq!(sink.delivered.lock().unwrap()[0], signed_notice());
    }

    #[tokio::test]
    async fn exhausted_entries_are_parked_as_dead() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemorySignatureStore::new());
        let sink = Arc::new(FlakySink::failing(10));
        store.enqueue(signed_notice(), clock.now()).await.unwrap();

        let dispatcher = dispatcher(store.clone(), sink, clock.clone(), 2);
        assert_eq!(dispatcher.run_once().await.unwrap().retried, 1);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(dispatcher.run_once().await.unwrap().dead, 1);
        clock.advance(chrono::Duration::hours(1));
        assert_eq!(dispatcher.run_once().await.unwrap().claimed, 0);

        let dead = store.list_outbox(Some(OutboxStatus::Dead), 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert!(dead[0].last_error.as_deref().unwrap().contains("smtp down"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dispatcher = dispatcher(
            Arc::new(InMemorySignatureStore::new()),
            Arc::new(FlakySink::default()),
            clock,
            5,
        );
        assert_eq!(dispatcher.backoff(1), chrono::Duration::seconds(10));
        assert_eq!(dispatcher.backoff(2), chrono::Duration::seconds(20));
        assert_eq!(dispatcher.backoff(3), chrono::Duration::seconds(40));
        assert_eq!(dispatcher.backoff(4), chrono::Duration::seconds(60));
        assert_eq!(dispatcher.backoff(30), chrono::Duration::seconds(60));
    }

    #[test]
    fn recipient_serializes_with_kind_tag() {
        let json = serde_json::to_value(Recipient::Role("fulfillment".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "role", "id": "fulfillment"}));
    }
}
