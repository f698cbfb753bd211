//! Process-local collaborators.

use async_trait::async_trait;
use esign_core::{
    ConnectionState, ContractDirectory, ContractId, ContractSnapshot, ContractState,
    ContractStateSync, DirectoryError, Notification, NotificationError, NotificationSink,
    SyncError,
};
use std::collections::HashMap;
use std::sync::RwLock;

/// Contract data seeded up front, e.g. from a fixtures file.
#[derive(Default)]
pub struct InMemoryContractDirectory {
    contracts: RwLock<HashMap<ContractId, ContractSnapshot>>,
}

impl InMemoryContractDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contracts(snapshots: impl IntoIterator<Item = ContractSnapshot>) -> Self {
        let directory = Self::new();
        for snapshot in snapshots {
            directory.upsert(snapshot);
        }
        directory
    }

    pub fn upsert(&self, snapshot: ContractSnapshot) {
        let mut guard = self.contracts.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(snapshot.contract_id.clone(), snapshot);
    }

    pub fn len(&self) -> usize {
        self.contracts.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContractDirectory for InMemoryContractDirectory {
    async fn contract_snapshot(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<ContractSnapshot>, DirectoryError> {
        let guard = self
            .contracts
            .read()
            .map_err(|_| DirectoryError::Unavailable("contracts lock poisoned".to_string()))?;
        Ok(guard.get(contract_id).cloned())
    }
}

/// Keeps the latest contract and connection states in memory.
#[derive(Default)]
pub struct InMemoryStateSync {
    contracts: RwLock<HashMap<ContractId, ContractState>>,
    connections: RwLock<HashMap<String, ConnectionState>>,
}

impl InMemoryStateSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contract_state(&self, contract_id: &ContractId) -> Option<ContractState> {
        self.contracts
            .read()
            .ok()
            .and_then(|g| g.get(contract_id).copied())
    }

    pub fn connection_state(&self, connection_id: &str) -> Option<ConnectionState> {
        self.connections
            .read()
            .ok()
            .and_then(|g| g.get(connection_id).copied())
    }
}

#[async_trait]
impl ContractStateSync for InMemoryStateSync {
    async fn set_contract_state(
        &self,
        contract_id: &ContractId,
        state: ContractState,
    ) -> Result<(), SyncError> {
        let mut guard = self
            .contracts
            .write()
            .map_err(|_| SyncError::Unavailable("contract states lock poisoned".to_string()))?;
        guard.insert(contract_id.clone(), state);
        tracing::info!(contract_id = %contract_id, state = state.as_str(), "contract state set");
        Ok(())
    }

    async fn set_connection_state(
        &self,
        connection_id: &str,
        state: ConnectionState,
    ) -> Result<(), SyncError> {
        let mut guard = self
            .connections
            .write()
            .map_err(|_| SyncError::Unavailable("connection states lock poisoned".to_string()))?;
        guard.insert(connection_id.to_string(), state);
        tracing::info!(connection_id, state = state.as_str(), "connection state set");
        Ok(())
    }
}

/// Writes notifications to the log. The default sink for local runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        tracing::info!(
            recipient = ?notification.recipient,
            category = notification.category.as_str(),
            title = %notification.title,
            contract_id = notification.contract_id.as_ref().map(|c| c.as_str()).unwrap_or("-"),
            "notification"
        );
        Ok(())
    }
}

/// Keeps every delivered notification, for assertions.
#[derive(Default)]
pub struct RecordingNotificationSink {
    delivered: RwLock<Vec<Notification>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        let mut guard = self
            .delivered
            .write()
            .map_err(|_| NotificationError::Unavailable("sink lock poisoned".to_string()))?;
        guard.push(notification.clone());
        Ok(())
    }
}
