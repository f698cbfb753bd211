use crate::error::SyncError;
use crate::types::ContractId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Contract lifecycle states the signing pipeline moves a contract into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    PendingSignature,
    Active,
}

impl ContractState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingSignature => "pending_signature",
            Self::Active => "active",
        }
    }
}

/// Connection lifecycle states the signing pipeline moves a connection into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    PendingContract,
    PendingTechnicalConfiguration,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingContract => "pending_contract",
            Self::PendingTechnicalConfiguration => "pending_technical_configuration",
        }
    }
}

/// Lifecycle transitions owned by the contract and connection services.
///
/// Both calls are set-to-value, so repeating them after a partial failure is safe.
#[async_trait]
pub trait ContractStateSync: Send + Sync {
    async fn set_contract_state(
        &self,
        contract_id: &ContractId,
        state: ContractState,
    ) -> Result<(), SyncError>;

    async fn set_connection_state(
        &self,
        connection_id: &str,
        state: ConnectionState,
    ) -> Result<(), SyncError>;
}
