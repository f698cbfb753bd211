use crate::error::DirectoryError;
use crate::types::{ContractId, ContractSnapshot};
use async_trait::async_trait;

/// Read access to the contract data owned by the data service.
///
/// Returns `Ok(None)` when the contract does not exist.
#[async_trait]
pub trait ContractDirectory: Send + Sync {
    async fn contract_snapshot(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<ContractSnapshot>, DirectoryError>;
}
