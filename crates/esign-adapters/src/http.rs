//! REST client for the contract, connection and notification services.

use async_trait::async_trait;
use esign_core::{
    ConnectionState, ContractDirectory, ContractId, ContractSnapshot, ContractState,
    ContractStateSync, DirectoryError, Notification, NotificationError, NotificationSink,
    SyncError,
};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpCollaboratorsConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Sent as a bearer token on every request when set.
    pub service_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpSetupError {
    #[error("invalid collaborator base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct StateChange<'a> {
    state: &'a str,
}

/// One client for all collaborator endpoints under a shared base url.
#[derive(Clone)]
pub struct HttpCollaborators {
    client: Client,
    base_url: Url,
    service_token: Option<String>,
}

impl HttpCollaborators {
    pub fn new(config: HttpCollaboratorsConfig) -> Result<Self, HttpSetupError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            HttpSetupError::InvalidBaseUrl {
                url: config.base_url.clone(),
                reason: e.to_string(),
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(HttpSetupError::InvalidBaseUrl {
                url: config.base_url,
                reason: "url cannot carry a path".to_string(),
            });
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url,
            service_token: config.service_token,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.service_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn put_state(&self, url: Url, state: &str) -> Result<Response, reqwest::Error> {
        self.authorize(self.client.put(url))
            .json(&StateChange { state })
            .send()
            .await
    }
}

fn sync_failure(entity: &'static str, id: &str, status: StatusCode, body: String) -> SyncError {
    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound {
            entity,
            id: id.to_string(),
        },
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            SyncError::Rejected(format!("{entity} {id}: {status} {body}"))
        }
        _ => SyncError::Unavailable(format!("{entity} {id}: {status} {body}")),
    }
}

#[async_trait]
impl ContractDirectory for HttpCollaborators {
    async fn contract_snapshot(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<ContractSnapshot>, DirectoryError> {
        let url = self.url(&["internal", "contracts", contract_id.as_str(), "snapshot"]);
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Unavailable(format!("{status} {body}")));
        }
        let snapshot: ContractSnapshot = response
            .json()
            .await
            .map_err(|e| DirectoryError::Malformed(e.to_string()))?;
        if &snapshot.contract_id != contract_id {
            return Err(DirectoryError::Malformed(format!(
                "asked for contract {contract_id}, got {}",
                snapshot.contract_id
            )));
        }
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl ContractStateSync for HttpCollaborators {
    async fn set_contract_state(
        &self,
        contract_id: &ContractId,
        state: ContractState,
    ) -> Result<(), SyncError> {
        let url = self.url(&["internal", "contracts", contract_id.as_str(), "state"]);
        let response = self
            .put_state(url, state.as_str())
            .await
            .map_err(|e| SyncError::Unavailable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(sync_failure("contract", contract_id.as_str(), status, body))
    }

    async fn set_connection_state(
        &self,
        connection_id: &str,
        state: ConnectionState,
    ) -> Result<(), SyncError> {
        let url = self.url(&["internal", "connections", connection_id, "state"]);
        let response = self
            .put_state(url, state.as_str())
            .await
            .map_err(|e| SyncError::Unavailable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(sync_failure("connection", connection_id, status, body))
    }
}

#[async_trait]
impl NotificationSink for HttpCollaborators {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        let url = self.url(&["internal", "notifications"]);
        let response = self
            .authorize(self.client.post(url))
            .json(notification)
            .send()
            .await
            .map_err(|e| NotificationError::Unavailable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(NotificationError::Rejected(format!("{status} {body}")))
        } else {
            Err(NotificationError::Unavailable(format!("{status} {body}")))
        }
    }
}
