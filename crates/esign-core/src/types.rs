use crate::token::SigningToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Contract identifier assigned by the contract workflow that owns the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub String);

impl ContractId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque signing session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How the signer expressed consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMethod {
    /// Handwritten signature captured on a canvas, authorized by a one-time code.
    CanvasWithToken,
}

impl SigningMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CanvasWithToken => "canvas_with_token",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "canvas_with_token" => Some(Self::CanvasWithToken),
            _ => None,
        }
    }
}

/// A rendered artifact and the digest of its bytes at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentArtifact {
    pub path: String,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Original,
    Signed,
}

/// One signing session per contract; the audit trail of the signature event.
///
/// Invariants held by the store:
/// - `original` is written once at creation.
/// - `signed` only moves from false to true, together with `signed_document` and `signed_at`.
/// - `version` increases by one on every mutation; all mutations are conditioned on it.
#[derive(Clone)]
pub struct SigningSession {
    pub id: SessionId,
    pub contract_id: ContractId,
    pub owner_user_id: String,
    pub connection_id: Option<String>,
    pub original: DocumentArtifact,
    pub signed_document: Option<DocumentArtifact>,
    pub signature_image_path: Option<String>,
    pub signing_method: SigningMethod,
    pub token: SigningToken,
    pub token_expires_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub signer_ip: Option<String>,
    pub signer_user_agent: Option<String>,
    pub document_generated_at: DateTime<Utc>,
    pub token_sent_at: Option<DateTime<Utc>>,
    pub signing_lease_until: Option<DateTime<Utc>>,
    pub state_synced_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SigningSession {
    pub fn has_signature(&self) -> bool {
        self.signature_image_path
            .as_deref()
            .map(|path| !path.is_empty())
            .unwrap_or(false)
    }

    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.token_expires_at
    }

    pub fn remaining_attempts(&self, max_attempts: u32) -> u32 {
        max_attempts.saturating_sub(self.attempt_count)
    }

    pub fn signing_leased(&self, now: DateTime<Utc>) -> bool {
        self.signing_lease_until
            .map(|until| now < until)
            .unwrap_or(false)
    }

    /// Caller-facing view. Never includes the token.
    pub fn view(&self, max_attempts: u32) -> SessionView {
        SessionView {
            session_id: self.id,
            contract_id: self.contract_id.clone(),
            connection_id: self.connection_id.clone(),
            original_document: self.original.clone(),
            signed_document: self.signed_document.clone(),
            signature_captured: self.has_signature(),
            signing_method: self.signing_method,
            token_expires_at: self.token_expires_at,
            attempt_count: self.attempt_count,
            remaining_attempts: self.remaining_attempts(max_attempts),
            signed: self.signed,
            signed_at: self.signed_at,
            signer_ip: self.signer_ip.clone(),
            signer_user_agent: self.signer_user_agent.clone(),
            document_generated_at: self.document_generated_at,
            token_sent_at: self.token_sent_at,
            state_synced_at: self.state_synced_at,
        }
    }
}

impl fmt::Debug for SigningSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSession")
            .field("id", &self.id)
            .field("contract_id", &self.contract_id)
            .field("original", &self.original)
            .field("signed_document", &self.signed_document)
            .field("signature_image_path", &self.signature_image_path)
            .field("token", &self.token)
            .field("token_expires_at", &self.token_expires_at)
            .field("attempt_count", &self.attempt_count)
            .field("signed", &self.signed)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Read-only session status returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub contract_id: ContractId,
    pub connection_id: Option<String>,
    pub original_document: DocumentArtifact,
    pub signed_document: Option<DocumentArtifact>,
    pub signature_captured: bool,
    pub signing_method: SigningMethod,
    pub token_expires_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub remaining_attempts: u32,
    pub signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub signer_ip: Option<String>,
    pub signer_user_agent: Option<String>,
    pub document_generated_at: DateTime<Utc>,
    pub token_sent_at: Option<DateTime<Utc>>,
    pub state_synced_at: Option<DateTime<Utc>>,
}

/// Structured contract data gathered from the data service at render time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSnapshot {
    pub contract_id: ContractId,
    pub contract_number: String,
    pub owner_user_id: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    pub customer: CustomerIdentity,
    pub service_address: PostalAddress,
    #[serde(default)]
    pub billing_address: Option<PostalAddress>,
    pub plan: PlanTerms,
    pub company: CompanyProfile,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerIdentity {
    pub full_name: String,
    pub document_type: String,
    pub document_number: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostalAddress {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub district: String,
    pub city: String,
    pub region: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

impl PostalAddress {
    pub fn single_line(&self) -> String {
        let mut parts = vec![self.line1.clone()];
        if let Some(line2) = self.line2.as_deref().filter(|v| !v.trim().is_empty()) {
            parts.push(line2.to_string());
        }
        parts.push(self.district.clone());
        parts.push(self.city.clone());
        parts.push(self.region.clone());
        if let Some(code) = self.postal_code.as_deref().filter(|v| !v.trim().is_empty()) {
            parts.push(code.to_string());
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTerms {
    pub name: String,
    pub download_mbps: u32,
    pub upload_mbps: u32,
    pub monthly_price_minor: i64,
    #[serde(default)]
    pub installation_fee_minor: i64,
    pub currency: String,
    #[serde(default)]
    pub minimum_term_months: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub legal_name: String,
    pub tax_id: String,
    pub address: String,
    pub support_email: String,
    #[serde(default)]
    pub support_phone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_parse_roundtrip() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(&id.to_string()), Some(id));
        assert_eq!(SessionId::parse("not-a-uuid"), None);
    }

    #[test]
    fn address_single_line_skips_blank_parts() {
        let address = PostalAddress {
            line1: "Av. Grau 120".to_string(),
            line2: Some("  ".to_string()),
            district: "Centro".to_string(),
            city: "Piura".to_string(),
            region: "Piura".to_string(),
            postal_code: Some("20001".to_string()),
            reference: None,
        };
        assert_eq!(address.single_line(), "Av. Grau 120, Centro, Piura, Piura, 20001");
    }
}
