//! Contract document content, independent of the PDF encoding.

use crate::error::RenderError;
use crate::types::{ContractSnapshot, SigningSession};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Block {
    Title(String),
    Subtitle(String),
    Heading(String),
    Paragraph(String),
    Field { label: String, value: String },
    Spacer(i64),
    Signature(SignatureArea),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SignatureArea {
    /// Blank signature line on the original rendition.
    Pending { signer_name: String },
    Signed(SignatureEvidence),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SignatureEvidence {
    pub signer_name: String,
    pub signer_document: String,
    pub signed_at: DateTime<Utc>,
    pub signer_ip: Option<String>,
    pub signer_user_agent: Option<String>,
    pub session_id: String,
    pub original_hash: String,
    pub method: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ContractDocument {
    pub title: String,
    pub blocks: Vec<Block>,
    pub footer: String,
}

pub(crate) fn validate(snapshot: &ContractSnapshot) -> Result<(), RenderError> {
    let required = [
        ("contract number", snapshot.contract_number.as_str()),
        ("owner user", snapshot.owner_user_id.as_str()),
        ("customer name", snapshot.customer.full_name.as_str()),
        ("customer document", snapshot.customer.document_number.as_str()),
        ("service address", snapshot.service_address.line1.as_str()),
        ("plan", snapshot.plan.name.as_str()),
        ("company name", snapshot.company.legal_name.as_str()),
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RenderError::MissingData(missing.join(", ")))
    }
}

pub(crate) fn original_document(
    snapshot: &ContractSnapshot,
    generated_at: DateTime<Utc>,
) -> ContractDocument {
    let mut blocks = contract_body(snapshot);
    blocks.push(Block::Signature(SignatureArea::Pending {
        signer_name: snapshot.customer.full_name.clone(),
    }));
    ContractDocument {
        title: format!("Contract {}", snapshot.contract_number),
        blocks,
        footer: footer(generated_at),
    }
}

pub(crate) fn signed_document(
    snapshot: &ContractSnapshot,
    session: &SigningSession,
    signed_at: DateTime<Utc>,
    generated_at: DateTime<Utc>,
) -> ContractDocument {
    let mut blocks = contract_body(snapshot);
    blocks.push(Block::Signature(SignatureArea::Signed(SignatureEvidence {
        signer_name: snapshot.customer.full_name.clone(),
        signer_document: format!(
            "{} {}",
            snapshot.customer.document_type, snapshot.customer.document_number
        ),
        signed_at,
        signer_ip: session.signer_ip.clone(),
        signer_user_agent: session.signer_user_agent.clone(),
        session_id: session.id.to_string(),
        original_hash: session.original.hash.clone(),
        method: session.signing_method.as_str().to_string(),
    })));
    ContractDocument {
        title: format!("Contract {} (signed)", snapshot.contract_number),
        blocks,
        footer: footer(generated_at),
    }
}

fn footer(generated_at: DateTime<Utc>) -> String {
    format!("Generated on {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"))
}

fn contract_body(s: &ContractSnapshot) -> Vec<Block> {
    let mut blocks = vec![
        Block::Title(s.company.legal_name.clone()),
        Block::Subtitle("Internet Service Agreement".to_string()),
        Block::Spacer(8),
        field("Contract number", &s.contract_number),
        field("Approved on", &s.approved_at.format("%Y-%m-%d").to_string()),
        Block::Spacer(10),
        Block::Heading("1. Parties".to_string()),
        Block::Paragraph(format!(
            "This agreement is entered into by {}, tax id {}, with offices at {} (the \
             \"Provider\"), and the customer identified below (the \"Subscriber\").",
            s.company.legal_name, s.company.tax_id, s.company.address
        )),
        field("Subscriber", &s.customer.full_name),
        field(
            "Identity document",
            &format!("{} {}", s.customer.document_type, s.customer.document_number),
        ),
        field("Email", &s.customer.email),
    ];
    if let Some(phone) = s.customer.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        blocks.push(field("Phone", phone));
    }

    blocks.push(Block::Spacer(6));
    blocks.push(Block::Heading("2. Service".to_string()));
    blocks.push(field("Plan", &s.plan.name));
    blocks.push(field(
        "Speed",
        &format!(
            "{} Mbps download / {} Mbps upload",
            s.plan.download_mbps, s.plan.upload_mbps
        ),
    ));
    blocks.push(field("Installation address", &s.service_address.single_line()));
    if let Some(reference) = s
        .service_address
        .reference
        .as_deref()
        .filter(|r| !r.trim().is_empty())
    {
        blocks.push(field("Reference", reference));
    }
    if let Some(billing) = &s.billing_address {
        blocks.push(field("Billing address", &billing.single_line()));
    }

    blocks.push(Block::Spacer(6));
    blocks.push(Block::Heading("3. Fees".to_string()));
    blocks.push(field(
        "Monthly fee",
        &money(s.plan.monthly_price_minor, &s.plan.currency),
    ));
    blocks.push(field(
        "Installation fee",
        &money(s.plan.installation_fee_minor, &s.plan.currency),
    ));
    blocks.push(field(
        "Minimum term",
        &match s.plan.minimum_term_months {
            Some(months) if months > 0 => format!("{months} months"),
            _ => "None".to_string(),
        },
    ));

    blocks.push(Block::Spacer(6));
    blocks.push(Block::Heading("4. Terms".to_string()));
    for clause in TERMS {
        blocks.push(Block::Paragraph((*clause).to_string()));
    }
    let mut contact = format!(
        "Support requests may be sent to {}",
        s.company.support_email
    );
    if let Some(phone) = s.company.support_phone.as_deref() {
        contact.push_str(&format!(" or by phone at {phone}"));
    }
    contact.push('.');
    blocks.push(Block::Paragraph(contact));

    blocks.push(Block::Spacer(6));
    blocks.push(Block::Heading("5. Electronic signature".to_string()));
    blocks.push(Block::Paragraph(
        "The Subscriber signs this agreement electronically by drawing a handwritten \
         signature and confirming a one-time code delivered to them. The signed rendition \
         records the signing time, the network origin of the request and the digest of \
         this original document."
            .to_string(),
    ));
    blocks.push(Block::Spacer(12));
    blocks
}

const TERMS: &[&str] = &[
    "The Provider installs and maintains the equipment required to deliver the service at \
     the installation address. Equipment remains the property of the Provider.",
    "Fees are billed monthly in advance. Late payment may lead to suspension of the service \
     after prior notice.",
    "The Subscriber may terminate the agreement at any time. Early termination within the \
     minimum term may incur the charges stated in the current price list.",
];

fn field(label: &str, value: &str) -> Block {
    Block::Field {
        label: label.to_string(),
        value: value.to_string(),
    }
}

pub(crate) fn money(minor: i64, currency: &str) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{currency} {sign}{}.{:02}", abs / 100, abs % 100)
}
