//! Digital contract signing pipeline.
//!
//! This crate turns an approved contract into a legally evidenced signed document:
//! - one-time signing codes with attempt and expiry accounting
//! - original and signed PDF renditions with BLAKE3 content hashes
//! - session storage where every mutation is a compare-and-set on the session version
//! - a notification outbox drained by a retrying dispatcher
//!
//! Contract data, contract/connection lifecycle tables and notification delivery belong to
//! collaborators and are reached through the traits in [`directory`], [`sync`] and [`notify`].

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod artifacts;
pub mod clock;
pub mod directory;
pub mod error;
pub mod image;
pub mod notify;
pub mod orchestrator;
pub mod render;
pub mod store;
pub mod sync;
pub mod token;
pub mod types;

pub use artifacts::{content_hash, ArtifactStore, FileArtifactStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::ContractDirectory;
pub use error::{
    DirectoryError, ImageError, NotificationError, RenderError, SigningError, StorageError,
    StorageResult, SyncError,
};
pub use image::{decode_signature_image, ImageFormat, SignatureImage};
pub use notify::{
    DispatchSummary, DispatcherConfig, Notification, NotificationCategory, NotificationSink,
    OutboxDispatcher, Recipient,
};
pub use orchestrator::{
    ArtifactCheck, IntegrityReport, IssuedSession, ReconcileSummary, ResolvedDocument,
    SigningComponents, SigningConfig, SigningOrchestrator,
};
pub use render::{DocumentRenderer, PdfDocumentRenderer, RenderedDocument};
pub use store::memory::InMemorySignatureStore;
#[cfg(feature = "postgres")]
pub use store::postgres::PostgresSignatureStore;
pub use store::{
    NotificationOutbox, OutboxEntry, OutboxStatus, SignatureCapture, SignatureStore,
    SignedArtifact, TokenReissue,
};
pub use sync::{ConnectionState, ContractState, ContractStateSync};
pub use token::{SigningToken, TokenGenerator, DEFAULT_TOKEN_ALPHABET, DEFAULT_TOKEN_LENGTH};
pub use types::{
    CompanyProfile, ContractId, ContractSnapshot, CustomerIdentity, DocumentArtifact,
    DocumentKind, PlanTerms, PostalAddress, SessionId, SessionView, SigningMethod,
    SigningSession,
};
