//! Collaborator adapters for the contract signing pipeline.
//!
//! `memory` backs local runs and tests. `http` talks to the contract, connection and
//! notification services over their internal REST endpoints.

#![deny(unsafe_code)]

pub mod http;
pub mod memory;

pub use http::{HttpCollaborators, HttpCollaboratorsConfig, HttpSetupError};
pub use memory::{
    InMemoryContractDirectory, InMemoryStateSync, LoggingNotificationSink,
    RecordingNotificationSink,
};
