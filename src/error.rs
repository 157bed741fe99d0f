//! Typed failures surfaced by package operations.
//!
//! Operations return `anyhow::Result`; the root cause of a failure that
//! belongs to the package manager's taxonomy is always a [`BpmError`], so
//! callers can recover it with `err.downcast_ref::<BpmError>()` even after
//! context has been attached.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BpmError {
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    #[error("Invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error("Package '{name}' not found in registry")]
    PackageNotFound { name: String },

    #[error("Network error{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    NetworkError { status: Option<u16>, message: String },

    #[error("Package '{name}' is already installed. Use --force to overwrite it.")]
    AlreadyInstalled { name: String },

    #[error("Package '{name}' is not installed")]
    NotInstalled { name: String },

    #[error("Extension '{name}' not found in config")]
    ExtensionUnknown { name: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Publish rejected by registry (HTTP {status})")]
    PublishRejected { status: u16 },

    #[error("Invalid config file {path}: {message}")]
    ConfigInvalid { path: String, message: String },
}

impl BpmError {
    /// Returns the typed cause of an error chain, if there is one.
    pub fn find(err: &anyhow::Error) -> Option<&BpmError> {
        err.chain().find_map(|cause| cause.downcast_ref::<BpmError>())
    }
}
