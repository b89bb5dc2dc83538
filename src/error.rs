//! Error types for kflashd.
//!
//! Every failure a caller can see maps onto one [`ErrorKind`], which the web
//! layer turns into an HTTP status. Flashing failures are not errors: they
//! come back as a [`FlashOutcome`](crate::core::FlashOutcome) with
//! `success = false`.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse error classes shared by the release cache and the flash coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any resource was touched.
    InvalidInput,
    /// A flash or download is already running. The caller may retry later.
    ResourceBusy,
    /// The requested board is not part of the release package.
    NotFound,
    /// Network, download or extraction failure.
    RemoteFetchFailure,
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("Invalid release version: {0:?}")]
    InvalidVersion(String),

    #[error("A release download is already in progress")]
    DownloadInProgress,

    #[error("Failed to download release {version}: {source}")]
    Fetch {
        version: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to read release archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Release archive entry escapes the cache directory: {0}")]
    UnsafeArchiveEntry(String),

    #[error("Release cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReleaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidVersion(_) => ErrorKind::InvalidInput,
            Self::DownloadInProgress => ErrorKind::ResourceBusy,
            Self::Fetch { .. }
            | Self::Archive { .. }
            | Self::UnsafeArchiveEntry(_)
            | Self::Io(_) => ErrorKind::RemoteFetchFailure,
        }
    }
}

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("No firmware file was uploaded")]
    NoFirmware,

    #[error("A flash job is already running")]
    JobAlreadyRunning,

    #[error("Board {board} not found in release {version}")]
    BoardNotFound { version: String, board: String },

    #[error("Failed to store uploaded firmware: {0}")]
    Workspace(#[source] std::io::Error),

    #[error(transparent)]
    Release(#[from] ReleaseError),
}

impl FlashError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::NoFirmware => ErrorKind::InvalidInput,
            Self::JobAlreadyRunning => ErrorKind::ResourceBusy,
            Self::BoardNotFound { .. } => ErrorKind::NotFound,
            Self::Workspace(_) => ErrorKind::RemoteFetchFailure,
            Self::Release(e) => e.kind(),
        }
    }
}
