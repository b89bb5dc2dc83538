//! Turns a flash request into one local firmware file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::debug;

use super::release_cache::ReleaseCache;
use super::version::ReleaseVersion;
use crate::error::FlashError;

const UPLOAD_PREFIX: &str = "kflashd-upload-";
const FALLBACK_FILE_NAME: &str = "firmware.bin";

/// Where the firmware for one request comes from.
#[derive(Debug, Clone)]
pub enum FirmwareSource {
    Upload { file_name: String, bytes: Vec<u8> },
    Release {
        version: ReleaseVersion,
        board_id: String,
    },
}

/// Scoped directory holding one uploaded firmware file. Removed on drop.
#[derive(Debug)]
pub struct UploadWorkspace {
    dir: TempDir,
}

impl UploadWorkspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Firmware ready to be flashed.
#[derive(Debug)]
pub struct ResolvedFirmware {
    pub path: PathBuf,
    /// Package board id for release firmware; `None` for uploads.
    pub board_hint: Option<String>,
    workspace: Option<UploadWorkspace>,
}

impl ResolvedFirmware {
    /// Firmware that already lives somewhere permanent, e.g. the release cache.
    pub fn at(path: impl Into<PathBuf>, board_hint: Option<String>) -> Self {
        Self {
            path: path.into(),
            board_hint,
            workspace: None,
        }
    }

    pub fn workspace(&self) -> Option<&UploadWorkspace> {
        self.workspace.as_ref()
    }
}

pub struct FirmwareResolver {
    cache: Arc<ReleaseCache>,
    upload_root: PathBuf,
}

impl FirmwareResolver {
    pub fn new(cache: Arc<ReleaseCache>) -> Self {
        Self::with_upload_root(cache, std::env::temp_dir())
    }

    /// Create upload workspaces under `upload_root` instead of the system temp dir.
    pub fn with_upload_root(cache: Arc<ReleaseCache>, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            upload_root: upload_root.into(),
        }
    }

    pub async fn resolve(&self, source: FirmwareSource) -> Result<ResolvedFirmware, FlashError> {
        match source {
            FirmwareSource::Upload { file_name, bytes } => self.stage_upload(&file_name, bytes).await,
            FirmwareSource::Release { version, board_id } => {
                self.cache.ensure_extracted(&version, false).await?;
                let board = self
                    .cache
                    .find_board(&version, &board_id)
                    .await?
                    .ok_or_else(|| FlashError::BoardNotFound {
                        version: version.to_string(),
                        board: board_id.clone(),
                    })?;
                debug!(%version, board = %board.id, firmware = %board.firmware.display(), "Resolved release firmware");
                Ok(ResolvedFirmware::at(board.firmware, Some(board.id)))
            }
        }
    }

    async fn stage_upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ResolvedFirmware, FlashError> {
        if bytes.is_empty() || file_name.trim().is_empty() {
            return Err(FlashError::NoFirmware);
        }

        tokio::fs::create_dir_all(&self.upload_root)
            .await
            .map_err(FlashError::Workspace)?;
        let dir = tempfile::Builder::new()
            .prefix(UPLOAD_PREFIX)
            .tempdir_in(&self.upload_root)
            .map_err(FlashError::Workspace)?;

        let path = dir.path().join(sanitize_file_name(file_name));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(FlashError::Workspace)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Staged uploaded firmware");

        Ok(ResolvedFirmware {
            path,
            board_hint: None,
            workspace: Some(UploadWorkspace { dir }),
        })
    }
}

/// Reduce a client-supplied file name to a single safe path component.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');

    if cleaned.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}
