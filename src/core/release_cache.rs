//! On-disk cache of release packages.
//!
//! Layout under the cache directory, per version:
//!
//! - `krux-<version>.zip`: the downloaded archive
//! - `krux-<version>/<board>/firmware.bin`: the extracted package
//!
//! Both lifecycle states are checked against the filesystem on every call, so
//! the cache survives restarts. Archives are written to a `.part` file and
//! renamed into place; extraction happens in a staging directory that is
//! renamed onto the final root. Neither a half-written archive nor a
//! half-extracted tree is ever visible under its canonical name.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::fs;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{BoardEntry, PackageStatus};
use super::release_source::ReleaseSource;
use super::version::{DEFAULT_VERSION, ReleaseVersion, VERSION_MARKER};
use crate::error::ReleaseError;

/// File a board directory must contain to be listed.
pub const FIRMWARE_FILE: &str = "firmware.bin";

/// Served when the release index cannot be reached.
pub const FALLBACK_VERSIONS: &[&str] = &["v25.10.1", "v25.09.1", "v25.08.1", "v25.04.1"];

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const DEFAULT_LIST_TTL: Duration = Duration::from_secs(300);

struct CachedVersions {
    fetched_at: Instant,
    versions: Vec<ReleaseVersion>,
}

/// Held while `POST /api/krux/download` is working. Dropping it releases the slot.
pub struct DownloadPermit {
    _guard: OwnedMutexGuard<()>,
}

pub struct ReleaseCache {
    cache_dir: PathBuf,
    source: Arc<dyn ReleaseSource>,
    versions: RwLock<Option<CachedVersions>>,
    version_locks: Mutex<HashMap<ReleaseVersion, Arc<tokio::sync::Mutex<()>>>>,
    download_slot: Arc<tokio::sync::Mutex<()>>,
    list_limit: usize,
    list_ttl: Duration,
}

impl ReleaseCache {
    pub fn new(cache_dir: impl Into<PathBuf>, source: Arc<dyn ReleaseSource>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source,
            versions: RwLock::new(None),
            version_locks: Mutex::new(HashMap::new()),
            download_slot: Arc::new(tokio::sync::Mutex::new(())),
            list_limit: DEFAULT_LIST_LIMIT,
            list_ttl: DEFAULT_LIST_TTL,
        }
    }

    /// Override how many versions are listed and how long the list is cached.
    pub fn with_version_list(mut self, limit: usize, ttl: Duration) -> Self {
        self.list_limit = limit;
        self.list_ttl = ttl;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn archive_path(&self, version: &ReleaseVersion) -> PathBuf {
        self.cache_dir.join(version.archive_name())
    }

    pub fn root_dir(&self, version: &ReleaseVersion) -> PathBuf {
        self.cache_dir.join(version.root_dir_name())
    }

    /// Make sure the archive for `version` is on disk.
    ///
    /// Without `force` an existing archive is returned as-is and the network
    /// is not touched.
    pub async fn ensure_downloaded(
        &self,
        version: &ReleaseVersion,
        force: bool,
    ) -> Result<PathBuf, ReleaseError> {
        let lock = self.version_lock(version);
        let _guard = lock.lock().await;
        self.download_locked(version, force).await
    }

    /// Make sure the package for `version` is downloaded and extracted.
    ///
    /// With `force` the extracted tree is removed before the archive is
    /// fetched again, so a failed download leaves no boards behind.
    pub async fn ensure_extracted(
        &self,
        version: &ReleaseVersion,
        force: bool,
    ) -> Result<PathBuf, ReleaseError> {
        let lock = self.version_lock(version);
        let _guard = lock.lock().await;

        let root = self.root_dir(version);
        if force && is_dir(&root).await {
            info!(%version, "Removing extracted release for re-extraction");
            fs::remove_dir_all(&root).await?;
        }

        self.download_locked(version, force).await?;

        if is_dir(&root).await {
            debug!(%version, root = %root.display(), "Release already extracted");
            return Ok(root);
        }

        self.extract_locked(version).await
    }

    /// Boards of an extracted package, sorted by name. Empty when not extracted.
    pub async fn list_boards(
        &self,
        version: &ReleaseVersion,
    ) -> Result<Vec<BoardEntry>, ReleaseError> {
        let root = self.root_dir(version);
        if !is_dir(&root).await {
            return Ok(Vec::new());
        }

        let mut boards = Vec::new();
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(id) = entry.file_name().into_string() else {
                continue;
            };
            let firmware = entry.path().join(FIRMWARE_FILE);
            if is_file(&firmware).await {
                boards.push(BoardEntry {
                    name: id.clone(),
                    id,
                    firmware,
                });
            }
        }

        boards.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(boards)
    }

    pub async fn find_board(
        &self,
        version: &ReleaseVersion,
        board_id: &str,
    ) -> Result<Option<BoardEntry>, ReleaseError> {
        Ok(self
            .list_boards(version)
            .await?
            .into_iter()
            .find(|b| b.id == board_id))
    }

    pub async fn status(&self, version: &ReleaseVersion) -> Result<PackageStatus, ReleaseError> {
        let downloaded = is_file(&self.archive_path(version)).await;
        let extracted = is_dir(&self.root_dir(version)).await;
        let boards = if extracted {
            self.list_boards(version).await?
        } else {
            Vec::new()
        };

        Ok(PackageStatus {
            version: version.clone(),
            downloaded,
            extracted,
            boards,
        })
    }

    /// Known remote versions, newest first.
    ///
    /// Network failures are logged and answered with [`FALLBACK_VERSIONS`];
    /// this never fails.
    pub async fn list_available_versions(&self) -> Vec<ReleaseVersion> {
        if let Some(cached) = self.versions.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.list_ttl {
                return cached.versions.clone();
            }
        }

        let tags = match self.source.list_tags().await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(error = %e, "Release index unavailable, serving fallback list");
                return parse_versions(FALLBACK_VERSIONS.iter().copied())
                    .into_iter()
                    .take(self.list_limit)
                    .collect();
            }
        };

        let versions: Vec<ReleaseVersion> = parse_versions(
            tags.iter()
                .map(String::as_str)
                .filter(|tag| tag.starts_with(VERSION_MARKER)),
        )
        .into_iter()
        .take(self.list_limit)
        .collect();

        if versions.is_empty() {
            return parse_versions([DEFAULT_VERSION]);
        }

        *self.versions.write().await = Some(CachedVersions {
            fetched_at: Instant::now(),
            versions: versions.clone(),
        });
        debug!(count = versions.len(), "Cached release index");
        versions
    }

    /// Claim the single download slot without waiting.
    pub fn try_begin_download(&self) -> Result<DownloadPermit, ReleaseError> {
        self.download_slot
            .clone()
            .try_lock_owned()
            .map(|guard| DownloadPermit { _guard: guard })
            .map_err(|_| ReleaseError::DownloadInProgress)
    }

    fn version_lock(&self, version: &ReleaseVersion) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .version_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(version.clone()).or_default().clone()
    }

    async fn download_locked(
        &self,
        version: &ReleaseVersion,
        force: bool,
    ) -> Result<PathBuf, ReleaseError> {
        let archive = self.archive_path(version);
        if !force && is_file(&archive).await {
            debug!(%version, archive = %archive.display(), "Release archive already cached");
            return Ok(archive);
        }

        fs::create_dir_all(&self.cache_dir).await?;
        let partial = self.cache_dir.join(format!("{}.part", version.archive_name()));

        info!(%version, url = %version.download_url(), "Downloading release");
        let fetched = async {
            let mut file = fs::File::create(&partial).await?;
            let bytes = self.source.fetch_archive(version, &mut file).await?;
            file.sync_all().await?;
            Ok::<u64, anyhow::Error>(bytes)
        }
        .await;

        match fetched {
            Ok(bytes) => {
                fs::rename(&partial, &archive).await?;
                info!(%version, bytes, "Release archive downloaded");
                Ok(archive)
            }
            Err(source) => {
                let _ = fs::remove_file(&partial).await;
                Err(ReleaseError::Fetch {
                    version: version.to_string(),
                    source,
                })
            }
        }
    }

    async fn extract_locked(&self, version: &ReleaseVersion) -> Result<PathBuf, ReleaseError> {
        let archive = self.archive_path(version);
        let root = self.root_dir(version);
        let staging = self
            .cache_dir
            .join(format!(".staging-{}-{}", version.root_dir_name(), Uuid::now_v7()));

        info!(%version, archive = %archive.display(), "Extracting release");
        let extracted = {
            let archive = archive.clone();
            let staging = staging.clone();
            tokio::task::spawn_blocking(move || extract_archive(&archive, &staging))
                .await
                .map_err(|e| ReleaseError::Io(io::Error::other(e)))?
        };

        let promoted = match extracted {
            Ok(entries) => {
                debug!(%version, entries, "Archive unpacked into staging");
                let nested = staging.join(version.root_dir_name());
                let tree = if is_dir(&nested).await { nested } else { staging.clone() };
                fs::rename(&tree, &root).await.map_err(ReleaseError::from)
            }
            Err(e) => Err(e),
        };

        if is_dir(&staging).await {
            let _ = fs::remove_dir_all(&staging).await;
        }

        promoted.map(|()| root)
    }
}

fn parse_versions<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<ReleaseVersion> {
    tags.into_iter()
        .filter_map(|tag| ReleaseVersion::normalize(tag).ok())
        .collect()
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

/// Unpack `archive` into `target`, refusing entries that would land outside it.
///
/// Returns the number of entries written.
fn extract_archive(archive: &Path, target: &Path) -> Result<usize, ReleaseError> {
    let archive_error = |source| ReleaseError::Archive {
        path: archive.to_path_buf(),
        source,
    };

    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(archive_error)?;
    std::fs::create_dir_all(target)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(archive_error)?;
        let relative = entry
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| ReleaseError::UnsafeArchiveEntry(entry.name().to_string()))?;
        let out = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }

        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = std::fs::File::create(&out)?;
        io::copy(&mut entry, &mut writer)?;
    }

    Ok(zip.len())
}
