#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use kflashd::adapters::SimulatedPortLister;
use kflashd::config::AppConfig;
use kflashd::context::AppContext;
use kflashd::core::{FirmwareResolver, Flasher, ReleaseCache, ReleaseSource, ReleaseVersion};
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use zip::write::SimpleFileOptions;

/// In-memory release index and archive host.
#[derive(Default)]
pub struct FakeSource {
    archives: Mutex<HashMap<String, Vec<u8>>>,
    tags: Mutex<Option<Vec<String>>>,
    pub fetches: AtomicUsize,
    pub tag_requests: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_archive(self: Arc<Self>, version: &str, bytes: Vec<u8>) -> Arc<Self> {
        self.archives
            .lock()
            .unwrap()
            .insert(version.to_string(), bytes);
        self
    }

    /// `None` makes the index unreachable.
    pub fn with_tags(self: Arc<Self>, tags: Option<&[&str]>) -> Arc<Self> {
        *self.tags.lock().unwrap() = tags.map(|t| t.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn tag_request_count(&self) -> usize {
        self.tag_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseSource for FakeSource {
    async fn fetch_archive(
        &self,
        version: &ReleaseVersion,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .archives
            .lock()
            .unwrap()
            .get(version.as_str())
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404 for {version}"))?;
        dest.write_all(&bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn list_tags(&self) -> Result<Vec<String>> {
        self.tag_requests.fetch_add(1, Ordering::SeqCst);
        self.tags
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("network unreachable"))
    }
}

/// Build a zip archive in memory from `(path, content)` pairs.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Release package laid out like the upstream archives: one `krux-<v>/`
/// root with a directory per board.
pub fn release_zip(version: &str, boards: &[&str]) -> Vec<u8> {
    let files: Vec<(String, Vec<u8>)> = boards
        .iter()
        .map(|board| {
            (
                format!("krux-{version}/{board}/firmware.bin"),
                format!("firmware for {board}").into_bytes(),
            )
        })
        .collect();
    let refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(name, content)| (name.as_str(), content.as_slice()))
        .collect();
    zip_bytes(&refs)
}

pub fn version(raw: &str) -> ReleaseVersion {
    ReleaseVersion::normalize(raw).unwrap()
}

/// Temp cache dir, upload root and a context wired to fakes.
pub struct TestEnv {
    _tmp: TempDir,
    pub cache_dir: PathBuf,
    pub upload_root: PathBuf,
    pub releases: Arc<ReleaseCache>,
}

impl TestEnv {
    pub fn new(source: Arc<FakeSource>) -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let cache_dir = tmp.path().join("cache");
        let upload_root = tmp.path().join("uploads");
        let releases = Arc::new(ReleaseCache::new(&cache_dir, source));
        Self {
            _tmp: tmp,
            cache_dir,
            upload_root,
            releases,
        }
    }

    pub fn resolver(&self) -> FirmwareResolver {
        FirmwareResolver::with_upload_root(self.releases.clone(), &self.upload_root)
    }

    pub fn context(&self, flasher: Arc<dyn Flasher>) -> AppContext {
        let (ports, simulator) = SimulatedPortLister::new();
        simulator.add_port("/dev/ttyUSB0", "CP2104 USB to UART Bridge Controller");
        let config = AppConfig {
            cache_dir: self.cache_dir.clone(),
            open_browser: false,
            simulation: true,
            ..AppConfig::default()
        };
        AppContext::from_parts(
            config,
            self.releases.clone(),
            self.resolver(),
            flasher,
            Arc::new(ports),
        )
    }

    /// Entries currently left under the upload root.
    pub fn leftover_uploads(&self) -> usize {
        count_entries(&self.upload_root)
    }
}

pub fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
