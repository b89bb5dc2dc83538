//! Remote release repository access.
//!
//! The cache manager never talks to the network directly; it goes through a
//! [`ReleaseSource`] so tests can count and script fetches.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::version::ReleaseVersion;
use crate::logging::LogThrottle;

const RELEASES_API: &str = "https://api.github.com/repos/selfcustody/krux/releases";
const USER_AGENT: &str = concat!("kflashd/", env!("CARGO_PKG_VERSION"));
const INDEX_TIMEOUT: Duration = Duration::from_secs(10);
const INDEX_PAGE_SIZE: u32 = 50;

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Stream the archive for `version` into `dest`. Returns bytes written.
    async fn fetch_archive(
        &self,
        version: &ReleaseVersion,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64>;

    /// Raw release tag names, newest first.
    async fn list_tags(&self) -> Result<Vec<String>>;
}

#[derive(Deserialize)]
struct ReleaseEntry {
    tag_name: Option<String>,
    name: Option<String>,
}

/// GitHub releases of the Krux firmware project.
pub struct GithubReleases {
    client: reqwest::Client,
}

impl GithubReleases {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReleaseSource for GithubReleases {
    async fn fetch_archive(
        &self,
        version: &ReleaseVersion,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let url = version.download_url();
        debug!(%url, "Requesting release archive");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to request {url}"))?;

        if !response.status().is_success() {
            bail!("Download failed with status: {}", response.status());
        }

        let total = response.content_length().unwrap_or(0);
        let throttle = LogThrottle::new(Duration::from_millis(500));
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Download interrupted")?;
            dest.write_all(&chunk).await.context("Failed to write chunk")?;
            written += chunk.len() as u64;

            if throttle.should_log() {
                debug!(%version, written, total, "Download progress");
            }
        }

        dest.flush().await?;
        Ok(written)
    }

    async fn list_tags(&self) -> Result<Vec<String>> {
        let entries: Vec<ReleaseEntry> = self
            .client
            .get(RELEASES_API)
            .query(&[("per_page", INDEX_PAGE_SIZE)])
            .timeout(INDEX_TIMEOUT)
            .send()
            .await
            .context("Failed to query release index")?
            .error_for_status()
            .context("Release index returned an error")?
            .json()
            .await
            .context("Failed to parse release index")?;

        Ok(entries
            .into_iter()
            .filter_map(|e| e.tag_name.or(e.name))
            .collect())
    }
}
