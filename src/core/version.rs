//! Release version tokens.
//!
//! A [`ReleaseVersion`] is the only way a user-supplied version string
//! reaches the cache directory or a download URL, so validation happens once,
//! here, before anything else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ReleaseError;

/// Leading marker every release tag carries.
pub const VERSION_MARKER: char = 'v';

/// Version used when a request does not name one.
pub const DEFAULT_VERSION: &str = "v25.10.1";

const RELEASE_REPO: &str = "selfcustody/krux";

/// A normalized release tag such as `v25.10.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ReleaseVersion(String);

impl ReleaseVersion {
    /// Normalize a raw version string.
    ///
    /// Whitespace is trimmed and the `v` marker is prepended when missing.
    /// The tag body must contain at least one ASCII alphanumeric character and
    /// nothing outside `[A-Za-z0-9._-]`.
    pub fn normalize(raw: &str) -> Result<Self, ReleaseError> {
        let trimmed = raw.trim();
        let tag = if trimmed.starts_with(VERSION_MARKER) {
            trimmed.to_string()
        } else {
            format!("{VERSION_MARKER}{trimmed}")
        };

        let body = &tag[VERSION_MARKER.len_utf8()..];
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_');

        if body.is_empty()
            || !body.chars().all(allowed)
            || !body.chars().any(|c| c.is_ascii_alphanumeric())
        {
            return Err(ReleaseError::InvalidVersion(raw.to_string()));
        }

        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the release archive, e.g. `krux-v25.10.1.zip`.
    pub fn archive_name(&self) -> String {
        format!("krux-{}.zip", self.0)
    }

    /// Name of the directory the archive unpacks into.
    pub fn root_dir_name(&self) -> String {
        format!("krux-{}", self.0)
    }

    pub fn download_url(&self) -> String {
        format!(
            "https://github.com/{RELEASE_REPO}/releases/download/{}/{}",
            self.0,
            self.archive_name()
        )
    }
}

impl Default for ReleaseVersion {
    fn default() -> Self {
        Self(DEFAULT_VERSION.to_string())
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReleaseVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ReleaseVersion {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl<'de> Deserialize<'de> for ReleaseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::normalize(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_marker() {
        let v = ReleaseVersion::normalize("25.10.1").unwrap();
        assert_eq!(v.as_str(), "v25.10.1");
    }

    #[test]
    fn keeps_existing_marker_and_trims() {
        let v = ReleaseVersion::normalize("  v25.09.1\n").unwrap();
        assert_eq!(v.as_str(), "v25.09.1");
    }

    #[test]
    fn accepts_prerelease_tags() {
        assert!(ReleaseVersion::normalize("v26.01.0-beta_2").is_ok());
    }

    #[test]
    fn rejects_unsafe_input() {
        for raw in [
            "",
            "   ",
            "v",
            "v..",
            "../etc",
            "v25/10",
            "v25\\10",
            "v25.10.1;rm -rf",
            "v25 10",
            "v$(id)",
            "v25.10.1?x=1",
            "vé",
        ] {
            assert!(
                matches!(
                    ReleaseVersion::normalize(raw),
                    Err(ReleaseError::InvalidVersion(_))
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn derived_names() {
        let v: ReleaseVersion = "25.10.1".parse().unwrap();
        assert_eq!(v.archive_name(), "krux-v25.10.1.zip");
        assert_eq!(v.root_dir_name(), "krux-v25.10.1");
        assert_eq!(
            v.download_url(),
            "https://github.com/selfcustody/krux/releases/download/v25.10.1/krux-v25.10.1.zip"
        );
    }

    #[test]
    fn deserialize_normalizes() {
        let v: ReleaseVersion = serde_json::from_str(r#""25.04.1""#).unwrap();
        assert_eq!(v.as_str(), "v25.04.1");
        assert!(serde_json::from_str::<ReleaseVersion>(r#""../x""#).is_err());
    }
}
