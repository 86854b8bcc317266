//! Allow-list precondition for environment variables.
//!
//! OS images from 0.5.0 onward only expose variables whose names the
//! app-compose manifest lists in `allowed_envs`. The check runs locally so a
//! bad deployment fails before any network round trip.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{CryptoError, CryptoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ImageVersion {
    pub const ALLOW_LIST_MIN: ImageVersion = ImageVersion { major: 0, minor: 5, patch: 0 };

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Extract the version from an image name such as `dstack-0.5.3`,
    /// `dstack-dev-0.3.6` or `dstack-nvidia-0.5.0`. The version is the last
    /// dash-separated segment that parses as `major.minor[.patch]`.
    pub fn from_image_name(name: &str) -> Option<Self> {
        name.rsplit('-').find_map(Self::parse)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('v');
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }

    pub fn requires_allow_list(&self) -> bool {
        *self >= Self::ALLOW_LIST_MIN
    }
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Fail with [`CryptoError::EnvNotAllowed`] listing every key absent from
/// `allowed` when `image` is 0.5.0 or newer.
///
/// Unknown or unparseable image names skip enforcement; the server still
/// applies its own check.
pub fn check_allowed_envs<'a, I>(image: Option<&str>, allowed: &[String], keys: I) -> CryptoResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let Some(version) = image.and_then(ImageVersion::from_image_name) else {
        return Ok(());
    };
    if !version.requires_allow_list() {
        return Ok(());
    }

    let allowed: BTreeSet<&str> = allowed.iter().map(String::as_str).collect();
    let rejected: BTreeSet<&str> = keys.into_iter().filter(|k| !allowed.contains(k)).collect();
    if rejected.is_empty() {
        return Ok(());
    }
    tracing::warn!(%version, rejected = rejected.len(), "environment names outside allow-list");
    Err(CryptoError::EnvNotAllowed(rejected.into_iter().map(str::to_owned).collect()))
}
