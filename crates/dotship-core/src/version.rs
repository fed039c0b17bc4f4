//! Release version derived from a git tag.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PipelineError, Result};

/// Largest value a single component may take (ClickOnce manifests store
/// each component as a 16-bit unsigned integer).
const MAX_COMPONENT: u32 = 65_535;
const MAX_COMPONENTS: usize = 4;

/// Dot-separated numeric version, e.g. `2.0.0`.
///
/// Built from a tag with [`Version::from_tag`]. The publish stage receives
/// a `Version` and never strips prefixes itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// Strip exactly one leading run of non-digit characters from `tag`.
    ///
    /// `v1.2.3` → `1.2.3`, `release-4.0` → `4.0`, `1.2.3` is unchanged.
    pub fn strip_tag_prefix(tag: &str) -> &str {
        let start = tag
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(tag.len());
        &tag[start..]
    }

    /// Derive and validate the version carried by a release tag.
    pub fn from_tag(tag: &str) -> Result<Self> {
        Self::parse(Self::strip_tag_prefix(tag)).map_err(|err| match err {
            PipelineError::InvalidVersion { reason, .. } => PipelineError::InvalidVersion {
                input: tag.to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Validate an already-stripped version string.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| PipelineError::InvalidVersion {
            input: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(invalid("version is empty".to_string()));
        }

        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() > MAX_COMPONENTS {
            return Err(invalid(format!(
                "expected at most {} components, found {}",
                MAX_COMPONENTS,
                parts.len()
            )));
        }

        for part in &parts {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(format!("component '{}' is not numeric", part)));
            }
            let value: u32 = part
                .parse()
                .map_err(|_| invalid(format!("component '{}' is out of range", part)))?;
            if value > MAX_COMPONENT {
                return Err(invalid(format!(
                    "component {} exceeds {}",
                    value, MAX_COMPONENT
                )));
            }
        }

        Ok(Version(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric components in order.
    pub fn components(&self) -> Vec<u16> {
        self.0.split('.').filter_map(|p| p.parse().ok()).collect()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Version {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl std::str::FromStr for Version {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag_strips_leading_v() {
        assert_eq!(Version::from_tag("v1.2.3").unwrap().as_str(), "1.2.3");
        assert_eq!(Version::from_tag("v2.0.0").unwrap().as_str(), "2.0.0");
    }

    #[test]
    fn test_from_tag_without_prefix_is_unchanged() {
        assert_eq!(Version::from_tag("1.2.3").unwrap().as_str(), "1.2.3");
    }

    #[test]
    fn test_strip_removes_one_run_only() {
        assert_eq!(Version::strip_tag_prefix("release-4.0"), "4.0");
        assert_eq!(Version::strip_tag_prefix("vv1.0"), "1.0");
        assert_eq!(Version::strip_tag_prefix("v1.0-rc"), "1.0-rc");
        assert_eq!(Version::strip_tag_prefix("latest"), "");
    }

    #[test]
    fn test_from_tag_rejects_non_versions() {
        let err = Version::from_tag("latest").unwrap_err();
        match err {
            PipelineError::InvalidVersion { input, .. } => assert_eq!(input, "latest"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(Version::from_tag("v1.0-rc").is_err());
        assert!(Version::from_tag("v1..2").is_err());
        assert!(Version::from_tag("").is_err());
    }

    #[test]
    fn test_parse_enforces_component_limits() {
        assert!(Version::parse("1.2.3.4").is_ok());
        assert!(Version::parse("1.2.3.4.5").is_err());
        assert!(Version::parse("65535.0").is_ok());
        assert!(Version::parse("65536.0").is_err());
        assert!(Version::parse("99999999999").is_err());
    }

    #[test]
    fn test_components_and_display() {
        let v = Version::parse("2.10.0").unwrap();
        assert_eq!(v.components(), vec![2, 10, 0]);
        assert_eq!(v.to_string(), "2.10.0");
    }

    #[test]
    fn test_serde_validates() {
        let v: Version = serde_json::from_str("\"3.1\"").unwrap();
        assert_eq!(v.as_str(), "3.1");
        assert!(serde_json::from_str::<Version>("\"x.1\"").is_err());
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"3.1\"");
    }
}
