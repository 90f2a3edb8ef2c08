// Session Configuration
//
// Validated settings a ledger session runs with. Validation happens
// when a value is constructed, so a session never holds a bad setting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use crate::retry::BackoffPolicy;

/// Rejected configuration input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// Region a dataset is created in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    #[default]
    #[serde(rename = "US")]
    Us,

    #[serde(rename = "EU")]
    Eu,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Us => "US",
            Location::Eu => "EU",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Location::Us),
            "EU" => Ok(Location::Eu),
            other => Err(ConfigError(format!(
                "unknown location `{other}`, expected US or EU"
            ))),
        }
    }
}

/// Positive partition key. Rows land in `<table>_<key>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Partition(NonZeroU64);

impl Partition {
    pub fn new(key: i64) -> Result<Self, ConfigError> {
        u64::try_from(key)
            .ok()
            .and_then(NonZeroU64::new)
            .map(Partition)
            .ok_or_else(|| ConfigError(format!("partition must be a positive integer, got {key}")))
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    /// Suffix appended to the logical table name.
    pub fn suffix(&self) -> String {
        format!("_{}", self.0)
    }
}

/// Payload schema version, `MAJOR.MINOR.PATCH[-pre][+build]`.
///
/// Must be above `0.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    raw: String,
    core: (u64, u64, u64),
}

impl SchemaVersion {
    /// Versions must compare strictly greater than this.
    pub const FLOOR: (u64, u64, u64) = (0, 0, 0);

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError(format!("`{raw}` is not a valid semantic version"));

        let (rest, build) = match raw.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (raw, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        for ident in pre.into_iter().chain(build) {
            if !valid_identifiers(ident) {
                return Err(invalid());
            }
        }

        let mut parts = core.split('.').map(numeric_identifier);
        let (Some(Some(major)), Some(Some(minor)), Some(Some(patch)), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let core = (major, minor, patch);
        if core <= Self::FLOOR {
            return Err(ConfigError(format!(
                "version `{raw}` must be greater than {}.{}.{}",
                Self::FLOOR.0,
                Self::FLOOR.1,
                Self::FLOOR.2
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            core,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn core(&self) -> (u64, u64, u64) {
        self.core
    }
}

fn numeric_identifier(part: &str) -> Option<u64> {
    let leading_zero = part.len() > 1 && part.starts_with('0');
    if part.is_empty() || leading_zero || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

fn valid_identifiers(s: &str) -> bool {
    s.split('.').all(|ident| {
        !ident.is_empty() && ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self {
            raw: "1.0.0".into(),
            core: (1, 0, 0),
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for SchemaVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SchemaVersion> for String {
    fn from(value: SchemaVersion) -> Self {
        value.raw
    }
}

/// Everything a session needs besides its store and dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub location: Location,
    pub partition: Option<Partition>,
    pub version: SchemaVersion,
    pub backoff: BackoffPolicy,
}

impl SessionConfig {
    /// Parse a JSON config document. Missing fields take defaults.
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(data).map_err(|e| ConfigError(format!("invalid session config: {e}")))
    }

    /// Suffix for physical table names; empty without a partition.
    pub fn partition_suffix(&self) -> String {
        self.partition.map(|p| p.suffix()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn version_floor_is_exclusive() {
        assert!(SchemaVersion::parse("0.0.0").is_err());
        assert_eq!(SchemaVersion::parse("1.2.3").unwrap().core(), (1, 2, 3));
        assert!(SchemaVersion::parse("0.0.1").is_ok());
    }

    #[test]
    fn malformed_versions_are_rejected() {
        for raw in ["", "1", "1.2", "1.2.3.4", "01.2.3", "a.b.c", "1.2.3-", "1.2.3+"] {
            assert!(SchemaVersion::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn prerelease_and_build_are_kept_verbatim() {
        let version = SchemaVersion::parse("2.0.0-rc.1+build.7").unwrap();
        assert_eq!(version.as_str(), "2.0.0-rc.1+build.7");
        assert_eq!(version.core(), (2, 0, 0));
    }

    #[test]
    fn partition_must_be_positive() {
        assert!(Partition::new(0).is_err());
        assert!(Partition::new(-4).is_err());
        assert_eq!(Partition::new(7).unwrap().suffix(), "_7");
    }

    #[test]
    fn location_parsing() {
        assert_eq!("eu".parse::<Location>().unwrap(), Location::Eu);
        assert_eq!("US".parse::<Location>().unwrap(), Location::Us);
        assert!("asia-east1".parse::<Location>().is_err());
    }

    #[test]
    fn config_loads_from_json_with_defaults() {
        let config = SessionConfig::from_json(
            r#"{ "location": "EU", "partition": 3, "backoff": { "max_attempts": 2, "base_delay_ms": 10 } }"#,
        )
        .unwrap();

        assert_eq!(config.location, Location::Eu);
        assert_eq!(config.partition_suffix(), "_3");
        assert_eq!(config.version.as_str(), "1.0.0");
        assert_eq!(config.backoff.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(SessionConfig::from_json(r#"{ "version": "0.0.0" }"#).is_err());
        assert!(SessionConfig::from_json(r#"{ "partition": 0 }"#).is_err());
        assert!(SessionConfig::from_json(r#"{ "location": "APAC" }"#).is_err());
    }
}
