//! Dotted runtime version numbers ("80", "13.1", "8.3.0").

use std::fmt;
use std::str::FromStr;

use kiln_core::{Error, Result};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// A runtime version, ordered lexicographically on (major, minor, patch).
///
/// Missing segments parse as zero, so `"80"`, `"80.0"` and `"80.0.0"` are the
/// same version. Comparisons between them are therefore exact, not textual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RuntimeVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl RuntimeVersion {
    /// The synthetic floor version every runtime group chain starts from.
    pub const ZERO: RuntimeVersion = RuntimeVersion {
        major: 0,
        minor: 0,
        patch: 0,
    };

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses up to three dot-separated numeric segments.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::configuration("version string is empty"));
        }
        let mut segments = [0u64; 3];
        let mut count = 0;
        for segment in text.split('.') {
            if count == segments.len() {
                return Err(Error::configuration(format!(
                    "version '{text}' has more than three segments"
                )));
            }
            segments[count] = segment.parse().map_err(|_| {
                Error::configuration(format!("version '{text}' has a non-numeric segment"))
            })?;
            count += 1;
        }
        Ok(Self::new(segments[0], segments[1], segments[2]))
    }
}

impl FromStr for RuntimeVersion {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for RuntimeVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RuntimeVersion {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
