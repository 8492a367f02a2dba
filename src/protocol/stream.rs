//! Stream identifier: the two-part (origin, name) key used everywhere

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between origin and stream name in the canonical form.
pub const STREAM_SEPARATOR: &str = "__";

/// A stream tag that cannot be split into exactly two non-empty parts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed stream name: '{0}'")]
pub struct MalformedStreamName(pub String);

/// Identifies one stream of homogeneous records, e.g. `github__commits`.
///
/// Serializes as its canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    origin: String,
    name: String,
}

impl StreamId {
    /// Build an identifier from its parts.
    ///
    /// Rejects any pair whose canonical form would parse back to different
    /// parts: empty parts, parts containing the separator, or an origin
    /// ending with `_`.
    pub fn new(origin: impl Into<String>, name: impl Into<String>) -> Result<Self, MalformedStreamName> {
        let candidate = Self {
            origin: origin.into(),
            name: name.into(),
        };
        let canonical = candidate.canonical();
        match Self::parse(&canonical) {
            Ok(parsed) if parsed == candidate => Ok(candidate),
            _ => Err(MalformedStreamName(canonical)),
        }
    }

    /// Parse the canonical `origin__name` form.
    pub fn parse(canonical: &str) -> Result<Self, MalformedStreamName> {
        let mut parts = canonical.split(STREAM_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(origin), Some(name), None) if !origin.is_empty() && !name.is_empty() => Ok(Self {
                origin: origin.to_string(),
                name: name.to_string(),
            }),
            _ => Err(MalformedStreamName(canonical.to_string())),
        }
    }

    /// Parse a raw stream tag after stripping an optional connection prefix.
    ///
    /// Tags that do not carry the prefix are parsed unchanged.
    pub fn parse_with_prefix(tag: &str, prefix: Option<&str>) -> Result<Self, MalformedStreamName> {
        let stripped = match prefix {
            Some(p) if !p.is_empty() => tag.strip_prefix(p).unwrap_or(tag),
            _ => tag,
        };
        Self::parse(stripped)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical `origin__name` string.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.origin, STREAM_SEPARATOR, self.name)
    }
}

impl FromStr for StreamId {
    type Err = MalformedStreamName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_form() {
        let id = StreamId::parse("github__pull_requests").unwrap();
        assert_eq!(id.origin(), "github");
        assert_eq!(id.name(), "pull_requests");
        assert_eq!(id.to_string(), "github__pull_requests");
    }

    #[test]
    fn canonical_form_is_bijective() {
        let id = StreamId::new("jira", "issues").unwrap();
        assert_eq!(StreamId::parse(&id.canonical()).unwrap(), id);
    }

    #[test]
    fn rejects_missing_or_extra_parts() {
        for bad in ["github", "github__", "__commits", "", "a__b__c"] {
            assert_eq!(
                StreamId::parse(bad),
                Err(MalformedStreamName(bad.to_string())),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn new_rejects_separator_inside_part() {
        assert!(StreamId::new("git__hub", "commits").is_err());
        assert!(StreamId::new("", "commits").is_err());
        assert!(StreamId::new("my_", "repos").is_err());
        assert!(StreamId::new("my_src", "open_prs").is_ok());

        // `my___repos` has exactly one reading
        let id = StreamId::new("my", "_repos").unwrap();
        assert_eq!(StreamId::parse(&id.canonical()).unwrap(), id);
    }

    #[test]
    fn prefix_is_stripped_when_present() {
        let id = StreamId::parse_with_prefix("mysrc__github__commits", Some("mysrc__")).unwrap();
        assert_eq!(id, StreamId::new("github", "commits").unwrap());

        let unprefixed = StreamId::parse_with_prefix("github__commits", Some("mysrc__")).unwrap();
        assert_eq!(unprefixed, id);
    }

    #[test]
    fn serde_uses_canonical_string() {
        let id = StreamId::new("github", "orgs").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"github__orgs\"");
        let back: StreamId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<StreamId>("\"orgs\"").is_err());
    }
}
