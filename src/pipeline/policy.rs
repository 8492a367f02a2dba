//! Error policy: what a per-record error does to the run

use super::error::RecordError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How per-record errors are handled. Fixed for the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log and count the error; the record contributes no entries.
    #[default]
    Skip,
    /// Abort on the first error and discard the revision.
    Fail,
}

/// Outcome of applying the policy to one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Abort,
}

impl ErrorPolicy {
    /// Every error category is treated the same way.
    pub fn decide(&self, _error: &RecordError) -> Disposition {
        match self {
            Self::Skip => Disposition::Continue,
            Self::Fail => Disposition::Abort,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown error policy '{}' (expected skip or fail)", other)),
        }
    }
}
