//! Schema version ordering
//!
//! Versions are dot-separated unsigned integers. Comparison is component-wise
//! with missing trailing components treated as zero, so `1.0 == 1.0.0` and
//! `1.0.4 < 1.2 < 1.10`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// The version a freshly created store is stamped with.
pub const CURRENT_SCHEMA_VERSION: &str = "1.5";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    raw: String,
    parts: Vec<u32>,
}

impl SchemaVersion {
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        let parts = raw
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| Error::InvalidVersion(s.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    /// Version written by this build
    pub fn current() -> Self {
        Self::parse(CURRENT_SCHEMA_VERSION).expect("CURRENT_SCHEMA_VERSION is a valid version")
    }

    /// Stand-in for a store that predates version markers; older than any
    /// migration gate.
    pub fn unversioned() -> Self {
        Self {
            raw: "0".to_string(),
            parts: vec![0],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn component(&self, i: usize) -> u32 {
        self.parts.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<SchemaVersion> for String {
    fn from(v: SchemaVersion) -> Self {
        v.raw
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SchemaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SchemaVersion {}
