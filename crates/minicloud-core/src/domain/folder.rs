//! Synchronized folder pair
//!
//! Persisted as a JSON object:
//!
//! ```json
//! { "local": "/home/me/Cloud", "remote": "docs", "last": 0, "max-size": 0, "regexp": "" }
//! ```
//!
//! `last` is epoch milliseconds (0 = never synced) and `max-size` is bytes
//! (0 = unlimited). The clock-skew offset is supplied at runtime and never
//! written back.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// One local folder kept in sync with one remote folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFolderConfig {
    /// Local root directory
    pub local: PathBuf,
    /// Remote root path, `/`-separated
    pub remote: String,
    /// Last completed pass, epoch milliseconds; 0 = never
    #[serde(default)]
    pub last: i64,
    /// Files larger than this many bytes are skipped; 0 = unlimited
    #[serde(default, rename = "max-size")]
    pub max_size: u64,
    /// Exclusion pattern matched against the whole relative path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,
    /// Milliseconds added to remote timestamps before comparing them
    #[serde(skip)]
    pub time_offset_ms: i64,
}

impl SyncFolderConfig {
    pub fn new(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            last: 0,
            max_size: 0,
            regexp: None,
            time_offset_ms: 0,
        }
    }

    /// Time of the last completed pass
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        if self.last == 0 {
            None
        } else {
            DateTime::<Utc>::from_timestamp_millis(self.last)
        }
    }

    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last = at.timestamp_millis();
    }

    /// True when `size` is over the configured limit
    pub fn exceeds_size(&self, size: u64) -> bool {
        self.max_size != 0 && size > self.max_size
    }

    /// Compiled exclusion pattern, anchored so it must match the whole path
    pub fn exclusion(&self) -> Result<Option<Regex>, DomainError> {
        match self.regexp.as_deref() {
            None | Some("") => Ok(None),
            Some(pattern) => Regex::new(&format!("^(?:{pattern})$"))
                .map(Some)
                .map_err(|e| DomainError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Checks the fields that must be set for a pass to run
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.local.as_os_str().is_empty() {
            return Err(DomainError::InvalidPath(
                "local folder must not be empty".to_string(),
            ));
        }
        if !self.local.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "local folder must be absolute: {}",
                self.local.display()
            )));
        }
        self.exclusion()?;
        Ok(())
    }
}
