//! Server information
//!
//! Reported by the `get_server_info` action. The server time is used to
//! derive the clock-skew offset applied when comparing modification times.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::lenient;

/// Raw `get_server_info` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfoListing {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub nice_url: bool,
    /// Server clock, epoch seconds
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub time: Option<i64>,
}

/// Server description plus the clock offset observed when it was received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub description: String,
    pub logo: Option<String>,
    pub nice_url: bool,
    pub time: DateTime<Utc>,
    offset: Duration,
}

impl ServerInfo {
    /// Builds the info, measuring the offset against `now`
    pub fn from_listing(listing: ServerInfoListing, now: DateTime<Utc>) -> Self {
        let time = listing
            .time
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or(now);
        Self {
            name: listing.name,
            description: listing.description,
            logo: listing.logo,
            nice_url: listing.nice_url,
            time,
            offset: now - time,
        }
    }

    /// Local clock minus server clock
    pub fn offset(&self) -> Duration {
        self.offset
    }

    /// Offset in milliseconds, suitable for a sync folder's clock-skew setting
    ///
    /// Remote timestamps are shifted by this amount before being compared
    /// with local modification times.
    pub fn offset_millis(&self) -> i64 {
        self.offset.num_milliseconds()
    }
}
