//! Reply envelope decoding
//!
//! Every action answers with a JSON object:
//!
//! ```json
//! { "type": "path", "action_id": "3", "data": { ... } }
//! ```
//!
//! The `type` tag selects the [`ApiEvent`] variant and `data` is parsed into
//! the matching domain entity. A reply that cannot be read at all, or that
//! carries an unknown tag, becomes an `Error` event without message or id.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use minicloud_core::domain::{
    ActionId, FileListing, PathListing, RemoteFile, RemotePath, ServerInfo, ServerInfoListing,
    User, UserListing,
};
use minicloud_core::ports::ApiEvent;

/// Raw reply envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    action_id: Value,
    #[serde(default)]
    data: Value,
}

/// Correlation ids are echoed back either as strings or as numbers
fn action_id_of(value: &Value) -> Option<ActionId> {
    match value {
        Value::String(s) => Some(ActionId::new(s.as_str())),
        Value::Number(n) => Some(ActionId::new(n.to_string())),
        _ => None,
    }
}

fn protocol_error() -> ApiEvent {
    ApiEvent::Error {
        action_id: None,
        message: None,
    }
}

/// Decodes a reply body into an [`ApiEvent`]
pub fn decode(body: &str) -> ApiEvent {
    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => decode_envelope(envelope),
        Err(e) => {
            warn!(error = %e, "Unparseable reply");
            protocol_error()
        }
    }
}

fn decode_envelope(envelope: Envelope) -> ApiEvent {
    let action_id = action_id_of(&envelope.action_id);
    let data = envelope.data;

    // A known tag whose payload does not parse keeps its id so the waiting
    // caller still sees the failure.
    let malformed = |action_id: Option<ActionId>, what: &str, e: &dyn std::fmt::Display| {
        warn!(kind = what, error = %e, "Malformed reply payload");
        ApiEvent::Error {
            action_id,
            message: None,
        }
    };

    match envelope.kind.as_str() {
        "" => ApiEvent::Success { action_id, data },
        "path" => {
            if data.is_null() {
                return ApiEvent::Path {
                    action_id,
                    path: None,
                };
            }
            match serde_json::from_value::<PathListing>(data) {
                Ok(listing) => ApiEvent::Path {
                    action_id,
                    path: Some(RemotePath::from_listing(listing)),
                },
                Err(e) => malformed(action_id, "path", &e),
            }
        }
        "paths" => match serde_json::from_value::<Vec<PathListing>>(data) {
            Ok(listings) => ApiEvent::Paths {
                action_id,
                paths: listings.into_iter().map(RemotePath::from_listing).collect(),
            },
            Err(e) => malformed(action_id, "paths", &e),
        },
        "file" => match serde_json::from_value::<FileListing>(data) {
            Ok(listing) => ApiEvent::File {
                action_id,
                file: RemoteFile::from_listing(listing),
            },
            Err(e) => malformed(action_id, "file", &e),
        },
        "files" => match serde_json::from_value::<Vec<FileListing>>(data) {
            Ok(listings) => ApiEvent::Files {
                action_id,
                files: listings
                    .into_iter()
                    .map(RemoteFile::from_listing)
                    .collect::<Vec<Arc<RemoteFile>>>(),
            },
            Err(e) => malformed(action_id, "files", &e),
        },
        "user" => match serde_json::from_value::<UserListing>(data) {
            Ok(listing) => match User::from_listing(listing) {
                Ok(user) => ApiEvent::User {
                    action_id,
                    user: Box::new(user),
                },
                Err(e) => malformed(action_id, "user", &e),
            },
            Err(e) => malformed(action_id, "user", &e),
        },
        "server" => match serde_json::from_value::<ServerInfoListing>(data) {
            Ok(listing) => ApiEvent::ServerInfo {
                action_id,
                info: ServerInfo::from_listing(listing, Utc::now()),
            },
            Err(e) => malformed(action_id, "server", &e),
        },
        "bool" => ApiEvent::Bool {
            action_id,
            value: bool_value(&data),
        },
        "error" => ApiEvent::Error {
            action_id,
            message: match data {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            },
        },
        other => {
            warn!(kind = other, "Unknown reply type");
            protocol_error()
        }
    }
}

/// `data` is either `{"bool": ...}` or the bare value
fn bool_value(data: &Value) -> bool {
    let value = data.get("bool").unwrap_or(data);
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
