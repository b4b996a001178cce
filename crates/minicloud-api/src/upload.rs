//! Multipart upload
//!
//! `POST <server>/api.php` as `multipart/form-data` with the fields:
//!
//! | field              | value                                          |
//! |--------------------|------------------------------------------------|
//! | `action`           | `upload_file`                                  |
//! | `path`             | target folder, duplicate slashes collapsed     |
//! | `encryption[file]` | cipher configuration, empty when plain         |
//! | `replace[file]`    | id of the file being overwritten (optional)    |
//! | `checksum[file]`   | fingerprint of the unencrypted content         |
//! | `public[file]`     | `true` / `false`                               |
//! | `version[file]`    | `0` to suppress a new version (optional)       |
//! | `file`             | the (possibly encrypted) body                  |

use reqwest::multipart::{Form, Part};
use reqwest::{Body, StatusCode};
use tracing::{debug, warn};

use minicloud_core::ports::{ByteStream, RemoteError, UploadForm};

use crate::client::MinicloudClient;

/// Collapses runs of `/` into a single separator
pub fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !previous_slash {
                out.push(c);
            }
            previous_slash = true;
        } else {
            out.push(c);
            previous_slash = false;
        }
    }
    out
}

/// Builds the multipart form for `form` with `body` as the file part
pub fn build_form(form: UploadForm, body: ByteStream) -> Form {
    let mut multipart = Form::new().text("action", "upload_file");

    if let Some(target) = form.target_path.as_deref() {
        multipart = multipart.text("path", collapse_slashes(target));
    }
    multipart = multipart.text("encryption[file]", form.encryption);
    if let Some(existing) = form.replace {
        multipart = multipart.text("replace[file]", existing.to_string());
    }
    multipart = multipart
        .text("checksum[file]", form.checksum)
        .text("public[file]", form.public.to_string());
    if !form.create_version {
        multipart = multipart.text("version[file]", "0");
    }

    let part = Part::stream(Body::wrap_stream(body)).file_name(form.file_name);
    multipart.part("file", part)
}

impl MinicloudClient {
    /// Streams an upload and returns the server's JSON reply
    ///
    /// # Errors
    /// - [`RemoteError::Network`] when the request cannot be sent
    /// - [`RemoteError::Unauthorized`] on 401/403
    /// - [`RemoteError::Status`] on any other non-success status, carrying
    ///   the response text
    /// - [`RemoteError::Protocol`] when a success reply is not JSON
    #[tracing::instrument(skip(self, form, body), fields(file = %form.file_name))]
    pub async fn upload(
        &self,
        form: UploadForm,
        body: ByteStream,
    ) -> Result<serde_json::Value, RemoteError> {
        debug!(
            target_path = ?form.target_path,
            replace = ?form.replace,
            encrypted = !form.encryption.is_empty(),
            "Starting upload"
        );

        let multipart = build_form(form, body);
        let response = self
            .inner
            .authorize(self.inner.http.post(self.api_url()))
            .multipart(multipart)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized(text));
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "Upload rejected");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let reply = serde_json::from_str(&text).map_err(|e| RemoteError::Protocol(e.to_string()))?;
        debug!("Upload completed");
        Ok(reply)
    }
}
