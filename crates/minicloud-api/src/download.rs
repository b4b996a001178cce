//! Download links and streamed downloads
//!
//! Authenticated downloads use
//! `<api>?action=download_file&id=<id>[&version=<version>]` with the
//! credential header. Public links embed a short hash instead and work for
//! anyone once the file is marked public.

use std::io;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use minicloud_core::checksum::fingerprint;
use minicloud_core::domain::{FileId, RemoteFile, VersionId};
use minicloud_core::ports::{DownloadResponse, RemoteError};

use crate::client::MinicloudClient;

impl MinicloudClient {
    /// Internal download link for `file`, at `version` or the current one
    pub fn download_link(
        &self,
        file: FileId,
        version: Option<VersionId>,
    ) -> Result<Url, RemoteError> {
        let id = file.to_string();
        let mut query = vec![("action", "download_file".to_string()), ("id", id)];
        if let Some(version) = version {
            query.push(("version", version.to_string()));
        }
        Url::parse_with_params(&self.api_url(), &query)
            .map_err(|e| RemoteError::Protocol(format!("invalid server URL: {e}")))
    }

    /// Link usable without credentials
    ///
    /// The hash is the first 8 hex digits of the fingerprint of the id
    /// followed by the file checksum. With `pretty` the server's rewritten
    /// `/download/<id>/<hash>/<name>` form is used.
    pub fn public_download_link(&self, file: &RemoteFile, pretty: bool) -> String {
        let seed = format!("{}{}", file.id(), file.checksum().unwrap_or_default());
        let hash: String = fingerprint(seed.as_bytes()).chars().take(8).collect();

        if pretty {
            return format!(
                "{}/download/{}/{}/{}",
                self.server(),
                file.id(),
                hash,
                file.name()
            );
        }
        let query = [
            ("action", "download_file".to_string()),
            ("id", file.id().to_string()),
            ("hash", hash),
            ("filename", file.name().to_string()),
        ];
        match Url::parse_with_params(&self.api_url(), &query) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}?action=download_file&id={}", self.api_url(), file.id()),
        }
    }

    /// Opens a streamed download
    ///
    /// # Errors
    /// - [`RemoteError::Network`] when the request cannot be sent
    /// - [`RemoteError::Unauthorized`] on 401/403
    /// - [`RemoteError::Status`] on any other non-success status
    #[tracing::instrument(skip(self))]
    pub async fn download(
        &self,
        file: FileId,
        version: Option<VersionId>,
    ) -> Result<DownloadResponse, RemoteError> {
        let url = self.download_link(file, version)?;
        debug!("Opening download");

        let response = self
            .inner
            .authorize(self.inner.http.get(url))
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(RemoteError::Unauthorized(body));
            }
            warn!(status = status.as_u16(), "Download rejected");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));

        Ok(DownloadResponse {
            content_length,
            body: Box::pin(body),
        })
    }
}
