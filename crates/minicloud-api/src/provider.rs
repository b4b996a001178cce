//! `IRemoteClient` implementation for [`MinicloudClient`]
//!
//! Thin delegation to the inherent methods in [`crate::client`],
//! [`crate::upload`] and [`crate::download`].

use async_trait::async_trait;

use minicloud_core::domain::{ActionId, FileId, VersionId};
use minicloud_core::events::EventBus;
use minicloud_core::ports::{
    ApiEvent, ByteStream, DownloadResponse, IRemoteClient, RemoteError, UploadForm,
};

use crate::client::MinicloudClient;

#[async_trait]
impl IRemoteClient for MinicloudClient {
    fn events(&self) -> &EventBus<ApiEvent> {
        MinicloudClient::events(self)
    }

    fn next_action_id(&self) -> ActionId {
        MinicloudClient::next_action_id(self)
    }

    fn get_path_as(&self, path: &str, recursive: bool, action_id: ActionId) {
        MinicloudClient::get_path_as(self, path, recursive, action_id)
    }

    fn get_path(&self, path: &str, recursive: bool) -> ActionId {
        MinicloudClient::get_path(self, path, recursive)
    }

    async fn upload_file(
        &self,
        form: UploadForm,
        body: ByteStream,
    ) -> Result<serde_json::Value, RemoteError> {
        self.upload(form, body).await
    }

    async fn download_file(
        &self,
        file: FileId,
        version: Option<VersionId>,
    ) -> Result<DownloadResponse, RemoteError> {
        self.download(file, version).await
    }
}
