//! Minicloud API client
//!
//! Every action is a form-encoded `POST <server>/api.php` carrying `action`
//! and `action_id`, authenticated with the `X-Auth` header. The client offers
//! two ways to run an action:
//!
//! - [`MinicloudClient::request`] awaits the reply and returns it directly.
//! - The fire-and-forget helpers (`get_path`, `get_user`, ...) return the
//!   action id at once and publish the reply on [`MinicloudClient::events`]
//!   from their own task. They must be called from within a Tokio runtime.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use minicloud_api::MinicloudClient;
//!
//! # async fn example() {
//! let client = MinicloudClient::new("https://cloud.example.com");
//! client.set_auth("alice", "secret");
//! let reply = client.request("get_server_info", Vec::new(), None).await;
//! println!("{}", reply.kind());
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, warn};

use minicloud_core::checksum::sha256_hex;
use minicloud_core::config::ServerConfig;
use minicloud_core::domain::{ActionId, FileId, PathId};
use minicloud_core::events::EventBus;
use minicloud_core::ports::ApiEvent;

use crate::response;

/// Name of the credential header
pub const AUTH_HEADER: &str = "X-Auth";

/// Default timeout for non-transfer actions
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Form fields of one action, in send order
pub type Params = Vec<(String, String)>;

// ============================================================================
// MinicloudClient
// ============================================================================

pub(crate) struct Inner {
    pub(crate) http: Client,
    pub(crate) server: String,
    auth: RwLock<Option<String>>,
    counter: AtomicU64,
    request_timeout: Duration,
    pub(crate) events: EventBus<ApiEvent>,
}

/// HTTP client for one Minicloud server
///
/// Cheap to clone; clones share credentials, the action counter and the
/// event bus.
#[derive(Clone)]
pub struct MinicloudClient {
    pub(crate) inner: Arc<Inner>,
}

impl MinicloudClient {
    /// Creates a client for the server at `server` (without `/api.php`)
    pub fn new(server: impl Into<String>) -> Self {
        Self::with_http(Client::new(), server, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a client from the `server` section of the configuration
    ///
    /// Only builds the client; credentials are set separately with
    /// [`set_auth`](Self::set_auth).
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_http(
            http,
            config.url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    fn with_http(http: Client, server: impl Into<String>, request_timeout: Duration) -> Self {
        let server: String = server.into();
        Self {
            inner: Arc::new(Inner {
                http,
                server: server.trim_end_matches('/').to_string(),
                auth: RwLock::new(None),
                counter: AtomicU64::new(0),
                request_timeout,
                events: EventBus::new(),
            }),
        }
    }

    /// Server URL without the API suffix
    pub fn server(&self) -> &str {
        &self.inner.server
    }

    /// URL of the API endpoint
    pub fn api_url(&self) -> String {
        self.inner.api_url()
    }

    /// Bus on which replies of fire-and-forget actions are published
    pub fn events(&self) -> &EventBus<ApiEvent> {
        &self.inner.events
    }

    // ------------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------------

    /// Sets the credential header to `login ":" sha256hex(password)`
    pub fn set_auth(&self, login: &str, password: &str) {
        let value = format!("{}:{}", login, sha256_hex(password.as_bytes()));
        self.set_auth_raw(value);
    }

    /// Sets the credential header verbatim
    pub fn set_auth_raw(&self, value: impl Into<String>) {
        *self
            .inner
            .auth
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(value.into());
        debug!("Updated MinicloudClient credentials");
    }

    /// Current credential header value
    pub fn auth(&self) -> Option<String> {
        self.inner.auth()
    }

    /// Allocates the next correlation id
    pub fn next_action_id(&self) -> ActionId {
        ActionId::from(self.inner.counter.fetch_add(1, Ordering::Relaxed))
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    /// Runs `action` and waits for its reply
    ///
    /// # Arguments
    /// * `action` - API action name, e.g. `"get_path"`
    /// * `params` - Additional form fields
    /// * `action_id` - Correlation id; a fresh one is allocated when `None`
    ///
    /// # Returns
    /// The decoded reply. Transport failures become
    /// [`ApiEvent::ConnectionError`] and rejected credentials become
    /// [`ApiEvent::Unauthorized`], both carrying the action id.
    pub async fn request(
        &self,
        action: &str,
        params: Params,
        action_id: Option<ActionId>,
    ) -> ApiEvent {
        let action_id = action_id.unwrap_or_else(|| self.next_action_id());
        self.inner.request(action, params, action_id).await
    }

    /// Runs `action` on its own task and publishes the reply on the bus
    ///
    /// # Returns
    /// The correlation id the reply will carry
    pub fn dispatch(&self, action: &str, params: Params) -> ActionId {
        let action_id = self.next_action_id();
        self.dispatch_as(action, params, action_id.clone());
        action_id
    }

    /// Like [`dispatch`](Self::dispatch) with a caller-chosen correlation id
    pub fn dispatch_as(&self, action: &str, params: Params, action_id: ActionId) {
        let inner = Arc::clone(&self.inner);
        let action = action.to_string();

        tokio::spawn(async move {
            let event = inner.request(&action, params, action_id).await;
            let failures = inner.events.publish(&event);
            if failures > 0 {
                debug!(action = %action, failures, "Some listeners failed on reply");
            }
        });
    }

    /// Requests the folder at `path`
    ///
    /// # Arguments
    /// * `path` - Remote folder path; empty for the root
    /// * `recursive` - Ask for every descendant folder and file
    pub fn get_path(&self, path: &str, recursive: bool) -> ActionId {
        self.dispatch("get_path", path_params("path", path.to_string(), recursive))
    }

    /// Requests the folder at `path` under an already allocated id
    pub fn get_path_as(&self, path: &str, recursive: bool, action_id: ActionId) {
        self.dispatch_as(
            "get_path",
            path_params("path", path.to_string(), recursive),
            action_id,
        );
    }

    /// Requests the folder with the given id
    pub fn get_path_by_id(&self, id: PathId, recursive: bool) -> ActionId {
        self.dispatch("get_path", path_params("id", id.to_string(), recursive))
    }

    /// Requests the authenticated user
    pub fn get_user(&self) -> ActionId {
        self.dispatch("get_user", Vec::new())
    }

    /// Requests the server description
    pub fn get_server_info(&self) -> ActionId {
        self.dispatch("get_server_info", Vec::new())
    }

    /// Requests deletion of `files`
    pub fn delete_files(&self, files: &[FileId]) -> ActionId {
        let params = files
            .iter()
            .map(|id| ("files[]".to_string(), id.to_string()))
            .collect();
        self.dispatch("delete_files", params)
    }
}

fn path_params(key: &str, value: String, recursive: bool) -> Params {
    let mut params = vec![(key.to_string(), value)];
    if recursive {
        params.push(("recursive".to_string(), "1".to_string()));
    }
    params
}

impl std::fmt::Debug for MinicloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinicloudClient")
            .field("server", &self.inner.server)
            .field("authenticated", &self.inner.auth().is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Inner
// ============================================================================

impl Inner {
    pub(crate) fn api_url(&self) -> String {
        format!("{}/api.php", self.server)
    }

    pub(crate) fn auth(&self) -> Option<String> {
        self.auth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adds the credential header when one is set
    pub(crate) fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.auth() {
            Some(auth) => builder.header(AUTH_HEADER, auth),
            None => builder,
        }
    }

    #[tracing::instrument(skip(self, params, action_id), fields(action_id = %action_id))]
    async fn request(&self, action: &str, params: Params, action_id: ActionId) -> ApiEvent {
        let mut form: Params = Vec::with_capacity(params.len() + 2);
        form.push(("action".to_string(), action.to_string()));
        form.push(("action_id".to_string(), action_id.to_string()));
        form.extend(params);

        let request = self
            .authorize(self.http.post(self.api_url()))
            .timeout(self.request_timeout)
            .form(&form);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Request failed");
                return ApiEvent::ConnectionError {
                    action_id: Some(action_id),
                    reason: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to read reply");
                return ApiEvent::ConnectionError {
                    action_id: Some(action_id),
                    reason: e.to_string(),
                };
            }
        };

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(status = status.as_u16(), "Credentials rejected");
            return ApiEvent::Unauthorized {
                action_id: Some(action_id),
                message: body,
            };
        }
        if !status.is_success() {
            debug!(status = status.as_u16(), "Non-success status, decoding body anyway");
        }

        let event = response::decode(&body);
        debug!(kind = event.kind(), "Received reply");
        event
    }
}
