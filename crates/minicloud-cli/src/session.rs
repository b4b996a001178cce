//! Logging in to the server
//!
//! Uses the awaitable [`MinicloudClient::request`] so the CLI can run the
//! handshake sequentially before any engine is started.

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};

use minicloud_api::MinicloudClient;
use minicloud_core::config::Config;
use minicloud_core::domain::{ServerInfo, User};
use minicloud_core::ports::ApiEvent;

/// Environment variable read when `--password-env` is not given
pub const DEFAULT_PASSWORD_ENV: &str = "MINICLOUD_PASSWORD";

/// An authenticated client with the user's content key unlocked
pub struct Session {
    pub client: MinicloudClient,
    pub user: User,
    pub server: ServerInfo,
}

/// Reads the account password from the environment variable `var`
pub fn read_password(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(password) if !password.is_empty() => Ok(password),
        _ => bail!("No password given. Set the {} environment variable.", var),
    }
}

/// Turns an unexpected reply into an error naming the action
fn unexpected(action: &str, event: ApiEvent) -> anyhow::Error {
    match event {
        ApiEvent::Error { message, .. } => anyhow!(
            "{} failed: {}",
            action,
            message.unwrap_or_else(|| "malformed reply".to_string())
        ),
        ApiEvent::Unauthorized { message, .. } => {
            anyhow!("{} rejected the credentials: {}", action, message)
        }
        ApiEvent::ConnectionError { reason, .. } => {
            anyhow!("{} could not reach the server: {}", action, reason)
        }
        other => anyhow!("{} returned an unexpected {} reply", action, other.kind()),
    }
}

/// Fetches the server description; no credentials needed
pub async fn server_info(client: &MinicloudClient) -> Result<ServerInfo> {
    match client.request("get_server_info", Vec::new(), None).await {
        ApiEvent::ServerInfo { info, .. } => {
            debug!(offset_ms = info.offset_millis(), "Received server info");
            Ok(info)
        }
        other => Err(unexpected("get_server_info", other)),
    }
}

/// Logs in as the configured user and unlocks their content key
///
/// # Arguments
/// * `config` - Application configuration (server and sync sections)
/// * `password` - Account password
///
/// # Errors
/// Fails when the server is unreachable, rejects the credentials, or the
/// stored content key cannot be decrypted with `password`.
#[tracing::instrument(skip(config, password), fields(server = %config.server.url, login = %config.server.login))]
pub async fn login(config: &Config, password: &str) -> Result<Session> {
    if config.server.login.is_empty() {
        bail!("No login configured. Set server.login in the configuration file.");
    }

    let client = MinicloudClient::from_config(&config.server)?;
    client.set_auth(&config.server.login, password);

    let mut user = match client.request("get_user", Vec::new(), None).await {
        ApiEvent::User { user, .. } => *user,
        other => return Err(unexpected("get_user", other)),
    };
    user.set_password(password, &config.sync.password_salt, true)
        .context("Failed to unlock the content key")?;

    let server = server_info(&client).await?;
    info!(user = %user.name(), server = %server.name, "Logged in");

    Ok(Session {
        client,
        user,
        server,
    })
}

/// Time offset to apply to remote timestamps, in milliseconds
pub fn time_offset(config: &Config, server: &ServerInfo) -> i64 {
    if config.sync.use_server_time {
        server.offset_millis()
    } else {
        0
    }
}

/// Offset of the server clock relative to the local one
pub fn describe_offset(server: &ServerInfo) -> String {
    let seconds = server.offset().num_seconds();
    match seconds {
        0 => "in sync".to_string(),
        s if s > 0 => format!("{}s behind", s),
        s => format!("{}s ahead", -s),
    }
}
