//! Info command - Show server information

use anyhow::Result;
use clap::Args;
use tracing::info;

use minicloud_api::MinicloudClient;
use minicloud_core::config::Config;

use crate::session;
use crate::GlobalOptions;

#[derive(Debug, Args)]
pub struct InfoCommand {
    /// Query this server instead of the configured one
    #[arg(long)]
    pub server: Option<String>,
}

impl InfoCommand {
    pub async fn execute(&self, options: &GlobalOptions) -> Result<()> {
        let formatter = options.formatter();
        let mut config = Config::load_or_default(&options.config_path);
        if let Some(server) = &self.server {
            config.server.url = server.clone();
        }

        info!(server = %config.server.url, "Querying server information");
        let client = MinicloudClient::from_config(&config.server)?;
        let server = match session::server_info(&client).await {
            Ok(server) => server,
            Err(e) => {
                formatter.error(&e.to_string());
                return Ok(());
            }
        };

        if options.is_json() {
            formatter.json(&serde_json::json!({
                "url": client.server(),
                "name": server.name,
                "description": server.description,
                "logo": server.logo,
                "nice_url": server.nice_url,
                "time": server.time.to_rfc3339(),
                "offset_ms": server.offset_millis(),
            }));
        } else {
            formatter.success(&format!("{} ({})", server.name, client.server()));
            if !server.description.is_empty() {
                formatter.info(&server.description);
            }
            formatter.info(&format!(
                "Server time: {} ({})",
                server.time.format("%Y-%m-%d %H:%M:%S UTC"),
                session::describe_offset(&server)
            ));
            formatter.info(&format!(
                "Pretty URLs: {}",
                if server.nice_url { "yes" } else { "no" }
            ));
        }

        Ok(())
    }
}
