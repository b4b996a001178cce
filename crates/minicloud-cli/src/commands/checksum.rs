//! Checksum command - Print the content fingerprint of local files
//!
//! The fingerprint is the one the server stores for unencrypted content,
//! so it can be compared with the `checksum` of a remote file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use minicloud_core::checksum::file_fingerprint;

use crate::GlobalOptions;

#[derive(Debug, Args)]
pub struct ChecksumCommand {
    /// Files to fingerprint
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl ChecksumCommand {
    pub async fn execute(&self, options: &GlobalOptions) -> Result<()> {
        let formatter = options.formatter();

        let mut results = Vec::with_capacity(self.files.len());
        for path in &self.files {
            let owned = path.clone();
            let checksum = tokio::task::spawn_blocking(move || file_fingerprint(&owned))
                .await?
                .with_context(|| format!("Failed to read {}", path.display()))?;
            results.push((path, checksum));
        }

        if options.is_json() {
            let json: Vec<serde_json::Value> = results
                .iter()
                .map(|(path, checksum)| {
                    serde_json::json!({"file": path.display().to_string(), "checksum": checksum})
                })
                .collect();
            formatter.json(&serde_json::Value::Array(json));
        } else {
            for (path, checksum) in &results {
                println!("{}  {}", checksum, path.display());
            }
        }

        Ok(())
    }
}
