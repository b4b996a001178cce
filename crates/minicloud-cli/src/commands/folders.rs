//! Folders command - Manage the list of synchronized folders
//!
//! Provides the `minicloud folders` CLI command which:
//! 1. Lists configured folder pairs and when they were last synchronized
//! 2. Adds a pair, validating the local path and exclusion pattern
//! 3. Removes a pair by its local path

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use minicloud_core::config::{Config, FolderStore};
use minicloud_core::domain::SyncFolderConfig;

use crate::output::{human_bytes, plural};
use crate::GlobalOptions;

#[derive(Debug, Subcommand)]
pub enum FoldersCommand {
    /// List synchronized folders
    List,
    /// Add a folder pair
    Add {
        /// Local directory
        local: PathBuf,
        /// Remote folder path
        remote: String,
        /// Skip files larger than this many bytes (0 = no limit)
        #[arg(long, default_value_t = 0)]
        max_size: u64,
        /// Skip files whose relative path matches this pattern
        #[arg(long)]
        regexp: Option<String>,
    },
    /// Remove a folder pair
    Remove {
        /// Local directory of the pair
        local: PathBuf,
    },
}

/// Makes `path` absolute against the current directory
pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("Failed to determine the current directory")?
            .join(path))
    }
}

fn describe_last(folder: &SyncFolderConfig) -> String {
    match folder.last_sync() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "never".to_string(),
    }
}

fn folder_json(folder: &SyncFolderConfig) -> serde_json::Value {
    serde_json::json!({
        "local": folder.local.display().to_string(),
        "remote": folder.remote,
        "last": folder.last,
        "max_size": folder.max_size,
        "regexp": folder.regexp,
    })
}

impl FoldersCommand {
    pub async fn execute(&self, options: &GlobalOptions) -> Result<()> {
        let config = Config::load_or_default(&options.config_path);
        let mut store = FolderStore::load(&config.sync.folders_file)?;

        match self {
            FoldersCommand::List => Self::execute_list(&store, options),
            FoldersCommand::Add {
                local,
                remote,
                max_size,
                regexp,
            } => {
                let mut folder = SyncFolderConfig::new(absolute(local)?, remote.clone());
                folder.max_size = *max_size;
                folder.regexp = regexp.clone();
                Self::execute_add(&mut store, folder, options)
            }
            FoldersCommand::Remove { local } => {
                Self::execute_remove(&mut store, &absolute(local)?, options)
            }
        }
    }

    fn execute_list(store: &FolderStore, options: &GlobalOptions) -> Result<()> {
        let formatter = options.formatter();

        if options.is_json() {
            let folders: Vec<_> = store.folders().iter().map(folder_json).collect();
            formatter.json(&serde_json::json!({
                "file": store.path().display().to_string(),
                "folders": folders,
            }));
            return Ok(());
        }

        if store.folders().is_empty() {
            formatter.info("No folders configured. Add one with 'minicloud folders add'.");
            return Ok(());
        }

        formatter.success(&plural(store.folders().len(), "folder"));
        for folder in store.folders() {
            formatter.info(&format!(
                "{} <-> {}",
                folder.local.display(),
                folder.remote
            ));
            formatter.info(&format!("  last sync: {}", describe_last(folder)));
            if folder.max_size > 0 {
                formatter.info(&format!("  max size:  {}", human_bytes(folder.max_size)));
            }
            if let Some(pattern) = &folder.regexp {
                formatter.info(&format!("  excluding: {}", pattern));
            }
        }
        Ok(())
    }

    fn execute_add(
        store: &mut FolderStore,
        folder: SyncFolderConfig,
        options: &GlobalOptions,
    ) -> Result<()> {
        let formatter = options.formatter();
        let description = format!("{} <-> {}", folder.local.display(), folder.remote);
        let json = folder_json(&folder);

        if let Err(e) = store.add(folder) {
            formatter.error(&e.to_string());
            return Ok(());
        }
        store.save()?;
        info!(folder = %description, "Added sync folder");

        if options.is_json() {
            formatter.json(&serde_json::json!({"success": true, "added": json}));
        } else {
            formatter.success(&format!("Added {}", description));
        }
        Ok(())
    }

    fn execute_remove(store: &mut FolderStore, local: &Path, options: &GlobalOptions) -> Result<()> {
        let formatter = options.formatter();

        let Some(removed) = store.remove(local) else {
            formatter.error(&format!("No folder configured for {}", local.display()));
            return Ok(());
        };
        store.save()?;
        info!(local = %local.display(), "Removed sync folder");

        if options.is_json() {
            formatter.json(&serde_json::json!({
                "success": true,
                "removed": folder_json(&removed),
            }));
        } else {
            formatter.success(&format!(
                "Removed {} <-> {}",
                removed.local.display(),
                removed.remote
            ));
        }
        Ok(())
    }
}
