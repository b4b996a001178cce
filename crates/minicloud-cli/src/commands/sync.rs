//! Sync command - Synchronize configured folders with the server
//!
//! Provides the `minicloud sync` CLI command which:
//! 1. Loads the configuration and the folder list
//! 2. Logs in and unlocks the user's content key
//! 3. Runs one pass per selected folder, printing transfers as they happen
//! 4. Records the completion time of every finished pass in the folder list

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Result};
use clap::Args;
use tokio::sync::mpsc;
use tracing::{info, warn};

use minicloud_core::config::{Config, FolderStore};
use minicloud_core::domain::SyncFolderConfig;
use minicloud_core::ports::IRemoteClient;
use minicloud_sync::{DownloadEvent, SyncEvent, SyncFolder, UploadEvent};

use super::folders::absolute;
use crate::output::{human_bytes, plural, Printer};
use crate::session::{self, Session};
use crate::GlobalOptions;

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Synchronize only the folder with this local path
    #[arg(long)]
    pub folder: Option<PathBuf>,

    /// Environment variable holding the account password
    #[arg(long, default_value = session::DEFAULT_PASSWORD_ENV)]
    pub password_env: String,

    /// End a folder's pass at the first failed transfer instead of skipping it
    #[arg(long)]
    pub abort_on_error: bool,
}

/// Outcome of one folder's pass
#[derive(Debug, Default)]
struct FolderReport {
    local: PathBuf,
    remote: String,
    downloaded: usize,
    uploaded: usize,
    bytes_down: u64,
    bytes_up: u64,
    /// Bytes of the transfer currently running in each direction
    current_down: u64,
    current_up: u64,
    errors: Vec<String>,
    /// Completion time in epoch milliseconds, set when the pass finished
    last: Option<i64>,
    interrupted: bool,
    duration_ms: u128,
}

impl FolderReport {
    fn new(folder: &SyncFolderConfig) -> Self {
        Self {
            local: folder.local.clone(),
            remote: folder.remote.clone(),
            ..Default::default()
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "local": self.local.display().to_string(),
            "remote": self.remote,
            "completed": self.last.is_some(),
            "last": self.last,
            "files_downloaded": self.downloaded,
            "files_uploaded": self.uploaded,
            "bytes_downloaded": self.bytes_down,
            "bytes_uploaded": self.bytes_up,
            "errors": self.errors,
            "duration_ms": self.duration_ms,
        })
    }
}

/// Reason a pass ended early, for events that end it
fn abort_reason(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::MkdirFailed { path } => {
            Some(format!("could not create directory {}", path.display()))
        }
        SyncEvent::ChecksumFailed { path } => Some(format!("could not read {}", path.display())),
        SyncEvent::EncryptionFailed { reason } => Some(format!("encryption unavailable: {}", reason)),
        SyncEvent::RemoteFailed { reason } => Some(format!("remote tree unavailable: {}", reason)),
        SyncEvent::Failed { reason } => Some(reason.clone()),
        _ => None,
    }
}

impl SyncCommand {
    /// Execute the sync command
    pub async fn execute(&self, options: &GlobalOptions) -> Result<()> {
        let formatter = options.formatter();

        let config = Config::load_or_default(&options.config_path);
        let errors = config.validate();
        if !errors.is_empty() {
            for error in &errors {
                formatter.error(&error.to_string());
            }
            return Ok(());
        }
        info!(config_path = %options.config_path.display(), "Loaded configuration");

        let mut store = FolderStore::load(&config.sync.folders_file)?;
        let folders: Vec<SyncFolderConfig> = match &self.folder {
            Some(local) => {
                let local = absolute(local)?;
                match store.get(&local) {
                    Some(folder) => vec![folder.clone()],
                    None => {
                        formatter.error(&format!("No folder configured for {}", local.display()));
                        return Ok(());
                    }
                }
            }
            None => store.folders().to_vec(),
        };
        if folders.is_empty() {
            formatter.error("No folders configured. Add one with 'minicloud folders add'.");
            return Ok(());
        }

        let session = match self.open_session(&config).await {
            Ok(session) => session,
            Err(e) => {
                formatter.error(&format!("{:#}", e));
                return Ok(());
            }
        };
        formatter.success(&format!(
            "Logged in as {} on {}",
            session.user.name(),
            session.server.name
        ));

        let mut reports = Vec::with_capacity(folders.len());
        for folder in folders {
            formatter.info(&format!(
                "Synchronizing {} <-> {}",
                folder.local.display(),
                folder.remote
            ));
            let report = self
                .run_folder(&session, &config, folder, &formatter)
                .await?;

            if let Some(last) = report.last {
                if store.update_last(&report.local, last) {
                    store.save()?;
                }
            }
            let interrupted = report.interrupted;
            reports.push(report);
            if interrupted {
                formatter.warn("Interrupted, remaining folders skipped");
                break;
            }
        }

        self.print_summary(&reports, options, &formatter);
        Ok(())
    }

    async fn open_session(&self, config: &Config) -> Result<Session> {
        let password = session::read_password(&self.password_env)?;
        session::login(config, &password).await
    }

    /// Runs one pass and collects what happened
    #[tracing::instrument(skip_all, fields(local = %folder.local.display(), remote = %folder.remote))]
    async fn run_folder(
        &self,
        session: &Session,
        config: &Config,
        folder: SyncFolderConfig,
        formatter: &Printer,
    ) -> Result<FolderReport> {
        let mut report = FolderReport::new(&folder);
        let started = Instant::now();

        let remote: Arc<dyn IRemoteClient> = Arc::new(session.client.clone());
        let engine = SyncFolder::new(folder, remote)?;
        engine.set_user(session.user.clone());
        engine.set_encryption(config.sync.encryption.clone());
        engine.set_time_offset(session::time_offset(config, &session.server));

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.events().subscribe_fn(move |event: &SyncEvent| {
            tx.send(event.clone())
                .map_err(|_| anyhow!("sync output closed"))
        });

        if !engine.sync() {
            bail!("A pass is already running for {}", report.local.display());
        }

        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, stopping pass");
                    report.interrupted = true;
                    engine.stop();
                    continue;
                }
            };
            let Some(event) = event else {
                break;
            };

            match event {
                SyncEvent::External(_) => {}
                SyncEvent::Upload(event) => self.on_upload(&engine, event, &mut report, formatter),
                SyncEvent::Download(event) => {
                    self.on_download(&engine, event, &mut report, formatter)
                }
                SyncEvent::Done { last } => {
                    report.last = Some(last);
                    break;
                }
                SyncEvent::Stopped => break,
                other => {
                    if let Some(reason) = abort_reason(&other) {
                        formatter.error(&reason);
                        report.errors.push(reason);
                    }
                    break;
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis();
        Ok(report)
    }

    /// Skips past a failed transfer, or ends the pass with `--abort-on-error`
    fn recover(&self, engine: &SyncFolder) {
        if self.abort_on_error {
            engine.stop();
        } else {
            engine.continue_transfers();
        }
    }

    fn on_upload(
        &self,
        engine: &SyncFolder,
        event: UploadEvent,
        report: &mut FolderReport,
        formatter: &Printer,
    ) {
        match event {
            UploadEvent::Started { name, .. } => formatter.info(&format!("\u{2191} {}", name)),
            UploadEvent::Progress { sent, .. } => report.current_up = sent,
            UploadEvent::FileDone { .. } => {
                report.uploaded += 1;
                report.bytes_up += std::mem::take(&mut report.current_up);
            }
            UploadEvent::Failed { name, error } => {
                report.current_up = 0;
                let message = format!("upload of {} failed: {}", name, error);
                formatter.warn(&message);
                report.errors.push(message);
                self.recover(engine);
            }
            UploadEvent::Stopped | UploadEvent::AllDone => {}
        }
    }

    fn on_download(
        &self,
        engine: &SyncFolder,
        event: DownloadEvent,
        report: &mut FolderReport,
        formatter: &Printer,
    ) {
        match event {
            DownloadEvent::Started { name, .. } => formatter.info(&format!("\u{2193} {}", name)),
            DownloadEvent::Progress { downloaded, .. } => report.current_down = downloaded,
            DownloadEvent::FileDone { .. } => {
                report.downloaded += 1;
                report.bytes_down += std::mem::take(&mut report.current_down);
            }
            DownloadEvent::Failed { name, error, .. } => {
                report.current_down = 0;
                let message = format!("download of {} failed: {}", name, error);
                formatter.warn(&message);
                report.errors.push(message);
                self.recover(engine);
            }
            DownloadEvent::Stopped | DownloadEvent::AllDone => {}
        }
    }

    fn print_summary(
        &self,
        reports: &[FolderReport],
        options: &GlobalOptions,
        formatter: &Printer,
    ) {
        if options.is_json() {
            let folders: Vec<_> = reports.iter().map(FolderReport::to_json).collect();
            formatter.json(&serde_json::json!({ "folders": folders }));
            return;
        }

        for report in reports {
            let duration = if report.duration_ms >= 1000 {
                format!("{:.1}s", report.duration_ms as f64 / 1000.0)
            } else {
                format!("{}ms", report.duration_ms)
            };

            match report.last {
                Some(_) if report.downloaded + report.uploaded == 0 && report.errors.is_empty() => {
                    formatter.success(&format!("{} is up to date", report.local.display()))
                }
                Some(_) => formatter.success(&format!(
                    "{} synchronized in {}",
                    report.local.display(),
                    duration
                )),
                None => formatter.error(&format!(
                    "{} was not synchronized",
                    report.local.display()
                )),
            }

            if report.downloaded > 0 {
                formatter.info(&format!(
                    "Downloaded: {} ({})",
                    plural(report.downloaded, "file"),
                    human_bytes(report.bytes_down)
                ));
            }
            if report.uploaded > 0 {
                formatter.info(&format!(
                    "Uploaded:   {} ({})",
                    plural(report.uploaded, "file"),
                    human_bytes(report.bytes_up)
                ));
            }
            if !report.errors.is_empty() {
                formatter.info(&format!("{} occurred:", plural(report.errors.len(), "error")));
                for err in &report.errors {
                    formatter.info(&format!("  - {}", err));
                }
            }
        }
    }
}
