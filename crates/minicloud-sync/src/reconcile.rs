//! Reconciliation of a remote tree against a local directory
//!
//! [`plan`] compares one remote folder listing with the local root of a
//! [`SyncFolderConfig`] and decides, per file, whether to download, upload
//! or leave it alone. It touches the filesystem only to read metadata and
//! fingerprints and to create the parent directories of planned downloads.
//! The engine runs it on a blocking worker.
//!
//! ## Rules
//!
//! 1. Remote files shadowed by a same-named sibling with a later
//!    modification time are ignored; on a tie the first listed one wins.
//! 2. Files over the size limit or matching the exclusion pattern are
//!    skipped in both directions.
//! 3. A remote file with no local counterpart is downloaded. When both
//!    exist and their fingerprints differ, a strictly newer local file is
//!    uploaded as a new version of the remote one; otherwise the remote
//!    content wins.
//! 4. Local files with no remote counterpart are uploaded into the matching
//!    remote folder.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use minicloud_core::checksum::file_fingerprint;
use minicloud_core::domain::{RemoteFile, RemotePath, SyncFolderConfig};

use crate::downloader::DownloadItem;
use crate::uploader::UploadItem;
use crate::SyncError;

// ============================================================================
// Plan
// ============================================================================

/// A remote file to fetch into `target`
#[derive(Debug, Clone)]
pub struct PlannedDownload {
    pub file: Arc<RemoteFile>,
    pub target: PathBuf,
}

impl PlannedDownload {
    pub fn into_item(self) -> DownloadItem {
        DownloadItem::new(self.file).to_path(self.target)
    }
}

/// A local file to send
#[derive(Debug, Clone)]
pub enum PlannedUpload {
    /// Newer local content for an existing remote file
    Replace {
        local: PathBuf,
        existing: Arc<RemoteFile>,
    },
    /// A file the server does not have yet
    New { local: PathBuf, target_folder: String },
}

impl PlannedUpload {
    pub fn local(&self) -> &Path {
        match self {
            Self::Replace { local, .. } | Self::New { local, .. } => local,
        }
    }

    pub fn into_item(self) -> UploadItem {
        match self {
            Self::Replace { local, existing } => UploadItem::file(local).replacing(existing),
            Self::New {
                local,
                target_folder,
            } => UploadItem::file(local).to_folder(target_folder).public(false),
        }
    }
}

/// Outcome of one reconciliation
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub downloads: Vec<PlannedDownload>,
    pub uploads: Vec<PlannedUpload>,
    /// Files left out by the size or pattern filters
    pub skipped: usize,
}

impl SyncPlan {
    /// True when nothing needs to be transferred
    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty() && self.uploads.is_empty()
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Diffs `tree` against the local root of `config`
///
/// # Arguments
/// * `config` - Folder pair, filters and clock-skew offset
/// * `exclusion` - Compiled exclusion pattern of `config`
/// * `tree` - Recursive listing of `config.remote`; `None` for an empty folder
///
/// # Errors
/// * [`SyncError::MkdirFailed`] - the parent of a planned download could
///   not be created
/// * [`SyncError::ChecksumFailed`] - a local file could not be read
pub fn plan(
    config: &SyncFolderConfig,
    exclusion: Option<&Regex>,
    tree: Option<&RemotePath>,
) -> Result<SyncPlan, SyncError> {
    let mut plan = SyncPlan::default();
    let files = tree.map(RemotePath::all_files).unwrap_or_default();

    // Every remote file claims its local path, shadowed duplicates included,
    // so none of them is mistaken for a new local file.
    let mut expected: HashSet<PathBuf> = HashSet::with_capacity(files.len());

    for file in &files {
        let relative = file.relative_path(&config.remote);
        let Some(local) = local_path(&config.local, &relative) else {
            warn!(path = %relative, "Skipping remote file with unsafe name");
            plan.skipped += 1;
            continue;
        };
        expected.insert(local.clone());

        if is_superseded(file) {
            debug!(path = %relative, "Skipping shadowed duplicate");
            continue;
        }
        if is_filtered(config, exclusion, &relative, file.size()) {
            plan.skipped += 1;
            continue;
        }

        if !local.exists() {
            ensure_parent(&local)?;
            plan.downloads.push(PlannedDownload {
                file: Arc::clone(file),
                target: local,
            });
            continue;
        }

        let checksum = file_fingerprint(&local).map_err(|source| SyncError::ChecksumFailed {
            path: local.clone(),
            source,
        })?;
        if file.checksum() == Some(checksum.as_str()) {
            continue;
        }

        let local_ms = modified_millis(&local)?;
        let remote_ms = file.modified().timestamp_millis() + config.time_offset_ms;
        if local_ms > remote_ms {
            debug!(path = %relative, local_ms, remote_ms, "Local copy is newer");
            plan.uploads.push(PlannedUpload::Replace {
                local,
                existing: Arc::clone(file),
            });
        } else {
            debug!(path = %relative, local_ms, remote_ms, "Remote copy wins");
            plan.downloads.push(PlannedDownload {
                file: Arc::clone(file),
                target: local,
            });
        }
    }

    scan_local(config, exclusion, &expected, &mut plan)?;

    info!(
        downloads = plan.downloads.len(),
        uploads = plan.uploads.len(),
        skipped = plan.skipped,
        "Reconciliation planned"
    );
    Ok(plan)
}

/// Queues every local file the remote tree does not know about
fn scan_local(
    config: &SyncFolderConfig,
    exclusion: Option<&Regex>,
    expected: &HashSet<PathBuf>,
    plan: &mut SyncPlan,
) -> Result<(), SyncError> {
    for entry in WalkDir::new(&config.local).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(&config.local).to_path_buf();
            SyncError::ChecksumFailed {
                path,
                source: e.into(),
            }
        })?;
        if !entry.file_type().is_file() || expected.contains(entry.path()) {
            continue;
        }

        let path = entry.path().to_path_buf();
        let size = entry
            .metadata()
            .map_err(|e| SyncError::ChecksumFailed {
                path: path.clone(),
                source: e.into(),
            })?
            .len();
        let relative = relative_local(&config.local, &path);
        if is_filtered(config, exclusion, &relative, size) {
            plan.skipped += 1;
            continue;
        }

        let folder = match relative.rsplit_once('/') {
            Some((folder, _)) => folder,
            None => "",
        };
        plan.uploads.push(PlannedUpload::New {
            local: path,
            target_folder: normalize_remote(&format!("{}/{}", config.remote, folder)),
        });
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn is_filtered(
    config: &SyncFolderConfig,
    exclusion: Option<&Regex>,
    relative: &str,
    size: u64,
) -> bool {
    if config.exceeds_size(size) {
        debug!(path = %relative, size, "Skipping file over size limit");
        return true;
    }
    if exclusion.is_some_and(|re| re.is_match(relative)) {
        debug!(path = %relative, "Skipping excluded file");
        return true;
    }
    false
}

/// True when a same-named sibling has a later modification time, or the same
/// one and comes first in the listing
fn is_superseded(file: &RemoteFile) -> bool {
    let Some(parent) = file.parent() else {
        return false;
    };
    let mut before = true;
    for sibling in parent.files() {
        if std::ptr::eq(Arc::as_ptr(sibling), file) {
            before = false;
            continue;
        }
        if sibling.name() != file.name() {
            continue;
        }
        if sibling.modified() > file.modified()
            || (before && sibling.modified() == file.modified())
        {
            return true;
        }
    }
    false
}

/// Maps a `/`-separated remote relative path under `root`
///
/// Returns `None` unless every segment is a plain name, so a listing can
/// never place a file outside `root` or on `root` itself.
fn local_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    let mut depth = 0;
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        let mut components = Path::new(segment).components();
        let plain = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none()
            && !segment.contains('\\');
        if !plain {
            return None;
        }
        path.push(segment);
        depth += 1;
    }
    (depth > 0).then_some(path)
}

/// `/`-separated path of `path` below `root`
fn relative_local(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Collapses repeated slashes and strips leading and trailing ones
pub fn normalize_remote(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn ensure_parent(path: &Path) -> Result<(), SyncError> {
    match path.parent() {
        Some(parent) if !parent.is_dir() => {
            debug!(path = %parent.display(), "Creating directory");
            fs::create_dir_all(parent).map_err(|_| SyncError::MkdirFailed(parent.to_path_buf()))
        }
        _ => Ok(()),
    }
}

fn modified_millis(path: &Path) -> Result<i64, SyncError> {
    let modified: SystemTime = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| SyncError::ChecksumFailed {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(DateTime::<Utc>::from(modified).timestamp_millis())
}
