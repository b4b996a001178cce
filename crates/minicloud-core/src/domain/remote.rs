//! Remote tree entities
//!
//! A [`RemotePath`] owns its child folders and files. Files keep a weak
//! back-reference to the folder that listed them (used to rebuild relative
//! paths), and versions keep a weak back-reference to their file.
//!
//! Entities are built once from the server listing (`PathListing`,
//! `FileListing`) and shared as `Arc`s between the engine and the transfer
//! queues. The only mutable field is a file's cipher configuration, which the
//! uploader rewrites as soon as it replaces the file.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::lenient;
use super::newtypes::{FileId, PathId, VersionId};

// ============================================================================
// Listings (wire representation)
// ============================================================================

fn missing_id() -> i64 {
    -1
}

/// Folder as returned by `get_path`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathListing {
    #[serde(default = "missing_id", deserialize_with = "lenient::i64_or_string")]
    pub id: i64,
    #[serde(default = "missing_id", deserialize_with = "lenient::i64_or_string")]
    pub parent_id: i64,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    /// Creation time, epoch seconds
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub mktime: Option<i64>,
    /// Modification time, epoch seconds
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub mdtime: Option<i64>,
    #[serde(default)]
    pub files: Vec<FileListing>,
    #[serde(default)]
    pub paths: Vec<PathListing>,
}

/// File as returned inside a folder listing or by `get_file`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileListing {
    #[serde(deserialize_with = "lenient::i64_or_string")]
    pub id: i64,
    #[serde(default, deserialize_with = "lenient::u64_or_string")]
    pub size: u64,
    pub filename: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub mktime: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub mdtime: Option<i64>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub public: bool,
    /// Id of the current version
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub version: Option<i64>,
    #[serde(default)]
    pub versions: Vec<VersionListing>,
}

/// One stored version of a file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionListing {
    #[serde(deserialize_with = "lenient::i64_or_string")]
    pub version: i64,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub created: Option<i64>,
}

fn from_epoch_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_default()
}

/// Returns `path` relative to `root`, both taken as `/`-separated strings.
///
/// Leading and trailing slashes are ignored on both sides and the result never
/// starts with `/`. A path outside `root` is returned whole.
pub fn relative_to(path: &str, root: &str) -> String {
    let path = path.trim_matches('/');
    let root = root.trim_matches('/');

    if root.is_empty() {
        return path.to_string();
    }
    if path == root {
        return String::new();
    }
    match path.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
        _ => path.to_string(),
    }
}

fn join_relative(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}

// ============================================================================
// RemoteFileVersion
// ============================================================================

/// A stored version of a remote file. Immutable once created.
#[derive(Debug)]
pub struct RemoteFileVersion {
    id: VersionId,
    created: DateTime<Utc>,
    file: Weak<RemoteFile>,
}

impl RemoteFileVersion {
    pub fn id(&self) -> VersionId {
        self.id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// The file this version belongs to, while the tree is alive
    pub fn file(&self) -> Option<Arc<RemoteFile>> {
        self.file.upgrade()
    }
}

// ============================================================================
// RemoteFile
// ============================================================================

/// A file stored on the server
#[derive(Debug)]
pub struct RemoteFile {
    id: FileId,
    size: u64,
    name: String,
    path: Option<String>,
    checksum: Option<String>,
    encryption: RwLock<String>,
    public: bool,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    versions: Vec<Arc<RemoteFileVersion>>,
    current: Option<usize>,
    parent: Weak<RemotePath>,
}

impl RemoteFile {
    /// Builds a file that is not attached to any folder listing
    pub fn from_listing(listing: FileListing) -> Arc<Self> {
        Self::build(listing, Weak::new())
    }

    fn build(listing: FileListing, parent: Weak<RemotePath>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<RemoteFile>| {
            let versions: Vec<Arc<RemoteFileVersion>> = listing
                .versions
                .iter()
                .map(|v| {
                    Arc::new(RemoteFileVersion {
                        id: VersionId::new(v.version),
                        created: from_epoch_secs(v.created.unwrap_or(0)),
                        file: me.clone(),
                    })
                })
                .collect();
            let current = listing
                .version
                .and_then(|id| versions.iter().position(|v| v.id.get() == id));

            let created = from_epoch_secs(listing.mktime.unwrap_or(0));
            let modified = listing.mdtime.map(from_epoch_secs).unwrap_or(created);

            RemoteFile {
                id: FileId::new(listing.id),
                size: listing.size,
                name: listing.filename,
                path: listing.path,
                checksum: listing.checksum.filter(|c| !c.is_empty()),
                encryption: RwLock::new(listing.encryption.unwrap_or_default()),
                public: listing.public,
                created,
                modified,
                versions,
                current,
                parent,
            }
        })
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// File name, without folder
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Folder path reported by the server, if any
    pub fn folder_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Fingerprint of the unencrypted content
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Cipher configuration the content is stored with; empty when plain
    pub fn encryption(&self) -> String {
        self.encryption
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_encrypted(&self) -> bool {
        !self
            .encryption
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Updates the local record of the cipher configuration
    pub fn set_encryption(&self, config: &str) {
        *self
            .encryption
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.to_string();
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn versions(&self) -> &[Arc<RemoteFileVersion>] {
        &self.versions
    }

    /// The version the server marks as current
    pub fn current_version(&self) -> Option<Arc<RemoteFileVersion>> {
        self.current.map(|i| Arc::clone(&self.versions[i]))
    }

    /// Folder that listed this file, while the tree is alive
    pub fn parent(&self) -> Option<Arc<RemotePath>> {
        self.parent.upgrade()
    }

    /// Extension after the last dot, empty when there is none
    pub fn extension(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((_, ext)) => ext,
            None => "",
        }
    }

    /// Path of this file relative to the remote folder `root`
    pub fn relative_path(&self, root: &str) -> String {
        let folder = match self.parent() {
            Some(parent) => parent.relative_path(root),
            None => relative_to(self.path.as_deref().unwrap_or_default(), root),
        };
        join_relative(&folder, &self.name)
    }
}

// ============================================================================
// RemotePath
// ============================================================================

/// A folder on the server together with its listed children
#[derive(Debug)]
pub struct RemotePath {
    id: PathId,
    parent_id: PathId,
    name: Option<String>,
    path: Option<String>,
    checksum: Option<String>,
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    files: Vec<Arc<RemoteFile>>,
    paths: Vec<Arc<RemotePath>>,
}

impl RemotePath {
    /// Builds the folder tree described by `listing`
    pub fn from_listing(listing: PathListing) -> Arc<Self> {
        let PathListing {
            id,
            parent_id,
            path,
            checksum,
            mktime,
            mdtime,
            files,
            paths,
        } = listing;

        Arc::new_cyclic(|me: &Weak<RemotePath>| {
            let name = path
                .as_deref()
                .and_then(|p| p.trim_end_matches('/').rsplit('/').next())
                .filter(|n| !n.is_empty())
                .map(str::to_string);

            RemotePath {
                id: PathId::new(id),
                parent_id: PathId::new(parent_id),
                name,
                path,
                checksum,
                created: mktime.filter(|t| *t > 0).map(from_epoch_secs),
                modified: mdtime.filter(|t| *t > 0).map(from_epoch_secs),
                files: files
                    .into_iter()
                    .map(|f| RemoteFile::build(f, me.clone()))
                    .collect(),
                paths: paths.into_iter().map(RemotePath::from_listing).collect(),
            }
        })
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    pub fn parent_id(&self) -> PathId {
        self.parent_id
    }

    /// Last segment of the folder path
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    /// Files directly inside this folder
    pub fn files(&self) -> &[Arc<RemoteFile>] {
        &self.files
    }

    /// Child folders
    pub fn paths(&self) -> &[Arc<RemotePath>] {
        &self.paths
    }

    /// All files in this folder and every descendant, own files first
    pub fn all_files(&self) -> Vec<Arc<RemoteFile>> {
        let mut out = self.files.clone();
        for child in &self.paths {
            out.extend(child.all_files());
        }
        out
    }

    /// Looks up a file anywhere below this folder
    pub fn find_file(&self, id: FileId) -> Option<Arc<RemoteFile>> {
        self.files
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .or_else(|| self.paths.iter().find_map(|p| p.find_file(id)))
    }

    /// Path of this folder relative to the remote folder `root`
    pub fn relative_path(&self, root: &str) -> String {
        relative_to(self.path.as_deref().unwrap_or_default(), root)
    }
}
