//! Crate sources and storage backends
//!
//! A crate is loaded from a directory, a zip archive or a URL. Local sources
//! also yield a [`StorageBackend`] so rules can check that data entities
//! match what is actually stored next to the metadata.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{Result, ValidateError};
use crate::vocab::{METADATA_DESCRIPTOR_ID, METADATA_DESCRIPTOR_JSONLD_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub kind: FileKind,
    /// Size in bytes, for files
    pub size: Option<u64>,
}

impl FileInfo {
    pub fn file(size: u64) -> Self {
        Self {
            kind: FileKind::File,
            size: Some(size),
        }
    }

    pub fn directory() -> Self {
        Self {
            kind: FileKind::Directory,
            size: None,
        }
    }
}

/// Read-only view of the files packaged with a crate
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Look up a path relative to the crate root; `None` if nothing is there
    async fn file_info(&self, path: &str) -> Result<Option<FileInfo>>;
}

/// Turn an entity id like `./data/` or `data/a.csv` into relative segments
///
/// Returns `None` for paths that would leave the crate root.
fn relative_segments(path: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }
    Some(segments)
}

/// A crate unpacked in a local directory
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StorageBackend for DirectoryStorage {
    async fn file_info(&self, path: &str) -> Result<Option<FileInfo>> {
        let segments = match relative_segments(path) {
            Some(s) => s,
            None => return Ok(None),
        };
        let full: PathBuf = segments.iter().fold(self.root.clone(), |p, s| p.join(s));

        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => Ok(Some(FileInfo::directory())),
            Ok(meta) => Ok(Some(FileInfo::file(meta.len()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// A crate packaged as a zip archive
///
/// The archive index is read once; lookups do not touch the file again.
#[derive(Debug, Clone)]
pub struct ZipStorage {
    prefix: String,
    entries: HashMap<String, FileInfo>,
}

impl ZipStorage {
    pub fn open(path: &Path) -> Result<Self> {
        let mut archive = open_archive(path)?;
        let (_, prefix) = find_root_metadata_in_zip(&mut archive, path)?;
        Ok(Self::from_archive(&mut archive, prefix))
    }

    fn from_archive<R: Read + Seek>(archive: &mut ZipArchive<R>, prefix: String) -> Self {
        let mut entries = HashMap::new();
        for i in 0..archive.len() {
            let Ok(file) = archive.by_index(i) else {
                continue;
            };
            let name = file.name().trim_end_matches('/').to_string();
            let info = if file.is_dir() {
                FileInfo::directory()
            } else {
                FileInfo::file(file.size())
            };

            // Archives may omit explicit directory entries
            let mut parent = name.as_str();
            while let Some(pos) = parent.rfind('/') {
                parent = &parent[..pos];
                entries
                    .entry(parent.to_string())
                    .or_insert_with(FileInfo::directory);
            }
            entries.insert(name, info);
        }
        Self { prefix, entries }
    }

    /// Top-level directory the crate lives in, empty if at the archive root
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl StorageBackend for ZipStorage {
    async fn file_info(&self, path: &str) -> Result<Option<FileInfo>> {
        let segments = match relative_segments(path) {
            Some(s) => s,
            None => return Ok(None),
        };
        if segments.is_empty() {
            return Ok(Some(FileInfo::directory()));
        }
        let joined = segments.join("/");
        let key = if self.prefix.is_empty() {
            joined
        } else {
            format!("{}/{}", self.prefix, joined)
        };
        Ok(self.entries.get(&key).cloned())
    }
}

/// Source from which to load a crate
#[derive(Debug, Clone)]
pub enum CrateSource {
    /// Local directory containing ro-crate-metadata.json, or the metadata file itself
    Directory(PathBuf),
    /// Local zip archive
    ZipFile(PathBuf),
    /// Remote URL (may or may not end with ro-crate-metadata.json)
    Url(String),
}

impl CrateSource {
    /// Classify a command-line argument
    pub fn detect(input: &str) -> Self {
        if input.starts_with("http://") || input.starts_with("https://") {
            return CrateSource::Url(input.to_string());
        }
        let path = PathBuf::from(input);
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        if is_zip {
            CrateSource::ZipFile(path)
        } else {
            CrateSource::Directory(path)
        }
    }
}

/// A parsed crate document plus access to its packaged files
#[derive(Clone)]
pub struct LoadedCrate {
    pub document: Value,
    pub storage: Option<Arc<dyn StorageBackend>>,
    /// Where the metadata was actually read from
    pub origin: String,
}

impl std::fmt::Debug for LoadedCrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedCrate")
            .field("origin", &self.origin)
            .field("has_storage", &self.storage.is_some())
            .finish()
    }
}

pub async fn load_crate(source: &CrateSource) -> Result<LoadedCrate> {
    match source {
        CrateSource::Directory(path) => load_from_directory(path).await,
        CrateSource::ZipFile(path) => {
            let path = path.clone();
            tokio::task::spawn_blocking(move || load_from_zip(&path))
                .await
                .map_err(|e| ValidateError::LoadError {
                    path: source_label(source),
                    reason: e.to_string(),
                })?
        }
        CrateSource::Url(url) => load_from_url(url).await,
    }
}

fn source_label(source: &CrateSource) -> String {
    match source {
        CrateSource::Directory(p) | CrateSource::ZipFile(p) => p.display().to_string(),
        CrateSource::Url(u) => u.clone(),
    }
}

fn parse_document(content: &str, origin: &str) -> Result<Value> {
    let document: Value = serde_json::from_str(content).map_err(|e| ValidateError::LoadError {
        path: origin.to_string(),
        reason: format!("Failed to parse crate metadata: {}", e),
    })?;
    if !document.is_object() {
        return Err(ValidateError::LoadError {
            path: origin.to_string(),
            reason: "Crate metadata is not a JSON object".to_string(),
        });
    }
    Ok(document)
}

fn is_metadata_filename(name: &str) -> bool {
    name == METADATA_DESCRIPTOR_ID
        || name == METADATA_DESCRIPTOR_JSONLD_ID
        || name.ends_with("-ro-crate-metadata.json")
        || name.ends_with("-ro-crate-metadata.jsonld")
}

async fn load_from_directory(path: &Path) -> Result<LoadedCrate> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|_| ValidateError::InvalidPath(path.to_path_buf()))?;

    let (metadata_path, root) = if meta.is_file() {
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        (path.to_path_buf(), root)
    } else {
        (find_metadata_in_directory(path).await?, path.to_path_buf())
    };

    let content = tokio::fs::read_to_string(&metadata_path)
        .await
        .map_err(|e| ValidateError::LoadError {
            path: metadata_path.display().to_string(),
            reason: e.to_string(),
        })?;
    let origin = metadata_path.display().to_string();
    debug!(path = %origin, "loaded crate metadata");

    Ok(LoadedCrate {
        document: parse_document(&content, &origin)?,
        storage: Some(Arc::new(DirectoryStorage::new(root))),
        origin,
    })
}

/// Find ro-crate-metadata.json (or a prefixed/.jsonld variant) in a directory
async fn find_metadata_in_directory(path: &Path) -> Result<PathBuf> {
    for name in [METADATA_DESCRIPTOR_ID, METADATA_DESCRIPTOR_JSONLD_ID] {
        let candidate = path.join(name);
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Ok(candidate);
        }
    }

    let mut entries = tokio::fs::read_dir(path).await?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if is_metadata_filename(name) {
                found.push(entry.path());
            }
        }
    }
    // read_dir order is platform dependent
    found.sort();
    found.into_iter().next().ok_or_else(|| ValidateError::LoadError {
        path: path.display().to_string(),
        reason: "No ro-crate-metadata.json found".to_string(),
    })
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    if !path.exists() {
        return Err(ValidateError::InvalidPath(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| ValidateError::LoadError {
        path: path.display().to_string(),
        reason: format!("Failed to open zip file: {}", e),
    })?;
    ZipArchive::new(file).map_err(|e| ValidateError::LoadError {
        path: path.display().to_string(),
        reason: format!("Failed to read zip archive: {}", e),
    })
}

fn load_from_zip(path: &Path) -> Result<LoadedCrate> {
    let mut archive = open_archive(path)?;
    let (metadata_name, prefix) = find_root_metadata_in_zip(&mut archive, path)?;

    let mut content = String::new();
    archive
        .by_name(&metadata_name)
        .map_err(|e| ValidateError::LoadError {
            path: path.display().to_string(),
            reason: format!("Failed to extract {}: {}", metadata_name, e),
        })?
        .read_to_string(&mut content)?;

    let origin = format!("{}!/{}", path.display(), metadata_name);
    debug!(path = %origin, "loaded crate metadata from zip");
    let storage = ZipStorage::from_archive(&mut archive, prefix);

    Ok(LoadedCrate {
        document: parse_document(&content, &origin)?,
        storage: Some(Arc::new(storage)),
        origin,
    })
}

/// Find the root metadata file in a zip archive
///
/// Returns `(entry_name, root_prefix)` where `root_prefix` is the single
/// top-level directory the archive was created from, if any.
fn find_root_metadata_in_zip<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &Path,
) -> Result<(String, String)> {
    let entries: Vec<String> = archive.file_names().map(String::from).collect();

    let mut at_root: Vec<&String> = entries
        .iter()
        .filter(|e| !e.contains('/') && is_metadata_filename(e))
        .collect();
    at_root.sort_by_key(|e| e.as_str() != METADATA_DESCRIPTOR_ID);
    if let Some(entry) = at_root.first() {
        return Ok(((*entry).clone(), String::new()));
    }

    let top_level: Vec<&str> = entries
        .iter()
        .filter_map(|e| e.split('/').next())
        .filter(|s| !s.is_empty())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    if top_level.len() == 1 {
        let prefix = top_level[0];
        let expected_root = format!("{}/", prefix);
        let found = entries.iter().find(|entry| {
            entry
                .strip_prefix(&expected_root)
                .is_some_and(|rest| !rest.contains('/') && is_metadata_filename(rest))
        });
        if let Some(entry) = found {
            return Ok((entry.clone(), prefix.to_string()));
        }
    }

    Err(ValidateError::LoadError {
        path: path.display().to_string(),
        reason: "No root ro-crate-metadata.json found at archive root".to_string(),
    })
}

/// Fetch metadata from a URL, trying `<url>/ro-crate-metadata.json` first
async fn load_from_url(url: &str) -> Result<LoadedCrate> {
    let client = reqwest::Client::new();

    if url.ends_with(METADATA_DESCRIPTOR_ID) || url.ends_with(METADATA_DESCRIPTOR_JSONLD_ID) {
        let content = fetch_url(&client, url).await?;
        return Ok(LoadedCrate {
            document: parse_document(&content, url)?,
            storage: None,
            origin: url.to_string(),
        });
    }

    let metadata_url = format!("{}/{}", url.trim_end_matches('/'), METADATA_DESCRIPTOR_ID);
    if let Ok(content) = fetch_url(&client, &metadata_url).await {
        if content.trim_start().starts_with('{') {
            return Ok(LoadedCrate {
                document: parse_document(&content, &metadata_url)?,
                storage: None,
                origin: metadata_url,
            });
        }
    }

    let content = fetch_url(&client, url).await?;
    if !content.trim_start().starts_with('{') {
        return Err(ValidateError::LoadError {
            path: url.to_string(),
            reason: "URL does not contain valid RO-Crate metadata".to_string(),
        });
    }
    Ok(LoadedCrate {
        document: parse_document(&content, url)?,
        storage: None,
        origin: url.to_string(),
    })
}

async fn fetch_url(client: &reqwest::Client, url: &str) -> Result<String> {
    let load_error = |reason: String| ValidateError::LoadError {
        path: url.to_string(),
        reason,
    };
    client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| load_error(format!("HTTP request failed: {}", e)))?
        .text()
        .await
        .map_err(|e| load_error(format!("Failed to read response: {}", e)))
}
