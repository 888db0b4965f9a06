//! Filesystem seam consumed by the vault core.
//! 保管庫核心所使用的檔案系統介面。
//!
//! Every primitive is async and atomic from the caller's point of view. The core
//! never touches `std::fs` directly; it goes through [`FileSystem`] so hosts can
//! swap the disk for an in-memory store or a sandboxed backend.

use std::collections::BTreeMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::warn;

/// One entry returned by [`FileSystem::list_directory`].
/// 目錄列舉所回傳的單一項目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
    pub is_file: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Atomic filesystem primitives.
/// 原子化的檔案系統基本操作。
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Lists the direct children of `path`.
    async fn list_directory(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Reads a whole file as UTF-8 text.
    async fn read_file(&self, path: &Path) -> io::Result<String>;

    /// Writes `contents` to `path`, creating missing parents and replacing any
    /// existing file.
    async fn write_file(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Creates `path` and any missing ancestors.
    async fn make_directory(&self, path: &Path) -> io::Result<()>;

    /// Removes a file, or a directory together with everything below it.
    async fn delete_path(&self, path: &Path) -> io::Result<()>;

    async fn rename_path(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn path_exists(&self, path: &Path) -> bool;
}

/// [`FileSystem`] backed by the local disk through `tokio::fs`.
/// 以 `tokio::fs` 操作本機磁碟的實作。
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl StdFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for StdFileSystem {
    async fn list_directory(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut reader = fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let entry_path = entry.path();
            // Follows symlinks so linked folders are listed as folders.
            let metadata = match fs::metadata(&entry_path).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = %entry_path.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry_path,
                is_directory: metadata.is_dir(),
                is_file: metadata.is_file(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        Ok(entries)
    }

    async fn read_file(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path).await
    }

    async fn write_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        write_atomic(path, contents.as_bytes()).await
    }

    async fn make_directory(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    async fn delete_path(&self, path: &Path) -> io::Result<()> {
        let metadata = fs::symlink_metadata(path).await?;
        if metadata.is_dir() {
            fs::remove_dir_all(path).await
        } else {
            fs::remove_file(path).await
        }
    }

    async fn rename_path(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to).await
    }

    async fn path_exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Writes data through a hidden temporary sibling followed by rename.
/// 透過隱藏的暫存檔搭配 rename 完成原子寫入。
async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "path has no file name"))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;
    // Dot-prefixed so a concurrent tree scan never picks it up.
    let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp_path, data).await?;
    fs::rename(&tmp_path, path).await
}

/// Operation kinds understood by [`MemoryFileSystem::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOperation {
    List,
    Read,
    Write,
    MakeDirectory,
    Delete,
    Rename,
}

#[derive(Debug, Clone)]
enum MemoryEntry {
    Directory,
    File {
        contents: String,
        modified: DateTime<Utc>,
    },
}

/// In-process [`FileSystem`] used by tests and by hosts without a real disk.
/// 記憶體內的檔案系統，供測試與無磁碟的宿主使用。
///
/// Tracks how many mutating calls succeeded and can be told to fail the next
/// call of a given kind on a given path.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    entries: Mutex<BTreeMap<PathBuf, MemoryEntry>>,
    failures: Mutex<Vec<(FsOperation, PathBuf)>>,
    mutations: AtomicUsize,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file (and its ancestors) without counting a mutation.
    pub fn insert_file(&self, path: impl AsRef<Path>, contents: impl Into<String>) {
        let path = path.as_ref();
        let mut entries = self.entries();
        insert_ancestors(&mut entries, path);
        entries.insert(
            path.to_path_buf(),
            MemoryEntry::File {
                contents: contents.into(),
                modified: Utc::now(),
            },
        );
    }

    /// Seeds a directory (and its ancestors) without counting a mutation.
    pub fn insert_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut entries = self.entries();
        insert_ancestors(&mut entries, path);
        entries.insert(path.to_path_buf(), MemoryEntry::Directory);
    }

    /// Returns the contents of a file, if one exists at `path`.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.entries().get(path.as_ref()) {
            Some(MemoryEntry::File { contents, .. }) => Some(contents.clone()),
            _ => None,
        }
    }

    /// Number of successful write/mkdir/delete/rename calls so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Makes the next `operation` on exactly `path` fail with an I/O error.
    pub fn fail_next(&self, operation: FsOperation, path: impl AsRef<Path>) {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((operation, path.as_ref().to_path_buf()));
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<PathBuf, MemoryEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(&self, operation: FsOperation, path: &Path) -> io::Result<()> {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(index) = failures
            .iter()
            .position(|(op, target)| *op == operation && target == path)
        {
            failures.remove(index);
            return Err(io::Error::new(
                ErrorKind::Other,
                format!("injected {operation:?} failure"),
            ));
        }
        Ok(())
    }

    fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

fn insert_ancestors(entries: &mut BTreeMap<PathBuf, MemoryEntry>, path: &Path) {
    for ancestor in path.ancestors().skip(1) {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        entries
            .entry(ancestor.to_path_buf())
            .or_insert(MemoryEntry::Directory);
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

fn ensure_no_file_ancestor(
    entries: &BTreeMap<PathBuf, MemoryEntry>,
    path: &Path,
) -> io::Result<()> {
    for ancestor in path.ancestors().skip(1) {
        if let Some(MemoryEntry::File { .. }) = entries.get(ancestor) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is a file", ancestor.display()),
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn list_directory(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        self.check_failure(FsOperation::List, path)?;
        let entries = self.entries();
        match entries.get(path) {
            Some(MemoryEntry::Directory) => {}
            Some(MemoryEntry::File { .. }) => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} is not a directory", path.display()),
                ))
            }
            None => return Err(not_found(path)),
        }
        let listed = entries
            .iter()
            .filter(|(candidate, _)| candidate.parent() == Some(path))
            .map(|(candidate, entry)| {
                let name = candidate
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                match entry {
                    MemoryEntry::Directory => DirEntry {
                        name,
                        path: candidate.clone(),
                        is_directory: true,
                        is_file: false,
                        size: 0,
                        modified: None,
                    },
                    MemoryEntry::File { contents, modified } => DirEntry {
                        name,
                        path: candidate.clone(),
                        is_directory: false,
                        is_file: true,
                        size: contents.len() as u64,
                        modified: Some(*modified),
                    },
                }
            })
            .collect();
        Ok(listed)
    }

    async fn read_file(&self, path: &Path) -> io::Result<String> {
        self.check_failure(FsOperation::Read, path)?;
        match self.entries().get(path) {
            Some(MemoryEntry::File { contents, .. }) => Ok(contents.clone()),
            Some(MemoryEntry::Directory) => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    async fn write_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        self.check_failure(FsOperation::Write, path)?;
        let mut entries = self.entries();
        if let Some(MemoryEntry::Directory) = entries.get(path) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            ));
        }
        ensure_no_file_ancestor(&entries, path)?;
        insert_ancestors(&mut entries, path);
        entries.insert(
            path.to_path_buf(),
            MemoryEntry::File {
                contents: contents.to_string(),
                modified: Utc::now(),
            },
        );
        drop(entries);
        self.record_mutation();
        Ok(())
    }

    async fn make_directory(&self, path: &Path) -> io::Result<()> {
        self.check_failure(FsOperation::MakeDirectory, path)?;
        let mut entries = self.entries();
        if let Some(MemoryEntry::File { .. }) = entries.get(path) {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} is a file", path.display()),
            ));
        }
        ensure_no_file_ancestor(&entries, path)?;
        insert_ancestors(&mut entries, path);
        entries.insert(path.to_path_buf(), MemoryEntry::Directory);
        drop(entries);
        self.record_mutation();
        Ok(())
    }

    async fn delete_path(&self, path: &Path) -> io::Result<()> {
        self.check_failure(FsOperation::Delete, path)?;
        let mut entries = self.entries();
        if !entries.contains_key(path) {
            return Err(not_found(path));
        }
        entries.retain(|candidate, _| !candidate.starts_with(path));
        drop(entries);
        self.record_mutation();
        Ok(())
    }

    async fn rename_path(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.check_failure(FsOperation::Rename, from)?;
        let mut entries = self.entries();
        if !entries.contains_key(from) {
            return Err(not_found(from));
        }
        if to == from {
            return Ok(());
        }
        if to.starts_with(from) || from.starts_with(to) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "cannot move a path into itself or onto its ancestor",
            ));
        }
        let moved: Vec<(PathBuf, MemoryEntry)> = entries
            .iter()
            .filter(|(candidate, _)| candidate.starts_with(from))
            .map(|(candidate, entry)| (candidate.clone(), entry.clone()))
            .collect();
        entries.retain(|candidate, _| !candidate.starts_with(to));
        for (old_path, _) in &moved {
            entries.remove(old_path);
        }
        insert_ancestors(&mut entries, to);
        for (old_path, entry) in moved {
            let suffix = old_path.strip_prefix(from).unwrap_or(Path::new(""));
            let new_path: PathBuf = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            entries.insert(new_path, entry);
        }
        drop(entries);
        self.record_mutation();
        Ok(())
    }

    async fn path_exists(&self, path: &Path) -> bool {
        self.entries().contains_key(path)
    }
}
