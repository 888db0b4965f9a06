use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::registry::VaultId;

/// Errors surfaced by registry, tree, tab and dispatcher operations.
/// 保管庫、檔案樹、分頁與動作分派可能回傳的錯誤。
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("vault {0} not found")]
    VaultNotFound(VaultId),
    #[error("{} not found in the vault tree", .0.display())]
    PathNotFound(PathBuf),
    #[error("{} already exists", .0.display())]
    Collision(PathBuf),
    #[error("{0} is not supported")]
    Unsupported(&'static str),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("invalid vault registry: {0}")]
    InvalidRegistry(String),
    #[error("no vault is open")]
    NoOpenVault,
    #[error("tab index {index} out of range (open tabs: {len})")]
    TabOutOfRange { index: usize, len: usize },
    #[error("no tab is active")]
    NoActiveTab,
}

impl VaultError {
    /// Builds a mapper that tags an `io::Error` with the failed action and path.
    pub(crate) fn io(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| VaultError::Io {
            action,
            path,
            source,
        }
    }
}

pub type Result<T, E = VaultError> = std::result::Result<T, E>;
