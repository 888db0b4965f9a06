//! Vault, file-tree and tab-session core for Infinite Notes.
//! 管理 Infinite Notes 保管庫、檔案樹與分頁工作階段的核心模組。

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fs;
pub mod registry;
pub mod session;
pub mod tabs;
pub mod tree;

pub use config::{ConfigError, SessionConfig, Templates};
pub use dispatcher::ActionDispatcher;
pub use error::{Result, VaultError};
pub use fs::{DirEntry, FileSystem, FsOperation, MemoryFileSystem, StdFileSystem};
pub use registry::{Vault, VaultId, VaultRegistry};
pub use session::{Session, SessionSnapshot, TabSummary};
pub use tabs::{Tab, TabSession, TabState};
pub use tree::{
    FileNode, FileTree, FileType, FolderNode, NodeId, ScanOptions, TreeNode, TreeRow,
};
