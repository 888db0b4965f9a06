use std::path::PathBuf;

use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::registry::{Vault, VaultId};
use crate::tabs::TabSession;
use crate::tree::{FileTree, FileType, NodeId};

/// Everything that belongs to the vault currently on screen: the vault, its
/// tree and its tabs. Built when a vault is opened and dropped on switch.
/// 目前開啟保管庫的完整狀態；開啟時建立，切換時丟棄。
#[derive(Debug)]
pub struct Session {
    pub(crate) vault: Vault,
    pub(crate) tree: FileTree,
    pub(crate) tabs: TabSession,
}

impl Session {
    /// Scans the vault and starts with no tabs.
    pub async fn open(fs: &dyn FileSystem, vault: Vault, config: &SessionConfig) -> Result<Self> {
        let mut tree = FileTree::new(config.scan_options());
        tree.load(fs, &vault.path).await?;
        Ok(Self {
            vault,
            tree,
            tabs: TabSession::new(config.autosave_delay()),
        })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    pub fn tabs(&self) -> &TabSession {
        &self.tabs
    }

    /// Full rescan followed by tab reconciliation.
    pub async fn reload(&mut self, fs: &dyn FileSystem) -> Result<()> {
        self.tree.load(fs, &self.vault.path).await?;
        self.tabs.reconcile(&self.tree);
        Ok(())
    }

    /// Read-only view for presentation layers.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            vault_id: self.vault.id.clone(),
            vault_name: self.vault.name.clone(),
            vault_path: self.vault.path.clone(),
            tree_revision: self.tree.revision(),
            active_tab: self.tabs.active_index(),
            tabs: self
                .tabs
                .tabs()
                .iter()
                .map(|tab| TabSummary {
                    id: tab.id,
                    name: tab.name.clone(),
                    path: tab.path.clone(),
                    file_type: tab.file_type,
                    dirty: tab.is_dirty(),
                    stale: tab.is_stale(),
                })
                .collect(),
        }
    }
}

/// Serializable summary of a [`Session`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub vault_id: VaultId,
    pub vault_name: String,
    pub vault_path: PathBuf,
    pub tree_revision: u64,
    pub active_tab: Option<usize>,
    pub tabs: Vec<TabSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TabSummary {
    pub id: NodeId,
    pub name: String,
    pub path: PathBuf,
    pub file_type: FileType,
    pub dirty: bool,
    pub stale: bool,
}
