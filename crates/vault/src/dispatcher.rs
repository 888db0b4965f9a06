//! User intents applied to the open vault.
//! 將使用者動作套用到目前開啟的保管庫。
//!
//! Every mutating action runs the filesystem call first, then a full tree
//! reload, then tab reconciliation. Actions borrow the dispatcher mutably, so
//! two actions on the same vault can never interleave.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, VaultError};
use crate::fs::FileSystem;
use crate::registry::{Vault, VaultId, VaultRegistry};
use crate::session::Session;
use crate::tabs::Tab;
use crate::tree::{FileType, TreeNode};

pub struct ActionDispatcher {
    fs: Arc<dyn FileSystem>,
    config: SessionConfig,
    registry: VaultRegistry,
    session: Option<Session>,
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ActionDispatcher {
    /// Restores the registry and reopens the last current vault. A vault whose
    /// folder cannot be scanned is logged and left closed.
    /// 還原登錄並重新開啟上次的保管庫；掃描失敗時僅記錄警告。
    pub async fn start(
        fs: Arc<dyn FileSystem>,
        registry_path: impl AsRef<Path>,
        config: SessionConfig,
    ) -> Result<Self> {
        let registry = VaultRegistry::restore(fs.clone(), registry_path).await?;
        let mut dispatcher = Self {
            fs,
            config,
            registry,
            session: None,
        };
        if let Some(vault) = dispatcher.registry.current().cloned() {
            let vault_id = vault.id.clone();
            match Session::open(dispatcher.fs.as_ref(), vault, &dispatcher.config).await {
                Ok(session) => dispatcher.session = Some(session),
                Err(err) => warn!(vault = %vault_id, error = %err, "could not reopen current vault"),
            }
        }
        Ok(dispatcher)
    }

    pub fn registry(&self) -> &VaultRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(VaultError::NoOpenVault)
    }

    /// Creates the vault folder if needed and registers it.
    pub async fn add_vault(&mut self, name: &str, path: impl Into<PathBuf>) -> Result<Vault> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::InvalidName(name.to_string()));
        }
        let path = path.into();
        self.fs
            .make_directory(&path)
            .await
            .map_err(VaultError::io("create", &path))?;
        self.registry.add_vault(name, path).await
    }

    /// Flushes pending edits, scans the target vault and replaces the session.
    /// Tabs of the previous vault are discarded. Nothing changes if the scan
    /// fails.
    /// 切換保管庫：先寫回編輯，再重新掃描；舊分頁全部捨棄。
    pub async fn switch_vault(&mut self, id: &VaultId) -> Result<()> {
        let vault = self
            .registry
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::VaultNotFound(id.clone()))?;
        let fs = self.fs.clone();
        if let Some(session) = self.session.as_mut() {
            session.tabs.flush(fs.as_ref()).await?;
        }
        let session = Session::open(fs.as_ref(), vault, &self.config).await?;
        self.registry.switch_vault(id).await?;
        info!(vault = %id, path = %session.vault.path.display(), "switched vault");
        self.session = Some(session);
        Ok(())
    }

    /// Forgets a vault. If it is open, pending edits are flushed and the
    /// session is closed. The folder on disk is kept.
    pub async fn remove_vault(&mut self, id: &VaultId) -> Result<Vault> {
        let fs = self.fs.clone();
        let is_open = self
            .session
            .as_ref()
            .map_or(false, |session| session.vault.id == *id);
        if is_open {
            if let Some(session) = self.session.as_mut() {
                session.tabs.flush(fs.as_ref()).await?;
            }
        }
        let removed = self.registry.remove_vault(id).await?;
        if is_open {
            self.session = None;
        }
        Ok(removed)
    }

    /// Writes every pending edit. Hosts call this before exiting.
    pub async fn shutdown(&mut self) -> Result<()> {
        let fs = self.fs.clone();
        if let Some(session) = self.session.as_mut() {
            let written = session.tabs.flush(fs.as_ref()).await?;
            debug!(written, "session flushed on shutdown");
        }
        Ok(())
    }

    /// Rescans the open vault and reconciles tabs.
    pub async fn reload(&mut self) -> Result<()> {
        let fs = self.fs.clone();
        self.session_mut()?.reload(fs.as_ref()).await
    }

    pub async fn open_file(&mut self, path: &Path) -> Result<usize> {
        let fs = self.fs.clone();
        let session = self.session_mut()?;
        let node = session
            .tree
            .find_file(path)
            .cloned()
            .ok_or_else(|| VaultError::PathNotFound(path.to_path_buf()))?;
        session.tabs.open_file(fs.as_ref(), &node).await
    }

    pub async fn activate_tab(&mut self, index: usize) -> Result<()> {
        let fs = self.fs.clone();
        self.session_mut()?.tabs.activate(fs.as_ref(), index).await
    }

    /// Flushes pending edits, then closes the tab. A failed flush keeps it open.
    pub async fn close_tab(&mut self, index: usize) -> Result<Tab> {
        let fs = self.fs.clone();
        let tabs = &mut self.session_mut()?.tabs;
        tabs.check_index(index)?;
        tabs.flush(fs.as_ref()).await?;
        tabs.close_tab(index)
    }

    pub fn reorder_tab(&mut self, from: usize, to: usize) -> Result<()> {
        self.session_mut()?.tabs.reorder_tab(from, to)
    }

    pub fn edit(&mut self, content: impl Into<String>) -> Result<()> {
        self.session_mut()?.tabs.edit(content)
    }

    pub async fn save_active(&mut self) -> Result<()> {
        let fs = self.fs.clone();
        self.session_mut()?.tabs.save_active(fs.as_ref()).await
    }

    pub fn autosave_deadline(&self) -> Option<Instant> {
        self.session
            .as_ref()
            .and_then(|session| session.tabs.autosave_deadline())
    }

    pub async fn autosave_if_due(&mut self, now: Instant) -> Result<bool> {
        let fs = self.fs.clone();
        match self.session.as_mut() {
            Some(session) => session.tabs.autosave_if_due(fs.as_ref(), now).await,
            None => Ok(false),
        }
    }

    pub fn toggle_folder(&mut self, path: &Path, expanded: bool) -> bool {
        self.session
            .as_mut()
            .map_or(false, |session| session.tree.set_expanded(path, expanded))
    }

    /// Creates a file under `parent` (the vault root when `None`) from the
    /// configured template, then opens it. An existing file with the same
    /// name is overwritten.
    /// 以範本建立新檔案並開啟；同名檔案會被覆寫。
    pub async fn create_file(
        &mut self,
        parent: Option<&Path>,
        name: &str,
        file_type: FileType,
    ) -> Result<PathBuf> {
        validate_name(name)?;
        if file_type == FileType::Image {
            return Err(VaultError::Unsupported("creating image files"));
        }
        let fs = self.fs.clone();
        let file_name = ensure_extension(name, file_type.canonical_extension());
        let title = Path::new(&file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        let contents = self
            .config
            .templates
            .render(file_type, &title)
            .ok_or(VaultError::Unsupported("creating image files"))?;

        let session = self.session_mut()?;
        let target = resolve_container(session, parent)?.join(&file_name);
        fs.write_file(&target, &contents)
            .await
            .map_err(VaultError::io("write", &target))?;
        session.reload(fs.as_ref()).await?;
        if session.tabs.replace_saved(&target, contents) {
            warn!(path = %target.display(), "open tab replaced by the new file");
        }

        match session.tree.find_file(&target).cloned() {
            Some(node) => {
                session.tabs.open_file(fs.as_ref(), &node).await?;
            }
            None => warn!(
                path = %target.display(),
                file_type = %file_type,
                "created file is not listed in the vault tree; its extension is not whitelisted"
            ),
        }
        info!(path = %target.display(), "file created");
        Ok(target)
    }

    pub async fn create_folder(&mut self, parent: Option<&Path>, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let fs = self.fs.clone();
        let session = self.session_mut()?;
        let target = resolve_container(session, parent)?.join(name);
        fs.make_directory(&target)
            .await
            .map_err(VaultError::io("create", &target))?;
        session.reload(fs.as_ref()).await?;
        info!(path = %target.display(), "folder created");
        Ok(target)
    }

    /// Renames a file or folder in place. Renaming to the current name does
    /// nothing. A file keeps its extension when `new_name` has none. Open tabs
    /// at or below the old path follow the rename.
    /// 重新命名檔案或資料夾；已開啟的分頁會跟著更新路徑。
    pub async fn rename(&mut self, path: &Path, new_name: &str) -> Result<PathBuf> {
        validate_name(new_name)?;
        let fs = self.fs.clone();
        let session = self.session_mut()?;
        let (current_name, is_file) = match find_item(session, path)? {
            TreeNode::File(file) => (file.name.clone(), true),
            TreeNode::Folder(folder) => (folder.name.clone(), false),
            TreeNode::Root { .. } => return Err(VaultError::PathNotFound(path.to_path_buf())),
        };
        let new_name = if is_file {
            keep_extension(&current_name, new_name)
        } else {
            new_name.to_string()
        };
        if new_name == current_name {
            debug!(path = %path.display(), "rename to the current name skipped");
            return Ok(path.to_path_buf());
        }

        let target = path.with_file_name(&new_name);
        if fs.path_exists(&target).await {
            return Err(VaultError::Collision(target));
        }
        fs.rename_path(path, &target)
            .await
            .map_err(VaultError::io("rename", path))?;
        let retargeted = session.tabs.retarget(path, &target);
        session.reload(fs.as_ref()).await?;
        info!(
            from = %path.display(),
            to = %target.display(),
            retargeted,
            "item renamed"
        );
        Ok(target)
    }

    /// Deletes a file or folder. Tabs at or below the path are closed first.
    pub async fn delete_item(&mut self, path: &Path) -> Result<()> {
        let fs = self.fs.clone();
        let session = self.session_mut()?;
        if let TreeNode::Root { .. } = find_item(session, path)? {
            return Err(VaultError::PathNotFound(path.to_path_buf()));
        }
        let closed = session.tabs.close_under(path);
        fs.delete_path(path)
            .await
            .map_err(VaultError::io("delete", path))?;
        session.reload(fs.as_ref()).await?;
        info!(path = %path.display(), closed_tabs = closed.len(), "item deleted");
        Ok(())
    }

    /// Copies a file next to itself under `new_name`. Folders are not copied.
    /// The copy is not opened.
    /// 在同一資料夾複製檔案；不支援資料夾。
    pub async fn copy_item(&mut self, path: &Path, new_name: &str) -> Result<PathBuf> {
        validate_name(new_name)?;
        let fs = self.fs.clone();
        let session = self.session_mut()?;
        let source = match find_item(session, path)? {
            TreeNode::File(file) => file.clone(),
            _ => return Err(VaultError::Unsupported("copying folders")),
        };

        let target = path.with_file_name(keep_extension(&source.name, new_name));
        if target == source.path || fs.path_exists(&target).await {
            return Err(VaultError::Collision(target));
        }
        // Unsaved edits are part of what the user sees, so they go into the copy.
        session.tabs.flush(fs.as_ref()).await?;
        let contents = fs
            .read_file(&source.path)
            .await
            .map_err(VaultError::io("read", &source.path))?;
        fs.write_file(&target, &contents)
            .await
            .map_err(VaultError::io("write", &target))?;
        session.reload(fs.as_ref()).await?;
        info!(from = %path.display(), to = %target.display(), "file copied");
        Ok(target)
    }
}

fn find_item<'a>(session: &'a Session, path: &Path) -> Result<&'a TreeNode> {
    session
        .tree
        .find_by_path(path)
        .ok_or_else(|| VaultError::PathNotFound(path.to_path_buf()))
}

fn resolve_container(session: &Session, parent: Option<&Path>) -> Result<PathBuf> {
    match parent {
        None => Ok(session.vault.path.clone()),
        Some(path) => match session.tree.find_by_path(path) {
            Some(node) if node.is_container() => Ok(path.to_path_buf()),
            _ => Err(VaultError::PathNotFound(path.to_path_buf())),
        },
    }
}

/// Rejects names that would escape the parent folder or vanish from the tree.
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.starts_with('.')
        || name.contains(['/', '\\']);
    if invalid {
        Err(VaultError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

fn ensure_extension(name: &str, extension: &str) -> String {
    let suffix = format!(".{extension}");
    if name.to_ascii_lowercase().ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

fn keep_extension(current_name: &str, new_name: &str) -> String {
    if Path::new(new_name).extension().is_some() {
        return new_name.to_string();
    }
    match Path::new(current_name).extension() {
        Some(extension) => format!("{new_name}.{}", extension.to_string_lossy()),
        None => new_name.to_string(),
    }
}
