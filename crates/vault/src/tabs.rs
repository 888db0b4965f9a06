use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, VaultError};
use crate::fs::FileSystem;
use crate::tree::{FileNode, FileTree, FileType, NodeId};

/// Save state of an open tab. A successful save returns the tab to `Open`.
/// 分頁的儲存狀態；儲存成功後回到 `Open`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabState {
    Open,
    Dirty,
}

/// An open file: a snapshot of the tree node it was opened from plus its buffer.
/// 已開啟的檔案：開啟當下節點的快照與編輯緩衝。
#[derive(Debug, Clone, PartialEq)]
pub struct Tab {
    pub id: NodeId,
    pub name: String,
    pub path: PathBuf,
    pub file_type: FileType,
    content: String,
    state: TabState,
    stale: bool,
}

impl Tab {
    fn from_node(node: &FileNode, content: String) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            path: node.path.clone(),
            file_type: node.file_type,
            content,
            state: TabState::Open,
            stale: false,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn state(&self) -> TabState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == TabState::Dirty
    }

    /// `true` when the tab's path stopped resolving after the last reload.
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

/// Ordered open tabs, the active pointer and the debounced autosave.
/// 有序的開啟分頁、目前分頁指標與延遲自動儲存。
#[derive(Debug)]
pub struct TabSession {
    tabs: Vec<Tab>,
    active: Option<usize>,
    autosave_delay: Duration,
    autosave_deadline: Option<Instant>,
}

impl TabSession {
    pub fn new(autosave_delay: Duration) -> Self {
        Self {
            tabs: Vec::new(),
            active: None,
            autosave_delay,
            autosave_deadline: None,
        }
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Index of the active tab; `None` exactly when no tab is open.
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.active.and_then(|index| self.tabs.get(index))
    }

    pub fn position(&self, path: &Path) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.path == path)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.tabs.iter().any(Tab::is_dirty)
    }

    /// When the pending autosave becomes due, if any.
    pub fn autosave_deadline(&self) -> Option<Instant> {
        self.autosave_deadline
    }

    /// Opens `node`, or activates its tab if the path is already open.
    /// Pending edits are flushed before the active tab changes.
    /// 開啟檔案；若已開啟則切換至該分頁。切換前會先寫回未儲存內容。
    pub async fn open_file(&mut self, fs: &dyn FileSystem, node: &FileNode) -> Result<usize> {
        if let Some(index) = self.position(&node.path) {
            self.activate(fs, index).await?;
            return Ok(index);
        }

        self.flush(fs).await?;
        let content = fs
            .read_file(&node.path)
            .await
            .map_err(VaultError::io("read", &node.path))?;
        self.tabs.push(Tab::from_node(node, content));
        let index = self.tabs.len() - 1;
        self.active = Some(index);
        debug!(path = %node.path.display(), index, "tab opened");
        Ok(index)
    }

    /// Switches the active tab. A failed flush aborts the switch.
    pub async fn activate(&mut self, fs: &dyn FileSystem, index: usize) -> Result<()> {
        self.check_index(index)?;
        if self.active == Some(index) {
            return Ok(());
        }
        self.flush(fs).await?;
        self.active = Some(index);
        debug!(index, "tab activated");
        Ok(())
    }

    /// Replaces the active tab's buffer, marks it dirty and restarts the
    /// autosave countdown.
    pub fn edit(&mut self, content: impl Into<String>) -> Result<()> {
        let index = self.active.ok_or(VaultError::NoActiveTab)?;
        let tab = &mut self.tabs[index];
        tab.content = content.into();
        tab.state = TabState::Dirty;
        self.autosave_deadline = Some(Instant::now() + self.autosave_delay);
        Ok(())
    }

    /// Writes dirty tabs once the autosave deadline has passed.
    pub async fn autosave_if_due(&mut self, fs: &dyn FileSystem, now: Instant) -> Result<bool> {
        match self.autosave_deadline {
            Some(deadline) if now >= deadline => Ok(self.flush(fs).await? > 0),
            _ => Ok(false),
        }
    }

    /// Writes every dirty tab and cancels the pending autosave. On failure the
    /// remaining tabs stay dirty and the deadline is kept for a retry.
    /// 寫回所有未儲存的分頁並取消排程；失敗時保留狀態以便重試。
    pub async fn flush(&mut self, fs: &dyn FileSystem) -> Result<usize> {
        let mut written = 0;
        for tab in self.tabs.iter_mut().filter(|tab| tab.is_dirty()) {
            fs.write_file(&tab.path, &tab.content)
                .await
                .map_err(VaultError::io("write", &tab.path))?;
            tab.state = TabState::Open;
            written += 1;
            debug!(path = %tab.path.display(), "tab saved");
        }
        self.autosave_deadline = None;
        Ok(written)
    }

    /// Writes the active tab immediately, dirty or not.
    pub async fn save_active(&mut self, fs: &dyn FileSystem) -> Result<()> {
        let index = self.active.ok_or(VaultError::NoActiveTab)?;
        let tab = &mut self.tabs[index];
        fs.write_file(&tab.path, &tab.content)
            .await
            .map_err(VaultError::io("write", &tab.path))?;
        tab.state = TabState::Open;
        if !self.has_unsaved_changes() {
            self.autosave_deadline = None;
        }
        Ok(())
    }

    /// Sets the buffer of the tab at `path` to what was just written there and
    /// marks it saved. Returns `false` when no tab has that path.
    pub fn replace_saved(&mut self, path: &Path, content: impl Into<String>) -> bool {
        let Some(index) = self.position(path) else {
            return false;
        };
        let tab = &mut self.tabs[index];
        tab.content = content.into();
        tab.state = TabState::Open;
        if !self.has_unsaved_changes() {
            self.autosave_deadline = None;
        }
        true
    }

    /// Removes a tab without saving it. If it was active, the tab now at the
    /// same index (or the one before it) becomes active.
    pub fn close_tab(&mut self, index: usize) -> Result<Tab> {
        self.check_index(index)?;
        let closed = self.tabs.remove(index);
        self.active = match self.active {
            Some(active) if active == index => {
                if self.tabs.is_empty() {
                    None
                } else if index < self.tabs.len() {
                    Some(index)
                } else {
                    Some(self.tabs.len() - 1)
                }
            }
            Some(active) if active > index => Some(active - 1),
            other => other,
        };
        if !self.has_unsaved_changes() {
            self.autosave_deadline = None;
        }
        debug!(path = %closed.path.display(), active = ?self.active, "tab closed");
        Ok(closed)
    }

    /// Moves a tab; the active index keeps pointing at the same tab.
    pub fn reorder_tab(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        let tab = self.tabs.remove(from);
        self.tabs.insert(to, tab);
        if let Some(active) = self.active {
            self.active = Some(if active == from {
                to
            } else if from < active && active <= to {
                active - 1
            } else if to <= active && active < from {
                active + 1
            } else {
                active
            });
        }
        Ok(())
    }

    /// Closes every tab at or below `path`, returning the closed tabs.
    pub fn close_under(&mut self, path: &Path) -> Vec<Tab> {
        let mut closed = Vec::new();
        let mut index = self.tabs.len();
        while index > 0 {
            index -= 1;
            if self.tabs[index].path.starts_with(path) {
                if let Ok(tab) = self.close_tab(index) {
                    closed.push(tab);
                }
            }
        }
        closed.reverse();
        closed
    }

    /// Rewrites tabs at or below `old` to live under `new`, in place.
    pub fn retarget(&mut self, old: &Path, new: &Path) -> usize {
        let mut updated = 0;
        for tab in &mut self.tabs {
            let Ok(suffix) = tab.path.strip_prefix(old) else {
                continue;
            };
            let new_path = if suffix.as_os_str().is_empty() {
                new.to_path_buf()
            } else {
                new.join(suffix)
            };
            if let Some(name) = new_path.file_name() {
                tab.name = name.to_string_lossy().into_owned();
            }
            tab.path = new_path;
            updated += 1;
        }
        updated
    }

    /// Re-resolves every tab by path against a freshly loaded tree. Tabs whose
    /// path is gone stay open and are flagged stale.
    /// 依路徑重新對應所有分頁；找不到的分頁保持開啟並標記為過期。
    pub fn reconcile(&mut self, tree: &FileTree) {
        for tab in &mut self.tabs {
            match tree.find_file(&tab.path) {
                Some(node) => {
                    tab.id = node.id;
                    tab.name = node.name.clone();
                    tab.file_type = node.file_type;
                    tab.stale = false;
                }
                None => {
                    if !tab.stale {
                        warn!(path = %tab.path.display(), "open tab no longer resolves in the vault tree");
                    }
                    tab.stale = true;
                }
            }
        }
    }

    /// Drops all tabs and any pending autosave.
    pub fn reset(&mut self) {
        self.tabs.clear();
        self.active = None;
        self.autosave_deadline = None;
    }

    pub(crate) fn check_index(&self, index: usize) -> Result<()> {
        if index < self.tabs.len() {
            Ok(())
        } else {
            Err(VaultError::TabOutOfRange {
                index,
                len: self.tabs.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsOperation, MemoryFileSystem};

    const DELAY: Duration = Duration::from_millis(1_000);

    async fn vault() -> (MemoryFileSystem, FileTree) {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/v/a.md", "alpha");
        fs.insert_file("/v/b.md", "bravo");
        fs.insert_file("/v/c.md", "charlie");
        fs.insert_file("/v/sub/d.md", "delta");
        let mut tree = FileTree::default();
        tree.load(&fs, Path::new("/v")).await.unwrap();
        (fs, tree)
    }

    fn node<'a>(tree: &'a FileTree, path: &str) -> &'a FileNode {
        tree.find_file(Path::new(path)).unwrap()
    }

    async fn open_all(fs: &MemoryFileSystem, tree: &FileTree, tabs: &mut TabSession) {
        for path in ["/v/a.md", "/v/b.md", "/v/c.md"] {
            tabs.open_file(fs, node(tree, path)).await.unwrap();
        }
    }

    fn names(tabs: &TabSession) -> Vec<&str> {
        tabs.tabs().iter().map(|tab| tab.name.as_str()).collect()
    }

    #[tokio::test]
    async fn opening_an_open_path_activates_instead_of_duplicating() {
        let (fs, tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        open_all(&fs, &tree, &mut tabs).await;

        let index = tabs.open_file(&fs, node(&tree, "/v/a.md")).await.unwrap();
        assert_eq!(index, 0);
        assert_eq!(tabs.len(), 3);
        assert_eq!(tabs.active_index(), Some(0));
        assert_eq!(tabs.active_tab().unwrap().content(), "alpha");
    }

    #[tokio::test]
    async fn closing_the_active_tab_picks_a_neighbour() {
        let (fs, tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        tabs.open_file(&fs, node(&tree, "/v/a.md")).await.unwrap();
        tabs.open_file(&fs, node(&tree, "/v/b.md")).await.unwrap();
        tabs.activate(&fs, 0).await.unwrap();

        tabs.close_tab(0).unwrap();
        assert_eq!(names(&tabs), vec!["b.md"]);
        assert_eq!(tabs.active_index(), Some(0));

        tabs.close_tab(0).unwrap();
        assert!(tabs.is_empty());
        assert_eq!(tabs.active_index(), None);
    }

    #[tokio::test]
    async fn closing_last_active_tab_falls_back_to_previous() {
        let (fs, tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        open_all(&fs, &tree, &mut tabs).await;

        tabs.close_tab(2).unwrap();
        assert_eq!(tabs.active_index(), Some(1));
        assert_eq!(tabs.active_tab().unwrap().name, "b.md");
    }

    #[tokio::test]
    async fn closing_before_the_active_tab_keeps_it_active() {
        let (fs, tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        open_all(&fs, &tree, &mut tabs).await;

        tabs.close_tab(0).unwrap();
        assert_eq!(tabs.active_tab().unwrap().name, "c.md");
        assert!(matches!(
            tabs.close_tab(5),
            Err(VaultError::TabOutOfRange { index: 5, len: 2 })
        ));
    }

    #[tokio::test]
    async fn reorder_keeps_active_tab_identity() {
        let (fs, tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        open_all(&fs, &tree, &mut tabs).await;
        tabs.activate(&fs, 1).await.unwrap();

        tabs.reorder_tab(0, 2).unwrap();
        assert_eq!(names(&tabs), vec!["b.md", "c.md", "a.md"]);
        assert_eq!(tabs.active_index(), Some(0));

        tabs.reorder_tab(0, 2).unwrap();
        assert_eq!(names(&tabs), vec!["c.md", "a.md", "b.md"]);
        assert_eq!(tabs.active_index(), Some(2));

        tabs.reorder_tab(2, 0).unwrap();
        assert_eq!(names(&tabs), vec!["b.md", "c.md", "a.md"]);
        assert_eq!(tabs.active_index(), Some(0));

        tabs.reorder_tab(2, 1).unwrap();
        assert_eq!(names(&tabs), vec!["b.md", "a.md", "c.md"]);
        assert_eq!(tabs.active_tab().unwrap().name, "b.md");
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_waits_for_inactivity() {
        let (fs, tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        tabs.open_file(&fs, node(&tree, "/v/a.md")).await.unwrap();

        tabs.edit("alpha 1").unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;
        tabs.edit("alpha 2").unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;

        assert!(!tabs.autosave_if_due(&fs, Instant::now()).await.unwrap());
        assert_eq!(fs.contents("/v/a.md").as_deref(), Some("alpha"));
        assert_eq!(tabs.active_tab().unwrap().state(), TabState::Dirty);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(tabs.autosave_if_due(&fs, Instant::now()).await.unwrap());
        assert_eq!(fs.contents("/v/a.md").as_deref(), Some("alpha 2"));
        assert_eq!(tabs.active_tab().unwrap().state(), TabState::Open);
        assert!(tabs.autosave_deadline().is_none());
    }

    #[tokio::test]
    async fn switching_tabs_flushes_pending_edits() {
        let (fs, tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        tabs.open_file(&fs, node(&tree, "/v/a.md")).await.unwrap();
        tabs.open_file(&fs, node(&tree, "/v/b.md")).await.unwrap();

        tabs.edit("bravo edited").unwrap();
        tabs.activate(&fs, 0).await.unwrap();

        assert_eq!(fs.contents("/v/b.md").as_deref(), Some("bravo edited"));
        assert!(!tabs.has_unsaved_changes());
        assert!(tabs.autosave_deadline().is_none());
    }

    #[tokio::test]
    async fn failed_flush_aborts_the_switch() {
        let (fs, tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        tabs.open_file(&fs, node(&tree, "/v/a.md")).await.unwrap();
        tabs.open_file(&fs, node(&tree, "/v/b.md")).await.unwrap();
        tabs.edit("unsaved").unwrap();

        fs.fail_next(FsOperation::Write, "/v/b.md");
        assert!(tabs.activate(&fs, 0).await.is_err());
        assert_eq!(tabs.active_index(), Some(1));
        assert!(tabs.active_tab().unwrap().is_dirty());
        assert!(tabs.autosave_deadline().is_some());
    }

    #[tokio::test]
    async fn reconcile_refreshes_ids_and_flags_missing_paths() {
        let (fs, mut tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        tabs.open_file(&fs, node(&tree, "/v/a.md")).await.unwrap();
        tabs.open_file(&fs, node(&tree, "/v/b.md")).await.unwrap();
        let old_id = tabs.tabs()[0].id;

        fs.delete_path(Path::new("/v/b.md")).await.unwrap();
        tree.load(&fs, Path::new("/v")).await.unwrap();
        tabs.reconcile(&tree);

        assert_ne!(tabs.tabs()[0].id, old_id);
        assert_eq!(tabs.tabs()[0].id, node(&tree, "/v/a.md").id);
        assert!(!tabs.tabs()[0].is_stale());
        assert!(tabs.tabs()[1].is_stale());
        assert_eq!(tabs.tabs()[1].content(), "bravo");
        assert_eq!(tabs.len(), 2);
    }

    #[tokio::test]
    async fn retarget_and_close_under_follow_folder_prefixes() {
        let (fs, tree) = vault().await;
        let mut tabs = TabSession::new(DELAY);
        tabs.open_file(&fs, node(&tree, "/v/sub/d.md")).await.unwrap();
        tabs.open_file(&fs, node(&tree, "/v/a.md")).await.unwrap();

        assert_eq!(tabs.retarget(Path::new("/v/sub"), Path::new("/v/renamed")), 1);
        assert_eq!(tabs.tabs()[0].path, Path::new("/v/renamed/d.md"));
        assert_eq!(tabs.retarget(Path::new("/v/a"), Path::new("/v/z")), 0);

        let closed = tabs.close_under(Path::new("/v/renamed"));
        assert_eq!(closed.len(), 1);
        assert_eq!(names(&tabs), vec!["a.md"]);
        assert_eq!(tabs.active_index(), Some(0));
    }

    #[test]
    fn edit_without_active_tab_fails() {
        let mut tabs = TabSession::new(DELAY);
        assert!(matches!(tabs.edit("x"), Err(VaultError::NoActiveTab)));
    }
}
