use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, VaultError};
use crate::fs::FileSystem;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg"];

/// Process-local identifier handed out when a node is discovered.
/// 掃描時指派給節點的行程內唯一識別碼。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Classification of files shown in the vault tree.
/// 檔案樹中顯示的檔案類型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Note,
    Canvas,
    Image,
    Base,
}

impl FileType {
    /// Maps a lower-case extension to a file type. Extensions outside the
    /// built-in table only count when listed in `extra_base`.
    pub fn from_extension(extension: &str, extra_base: &[String]) -> Option<Self> {
        match extension {
            "md" => Some(FileType::Note),
            "mm" => Some(FileType::Canvas),
            ext if IMAGE_EXTENSIONS.contains(&ext) => Some(FileType::Image),
            ext if extra_base.iter().any(|candidate| candidate == ext) => Some(FileType::Base),
            _ => None,
        }
    }

    pub fn from_path(path: &Path, extra_base: &[String]) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::from_extension(&extension, extra_base)
    }

    /// Extension appended by `create_file` for this type.
    pub fn canonical_extension(self) -> &'static str {
        match self {
            FileType::Note => "md",
            FileType::Canvas => "mm",
            FileType::Image => "png",
            FileType::Base => "txt",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Note => "note",
            FileType::Canvas => "canvas",
            FileType::Image => "image",
            FileType::Base => "base",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderNode {
    pub id: NodeId,
    pub name: String,
    pub path: PathBuf,
    pub expanded: bool,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileNode {
    pub id: NodeId,
    pub name: String,
    pub path: PathBuf,
    pub file_type: FileType,
    pub created: DateTime<Utc>,
}

/// Node of the in-memory mirror of a vault folder.
/// 保管庫資料夾在記憶體中的鏡像節點。
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Root { children: Vec<TreeNode> },
    Folder(FolderNode),
    File(FileNode),
}

impl TreeNode {
    pub fn id(&self) -> Option<NodeId> {
        match self {
            TreeNode::Root { .. } => None,
            TreeNode::Folder(folder) => Some(folder.id),
            TreeNode::File(file) => Some(file.id),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            TreeNode::Root { .. } => None,
            TreeNode::Folder(folder) => Some(&folder.path),
            TreeNode::File(file) => Some(&file.path),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TreeNode::Root { .. } => "",
            TreeNode::Folder(folder) => &folder.name,
            TreeNode::File(file) => &file.name,
        }
    }

    pub fn children(&self) -> &[TreeNode] {
        match self {
            TreeNode::Root { children } => children,
            TreeNode::Folder(folder) => &folder.children,
            TreeNode::File(_) => &[],
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            TreeNode::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        !matches!(self, TreeNode::File(_))
    }
}

/// Options controlling a vault scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Deepest folder level whose contents are listed. `None` recurses without
    /// limit, which never terminates on a cyclic symlink.
    pub max_depth: Option<usize>,
    pub extra_base_extensions: Vec<String>,
}

/// Row of a flattened tree for display.
#[derive(Debug, Clone, Copy)]
pub struct TreeRow<'a> {
    pub depth: usize,
    pub node: &'a TreeNode,
}

/// Cached tree for one vault, rebuilt wholesale by [`FileTree::load`].
/// 單一保管庫的檔案樹快取，每次載入都整棵重建。
#[derive(Debug, Default)]
pub struct FileTree {
    options: ScanOptions,
    vault_path: Option<PathBuf>,
    root: Option<TreeNode>,
    revision: u64,
}

impl FileTree {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            vault_path: None,
            root: None,
            revision: 0,
        }
    }

    /// Rescans `vault_path` and replaces the whole tree. Every node gets a new
    /// id. On failure the previously loaded tree is kept.
    /// 重新掃描保管庫並取代整棵樹；失敗時保留先前的樹。
    pub async fn load(&mut self, fs: &dyn FileSystem, vault_path: &Path) -> Result<&TreeNode> {
        let children = scan_directory(fs, vault_path, 0, &self.options).await?;
        self.vault_path = Some(vault_path.to_path_buf());
        self.revision = self.revision.wrapping_add(1);
        debug!(
            vault = %vault_path.display(),
            revision = self.revision,
            "vault tree reloaded"
        );
        Ok(self.root.insert(TreeNode::Root { children }))
    }

    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_ref()
    }

    pub fn vault_path(&self) -> Option<&Path> {
        self.vault_path.as_deref()
    }

    /// Incremented after every successful load.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_loaded(&self) -> bool {
        self.root.is_some()
    }

    /// Finds a node by path. The vault path itself resolves to the root.
    pub fn find_by_path(&self, path: &Path) -> Option<&TreeNode> {
        let root = self.root.as_ref()?;
        if self.vault_path.as_deref() == Some(path) {
            return Some(root);
        }
        find_recursive(root, &|node| node.path() == Some(path))
    }

    pub fn find_by_id(&self, id: NodeId) -> Option<&TreeNode> {
        let root = self.root.as_ref()?;
        find_recursive(root, &|node| node.id() == Some(id))
    }

    pub fn find_file(&self, path: &Path) -> Option<&FileNode> {
        self.find_by_path(path).and_then(TreeNode::as_file)
    }

    /// Sets the presentation-only `expanded` flag of a folder. Returns `false`
    /// when no folder lives at `path`.
    pub fn set_expanded(&mut self, path: &Path, expanded: bool) -> bool {
        match self.root.as_mut().and_then(|root| find_folder_mut(root, path)) {
            Some(folder) => {
                folder.expanded = expanded;
                true
            }
            None => false,
        }
    }

    /// Flattens the tree, descending only into expanded folders.
    pub fn visible_rows(&self) -> Vec<TreeRow<'_>> {
        let mut rows = Vec::new();
        if let Some(root) = &self.root {
            for child in root.children() {
                push_visible(child, 0, &mut rows);
            }
        }
        rows
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.vault_path = None;
    }
}

fn find_recursive<'a>(
    node: &'a TreeNode,
    predicate: &dyn Fn(&TreeNode) -> bool,
) -> Option<&'a TreeNode> {
    if predicate(node) {
        return Some(node);
    }
    for child in node.children() {
        if let Some(found) = find_recursive(child, predicate) {
            return Some(found);
        }
    }
    None
}

fn find_folder_mut<'a>(node: &'a mut TreeNode, path: &Path) -> Option<&'a mut FolderNode> {
    let is_target = matches!(&*node, TreeNode::Folder(folder) if folder.path == path);
    if is_target {
        if let TreeNode::Folder(folder) = node {
            return Some(folder);
        }
        return None;
    }
    match node {
        TreeNode::File(_) => None,
        TreeNode::Folder(FolderNode { children, .. }) | TreeNode::Root { children } => children
            .iter_mut()
            .find_map(|child| find_folder_mut(child, path)),
    }
}

fn push_visible<'a>(node: &'a TreeNode, depth: usize, rows: &mut Vec<TreeRow<'a>>) {
    rows.push(TreeRow { depth, node });
    if let TreeNode::Folder(folder) = node {
        if folder.expanded {
            for child in &folder.children {
                push_visible(child, depth + 1, rows);
            }
        }
    }
}

fn scan_directory<'a>(
    fs: &'a dyn FileSystem,
    dir: &'a Path,
    depth: usize,
    options: &'a ScanOptions,
) -> BoxFuture<'a, Result<Vec<TreeNode>>> {
    async move {
        let entries = fs
            .list_directory(dir)
            .await
            .map_err(VaultError::io("list", dir))?;

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.name.starts_with('.') {
                continue;
            }
            if entry.is_directory {
                let id = NodeId::next();
                let folder_depth = depth + 1;
                let nested = match options.max_depth {
                    Some(max) if folder_depth > max => {
                        warn!(
                            path = %entry.path.display(),
                            max_depth = max,
                            "scan depth limit reached; folder contents omitted"
                        );
                        Vec::new()
                    }
                    _ => scan_directory(fs, &entry.path, folder_depth, options).await?,
                };
                children.push(TreeNode::Folder(FolderNode {
                    id,
                    name: entry.name,
                    path: entry.path,
                    expanded: false,
                    children: nested,
                }));
            } else if entry.is_file {
                let Some(file_type) =
                    FileType::from_path(&entry.path, &options.extra_base_extensions)
                else {
                    continue;
                };
                children.push(TreeNode::File(FileNode {
                    id: NodeId::next(),
                    name: entry.name,
                    path: entry.path,
                    file_type,
                    created: entry.modified.unwrap_or_else(Utc::now),
                }));
            }
        }
        children.sort_by(compare_nodes);
        Ok(children)
    }
    .boxed()
}

fn compare_nodes(a: &TreeNode, b: &TreeNode) -> CmpOrdering {
    b.is_container()
        .cmp(&a.is_container())
        .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
        .then_with(|| a.name().cmp(b.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsOperation, MemoryFileSystem};
    use std::collections::HashSet;

    fn sample_vault() -> MemoryFileSystem {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/v/a.md", "# a");
        fs.insert_file("/v/Board.mm", "");
        fs.insert_file("/v/photo.JPG", "");
        fs.insert_file("/v/notes.txt", "plain");
        fs.insert_file("/v/.hidden.md", "");
        fs.insert_dir("/v/.obsidian");
        fs.insert_file("/v/.obsidian/config.md", "");
        fs.insert_file("/v/projects/plan.md", "");
        fs.insert_file("/v/projects/deep/diagram.svg", "");
        fs
    }

    fn collect_ids(node: &TreeNode, ids: &mut Vec<NodeId>) {
        if let Some(id) = node.id() {
            ids.push(id);
        }
        for child in node.children() {
            collect_ids(child, ids);
        }
    }

    #[tokio::test]
    async fn load_filters_hidden_and_unknown_entries() {
        let fs = sample_vault();
        let mut tree = FileTree::default();
        let root = tree.load(&fs, Path::new("/v")).await.unwrap();

        let names: Vec<_> = root.children().iter().map(TreeNode::name).collect();
        assert_eq!(names, vec!["projects", "a.md", "Board.mm", "photo.JPG"]);

        assert_eq!(
            tree.find_file(Path::new("/v/photo.JPG")).unwrap().file_type,
            FileType::Image
        );
        assert_eq!(
            tree.find_file(Path::new("/v/Board.mm")).unwrap().file_type,
            FileType::Canvas
        );
        assert!(tree.find_by_path(Path::new("/v/notes.txt")).is_none());
        assert!(tree.find_by_path(Path::new("/v/.obsidian")).is_none());
        assert!(tree
            .find_by_path(Path::new("/v/projects/deep/diagram.svg"))
            .is_some());
    }

    #[tokio::test]
    async fn reload_assigns_fresh_unique_ids() {
        let fs = sample_vault();
        let mut tree = FileTree::default();
        tree.load(&fs, Path::new("/v")).await.unwrap();
        let first = tree.find_file(Path::new("/v/a.md")).unwrap().id;

        let mut ids = Vec::new();
        collect_ids(tree.root().unwrap(), &mut ids);
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());

        tree.load(&fs, Path::new("/v")).await.unwrap();
        let second = tree.find_file(Path::new("/v/a.md")).unwrap().id;
        assert_ne!(first, second);
        assert!(tree.find_by_id(first).is_none());
        assert_eq!(
            tree.find_by_id(second).and_then(TreeNode::path),
            Some(Path::new("/v/a.md"))
        );
        assert_eq!(tree.revision(), 2);
    }

    #[test]
    fn lookups_before_load_return_none() {
        let tree = FileTree::default();
        assert!(tree.find_by_path(Path::new("/v/a.md")).is_none());
        assert!(tree.find_by_id(NodeId::next()).is_none());
        assert!(tree.visible_rows().is_empty());
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_tree() {
        let fs = sample_vault();
        let mut tree = FileTree::default();
        tree.load(&fs, Path::new("/v")).await.unwrap();

        fs.fail_next(FsOperation::List, "/v/projects");
        let err = tree.load(&fs, Path::new("/v")).await.unwrap_err();
        assert!(matches!(err, VaultError::Io { action: "list", .. }));
        assert_eq!(tree.revision(), 1);
        assert!(tree.find_by_path(Path::new("/v/projects/plan.md")).is_some());
    }

    #[tokio::test]
    async fn depth_cap_keeps_folder_without_contents() {
        let fs = sample_vault();
        let mut tree = FileTree::new(ScanOptions {
            max_depth: Some(1),
            ..ScanOptions::default()
        });
        tree.load(&fs, Path::new("/v")).await.unwrap();

        let deep = tree.find_by_path(Path::new("/v/projects/deep")).unwrap();
        assert!(deep.children().is_empty());
        assert!(tree.find_by_path(Path::new("/v/projects/plan.md")).is_some());
    }

    #[tokio::test]
    async fn extra_base_extensions_are_listed_as_base() {
        let fs = sample_vault();
        let mut tree = FileTree::new(ScanOptions {
            max_depth: None,
            extra_base_extensions: vec!["txt".into()],
        });
        tree.load(&fs, Path::new("/v")).await.unwrap();
        assert_eq!(
            tree.find_file(Path::new("/v/notes.txt")).unwrap().file_type,
            FileType::Base
        );
    }

    #[tokio::test]
    async fn visible_rows_follow_expanded_folders() {
        let fs = sample_vault();
        let mut tree = FileTree::default();
        tree.load(&fs, Path::new("/v")).await.unwrap();
        assert_eq!(tree.visible_rows().len(), 4);

        assert!(tree.set_expanded(Path::new("/v/projects"), true));
        assert!(!tree.set_expanded(Path::new("/v/a.md"), true));
        let rows: Vec<_> = tree
            .visible_rows()
            .iter()
            .map(|row| (row.depth, row.node.name().to_string()))
            .collect();
        assert_eq!(
            rows,
            vec![
                (0, "projects".to_string()),
                (1, "deep".to_string()),
                (1, "plan.md".to_string()),
                (0, "a.md".to_string()),
                (0, "Board.mm".to_string()),
                (0, "photo.JPG".to_string()),
            ]
        );

        assert!(tree.set_expanded(Path::new("/v/projects/deep"), true));
        assert_eq!(tree.visible_rows()[2].node.name(), "diagram.svg");
        assert_eq!(tree.visible_rows()[2].depth, 2);
    }
}
