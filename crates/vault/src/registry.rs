use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::fs::FileSystem;

/// Stable identifier for vaults, persisted across restarts.
/// 保管庫的穩定代號，跨重新啟動保持不變。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultId(String);

impl VaultId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VaultId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user-designated root folder.
/// 使用者指定的保管庫根資料夾。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vault {
    pub id: VaultId,
    pub name: String,
    pub path: PathBuf,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
}

impl Vault {
    /// `created` is cut to milliseconds, the precision it is persisted with.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: VaultId::new(),
            name: name.into(),
            path: path.into(),
            created: Utc::now().trunc_subsecs(3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RegistryDocument {
    #[serde(default)]
    vaults: Vec<Vault>,
    #[serde(default)]
    current_vault: Option<VaultId>,
}

/// Ordered list of vaults plus the current selection, written through the
/// filesystem after every change.
/// 有序的保管庫清單與目前選取項目；每次變更後立即寫回。
pub struct VaultRegistry {
    fs: Arc<dyn FileSystem>,
    document_path: PathBuf,
    vaults: Vec<Vault>,
    current: Option<VaultId>,
}

impl fmt::Debug for VaultRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultRegistry")
            .field("document_path", &self.document_path)
            .field("vaults", &self.vaults)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl VaultRegistry {
    /// Restores the registry from `document_path`. A missing document yields an
    /// empty registry so first-run flows can prompt for a vault.
    /// 從文件還原登錄；文件不存在時回傳空白登錄。
    pub async fn restore(fs: Arc<dyn FileSystem>, document_path: impl AsRef<Path>) -> Result<Self> {
        let document_path = document_path.as_ref().to_path_buf();
        let document = match fs.read_file(&document_path).await {
            Ok(contents) => serde_json::from_str::<RegistryDocument>(&contents)
                .map_err(|err| VaultError::InvalidRegistry(err.to_string()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %document_path.display(), "no vault registry yet");
                RegistryDocument::default()
            }
            Err(err) => return Err(VaultError::io("read", &document_path)(err)),
        };

        let mut current = document.current_vault;
        if let Some(id) = &current {
            if !document.vaults.iter().any(|vault| vault.id == *id) {
                warn!(vault = %id, "persisted current vault is not registered; ignoring");
                current = None;
            }
        }

        Ok(Self {
            fs,
            document_path,
            vaults: document.vaults,
            current,
        })
    }

    /// Writes the whole registry as one JSON document.
    pub async fn persist(&self) -> Result<()> {
        let document = RegistryDocument {
            vaults: self.vaults.clone(),
            current_vault: self.current.clone(),
        };
        let payload = serde_json::to_string_pretty(&document)
            .map_err(|err| VaultError::InvalidRegistry(err.to_string()))?;
        self.fs
            .write_file(&self.document_path, &payload)
            .await
            .map_err(VaultError::io("write", &self.document_path))
    }

    pub fn document_path(&self) -> &Path {
        &self.document_path
    }

    /// Vaults in insertion (display) order.
    pub fn vaults(&self) -> &[Vault] {
        &self.vaults
    }

    pub fn get(&self, id: &VaultId) -> Option<&Vault> {
        self.vaults.iter().find(|vault| vault.id == *id)
    }

    pub fn current(&self) -> Option<&Vault> {
        self.current.as_ref().and_then(|id| self.get(id))
    }

    /// Registers a new vault with a fresh id and persists.
    /// 以新代號登錄保管庫並立即保存。
    pub async fn add_vault(
        &mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Vault> {
        let vault = Vault::new(name, path);
        self.vaults.push(vault.clone());
        if let Err(err) = self.persist().await {
            self.vaults.pop();
            return Err(err);
        }
        info!(vault = %vault.id, name = %vault.name, "vault registered");
        Ok(vault)
    }

    /// Makes `id` the current vault and persists.
    pub async fn switch_vault(&mut self, id: &VaultId) -> Result<&Vault> {
        let index = self
            .position(id)
            .ok_or_else(|| VaultError::VaultNotFound(id.clone()))?;
        let previous = self.current.replace(id.clone());
        if let Err(err) = self.persist().await {
            self.current = previous;
            return Err(err);
        }
        Ok(&self.vaults[index])
    }

    /// Forgets a vault. The folder on disk is left untouched.
    pub async fn remove_vault(&mut self, id: &VaultId) -> Result<Vault> {
        let index = self
            .position(id)
            .ok_or_else(|| VaultError::VaultNotFound(id.clone()))?;
        let removed = self.vaults.remove(index);
        let previous = self.current.clone();
        if self.current.as_ref() == Some(id) {
            self.current = None;
        }
        if let Err(err) = self.persist().await {
            self.vaults.insert(index, removed);
            self.current = previous;
            return Err(err);
        }
        info!(vault = %removed.id, "vault removed from registry");
        Ok(removed)
    }

    fn position(&self, id: &VaultId) -> Option<usize> {
        self.vaults.iter().position(|vault| vault.id == *id)
    }
}
