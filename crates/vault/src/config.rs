use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::{FileType, ScanOptions};

const CONFIG_VERSION: u32 = 1;
const DEFAULT_AUTOSAVE_DELAY_MS: u64 = 1_000;
const MIN_AUTOSAVE_DELAY_MS: u64 = 100;
const MAX_AUTOSAVE_DELAY_MS: u64 = 60_000;
const DEFAULT_MAX_SCAN_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunables for a vault session.
/// 保管庫工作階段的可調整參數。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Inactivity delay before a dirty tab is written back.
    #[serde(default = "default_autosave_delay_ms")]
    pub autosave_delay_ms: u64,
    /// Depth cap applied to vault scans; guards against symlink cycles.
    #[serde(default = "default_max_scan_depth")]
    pub max_scan_depth: Option<usize>,
    /// Extensions (without the dot) listed in the tree as `base` files.
    #[serde(default)]
    pub extra_base_extensions: Vec<String>,
    #[serde(default)]
    pub templates: Templates,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_autosave_delay_ms() -> u64 {
    DEFAULT_AUTOSAVE_DELAY_MS
}

fn default_max_scan_depth() -> Option<usize> {
    Some(DEFAULT_MAX_SCAN_DEPTH)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            autosave_delay_ms: DEFAULT_AUTOSAVE_DELAY_MS,
            max_scan_depth: default_max_scan_depth(),
            extra_base_extensions: Vec::new(),
            templates: Templates::default(),
        }
    }
}

impl SessionConfig {
    /// Loads the config from `path`; a missing file yields the defaults.
    /// 從路徑載入設定；檔案不存在時回傳預設值。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let mut config: SessionConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = CONFIG_VERSION;
        }
        self.autosave_delay_ms = self
            .autosave_delay_ms
            .clamp(MIN_AUTOSAVE_DELAY_MS, MAX_AUTOSAVE_DELAY_MS);
        if self.max_scan_depth == Some(0) {
            self.max_scan_depth = default_max_scan_depth();
        }

        let mut extensions: Vec<String> = Vec::new();
        for raw in &self.extra_base_extensions {
            let normalized = raw.trim().trim_start_matches('.').to_ascii_lowercase();
            if normalized.is_empty()
                || FileType::from_extension(&normalized, &[]).is_some()
                || extensions.contains(&normalized)
            {
                continue;
            }
            extensions.push(normalized);
        }
        self.extra_base_extensions = extensions;
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            max_depth: self.max_scan_depth,
            extra_base_extensions: self.extra_base_extensions.clone(),
        }
    }
}

/// Initial contents written by `create_file`, per file type.
/// `{title}` in the note template is replaced by the file's stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Templates {
    #[serde(default = "default_note_template")]
    pub note: String,
    #[serde(default)]
    pub canvas: String,
    #[serde(default)]
    pub base: String,
}

fn default_note_template() -> String {
    "# {title}\n\n".to_string()
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            note: default_note_template(),
            canvas: String::new(),
            base: String::new(),
        }
    }
}

impl Templates {
    /// Renders the template for `file_type`; images have none.
    pub fn render(&self, file_type: FileType, title: &str) -> Option<String> {
        match file_type {
            FileType::Note => Some(self.note.replace("{title}", title)),
            FileType::Canvas => Some(self.canvas.clone()),
            FileType::Base => Some(self.base.clone()),
            FileType::Image => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = SessionConfig::load(dir.path().join("config.json")).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.autosave_delay(), Duration::from_millis(1_000));
        assert_eq!(config.max_scan_depth, Some(64));
    }

    #[test]
    fn load_sanitizes_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "autosave_delay_ms": 5,
                "max_scan_depth": 0,
                "extra_base_extensions": [".TXT", "md", "txt", " csv "]
            }"#,
        )
        .unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.autosave_delay_ms, 100);
        assert_eq!(config.max_scan_depth, Some(64));
        assert_eq!(config.extra_base_extensions, vec!["txt", "csv"]);
        assert_eq!(config.templates, Templates::default());
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SessionConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn note_template_substitutes_title() {
        let templates = Templates::default();
        assert_eq!(
            templates.render(FileType::Note, "Foo").as_deref(),
            Some("# Foo\n\n")
        );
        assert_eq!(templates.render(FileType::Image, "pic"), None);
    }
}
