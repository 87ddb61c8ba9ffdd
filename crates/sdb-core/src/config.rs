//! sdb configuration management
//!
//! Configuration file: ~/.config/sdb/config.yaml
//!
//! Every section is optional. A missing file yields the defaults.

use crate::paths::Paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global sdb configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Store file override (defaults to ~/.local/share/sdb/passwords.sdb)
    #[serde(default)]
    pub store: Option<PathBuf>,

    /// Encryption backend settings
    #[serde(default)]
    pub cipher: CipherConfig,

    /// Clipboard hand-off settings
    #[serde(default)]
    pub clipboard: ClipboardConfig,

    /// Passphrase agent settings
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Which encryption transform protects the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherKind {
    /// Built-in Argon2id + ChaCha20-Poly1305 container
    #[default]
    Sealed,
    /// External gpg binary, symmetric mode
    Gpg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CipherConfig {
    #[serde(default)]
    pub kind: CipherKind,

    /// gpg executable used by the gpg backend
    #[serde(default = "default_gpg_program")]
    pub gpg_program: String,

    /// Argon2 memory cost in KiB
    #[serde(default = "default_m_cost")]
    pub m_cost: u32,

    /// Argon2 iterations
    #[serde(default = "default_t_cost")]
    pub t_cost: u32,

    /// Argon2 lanes
    #[serde(default = "default_p_cost")]
    pub p_cost: u32,
}

fn default_gpg_program() -> String {
    "gpg".to_string()
}

fn default_m_cost() -> u32 {
    19 * 1024
}

fn default_t_cost() -> u32 {
    2
}

fn default_p_cost() -> u32 {
    1
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            kind: CipherKind::default(),
            gpg_program: default_gpg_program(),
            m_cost: default_m_cost(),
            t_cost: default_t_cost(),
            p_cost: default_p_cost(),
        }
    }
}

/// X selection targeted by the clipboard hand-off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    /// PRIMARY, pasted with middle click
    #[default]
    Primary,
    /// CLIPBOARD, pasted with ctrl-v
    Clipboard,
}

/// How a secret is handed to the selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffMode {
    /// Serve exactly one paste, then restore
    #[default]
    Once,
    /// Hold for a fixed time, then restore
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub selection: Selection,

    #[serde(default)]
    pub mode: HandoffMode,

    /// Seconds a secret stays in the selection in timeout mode
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            selection: Selection::default(),
            mode: HandoffMode::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Ask the agent for the passphrase instead of prompting
    #[serde(default)]
    pub enabled: bool,

    /// File holding the agent descriptor when the environment lacks it
    #[serde(default)]
    pub info_file: Option<PathBuf>,

    /// Cache id override (defaults to one derived from the store path)
    #[serde(default)]
    pub cache_id: Option<String>,
}

impl Config {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Paths::new().config_file())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Self = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The store file this configuration points at
    pub fn store_path(&self, paths: &Paths) -> PathBuf {
        self.store.clone().unwrap_or_else(|| paths.store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let tmp = TempDir::new()?;
        let config = Config::load_from(&tmp.path().join("nope.yaml"))?;
        assert_eq!(config, Config::default());
        assert!(config.clipboard.enabled);
        assert_eq!(config.clipboard.mode, HandoffMode::Once);
        assert_eq!(config.cipher.kind, CipherKind::Sealed);
        Ok(())
    }

    #[test]
    fn test_partial_yaml() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "cipher:\n  kind: gpg\nclipboard:\n  selection: clipboard\n  mode: timeout\n  timeout_secs: 3\n",
        )?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.cipher.kind, CipherKind::Gpg);
        assert_eq!(config.cipher.gpg_program, "gpg");
        assert_eq!(config.clipboard.selection, Selection::Clipboard);
        assert_eq!(config.clipboard.mode, HandoffMode::Timeout);
        assert_eq!(config.clipboard.timeout_secs, 3);
        assert!(config.clipboard.enabled);
        assert!(!config.agent.enabled);
        Ok(())
    }

    #[test]
    fn test_save_then_load() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.store = Some(PathBuf::from("/srv/passwords.sdb"));
        config.agent.enabled = true;
        config.save_to(&path)?;

        assert_eq!(Config::load_from(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_store_path_override() {
        let paths = Paths::rooted_at(Path::new("/home/u"));
        let mut config = Config::default();
        assert_eq!(config.store_path(&paths), paths.store());

        config.store = Some(PathBuf::from("/elsewhere/p.sdb"));
        assert_eq!(config.store_path(&paths), PathBuf::from("/elsewhere/p.sdb"));
    }

    #[test]
    fn test_malformed_yaml_is_an_error() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "cipher: [unterminated")?;
        assert!(Config::load_from(&path).is_err());
        Ok(())
    }
}
