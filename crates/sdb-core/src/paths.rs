//! Standard paths used by sdb

use std::path::PathBuf;

/// File name of the encrypted store inside the data directory
pub const STORE_FILE: &str = "passwords.sdb";

/// File name of the YAML configuration inside the config directory
pub const CONFIG_FILE: &str = "config.yaml";

/// Standard sdb paths
pub struct Paths {
    /// Data directory (~/.local/share/sdb)
    pub data: PathBuf,
    /// Config directory (~/.config/sdb)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("sdb");

        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("sdb");

        Self { data, config }
    }

    #[cfg(test)]
    pub(crate) fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            data: root.join("data"),
            config: root.join("config"),
        }
    }

    /// Default location of the encrypted store
    pub fn store(&self) -> PathBuf {
        self.data.join(STORE_FILE)
    }

    /// Default location of the configuration file
    pub fn config_file(&self) -> PathBuf {
        self.config.join(CONFIG_FILE)
    }
}
