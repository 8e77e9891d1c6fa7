//! Static configuration: the shard list, storage paths and query limits.

use crate::error::AnoimaResult;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One statically configured shard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShardConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnoimaConfig {
    /// Application identity reported by `/api/health`.
    pub app_name: String,
    /// HTTP port for the gateway.
    pub port: u16,
    /// Base directory for sled databases. The global store and derived shards live under it.
    pub storage_path: String,
    /// Global store (key-map, bookmarks). Defaults to `{storage_path}/global`.
    #[serde(default)]
    pub global_path: Option<String>,
    /// Explicit shard list. Order defines shard numbers; never reorder a populated deployment.
    #[serde(default)]
    pub shards: Vec<ShardConfig>,
    /// Shards derived under `storage_path` when `shards` is empty.
    pub default_shard_count: usize,
    pub random_default_limit: usize,
    pub random_max_limit: usize,
    pub list_default_limit: usize,
    /// `X-API-Key` value that grants admin. Admin routes are closed when unset.
    #[serde(default)]
    pub admin_api_key: Option<String>,
}

impl Default for AnoimaConfig {
    fn default() -> Self {
        Self {
            app_name: "Anoima".to_string(),
            port: 8080,
            storage_path: "./data".to_string(),
            global_path: None,
            shards: Vec::new(),
            default_shard_count: 2,
            random_default_limit: 20,
            random_max_limit: 100,
            list_default_limit: 50,
            admin_api_key: None,
        }
    }
}

impl AnoimaConfig {
    /// Load config from file and environment. Precedence: env `ANOIMA__*` > file at
    /// `ANOIMA_CONFIG` (default `config/anoima.toml`) > defaults.
    pub fn load() -> AnoimaResult<Self> {
        let config_path =
            std::env::var("ANOIMA_CONFIG").unwrap_or_else(|_| "config/anoima.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same as [`AnoimaConfig::load`] with an explicit file path. A missing file is not an error.
    pub fn load_from(path: &Path) -> AnoimaResult<Self> {
        Ok(Self::build(path)?)
    }

    fn build(path: &Path) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("app_name", defaults.app_name)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("storage_path", defaults.storage_path)?
            .set_default("default_shard_count", defaults.default_shard_count as i64)?
            .set_default("random_default_limit", defaults.random_default_limit as i64)?
            .set_default("random_max_limit", defaults.random_max_limit as i64)?
            .set_default("list_default_limit", defaults.list_default_limit as i64)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("ANOIMA").separator("__"))
            .build()?;

        built.try_deserialize()
    }

    /// Config rooted at `storage_path` with `shard_count` derived shards. Used by tests and tools.
    pub fn with_storage(storage_path: impl AsRef<Path>, shard_count: usize) -> Self {
        Self {
            storage_path: storage_path.as_ref().to_string_lossy().into_owned(),
            default_shard_count: shard_count,
            ..Self::default()
        }
    }

    pub fn global_path(&self) -> PathBuf {
        match &self.global_path {
            Some(p) => PathBuf::from(p),
            None => Path::new(&self.storage_path).join("global"),
        }
    }

    /// Resolved shard paths in shard-number order.
    pub fn shard_paths(&self) -> Vec<PathBuf> {
        if self.shards.is_empty() {
            (0..self.default_shard_count)
                .map(|i| Path::new(&self.storage_path).join(format!("shard-{}", i)))
                .collect()
        } else {
            self.shards.iter().map(|s| PathBuf::from(&s.path)).collect()
        }
    }

    /// Clamps a requested random-sample size; `None` means the default.
    pub fn random_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.random_default_limit)
            .min(self.random_max_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_paths_are_derived_when_none_are_listed() {
        let cfg = AnoimaConfig::with_storage("/var/anoima", 3);
        let paths = cfg.shard_paths();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[2], PathBuf::from("/var/anoima/shard-2"));
        assert_eq!(cfg.global_path(), PathBuf::from("/var/anoima/global"));
    }

    #[test]
    fn explicit_shards_win_over_the_default_count() {
        let cfg = AnoimaConfig {
            shards: vec![
                ShardConfig { path: "/a".to_string() },
                ShardConfig { path: "/b".to_string() },
            ],
            default_shard_count: 5,
            global_path: Some("/g".to_string()),
            ..AnoimaConfig::default()
        };
        assert_eq!(cfg.shard_paths(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(cfg.global_path(), PathBuf::from("/g"));
    }

    #[test]
    fn random_limit_defaults_and_clamps() {
        let cfg = AnoimaConfig::default();
        assert_eq!(cfg.random_limit(None), 20);
        assert_eq!(cfg.random_limit(Some(5)), 5);
        assert_eq!(cfg.random_limit(Some(10_000)), 100);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anoima.toml");
        std::fs::write(
            &path,
            "app_name = \"Anoima Test\"\nport = 9090\n\n[[shards]]\npath = \"/tmp/s0\"\n",
        )
        .unwrap();
        let cfg = AnoimaConfig::load_from(&path).unwrap();
        assert_eq!(cfg.app_name, "Anoima Test");
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.shards.len(), 1);
        assert_eq!(cfg.random_max_limit, 100);
    }
}
