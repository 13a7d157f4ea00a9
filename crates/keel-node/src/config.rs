use std::fs;
use std::path::Path;

use keel_mempool::MempoolConfig;
use keel_store::StoreConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NodeError, NodeResult};

/// Configuration of a local node, usually read from a TOML file:
///
/// ```toml
/// [store]
/// dir = "chain"
/// archive = true
/// sync = "every-batch"
///
/// [mempool]
/// block_size = 5
/// idle_timeout_ms = 500
/// node_id = "local"
/// ```
///
/// Every key is optional; missing keys take their default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub store: StoreConfig,
    pub mempool: MempoolConfig,
}

impl NodeConfig {
    pub fn from_toml_str(content: &str) -> NodeResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| NodeError::Config(e.to_string()))?;
        config.mempool.validate().map_err(|e| NodeError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Read and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        debug!(path = %path.display(), "loading node configuration");
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> NodeResult<String> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use keel_store::SyncMode;

    #[test]
    fn empty_file_gives_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert!(config.store.dir.is_none());
        assert_eq!(config.mempool.block_size, 5);
    }

    #[test]
    fn full_file_is_parsed() {
        let config = NodeConfig::from_toml_str(
            r#"
            [store]
            dir = "chain"
            archive = true
            sync = "os-default"

            [mempool]
            block_size = 3
            admission_capacity = 10
            checked_capacity = 20
            idle_timeout_ms = 250
            node_id = "n1"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.dir, Some(PathBuf::from("chain")));
        assert!(config.store.archive);
        assert_eq!(config.store.sync, SyncMode::OsDefault);
        assert_eq!(config.mempool.block_size, 3);
        assert_eq!(config.mempool.admission_capacity, 10);
        assert_eq!(config.mempool.checked_capacity, 20);
        assert_eq!(config.mempool.idle_timeout_ms, 250);
        assert_eq!(config.mempool.node_id, "n1");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = NodeConfig::from_toml_str("[mempool]\nblock_size = 8\n").unwrap();
        assert_eq!(config.mempool.block_size, 8);
        assert_eq!(config.mempool.idle_timeout_ms, 500);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn invalid_mempool_settings_are_refused() {
        let err = NodeConfig::from_toml_str("[mempool]\nblock_size = 1\n").unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_refused() {
        assert!(matches!(
            NodeConfig::from_toml_str("[store\ndir = 3"),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn load_reads_file_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        let config = NodeConfig {
            store: StoreConfig::on_disk(dir.path().join("chain")),
            mempool: MempoolConfig {
                node_id: "n2".into(),
                ..MempoolConfig::default()
            },
        };
        fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(NodeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NodeConfig::load(dir.path().join("missing.toml")),
            Err(NodeError::Io(_))
        ));
    }
}
