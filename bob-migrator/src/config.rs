//! Migrator configuration
//!
//! Assembled from command line flags (with environment fallbacks) in `main`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use bob_core::{BobError, Result, DEFAULT_API_PORT};

/// SSH connection settings used by the remote file client
#[derive(Debug, Clone)]
pub struct SshSettings {
    /// Remote user, `None` uses the ssh default
    pub user: Option<String>,
    pub port: u16,
    /// Private key file passed with `-i`
    pub key_path: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: None,
            port: 22,
            key_path: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-node overrides of the bob root directory name.
///
/// Syntax: `node1:dir1,node2:dir2` or `*:dir` for every node not named
/// explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootDirOverrides {
    by_node: HashMap<String, String>,
    wildcard: Option<String>,
}

impl RootDirOverrides {
    pub fn parse(value: &str) -> Result<Self> {
        let mut overrides = Self::default();

        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (node, dir) = entry.split_once(':').ok_or_else(|| {
                BobError::Configuration(format!(
                    "Malformed root dir override '{}', expected node:dir",
                    entry
                ))
            })?;
            let (node, dir) = (node.trim(), dir.trim());

            if node.is_empty() || dir.is_empty() {
                return Err(BobError::Configuration(format!(
                    "Malformed root dir override '{}', node and dir must be non-empty",
                    entry
                )));
            }

            if node == "*" {
                if overrides.wildcard.is_some() {
                    return Err(BobError::Configuration(
                        "Root dir wildcard specified more than once".to_string(),
                    ));
                }
                overrides.wildcard = Some(dir.to_string());
            } else if overrides
                .by_node
                .insert(node.to_string(), dir.to_string())
                .is_some()
            {
                return Err(BobError::Configuration(format!(
                    "Root dir for node {} specified more than once",
                    node
                )));
            }
        }

        Ok(overrides)
    }

    /// Root dir name for a node, if overridden
    pub fn get(&self, node_name: &str) -> Option<&str> {
        self.by_node
            .get(node_name)
            .or(self.wildcard.as_ref())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty() && self.wildcard.is_none()
    }
}

/// Migrator configuration
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Configuration the cluster is currently running with
    pub old_config_path: PathBuf,

    /// Target configuration
    pub cluster_config_path: PathBuf,

    /// Plan and report without copying or removing anything
    pub dry_run: bool,

    /// Remove replicas no longer present in the target configuration
    pub remove_unused_replicas: bool,

    /// Also remove obsolete replicas that were never used as a copy source
    pub force_remove_without_copies: bool,

    /// Maximum concurrent copy/remove operations
    pub copy_parallel_degree: usize,

    pub root_dir_overrides: RootDirOverrides,

    /// Keep going after a failed copy or restart
    pub continue_on_error: bool,

    /// Skip the alien directory emptiness guard
    pub skip_alien_check: bool,

    /// Node HTTP API port
    pub api_port: u16,

    pub api_timeout: Duration,

    pub ssh: SshSettings,

    /// Use simulated collaborators instead of ssh and http
    pub test_mode: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            old_config_path: PathBuf::from("cluster.toml"),
            cluster_config_path: PathBuf::from("cluster.toml"),
            dry_run: false,
            remove_unused_replicas: false,
            force_remove_without_copies: false,
            copy_parallel_degree: 1,
            root_dir_overrides: RootDirOverrides::default(),
            continue_on_error: false,
            skip_alien_check: false,
            api_port: DEFAULT_API_PORT,
            api_timeout: Duration::from_secs(30),
            ssh: SshSettings::default(),
            test_mode: false,
        }
    }
}

impl MigratorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.copy_parallel_degree == 0 {
            return Err(BobError::Configuration(
                "copy parallel degree must be at least 1".to_string(),
            ));
        }
        if self.force_remove_without_copies && !self.remove_unused_replicas {
            return Err(BobError::Configuration(
                "forcing removal without copies requires --remove-unused-replicas".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MigratorConfig::default();
        assert_eq!(config.copy_parallel_degree, 1);
        assert_eq!(config.api_port, 8000);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_parallel_degree() {
        let config = MigratorConfig {
            copy_parallel_degree: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BobError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_force_requires_remove() {
        let config = MigratorConfig {
            force_remove_without_copies: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_root_dir_overrides() {
        let overrides = RootDirOverrides::parse("node1:bob1, node2:bob2").unwrap();
        assert_eq!(overrides.get("node1"), Some("bob1"));
        assert_eq!(overrides.get("node2"), Some("bob2"));
        assert_eq!(overrides.get("node3"), None);

        let overrides = RootDirOverrides::parse("*:bob,node1:custom").unwrap();
        assert_eq!(overrides.get("node1"), Some("custom"));
        assert_eq!(overrides.get("node9"), Some("bob"));
        assert!(!overrides.is_empty());

        assert!(RootDirOverrides::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_root_dir_overrides_malformed() {
        assert!(RootDirOverrides::parse("node1").is_err());
        assert!(RootDirOverrides::parse("node1:").is_err());
        assert!(RootDirOverrides::parse(":bob").is_err());
        assert!(RootDirOverrides::parse("*:a,*:b").is_err());
        assert!(RootDirOverrides::parse("n:a,n:b").is_err());
    }
}
