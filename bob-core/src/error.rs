//! Error types for bob tooling
//!
//! Provides a unified error type for planning and migration operations.

use thiserror::Error;

/// Result type alias for bob operations
pub type Result<T> = std::result::Result<T, BobError>;

/// Unified error type for bob tooling
#[derive(Error, Debug, Clone)]
pub enum BobError {
    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cluster shrink detected: vdisks {vdisk_ids:?} are missing from the new configuration")]
    Shrink { vdisk_ids: Vec<u32> },

    // ===== Cluster State Errors =====
    #[error("Cluster state error: {0}")]
    ClusterState(String),

    #[error("Alien directories are not empty: {}", dirs.join(", "))]
    AlienDirsNotEmpty { dirs: Vec<String> },

    // ===== Operation Errors =====
    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Verification failed: {source_dir} is not fully contained in {copy_dir}")]
    Verification { source_dir: String, copy_dir: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(String),

    // ===== Serialization Errors =====
    #[error("Parse error: {0}")]
    Parse(String),
}

impl BobError {
    /// Fatal errors abort the whole run before anything is mutated.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BobError::Configuration(_)
                | BobError::Shrink { .. }
                | BobError::ClusterState(_)
                | BobError::AlienDirsNotEmpty { .. }
                | BobError::Io(_)
                | BobError::Parse(_)
        )
    }

    /// Containment check failures are a subset of operation errors.
    pub fn is_verification(&self) -> bool {
        matches!(self, BobError::Verification { .. })
    }
}

impl From<std::io::Error> for BobError {
    fn from(err: std::io::Error) -> Self {
        BobError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for BobError {
    fn from(err: toml::de::Error) -> Self {
        BobError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for BobError {
    fn from(err: serde_json::Error) -> Self {
        BobError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BobError::Shrink { vdisk_ids: vec![9] };
        assert_eq!(
            err.to_string(),
            "Cluster shrink detected: vdisks [9] are missing from the new configuration"
        );

        let err = BobError::AlienDirsNotEmpty {
            dirs: vec!["10.0.0.1:/disk1/bob/alien".to_string()],
        };
        assert!(err.to_string().contains("10.0.0.1:/disk1/bob/alien"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BobError = io_err.into();
        assert!(matches!(err, BobError::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_classification() {
        assert!(BobError::Configuration("x".to_string()).is_fatal());
        assert!(BobError::ClusterState("x".to_string()).is_fatal());
        assert!(!BobError::Operation("x".to_string()).is_fatal());
        assert!(!BobError::Cancelled.is_fatal());

        let err = BobError::Verification {
            source_dir: "a".to_string(),
            copy_dir: "b".to_string(),
        };
        assert!(err.is_verification());
        assert!(!err.is_fatal());
    }
}
