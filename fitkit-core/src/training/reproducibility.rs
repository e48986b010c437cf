//! Environment snapshots for reproducibility tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Snapshot of the training environment for reproducibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub fitkit_version: String,
    pub system_info: String,
    pub platform: String,
    pub timestamp: DateTime<Utc>,
    /// Hash of every `FITKIT_*` environment variable, which can override config.
    pub env_vars_hash: String,
}

impl EnvironmentSnapshot {
    pub fn capture() -> Self {
        Self {
            fitkit_version: env!("CARGO_PKG_VERSION").to_string(),
            system_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            platform: std::env::consts::OS.to_string(),
            timestamp: Utc::now(),
            env_vars_hash: Self::compute_env_vars_hash(),
        }
    }

    /// SHA-256 over the sorted `FITKIT_*` variables, excluding the run directory.
    fn compute_env_vars_hash() -> String {
        let mut vars: Vec<(String, String)> = std::env::vars()
            .filter(|(k, _)| k.starts_with(crate::config::ENV_PREFIX))
            .filter(|(k, _)| k != crate::training::logger::RUN_DIR_ENV)
            .collect();
        vars.sort();

        let mut hasher = Sha256::new();
        for (key, value) in &vars {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_fills_fields() {
        let snap = EnvironmentSnapshot::capture();
        assert_eq!(snap.platform, std::env::consts::OS);
        assert_eq!(snap.env_vars_hash.len(), 64);
        assert!(!snap.fitkit_version.is_empty());
    }
}
