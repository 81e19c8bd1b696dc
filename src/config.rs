//! Runtime configuration, resolved from environment variables once at
//! startup and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default upload/body cap: 16 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 16 * 1024 * 1024;
/// Default timeout for outbound HTTP performed by server definitions.
pub const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 60;
/// The single workspace user.
pub const DEFAULT_USER_ID: &str = "local";

/// Process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application root; `cids/` and `workspace.json` default under it
    pub app_root: PathBuf,
    /// Blob mirror directory (`CID_DIRECTORY`)
    pub cid_directory: PathBuf,
    /// Entity-table snapshot file
    pub workspace_file: PathBuf,
    /// Required by the HTTP service (`SESSION_SECRET`)
    pub session_secret: Option<String>,
    /// Passphrase sealing secret rows and boot imports (`BOOT_SECRET_KEY`)
    pub boot_secret_key: String,
    /// Upload/body cap in bytes
    pub body_limit: usize,
    /// Outbound HTTP timeout for server definitions, seconds
    pub outbound_timeout_secs: u64,
    /// Owner of all entities in single-user mode
    pub user_id: String,
    /// Suppress the directory scan under tests (`LOAD_CIDS_IN_TESTS=false`)
    pub load_cids: bool,
}

impl Config {
    /// Resolve configuration from the environment, rooted at `app_root`.
    pub fn from_env(app_root: impl Into<PathBuf>) -> Self {
        let app_root = app_root.into();
        let cid_directory = std::env::var("CID_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| app_root.join("cids"));
        let body_limit = std::env::var("CIDSPACE_BODY_LIMIT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_BODY_LIMIT);
        let load_cids = std::env::var("LOAD_CIDS_IN_TESTS")
            .map(|value| !matches!(value.trim(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        Self {
            workspace_file: app_root.join("workspace.json"),
            cid_directory,
            session_secret: std::env::var("SESSION_SECRET").ok().filter(|s| !s.is_empty()),
            boot_secret_key: std::env::var("BOOT_SECRET_KEY").unwrap_or_default(),
            body_limit,
            outbound_timeout_secs: DEFAULT_OUTBOUND_TIMEOUT_SECS,
            user_id: DEFAULT_USER_ID.to_string(),
            load_cids,
            app_root,
        }
    }

    /// A configuration for tests, rooted at a temporary directory.
    pub fn for_tests(root: &Path) -> Self {
        Self {
            app_root: root.to_path_buf(),
            cid_directory: root.join("cids"),
            workspace_file: root.join("workspace.json"),
            session_secret: Some("test-secret".to_string()),
            boot_secret_key: "test-boot-key".to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
            outbound_timeout_secs: 5,
            user_id: DEFAULT_USER_ID.to_string(),
            load_cids: false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_overrides_are_honored() {
        std::env::set_var("CID_DIRECTORY", "/tmp/custom-cids");
        std::env::set_var("SESSION_SECRET", "hunter2");
        std::env::set_var("LOAD_CIDS_IN_TESTS", "false");

        let config = Config::from_env("/srv/app");
        assert_eq!(config.cid_directory, PathBuf::from("/tmp/custom-cids"));
        assert_eq!(config.session_secret.as_deref(), Some("hunter2"));
        assert!(!config.load_cids);

        std::env::remove_var("CID_DIRECTORY");
        std::env::remove_var("SESSION_SECRET");
        std::env::remove_var("LOAD_CIDS_IN_TESTS");
    }

    #[test]
    #[serial]
    fn defaults_root_under_the_app_directory() {
        std::env::remove_var("CID_DIRECTORY");
        std::env::remove_var("SESSION_SECRET");
        std::env::remove_var("LOAD_CIDS_IN_TESTS");

        let config = Config::from_env("/srv/app");
        assert_eq!(config.cid_directory, PathBuf::from("/srv/app/cids"));
        assert_eq!(config.workspace_file, PathBuf::from("/srv/app/workspace.json"));
        assert!(config.session_secret.is_none());
        assert!(config.load_cids);
        assert_eq!(config.body_limit, DEFAULT_BODY_LIMIT);
    }
}
