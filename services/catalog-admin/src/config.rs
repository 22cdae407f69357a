//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The admin password comes from CATALOG_PASSWORD or `password_file` and is
//! never stored in the TOML itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use catalog_resource::{DEFAULT_GC_TIME, ResourceOptions};
use catalog_transport::TransportConfig;
use common::Secret;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: TransportConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Login and token persistence settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// Default username for `login`.
    #[serde(default)]
    pub username: Option<String>,
    /// Where the token pair is persisted between runs.
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: None,
            token_file: default_token_file(),
            password_file: None,
            password: None,
        }
    }
}

/// Query cache settings
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub stale_secs: u64,
    #[serde(default = "default_gc_secs")]
    pub gc_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_secs: 0,
            gc_secs: default_gc_secs(),
        }
    }
}

impl CacheConfig {
    pub fn resource_options(&self) -> ResourceOptions {
        ResourceOptions {
            stale_time: Duration::from_secs(self.stale_secs),
            gc_time: Duration::from_secs(self.gc_secs),
        }
    }
}

fn default_token_file() -> PathBuf {
    PathBuf::from("catalog-admin-tokens.json")
}

fn default_gc_secs() -> u64 {
    DEFAULT_GC_TIME.as_secs()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. CATALOG_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("CATALOG_API_URL") {
            config.api.base_url = url;
        }
        if let Ok(file) = std::env::var("CATALOG_TOKEN_FILE") {
            config.auth.token_file = PathBuf::from(file);
        }

        config.api.validate()?;

        if let Ok(password) = std::env::var("CATALOG_PASSWORD") {
            config.auth.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = config.auth.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim().to_owned();
            if !password.is_empty() {
                config.auth.password = Some(Secret::new(password));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("catalog-admin.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_overrides() {
        for key in [
            "CATALOG_API_URL",
            "CATALOG_TOKEN_FILE",
            "CATALOG_PASSWORD",
            "CONFIG_PATH",
        ] {
            unsafe { remove_env(key) };
        }
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("catalog-admin.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    const MINIMAL: &str = r#"
[api]
base_url = "https://catalog.example.com/api"
"#;

    #[test]
    fn test_load_minimal_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&write_config(&dir, MINIMAL)).unwrap();

        assert_eq!(config.api.base_url, "https://catalog.example.com/api");
        assert_eq!(config.api.timeout_secs, 10);
        assert!(config.api.enable_refresh);
        assert_eq!(config.auth.token_file, PathBuf::from("catalog-admin-tokens.json"));
        assert!(config.auth.password.is_none());
        assert_eq!(config.cache.stale_secs, 0);
        assert_eq!(config.cache.resource_options().gc_time, DEFAULT_GC_TIME);
    }

    #[test]
    fn test_load_full_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[api]
base_url = "https://catalog.example.com/api"
auth_base_url = "https://auth.example.com"
timeout_secs = 5
feature = "catalog"
enable_refresh = false

[auth]
username = "admin"
token_file = "/var/lib/catalog-admin/tokens.json"

[cache]
stale_secs = 30
gc_secs = 60
"#,
        );
        let config = Config::load(&path).unwrap();

        assert_eq!(config.api.refresh_url(), "https://auth.example.com/auth/refresh");
        assert_eq!(config.api.feature.as_deref(), Some("catalog"));
        assert!(!config.api.enable_refresh);
        assert_eq!(config.auth.username.as_deref(), Some("admin"));
        let options = config.cache.resource_options();
        assert_eq!(options.stale_time, Duration::from_secs(30));
        assert_eq!(options.gc_time, Duration::from_secs(60));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/catalog-admin.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&write_config(&dir, "not valid {{{{ toml"));
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, MINIMAL);

        unsafe { set_env("CATALOG_API_URL", "http://localhost:9000") };
        unsafe { set_env("CATALOG_TOKEN_FILE", "/tmp/tokens.json") };
        let config = Config::load(&path).unwrap();
        clear_overrides();

        assert_eq!(config.api.base_url, "http://localhost:9000");
        assert_eq!(config.auth.token_file, PathBuf::from("/tmp/tokens.json"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[api]\nbase_url = \"catalog.example.com\"\n");

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(
            err.contains("base_url must start with http"),
            "error message should explain the issue, got: {err}"
        );
    }

    #[test]
    fn test_password_from_file_and_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let password_path = dir.path().join("password");
        std::fs::write(&password_path, "from-file\n").unwrap();
        let path = write_config(
            &dir,
            &format!(
                "{MINIMAL}\n[auth]\npassword_file = \"{}\"\n",
                password_path.display()
            ),
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.auth.password.as_ref().unwrap().expose(), "from-file");

        unsafe { set_env("CATALOG_PASSWORD", "from-env") };
        let config = Config::load(&path).unwrap();
        clear_overrides();
        assert_eq!(config.auth.password.as_ref().unwrap().expose(), "from-env");
    }

    #[test]
    fn test_blank_password_file_yields_none() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let password_path = dir.path().join("password");
        std::fs::write(&password_path, "  \n").unwrap();
        let path = write_config(
            &dir,
            &format!(
                "{MINIMAL}\n[auth]\npassword_file = \"{}\"\n",
                password_path.display()
            ),
        );

        let config = Config::load(&path).unwrap();
        assert!(config.auth.password.is_none());
    }

    #[test]
    fn test_missing_password_file_is_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &format!("{MINIMAL}\n[auth]\npassword_file = \"/nonexistent/password\"\n"),
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        assert_eq!(Config::resolve_path(None), PathBuf::from("catalog-admin.toml"));

        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));
        assert_eq!(
            Config::resolve_path(Some(Path::new("/cli/wins.toml"))),
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        clear_overrides();
    }
}
