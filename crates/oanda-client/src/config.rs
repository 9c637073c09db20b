//! Configuration types and loading
//!
//! The client consumes a plain [`ClientConfig`] at construction time; nothing
//! in the request pipeline reads files or environment variables itself.
//! `ClientConfig::load` is the one place that touches the outside world:
//! it parses a TOML file and resolves API keys, either inline or from the
//! env var a credential names via `key_env` (keys normally stay out of the
//! TOML to avoid leaking secrets).

use common::Secret;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Which OANDA deployment to talk to.
///
/// Live and practice expose the same API under different hosts; the streaming
/// feed has its own host pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Live,
    Practice,
}

impl Environment {
    /// Base URL for REST endpoints.
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Environment::Live => "https://api-fxtrade.oanda.com",
            Environment::Practice => "https://api-fxpractice.oanda.com",
        }
    }

    /// Base URL for the long-lived streaming endpoints.
    pub fn stream_base_url(&self) -> &'static str {
        match self {
            Environment::Live => "https://stream-fxtrade.oanda.com",
            Environment::Practice => "https://stream-fxpractice.oanda.com",
        }
    }
}

/// One resolved credential: account identity plus its API key.
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub identity: String,
    pub key: Secret<String>,
}

/// Fully resolved client configuration.
///
/// Construct directly for programmatic use, or via [`ClientConfig::load`].
/// Credential order is the fail-over order.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub environment: Environment,
    pub account_id: String,
    pub credentials: Vec<CredentialConfig>,
    /// Per-attempt REST timeout.
    pub request_timeout: Duration,
    /// Extra attempts granted beyond one per pooled credential.
    pub retry_budget: u32,
    pub backoff_initial: Duration,
    pub backoff_ceiling: Duration,
    /// Read-inactivity limit before a streaming connection is declared dead.
    pub stream_read_timeout: Duration,
    /// Reconnect attempts per streaming session before giving up.
    pub max_reconnects: u32,
}

impl ClientConfig {
    /// Build a config with default tunables.
    pub fn new(
        environment: Environment,
        account_id: impl Into<String>,
        credentials: Vec<CredentialConfig>,
    ) -> Self {
        Self {
            environment,
            account_id: account_id.into(),
            credentials,
            request_timeout: Duration::from_secs(default_request_timeout_secs()),
            retry_budget: default_retry_budget(),
            backoff_initial: Duration::from_millis(default_backoff_initial_ms()),
            backoff_ceiling: Duration::from_millis(default_backoff_ceiling_ms()),
            stream_read_timeout: Duration::from_secs(default_stream_read_timeout_secs()),
            max_reconnects: default_max_reconnects(),
        }
    }

    /// Load configuration from a TOML file and resolve credential keys.
    ///
    /// A credential may carry its key inline (`key`) or name an environment
    /// variable holding it (`key_env`); inline wins when both are present.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let raw: RawConfig = toml::from_str(&contents)?;

        if raw.credentials.is_empty() {
            return Err(common::Error::Config(
                "at least one credential must be configured".into(),
            ));
        }
        if raw.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if raw.account_id.trim().is_empty() {
            return Err(common::Error::Config("account_id must not be empty".into()));
        }

        let mut credentials = Vec::with_capacity(raw.credentials.len());
        for cred in raw.credentials {
            let key = match (cred.key, cred.key_env) {
                (Some(key), _) => key,
                (None, Some(var)) => {
                    let value = std::env::var(&var).map_err(|_| {
                        common::Error::Config(format!(
                            "credential {}: env var {var} is not set",
                            cred.identity
                        ))
                    })?;
                    Secret::new(value)
                }
                (None, None) => {
                    return Err(common::Error::Config(format!(
                        "credential {}: either key or key_env is required",
                        cred.identity
                    )));
                }
            };
            credentials.push(CredentialConfig {
                identity: cred.identity,
                key,
            });
        }

        Ok(Self {
            environment: raw.environment,
            account_id: raw.account_id,
            credentials,
            request_timeout: Duration::from_secs(raw.request_timeout_secs),
            retry_budget: raw.retry_budget,
            backoff_initial: Duration::from_millis(raw.backoff_initial_ms),
            backoff_ceiling: Duration::from_millis(raw.backoff_ceiling_ms),
            stream_read_timeout: Duration::from_secs(raw.stream_read_timeout_secs),
            max_reconnects: raw.max_reconnects,
        })
    }
}

/// On-disk shape before key resolution.
#[derive(Deserialize)]
struct RawConfig {
    environment: Environment,
    account_id: String,
    credentials: Vec<RawCredential>,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default = "default_retry_budget")]
    retry_budget: u32,
    #[serde(default = "default_backoff_initial_ms")]
    backoff_initial_ms: u64,
    #[serde(default = "default_backoff_ceiling_ms")]
    backoff_ceiling_ms: u64,
    #[serde(default = "default_stream_read_timeout_secs")]
    stream_read_timeout_secs: u64,
    #[serde(default = "default_max_reconnects")]
    max_reconnects: u32,
}

#[derive(Deserialize)]
struct RawCredential {
    identity: String,
    #[serde(default)]
    key: Option<Secret<String>>,
    #[serde(default)]
    key_env: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    3
}

fn default_retry_budget() -> u32 {
    2
}

fn default_backoff_initial_ms() -> u64 {
    250
}

fn default_backoff_ceiling_ms() -> u64 {
    10_000
}

fn default_stream_read_timeout_secs() -> u64 {
    10
}

fn default_max_reconnects() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oanda.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn load_valid_config_with_inline_key() {
        let (_dir, path) = write_config(
            r#"
environment = "practice"
account_id = "101-004-1234567-001"

[[credentials]]
identity = "primary"
key = "inline-key-1"
"#,
        );

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.environment, Environment::Practice);
        assert_eq!(config.account_id, "101-004-1234567-001");
        assert_eq!(config.credentials.len(), 1);
        assert_eq!(config.credentials[0].identity, "primary");
        assert_eq!(config.credentials[0].key.expose(), "inline-key-1");
        // Defaults
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.retry_budget, 2);
        assert_eq!(config.stream_read_timeout, Duration::from_secs(10));
        assert_eq!(config.max_reconnects, 5);
    }

    #[test]
    fn load_resolves_key_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (_dir, path) = write_config(
            r#"
environment = "live"
account_id = "001-001-0000001-001"

[[credentials]]
identity = "primary"
key_env = "OANDA_TEST_KEY_PRIMARY"
"#,
        );

        unsafe { set_env("OANDA_TEST_KEY_PRIMARY", "from-env") };
        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.credentials[0].key.expose(), "from-env");
        unsafe { remove_env("OANDA_TEST_KEY_PRIMARY") };
    }

    #[test]
    fn load_missing_key_env_is_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (_dir, path) = write_config(
            r#"
environment = "practice"
account_id = "101-004-1234567-001"

[[credentials]]
identity = "primary"
key_env = "OANDA_TEST_KEY_UNSET"
"#,
        );

        unsafe { remove_env("OANDA_TEST_KEY_UNSET") };
        let err = ClientConfig::load(&path).unwrap_err();
        assert!(
            err.to_string().contains("OANDA_TEST_KEY_UNSET"),
            "got: {err}"
        );
    }

    #[test]
    fn load_credential_without_key_is_error() {
        let (_dir, path) = write_config(
            r#"
environment = "practice"
account_id = "101-004-1234567-001"

[[credentials]]
identity = "primary"
"#,
        );

        let err = ClientConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("key or key_env"), "got: {err}");
    }

    #[test]
    fn load_empty_credentials_rejected() {
        let (_dir, path) = write_config(
            r#"
environment = "practice"
account_id = "101-004-1234567-001"
credentials = []
"#,
        );

        assert!(ClientConfig::load(&path).is_err());
    }

    #[test]
    fn load_zero_timeout_rejected() {
        let (_dir, path) = write_config(
            r#"
environment = "practice"
account_id = "101-004-1234567-001"
request_timeout_secs = 0

[[credentials]]
identity = "primary"
key = "k"
"#,
        );

        assert!(ClientConfig::load(&path).is_err());
    }

    #[test]
    fn load_invalid_toml_rejected() {
        let (_dir, path) = write_config("not valid {{{{ toml");
        assert!(ClientConfig::load(&path).is_err());
    }

    #[test]
    fn load_preserves_credential_order() {
        let (_dir, path) = write_config(
            r#"
environment = "practice"
account_id = "101-004-1234567-001"

[[credentials]]
identity = "first"
key = "k1"

[[credentials]]
identity = "second"
key = "k2"

[[credentials]]
identity = "third"
key = "k3"
"#,
        );

        let config = ClientConfig::load(&path).unwrap();
        let order: Vec<&str> = config
            .credentials
            .iter()
            .map(|c| c.identity.as_str())
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn environment_base_urls() {
        assert_eq!(
            Environment::Live.rest_base_url(),
            "https://api-fxtrade.oanda.com"
        );
        assert_eq!(
            Environment::Live.stream_base_url(),
            "https://stream-fxtrade.oanda.com"
        );
        assert_eq!(
            Environment::Practice.rest_base_url(),
            "https://api-fxpractice.oanda.com"
        );
        assert_eq!(
            Environment::Practice.stream_base_url(),
            "https://stream-fxpractice.oanda.com"
        );
    }

    #[test]
    fn debug_output_redacts_keys() {
        let config = ClientConfig::new(
            Environment::Practice,
            "101-004-1234567-001",
            vec![CredentialConfig {
                identity: "primary".into(),
                key: Secret::new("super-secret".into()),
            }],
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"), "key leaked: {debug}");
    }
}
