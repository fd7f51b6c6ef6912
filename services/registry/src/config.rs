//! Server configuration
//!
//! Loaded from a TOML file, then supplemented from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Deserialize;
use storage::StorageConfig;

use crate::api::{DEFAULT_BASE_URL, DEFAULT_BUCKET, DEFAULT_MAX_BODY_SIZE, RegistryBuilder};
use crate::auth::{AuthConfig, User};

/// Complete server configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener
    pub server: ServerConfig,
    /// Where objects are kept
    pub storage: StorageSection,
    /// Chart repository
    pub helm: HelmConfig,
    /// Basic authentication on the OCI routes
    pub auth: AuthConfig,
    /// Upload session expiry
    pub uploads: UploadConfig,
    /// Request limits
    pub limits: LimitsConfig,
    /// Container image handling
    pub images: ImagesConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server binds to
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3030)),
        }
    }
}

/// Object storage settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Bucket holding every registry object
    pub bucket: String,
    /// Storage driver
    pub backend: StorageConfig,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            backend: StorageConfig::Local {
                path: Utf8PathBuf::from("./data"),
            },
        }
    }
}

/// Chart repository settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    /// Public URL used for chart links in `index.yaml`
    pub base_url: String,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Upload session expiry
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Idle seconds before a session is swept
    pub ttl_secs: u64,
    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
}

impl UploadConfig {
    /// Idle time before a session is swept
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Time between sweeps, at least one second
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
        }
    }
}

/// Request limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Container image handling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Keep image manifests in the registry's own store
    pub enabled: bool,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human readable
    #[default]
    Pretty,
}

/// Log output
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Line format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Parse `user1:pass1,user2:pass2`.
fn parse_users(value: &str) -> Vec<User> {
    value
        .split(',')
        .filter_map(|pair| pair.trim().split_once(':'))
        .filter(|(username, _)| !username.is_empty())
        .map(|(username, password)| User::new(username, password.to_string()))
        .collect()
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `HELM_USERS`, `HELM_USERNAME` and `HELM_PASSWORD` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply the credential variables from `lookup`.
    ///
    /// `HELM_USERS` replaces the user list. `HELM_USERNAME` and
    /// `HELM_PASSWORD` add a single user only when none are configured.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(users) = lookup("HELM_USERS") {
            self.auth.users = parse_users(&users);
        }

        if self.auth.users.is_empty() {
            if let (Some(username), Some(password)) = (lookup("HELM_USERNAME"), lookup("HELM_PASSWORD")) {
                self.auth.users.push(User::new(username, password));
            }
        }
    }

    /// A registry builder for this configuration, around an already built storage backend.
    pub fn builder(&self, storage: storage::Storage) -> RegistryBuilder {
        let builder = RegistryBuilder::new()
            .storage(storage)
            .bucket(self.storage.bucket.clone())
            .base_url(self.helm.base_url.clone())
            .auth(self.auth.clone())
            .upload_ttl(self.uploads.ttl())
            .max_body_size(self.limits.max_body_bytes);

        if self.images.enabled {
            builder.with_stored_images()
        } else {
            builder
        }
    }
}
