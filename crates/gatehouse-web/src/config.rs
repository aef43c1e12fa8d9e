use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use gatehouse_core::{AccessRule, GuardConfig};
use serde::Deserialize;

/// A user created at startup. `password_hash` is an argon2 PHC string as
/// printed by the `hash_password` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub email: String,
    pub role: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(flatten)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub access_rules: Vec<AccessRule>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            request_timeout_ms: default_request_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            guard: GuardConfig::default(),
            users: Vec::new(),
            access_rules: Vec::new(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50051))
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

const WEAK_SECRETS: &[&str] = &[
    "change-me-to-a-random-secret",
    "secret",
    "password",
    "jwt-secret",
];

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("GATEHOUSE_CONFIG").map(PathBuf::from).ok();

        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents)?
        } else {
            ServerConfig::default()
        };

        if let Ok(secret) = std::env::var("GATEHOUSE_ACCESS_SECRET") {
            config.guard.tokens.access_secret = secret;
        }
        if let Ok(secret) = std::env::var("GATEHOUSE_REFRESH_SECRET") {
            config.guard.tokens.refresh_secret = secret;
        }
        if let Ok(addr) = std::env::var("GATEHOUSE_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }

        config.fill_missing_secrets();
        config.check()?;
        Ok(config)
    }

    /// Generates a random secret for each token class left unset.
    pub fn fill_missing_secrets(&mut self) {
        let tokens = &mut self.guard.tokens;
        if tokens.access_secret.is_empty() {
            tokens.access_secret = uuid::Uuid::new_v4().to_string();
            tracing::warn!(
                "No access token secret configured. Generated random secret (will change on restart)."
            );
        }
        if tokens.refresh_secret.is_empty() {
            tokens.refresh_secret = uuid::Uuid::new_v4().to_string();
            tracing::warn!(
                "No refresh token secret configured. Generated random secret (will change on restart)."
            );
        }
    }

    /// Rejects placeholder secrets and out-of-range settings.
    pub fn check(&self) -> anyhow::Result<()> {
        let tokens = &self.guard.tokens;
        for (name, secret) in [
            ("access", &tokens.access_secret),
            ("refresh", &tokens.refresh_secret),
        ] {
            if WEAK_SECRETS.contains(&secret.as_str()) {
                anyhow::bail!(
                    "The {name} token secret matches a known weak/placeholder value. \
                     Set a strong random secret via GATEHOUSE_{}_SECRET.",
                    name.to_uppercase()
                );
            }
            if secret.len() < 32 {
                tracing::warn!(
                    "The {name} token secret is shorter than 32 characters. \
                     Consider using a stronger secret."
                );
            }
        }

        self.guard.validate()?;

        if self.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be at least 1");
        }
        Ok(())
    }
}
