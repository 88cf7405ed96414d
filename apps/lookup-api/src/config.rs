use std::time::Duration;

/// Discrete Redis connection fields, used when `REDIS_URL` is not set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: "6379".to_string(),
            username: None,
            password: None,
            tls: false,
        }
    }
}

impl RedisSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_non_empty("REDIS_HOST").unwrap_or(defaults.host),
            port: env_non_empty("REDIS_PORT").unwrap_or(defaults.port),
            username: env_non_empty("REDIS_USERNAME"),
            password: env_non_empty("REDIS_PASSWORD"),
            tls: env_non_empty("REDIS_TLS")
                .map(|flag| parse_flag(&flag))
                .unwrap_or(false),
        }
    }

    /// Assemble a connection URL; `rediss` selects TLS.
    ///
    /// Only the credential-less form names database 0 explicitly.
    pub fn connection_url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("{}://{}:{}@{}:{}", scheme, user, pass, self.host, self.port)
            }
            (None, Some(pass)) => format!("{}://:{}@{}:{}", scheme, pass, self.host, self.port),
            _ => format!("{}://{}:{}/0", scheme, self.host, self.port),
        }
    }
}

pub struct Config {
    pub listen_addr: String,
    pub redis_url: String,
    pub redis_timeout: Duration,
}

pub fn load_config() -> Config {
    Config {
        listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
        redis_url: env_non_empty("REDIS_URL")
            .unwrap_or_else(|| RedisSettings::from_env().connection_url()),
        redis_timeout: Duration::from_millis(
            std::env::var("REDIS_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000),
        ),
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
}
