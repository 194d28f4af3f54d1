use thiserror::Error;

const DEFAULT_DATABASE_PATH: &str = "data.db";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in the environment or the .env file")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Empty means every interface.
    pub host: String,
    pub port: u16,
    pub ollama_url: String,
    pub database_path: String,
    pub bcrypt_cost: u32,
}

impl Config {
    /// Reads the process environment after loading `.env`, if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = get("PORT")
            .ok_or(ConfigError::Missing("PORT"))?
            .trim()
            .parse::<u16>()
            .map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?;

        let ollama_url = get("OLLAMA_URL").ok_or(ConfigError::Missing("OLLAMA_URL"))?;
        let parsed = reqwest::Url::parse(ollama_url.trim()).map_err(|e| ConfigError::Invalid {
            name: "OLLAMA_URL",
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                name: "OLLAMA_URL",
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let bcrypt_cost = match get("BCRYPT_COST") {
            Some(cost) => cost
                .trim()
                .parse::<u32>()
                .map_err(|e| ConfigError::Invalid {
                    name: "BCRYPT_COST",
                    reason: e.to_string(),
                })?,
            None => bcrypt::DEFAULT_COST,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_default(),
            port,
            ollama_url: ollama_url.trim().trim_end_matches('/').to_string(),
            database_path: get("DATABASE_PATH")
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            bcrypt_cost,
        })
    }

    pub fn listen_addr(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        format!("{host}:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load(&[("PORT", "8080"), ("OLLAMA_URL", "http://localhost:11434/")]).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.ollama_url, "http://localhost:11434");
        assert_eq!(config.database_path, "data.db");
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_port_and_ollama_url_are_required() {
        assert_eq!(
            load(&[("OLLAMA_URL", "http://localhost:11434")]).unwrap_err(),
            ConfigError::Missing("PORT")
        );
        assert_eq!(
            load(&[("PORT", "8080"), ("OLLAMA_URL", "  ")]).unwrap_err(),
            ConfigError::Missing("OLLAMA_URL")
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("PORT", "eighty"), ("OLLAMA_URL", "http://localhost:11434")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
        assert!(matches!(
            load(&[("PORT", "8080"), ("OLLAMA_URL", "not a url")]),
            Err(ConfigError::Invalid { name: "OLLAMA_URL", .. })
        ));
        assert!(matches!(
            load(&[("PORT", "8080"), ("OLLAMA_URL", "ftp://models.local")]),
            Err(ConfigError::Invalid { name: "OLLAMA_URL", .. })
        ));
    }

    #[test]
    fn test_host_and_overrides() {
        let config = load(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "3000"),
            ("OLLAMA_URL", "http://gpu-box:11434"),
            ("DATABASE_PATH", "/var/lib/chat.db"),
            ("BCRYPT_COST", "10"),
        ])
        .unwrap();

        assert_eq!(config.listen_addr(), "127.0.0.1:3000");
        assert_eq!(config.database_path, "/var/lib/chat.db");
        assert_eq!(config.bcrypt_cost, 10);
    }
}
