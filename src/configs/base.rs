use serde::{Deserialize, Serialize};

use crate::configs::*;

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub zone: ZoneConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Read `config.toml` from the working directory. A missing or
    /// unreadable file falls back to defaults so a zone can run unconfigured.
    pub fn load() -> Config {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: &str) -> Config {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Config::default();
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ignoring unparseable {}: {}", path, e);
                Config::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.zone.name_length, 16);
        assert_eq!(config.zone.join_password, None);
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
            [zone]
            join_password = "riverdale"
            queue_limit = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.zone.join_password.as_deref(), Some("riverdale"));
        assert_eq!(config.zone.queue_limit, 1);
        assert_eq!(config.zone.chat_length, 160);
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
