use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Where `GET /` redirects so a browser landing here finds the client.
    pub client_url: Option<String>,
    /// Path of the persisted zone snapshot.
    pub data_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            client_url: None,
            data_path: ".data/zone.json".to_string(),
        }
    }
}
