use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub filters: Option<String>,
}

impl LoggingConfig {
    /// Build the tracing filter directive, e.g. `info` or
    /// `debug,hyper=warn` when extra filters are configured.
    pub fn directive(&self) -> String {
        let level = self.level.as_deref().unwrap_or("info");
        match &self.filters {
            Some(filters) if !filters.is_empty() => format!("{},{}", level, filters),
            _ => level.to_string(),
        }
    }
}
