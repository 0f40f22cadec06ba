//! Server configuration: the engine's `SessionConfig` plus a bind address,
//! optionally overridden from a TOML file. Ported from
//! `hls-vod-server::config_file`'s "missing/malformed file is a warning, not
//! an error" behavior.

use std::path::Path;

use hls_origin_engine::SessionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub session: SessionConfig,
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        let bind_addr = format!("0.0.0.0:{}", session.http_port);
        Self { session, bind_addr }
    }
}

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigFileError> {
        let text = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&text)?;
        Ok(config)
    }

    /// Load from `path` if it exists and parses; otherwise fall back to
    /// `Default`, logging a warning rather than failing startup.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load config file, using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bind_addr_uses_session_http_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr, format!("0.0.0.0:{}", cfg.session.http_port));
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = ServerConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(cfg.session.http_port, SessionConfig::default().http_port);
    }
}
