use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 7624;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub blob: BlobSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobSection {
    #[serde(default = "default_true")]
    pub buffering: bool,
    #[serde(default)]
    pub compression: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            port: default_port(),
            bind: default_bind(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for BlobSection {
    fn default() -> Self {
        BlobSection {
            buffering: true,
            compression: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server: ServerSection::default(),
            blob: BlobSection::default(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        serdeconv::from_toml_file(path.as_ref()).expect("error loading server config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_port() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 7624);
        assert!(config.blob.buffering);
        assert!(!config.blob.compression);
    }
}
