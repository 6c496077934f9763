use serde::Deserialize;
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};
use thiserror::Error;

use crate::store::{ArtifactPaths, MODEL_FILE, SCALER_FILE, SCHEMA_FILE};

pub const CONFIG_ENV: &str = "CAR_PRICE_CONFIG";
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config JSON at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Optional file layer; every key may be overridden by the environment.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct FileConfig {
    pub artifacts_dir: Option<PathBuf>,
    pub schema_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub scaler_path: Option<PathBuf>,
    pub bind_host: Option<IpAddr>,
    pub port: Option<u16>,
    pub log_predictions: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub artifacts: ArtifactPaths,
    /// Log a summary of every encoded vector.
    pub log_predictions: bool,
}

impl ServerConfig {
    /// Read the process environment, layered over `CAR_PRICE_CONFIG` if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match std::env::var(CONFIG_ENV) {
            Ok(path) => FileConfig::load(&path)?,
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge a file layer with an environment lookup.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = |key: &str, from_file: Option<PathBuf>| env(key).map(PathBuf::from).or(from_file);

        let dir = path("ARTIFACTS_DIR", file.artifacts_dir)
            .unwrap_or_else(|| PathBuf::from("./artifacts"));
        let artifacts = ArtifactPaths {
            schema: path("SCHEMA_PATH", file.schema_path).unwrap_or_else(|| dir.join(SCHEMA_FILE)),
            model: path("MODEL_PATH", file.model_path).unwrap_or_else(|| dir.join(MODEL_FILE)),
            scaler: Some(
                path("SCALER_PATH", file.scaler_path).unwrap_or_else(|| dir.join(SCALER_FILE)),
            ),
        };

        let port = match env("PORT") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value: v })?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };
        let host = match env("BIND_HOST") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "BIND_HOST", value: v })?,
            None => file.bind_host.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        };
        let log_predictions = match env("LOG_PRED") {
            Some(v) => v == "1",
            None => file.log_predictions.unwrap_or(false),
        };

        Ok(Self {
            addr: SocketAddr::new(host, port),
            artifacts,
            log_predictions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_point_at_artifacts_dir() {
        let cfg = ServerConfig::resolve(FileConfig::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.addr.port(), DEFAULT_PORT);
        assert!(cfg.addr.ip().is_unspecified());
        assert_eq!(cfg.artifacts, ArtifactPaths::in_dir("./artifacts"));
        assert!(!cfg.log_predictions);
    }

    #[test]
    fn env_overrides_file() {
        let file: FileConfig =
            serde_json::from_str(r#"{"artifacts_dir": "/srv/a", "port": 9000, "log_predictions": true}"#)
                .unwrap();
        let cfg = ServerConfig::resolve(
            file,
            env_of(&[("PORT", "8081"), ("MODEL_PATH", "/m/model.pt"), ("LOG_PRED", "0")]),
        )
        .unwrap();
        assert_eq!(cfg.addr.port(), 8081);
        assert_eq!(cfg.artifacts.model, PathBuf::from("/m/model.pt"));
        assert_eq!(cfg.artifacts.schema, PathBuf::from("/srv/a").join(SCHEMA_FILE));
        assert!(!cfg.log_predictions);
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = ServerConfig::resolve(FileConfig::default(), env_of(&[("PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(matches!(
            FileConfig::load(path.to_str().unwrap()),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{port: }").unwrap();
        assert!(matches!(
            FileConfig::load(bad.to_str().unwrap()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
