use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Every knob spec.md §6 names, plus the two this workspace's expansion
/// adds (`region_penalty`, `bootstrap`). Loaded in layers: compiled-in
/// defaults, then an optional YAML file, then `PASTRY_*` environment
/// variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub region: String,
    pub region_penalty: i64,
    pub local_addr: String,
    pub global_addr: String,
    pub listen_port: u16,
    pub heartbeat_interval_secs: u32,
    pub network_timeout_secs: u64,
    pub log_level: LogLevel,
    /// Shared-secret credential bytes; `None` means allow-all. Stored as a
    /// UTF-8 string in config files/env, converted to bytes at startup.
    pub credentials: Option<String>,
    /// Seed addresses to `join()` against at startup, tried in order until
    /// one succeeds (or all fail, which is not itself fatal — a node may be
    /// the first in its ring).
    pub bootstrap: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: "default".into(),
            region_penalty: pastry_core::DEFAULT_REGION_PENALTY,
            local_addr: "127.0.0.1:34001".into(),
            global_addr: "127.0.0.1:34001".into(),
            listen_port: 34001,
            heartbeat_interval_secs: 300,
            network_timeout_secs: 5,
            log_level: LogLevel::Warn,
            credentials: None,
            bootstrap: Vec::new(),
        }
    }
}

impl Settings {
    /// Build layered settings: compiled-in defaults, an optional YAML file
    /// at `config_path` (skipped entirely if absent — a missing file is
    /// not an error, since the defaults plus env/CLI overrides are often
    /// enough for a quick local node), then `PASTRY_*` environment
    /// variables (double-underscore separated, e.g. `PASTRY_LISTEN_PORT`).
    pub fn load(config_path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?);

        if let Some(path) = config_path {
            if path.exists() {
                builder = builder.add_source(config::File::from(path.to_path_buf()));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PASTRY")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("0.0.0.0:{}", self.listen_port).parse()
    }

    pub fn credential_bytes(&self) -> Vec<u8> {
        self.credentials
            .as_ref()
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_into_a_bind_addr() {
        let settings = Settings::default();
        assert!(settings.bind_addr().is_ok());
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.region, "default");
        assert_eq!(settings.listen_port, 34001);
    }

    #[test]
    fn load_reads_overrides_from_a_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pastry.yaml");
        std::fs::write(&path, "region: east\nlisten_port: 40000\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.region, "east");
        assert_eq!(settings.listen_port, 40000);
        // untouched fields keep their defaults
        assert_eq!(settings.heartbeat_interval_secs, 300);
    }
}
