//! Configuration loading
//!
//! Values come from built-in defaults, then an optional JSON file, then
//! environment variables. Anything malformed is fatal at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hub::MIN_SUBSCRIBER_QUEUE;
use crate::mapping::{ChannelIndex, InputMap};
use crate::protocol::Brightness;
use crate::tally::Precedence;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Tally mapping is empty")]
    EmptyMapping,

    #[error("Tally mapping key {0:?} is not an input number")]
    InvalidMappingKey(String),

    #[error("Videohub mode needs at least one program output")]
    NoProgramOutputs,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("subscriberQueue must be at least {min}, got {value}")]
    QueueTooSmall { value: usize, min: usize },
}

// What this process runs as
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    BaseStation,
    Light,
}

// Which switcher backend feeds the base station
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Videohub,
    Obs,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Videohub => f.write_str("videohub"),
            Mode::Obs => f.write_str("obs"),
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base-station" | "base" => Ok(Role::BaseStation),
            "light" => Ok(Role::Light),
            _ => Err(()),
        }
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "videohub" => Ok(Mode::Videohub),
            "obs" => Ok(Mode::Obs),
            _ => Err(()),
        }
    }
}

impl FromStr for Precedence {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "program" => Ok(Precedence::Program),
            "preview" => Ok(Precedence::Preview),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BaseStationConfig {
    // Address lights use to reach the base station
    pub ip: String,
    // Port the hub listens on
    pub port: u16,
    // Messages buffered per light before drops
    pub subscriber_queue: usize,
}

impl Default for BaseStationConfig {
    fn default() -> Self {
        Self {
            ip: "172.16.0.1".to_string(),
            port: 3000,
            subscriber_queue: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LightConfig {
    // Channel this light reacts to
    pub channel: ChannelIndex,
    pub preview_brightness: u8,
    pub program_brightness: u8,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            preview_brightness: 100,
            program_brightness: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct VideohubConfig {
    pub host: String,
    pub port: u16,
    // Outputs feeding the program monitor (0-indexed)
    pub program_outputs: Vec<u32>,
    // Outputs feeding the preview monitor (0-indexed)
    pub preview_outputs: Vec<u32>,
    // Input number -> tally channel
    pub tally_mapping: BTreeMap<String, ChannelIndex>,
}

impl Default for VideohubConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9990,
            program_outputs: vec![0],
            preview_outputs: vec![1],
            tally_mapping: (0..8u16).map(|n| (n.to_string(), n)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ObsConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    // Scene item name -> tally channel
    pub tally_mapping: BTreeMap<String, ChannelIndex>,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4455,
            password: String::new(),
            tally_mapping: (0..8u16).map(|n| (format!("Camera {}", n + 1), n)).collect(),
        }
    }
}

/// Upstream link timing, all in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct TimingConfig {
    pub retry_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 5000,
            poll_interval_ms: 1000,
            connect_timeout_ms: 5000,
            request_timeout_ms: 2000,
        }
    }
}

impl TimingConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Complete process configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub role: Role,
    pub mode: Mode,
    pub precedence: Precedence,
    pub base_station: BaseStationConfig,
    pub light: LightConfig,
    pub videohub: VideohubConfig,
    pub obs: ObsConfig,
    pub timing: TimingConfig,
}

impl Config {
    /// Load from `TALLY_CONFIG` (or `config.json`) and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("TALLY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let file = if Path::new(&path).exists() {
            log::info!("Loading config from {}", path);
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            Some(text)
        } else {
            log::warn!("No config found at {}, using defaults and env vars", path);
            None
        };

        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build from optional JSON text and an environment lookup
    pub fn from_sources<F>(file: Option<&str>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(text) => serde_json::from_str(text)?,
            None => Config::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(role) = env_parse(env, "TALLY_ROLE")? {
            self.role = role;
        }
        if let Some(mode) = env_parse(env, "TALLY_MODE")? {
            self.mode = mode;
        }
        if let Some(precedence) = env_parse(env, "TALLY_PRECEDENCE")? {
            self.precedence = precedence;
        }
        if let Some(ip) = env("BASE_STATION_IP") {
            self.base_station.ip = ip;
        }
        if let Some(port) = env_parse(env, "BASE_STATION_PORT")? {
            self.base_station.port = port;
        }
        if let Some(channel) = env_parse(env, "LIGHT_CHANNEL")? {
            self.light.channel = channel;
        }
        if let Some(level) = env_parse(env, "PREVIEW_BRIGHTNESS")? {
            self.light.preview_brightness = level;
        }
        if let Some(level) = env_parse(env, "PROGRAM_BRIGHTNESS")? {
            self.light.program_brightness = level;
        }
        if let Some(host) = env("VIDEOHUB_HOST") {
            self.videohub.host = host;
        }
        if let Some(port) = env_parse(env, "VIDEOHUB_PORT")? {
            self.videohub.port = port;
        }
        if let Some(host) = env("OBS_HOST") {
            self.obs.host = host;
        }
        if let Some(port) = env_parse(env, "OBS_PORT")? {
            self.obs.port = port;
        }
        if let Some(password) = env("OBS_PASSWORD") {
            self.obs.password = password;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.retry_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("retryIntervalMs"));
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("pollIntervalMs"));
        }
        if self.timing.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval("connectTimeoutMs"));
        }
        if self.timing.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval("requestTimeoutMs"));
        }
        if self.role == Role::BaseStation {
            if self.base_station.subscriber_queue < MIN_SUBSCRIBER_QUEUE {
                return Err(ConfigError::QueueTooSmall {
                    value: self.base_station.subscriber_queue,
                    min: MIN_SUBSCRIBER_QUEUE,
                });
            }
            if self.mode == Mode::Videohub && self.videohub.program_outputs.is_empty() {
                return Err(ConfigError::NoProgramOutputs);
            }
            self.input_map()?;
        }
        Ok(())
    }

    /// Identifier table for the selected mode
    pub fn input_map(&self) -> Result<InputMap, ConfigError> {
        match self.mode {
            Mode::Videohub => InputMap::from_numeric_keys(&self.videohub.tally_mapping),
            Mode::Obs => InputMap::from_source_names(&self.obs.tally_mapping),
        }
    }

    pub fn brightness(&self) -> Brightness {
        Brightness {
            program: self.light.program_brightness,
            preview: self.light.preview_brightness,
        }
    }

    /// Address the hub listens on
    pub fn hub_bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.base_station.port))
    }

    /// Address lights connect to
    pub fn base_station_addr(&self) -> String {
        format!("{}:{}", self.base_station.ip, self.base_station.port)
    }
}

fn env_parse<T, F>(env: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(None, env_from(&[])).unwrap();

        assert_eq!(config.role, Role::BaseStation);
        assert_eq!(config.mode, Mode::Videohub);
        assert_eq!(config.precedence, Precedence::Program);
        assert_eq!(config.hub_bind_addr().port(), 3000);
        assert_eq!(config.timing.retry_interval(), Duration::from_secs(5));
        assert_eq!(config.timing.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.brightness(), Brightness { program: 100, preview: 100 });
        assert_eq!(config.input_map().unwrap().len(), 8);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = r#"{
            "mode": "obs",
            "precedence": "preview",
            "obs": { "host": "10.1.250.6", "tallyMapping": { "Cam A": 2 } },
            "light": { "programBrightness": 255 }
        }"#;
        let config = Config::from_sources(Some(file), env_from(&[])).unwrap();

        assert_eq!(config.mode, Mode::Obs);
        assert_eq!(config.precedence, Precedence::Preview);
        assert_eq!(config.obs.host, "10.1.250.6");
        assert_eq!(config.obs.port, 4455);
        assert_eq!(config.light.program_brightness, 255);
        assert_eq!(config.light.preview_brightness, 100);

        let map = config.input_map().unwrap();
        assert_eq!(map.channels().iter().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = r#"{ "baseStation": { "port": 4000 } }"#;
        let env = env_from(&[
            ("BASE_STATION_PORT", "5000"),
            ("TALLY_ROLE", "light"),
            ("LIGHT_CHANNEL", "3"),
            ("VIDEOHUB_HOST", "10.0.0.9"),
        ]);
        let config = Config::from_sources(Some(file), env).unwrap();

        assert_eq!(config.base_station.port, 5000);
        assert_eq!(config.role, Role::Light);
        assert_eq!(config.light.channel, 3);
        assert_eq!(config.videohub.host, "10.0.0.9");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = Config::from_sources(Some(r#"{ "sentry": {} }"#), env_from(&[]));

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_malformed_mapping_is_fatal() {
        let file = r#"{ "videohub": { "tallyMapping": { "one": 0 } } }"#;
        let result = Config::from_sources(Some(file), env_from(&[]));

        assert!(matches!(result, Err(ConfigError::InvalidMappingKey(_))));
    }

    #[test]
    fn test_empty_mapping_is_fatal() {
        let file = r#"{ "mode": "obs", "obs": { "tallyMapping": {} } }"#;
        let result = Config::from_sources(Some(file), env_from(&[]));

        assert!(matches!(result, Err(ConfigError::EmptyMapping)));
    }

    #[test]
    fn test_light_role_skips_mapping_checks() {
        let file = r#"{ "role": "light", "videohub": { "tallyMapping": {} } }"#;

        assert!(Config::from_sources(Some(file), env_from(&[])).is_ok());
    }

    #[test]
    fn test_bad_env_value() {
        let result = Config::from_sources(None, env_from(&[("TALLY_MODE", "atem")]));

        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv { key: "TALLY_MODE", .. })
        ));
    }

    #[test]
    fn test_brightness_out_of_range() {
        let result = Config::from_sources(None, env_from(&[("PREVIEW_BRIGHTNESS", "300")]));

        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let file = r#"{ "timing": { "pollIntervalMs": 0 } }"#;

        assert!(matches!(
            Config::from_sources(Some(file), env_from(&[])),
            Err(ConfigError::ZeroInterval("pollIntervalMs"))
        ));
    }

    #[test]
    fn test_subscriber_queue_must_hold_replay() {
        let file = r#"{ "baseStation": { "subscriberQueue": 1 } }"#;

        assert!(matches!(
            Config::from_sources(Some(file), env_from(&[])),
            Err(ConfigError::QueueTooSmall { value: 1, min: 2 })
        ));

        let file = r#"{ "baseStation": { "subscriberQueue": 2 } }"#;
        assert!(Config::from_sources(Some(file), env_from(&[])).is_ok());
    }

    #[test]
    fn test_videohub_requires_program_output() {
        let file = r#"{ "videohub": { "programOutputs": [] } }"#;

        assert!(matches!(
            Config::from_sources(Some(file), env_from(&[])),
            Err(ConfigError::NoProgramOutputs)
        ));
    }
}
