//! Configuration loading and persistence.
//!
//! Reads `config.json` from the imbroker configuration directory, falls back
//! to defaults when it is absent or unreadable, then applies `IMBROKER_*`
//! environment overrides. Command-line flags are applied last by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_ENCODING, ROUND_TRIP_TIMEOUT};
use crate::engine::KeyEvent;

/// Broker configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    /// One engine session shared by every context.
    pub shared_engines: bool,
    /// Whether new contexts (and the shared session) start enabled.
    pub enabled_by_default: bool,
    /// Provider for new sessions; `None` picks the first registered one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<Uuid>,
    /// Keys toggling composition, e.g. `Control+space`.
    pub trigger_keys: Vec<String>,
    /// Deadline of a surrounding-text round trip, in milliseconds.
    pub round_trip_timeout_ms: u64,
    /// Panel executable spawned when no panel answers (`~` is expanded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel_program: Option<String>,
    /// Configuration module name handed to the panel.
    pub panel_config_name: String,
    /// Encoding engine sessions are created with.
    pub encoding: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            shared_engines: false,
            enabled_by_default: false,
            default_provider: None,
            trigger_keys: vec!["Control+space".to_string()],
            round_trip_timeout_ms: ROUND_TRIP_TIMEOUT.as_millis() as u64,
            panel_program: None,
            panel_config_name: "simple".to_string(),
            encoding: DEFAULT_ENCODING.to_string(),
        }
    }
}

impl BrokerConfig {
    /// Configuration directory.
    ///
    /// `IMBROKER_CONFIG_DIR` if set, else the platform config dir.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = env::var("IMBROKER_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("imbroker"))
    }

    /// Load from the configuration directory with environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_dir(&Self::config_dir()?);
        config.apply_env_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Load `config.json` from `dir`, or defaults.
    pub fn load_from_dir(dir: &Path) -> Self {
        let path = dir.join("config.json");
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
        {
            Ok(config) => config,
            Err(e) => {
                log::warn!("[config] ignoring {}: {e:#}", path.display());
                Self::default()
            }
        }
    }

    /// Apply `IMBROKER_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("IMBROKER_SHARED_ENGINES").and_then(|v| parse_bool(&v)) {
            self.shared_engines = v;
        }
        if let Some(v) = lookup("IMBROKER_ENABLED_BY_DEFAULT").and_then(|v| parse_bool(&v)) {
            self.enabled_by_default = v;
        }
        if let Some(program) = lookup("IMBROKER_PANEL_PROGRAM") {
            self.panel_program = Some(program).filter(|p| !p.is_empty());
        }
        if let Some(ms) = lookup("IMBROKER_ROUND_TRIP_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.round_trip_timeout_ms = ms;
        }
        if let Some(uuid) = lookup("IMBROKER_DEFAULT_PROVIDER") {
            match Uuid::parse_str(&uuid) {
                Ok(uuid) => self.default_provider = Some(uuid),
                Err(e) => log::warn!("[config] IMBROKER_DEFAULT_PROVIDER '{uuid}': {e}"),
            }
        }
    }

    /// Write `config.json` into `dir`.
    pub fn save_to_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join("config.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Round-trip deadline.
    pub fn round_trip_timeout(&self) -> Duration {
        Duration::from_millis(self.round_trip_timeout_ms)
    }

    /// Parsed trigger keys; unparsable entries are logged and skipped.
    pub fn trigger_keys(&self) -> Vec<KeyEvent> {
        self.trigger_keys
            .iter()
            .filter_map(|spec| match KeyEvent::parse_trigger(spec) {
                Ok(key) => Some(key),
                Err(e) => {
                    log::warn!("[config] {e:#}");
                    None
                }
            })
            .collect()
    }

    /// Panel program with `~` and `$VAR` expanded.
    pub fn panel_program(&self) -> Option<String> {
        self.panel_program.as_deref().map(|p| match shellexpand::full(p) {
            Ok(expanded) => expanded.into_owned(),
            Err(_) => shellexpand::tilde(p).into_owned(),
        })
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
