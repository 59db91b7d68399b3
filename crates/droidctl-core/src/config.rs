//! Configuration for droidctl sessions.
//!
//! Two layers live here:
//!
//! - [`SessionConfig`] is the explicit value handed to every
//!   [`DeviceSession`](crate::session::DeviceSession). It carries the logging
//!   toggle, timing units and adb program, so no setting is process-global.
//! - [`DroidConfig`] is the persisted user configuration in
//!   `~/.droidctl/config.json`. It is optional; every field has a default.
//!
//! # Example
//!
//! ```no_run
//! use droidctl_core::config::DroidConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = DroidConfig::load();
//! println!("emulator launcher: {}", config.emulator_binary().display());
//!
//! let session_config = config.session_config();
//! assert!(session_config.delay_unit().as_millis() > 0);
//! ```

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sampler::MatchStrategy;

const CONFIG_FILENAME: &str = "config.json";

/// Default delay unit applied when none (or zero) is configured.
pub const DEFAULT_DELAY_UNIT_MS: u32 = 100;

/// Default polling tick of the retry engine.
pub const DEFAULT_POLL_TICK: Duration = Duration::from_millis(50);

const DEFAULT_DELAY_UNIT: NonZeroU32 = match NonZeroU32::new(DEFAULT_DELAY_UNIT_MS) {
    Some(unit) => unit,
    None => panic!("default delay unit must be non-zero"),
};

/// Per-session settings, passed explicitly to session constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Log every issued command at `info` level instead of `debug`.
    pub verbose: bool,
    /// The adb program to invoke.
    pub adb: String,
    /// How `wait_for_text` checks multiple targets per round.
    pub match_strategy: MatchStrategy,
    delay_unit: NonZeroU32,
    poll_tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            adb: "adb".to_string(),
            match_strategy: MatchStrategy::default(),
            delay_unit: DEFAULT_DELAY_UNIT,
            poll_tick: DEFAULT_POLL_TICK,
        }
    }
}

impl SessionConfig {
    /// Sets the delay unit in milliseconds. Zero selects the 100 ms default.
    pub fn with_delay_unit_ms(mut self, millis: u32) -> Self {
        self.delay_unit = NonZeroU32::new(millis).unwrap_or(DEFAULT_DELAY_UNIT);
        self
    }

    /// Sets the polling tick. A zero tick selects the default.
    pub fn with_poll_tick(mut self, tick: Duration) -> Self {
        self.poll_tick = if tick.is_zero() { DEFAULT_POLL_TICK } else { tick };
        self
    }

    /// Enables or disables verbose command logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Uses a different adb program (e.g. an absolute path).
    pub fn with_adb(mut self, adb: impl Into<String>) -> Self {
        self.adb = adb.into();
        self
    }

    /// Selects the multi-target matching strategy.
    pub fn with_match_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.match_strategy = strategy;
        self
    }

    /// The delay unit; never zero.
    pub fn delay_unit(&self) -> Duration {
        Duration::from_millis(u64::from(self.delay_unit.get()))
    }

    /// The retry engine's polling tick; never zero.
    pub fn poll_tick(&self) -> Duration {
        self.poll_tick
    }
}

/// Persistent droidctl configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DroidConfig {
    /// Android SDK root. Falls back to `ANDROID_SDK_ROOT`, `ANDROID_HOME`,
    /// then `~/Android/Sdk`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_root: Option<PathBuf>,

    /// adb program to invoke (defaults to `adb` on `PATH`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adb_path: Option<String>,

    /// Delay unit in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_unit_ms: Option<u32>,

    /// Polling tick in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_tick_ms: Option<u64>,

    /// Verbose command logging.
    #[serde(default)]
    pub verbose: bool,

    /// Multi-target matching strategy for screen waits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_strategy: Option<MatchStrategy>,
}

/// Returns the droidctl directory path (`~/.droidctl/`), if a home directory
/// can be determined.
pub fn droidctl_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".droidctl"))
}

impl DroidConfig {
    /// Load config from `~/.droidctl/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        droidctl_dir()
            .map(|dir| Self::load_from(&dir.join(CONFIG_FILENAME)))
            .unwrap_or_default()
    }

    /// Load config from an explicit path, with the same fallback as [`load`](Self::load).
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.droidctl/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        let dir = droidctl_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "home directory not found")
        })?;
        std::fs::create_dir_all(&dir)?;
        self.save_to(&dir.join(CONFIG_FILENAME))
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// Resolved Android SDK root.
    pub fn sdk_root(&self) -> PathBuf {
        if let Some(root) = &self.sdk_root {
            return root.clone();
        }
        ["ANDROID_SDK_ROOT", "ANDROID_HOME"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .find(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join("Android").join("Sdk")))
            .unwrap_or_else(|| PathBuf::from("Android/Sdk"))
    }

    /// Path of the emulator launcher inside the SDK.
    pub fn emulator_binary(&self) -> PathBuf {
        self.sdk_root().join("emulator").join("emulator")
    }

    /// Builds the [`SessionConfig`] for new device sessions.
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default()
            .with_verbose(self.verbose)
            .with_delay_unit_ms(self.delay_unit_ms.unwrap_or(DEFAULT_DELAY_UNIT_MS));
        if let Some(tick) = self.poll_tick_ms {
            config = config.with_poll_tick(Duration::from_millis(tick));
        }
        if let Some(adb) = &self.adb_path {
            config = config.with_adb(adb.clone());
        }
        if let Some(strategy) = self.match_strategy {
            config = config.with_match_strategy(strategy);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_config_values() {
        let config = SessionConfig::default();
        assert!(!config.verbose);
        assert_eq!(config.adb, "adb");
        assert_eq!(config.delay_unit(), Duration::from_millis(100));
        assert_eq!(config.poll_tick(), DEFAULT_POLL_TICK);
        assert_eq!(config.match_strategy, MatchStrategy::Exhaustive);
    }

    #[test]
    fn zero_delay_unit_falls_back_to_default() {
        let config = SessionConfig::default().with_delay_unit_ms(0);
        assert_eq!(config.delay_unit(), Duration::from_millis(100));

        let config = SessionConfig::default().with_delay_unit_ms(250);
        assert_eq!(config.delay_unit(), Duration::from_millis(250));
    }

    #[test]
    fn zero_poll_tick_falls_back_to_default() {
        let config = SessionConfig::default().with_poll_tick(Duration::ZERO);
        assert_eq!(config.poll_tick(), DEFAULT_POLL_TICK);
    }

    #[test]
    fn default_config_is_empty() {
        let config = DroidConfig::default();
        assert!(config.sdk_root.is_none());
        assert!(config.adb_path.is_none());
        assert!(!config.verbose);
    }

    #[test]
    fn deserialize_empty_json() {
        let loaded: DroidConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, DroidConfig::default());
    }

    #[test]
    fn save_and_load_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = DroidConfig {
            sdk_root: Some(PathBuf::from("/opt/android-sdk")),
            adb_path: Some("/opt/android-sdk/platform-tools/adb".to_string()),
            delay_unit_ms: Some(50),
            poll_tick_ms: Some(5),
            verbose: true,
            match_strategy: Some(MatchStrategy::Sampled),
        };
        config.save_to(&path).unwrap();
        assert_eq!(DroidConfig::load_from(&path), config);
    }

    #[test]
    fn load_from_invalid_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(DroidConfig::load_from(&path), DroidConfig::default());
        assert_eq!(
            DroidConfig::load_from(&dir.path().join("missing.json")),
            DroidConfig::default()
        );
    }

    #[test]
    fn explicit_sdk_root_wins() {
        let config = DroidConfig {
            sdk_root: Some(PathBuf::from("/sdk")),
            ..Default::default()
        };
        assert_eq!(config.emulator_binary(), PathBuf::from("/sdk/emulator/emulator"));
    }

    #[test]
    fn session_config_from_persisted_values() {
        let config = DroidConfig {
            adb_path: Some("/usr/local/bin/adb".to_string()),
            delay_unit_ms: Some(0),
            poll_tick_ms: Some(10),
            verbose: true,
            match_strategy: Some(MatchStrategy::Sampled),
            ..Default::default()
        };
        let session = config.session_config();
        assert_eq!(session.adb, "/usr/local/bin/adb");
        assert_eq!(session.delay_unit(), Duration::from_millis(100));
        assert_eq!(session.poll_tick(), Duration::from_millis(10));
        assert!(session.verbose);
        assert_eq!(session.match_strategy, MatchStrategy::Sampled);
    }
}
