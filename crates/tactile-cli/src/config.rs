//! Configuration vault – reads/writes `~/.tactile/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tactile_middleware::EventDefinition;
use tactile_types::BridgeError;

/// One bus event the driver bridges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub name: String,
    pub keys: Vec<String>,
    #[serde(default = "default_frequency")]
    pub frequency: f32,
}

impl EventConfig {
    fn from_definition(definition: EventDefinition) -> Self {
        Self {
            enabled: true,
            name: definition.name,
            keys: definition.keys,
            frequency: definition.frequency,
        }
    }

    pub fn definition(&self) -> EventDefinition {
        EventDefinition {
            name: self.name.clone(),
            keys: self.keys.clone(),
            frequency: self.frequency,
        }
    }
}

/// Persisted driver configuration stored in `~/.tactile/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite file holding recordings and dumps.
    #[serde(default = "default_recording_db")]
    pub recording_db: PathBuf,

    /// Seconds of history kept for the next dump.
    #[serde(default = "default_buffer_duration")]
    pub buffer_duration_secs: f32,

    /// Bus queue depth and broadcast channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_true")]
    pub publish: bool,
    #[serde(default)]
    pub record: bool,
    #[serde(default = "default_true")]
    pub dump: bool,

    #[serde(default = "default_bumper")]
    pub bumper: EventConfig,
    #[serde(default = "default_head_touch")]
    pub head_touch: EventConfig,
    #[serde(default = "default_hand_touch")]
    pub hand_touch: EventConfig,
}

fn default_true() -> bool {
    true
}
fn default_frequency() -> f32 {
    10.0
}
fn default_recording_db() -> PathBuf {
    tactile_dir(&home_dir()).join("recordings.db")
}
fn default_buffer_duration() -> f32 {
    10.0
}
fn default_channel_capacity() -> usize {
    256
}
fn default_bumper() -> EventConfig {
    EventConfig::from_definition(EventDefinition::bumper())
}
fn default_head_touch() -> EventConfig {
    EventConfig::from_definition(EventDefinition::head_touch())
}
fn default_hand_touch() -> EventConfig {
    EventConfig::from_definition(EventDefinition::hand_touch())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recording_db: default_recording_db(),
            buffer_duration_secs: default_buffer_duration(),
            channel_capacity: default_channel_capacity(),
            publish: true,
            record: false,
            dump: true,
            bumper: default_bumper(),
            head_touch: default_head_touch(),
            hand_touch: default_hand_touch(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn tactile_dir(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tactile")
}

/// Return the path to `~/.tactile/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    tactile_dir(home).join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, BridgeError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `TACTILE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TACTILE_RECORDING_DB` | `recording_db` |
/// | `TACTILE_BUFFER_DURATION` | `buffer_duration_secs` |
/// | `TACTILE_CHANNEL_CAPACITY` | `channel_capacity` |
///
/// Unparsable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TACTILE_RECORDING_DB") {
        cfg.recording_db = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("TACTILE_BUFFER_DURATION")
        && let Ok(secs) = v.parse::<f32>()
    {
        cfg.buffer_duration_secs = secs;
    }
    if let Ok(v) = std::env::var("TACTILE_CHANNEL_CAPACITY")
        && let Ok(capacity) = v.parse::<usize>()
    {
        cfg.channel_capacity = capacity;
    }
}

/// Defaults with the `TACTILE_*` overrides applied, for when no usable file
/// exists.
pub fn fallback() -> Config {
    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg);
    cfg
}

/// Save the config to disk, creating `~/.tactile/` if necessary.
pub fn save(cfg: &Config) -> Result<(), BridgeError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BridgeError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                BridgeError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| BridgeError::Config(format!("failed to write {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
