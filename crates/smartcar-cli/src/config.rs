//! Car configuration – reads/writes `~/.smartcar/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted configuration stored in `~/.smartcar/config.toml`.
///
/// Every field has a default, so a partial file (or an empty one) is valid.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Drive speed before the operator touches the speed slider, in percent.
    #[serde(default = "default_speed")]
    pub default_speed: i64,

    /// Motor HAT servo channel for the pan axis.
    #[serde(default = "default_pan_channel")]
    pub pan_channel: u8,

    /// Motor HAT servo channel for the tilt axis.
    #[serde(default = "default_tilt_channel")]
    pub tilt_channel: u8,

    /// Pan angle the gimbal is driven to at start-up.
    #[serde(default = "default_initial_pan")]
    pub initial_pan: i64,

    /// Tilt angle the gimbal is driven to at start-up.
    #[serde(default = "default_initial_tilt")]
    pub initial_tilt: i64,

    /// Length of the motion pulse produced by one drive-stick sample.
    #[serde(default = "default_joystick_pulse_ms")]
    pub joystick_pulse_ms: u64,

    /// Settle time after every stop pulse.
    #[serde(default = "default_stop_settle_ms")]
    pub stop_settle_ms: u64,

    /// Duration of voice "forward" / "backward" manoeuvres.
    #[serde(default = "default_voice_drive_ms")]
    pub voice_drive_ms: u64,

    /// Duration of voice "left" / "right" rotations.
    #[serde(default = "default_voice_turn_ms")]
    pub voice_turn_ms: u64,

    /// Base URL of the OpenAI-compatible chat endpoint (Ollama by default).
    #[serde(default = "default_llm_url")]
    pub llm_url: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Bearer token for hosted chat endpoints. Stored as plain text; the
    /// config file is created owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub llm_api_key: String,

    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// Base URL of the Whisper-compatible transcription server.
    #[serde(default = "default_transcriber_url")]
    pub transcriber_url: String,

    #[serde(default = "default_transcriber_model")]
    pub transcriber_model: String,

    /// Text-to-speech command; voice, text and output file are appended.
    #[serde(default = "default_tts_command")]
    pub tts_command: Vec<String>,

    /// Audio player command; the file to play is appended.
    #[serde(default = "default_player_command")]
    pub player_command: Vec<String>,

    /// Navigation stack launch command. Empty runs a simulated session.
    #[serde(default)]
    pub navigation_command: Vec<String>,

    /// How long the navigation stack gets to exit before it is killed.
    #[serde(default = "default_navigation_stop_timeout_ms")]
    pub navigation_stop_timeout_ms: u64,

    /// MJPEG capture command writing to stdout. Empty uses a simulated camera.
    #[serde(default)]
    pub camera_command: Vec<String>,

    #[serde(default = "default_camera_width")]
    pub camera_width: u32,

    #[serde(default = "default_camera_height")]
    pub camera_height: u32,

    /// Where to record the annotated multipart stream. Unset disables video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_output: Option<PathBuf>,

    /// I2C address of the PCA9685 on the motor HAT.
    #[serde(default = "default_motor_i2c_address")]
    pub motor_i2c_address: u8,
}

impl Config {
    pub fn joystick_pulse(&self) -> Duration {
        Duration::from_millis(self.joystick_pulse_ms)
    }

    pub fn stop_settle(&self) -> Duration {
        Duration::from_millis(self.stop_settle_ms)
    }

    pub fn navigation_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_stop_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("default_speed", &self.default_speed)
            .field("pan_channel", &self.pan_channel)
            .field("tilt_channel", &self.tilt_channel)
            .field("initial_pan", &self.initial_pan)
            .field("initial_tilt", &self.initial_tilt)
            .field("joystick_pulse_ms", &self.joystick_pulse_ms)
            .field("stop_settle_ms", &self.stop_settle_ms)
            .field("voice_drive_ms", &self.voice_drive_ms)
            .field("voice_turn_ms", &self.voice_turn_ms)
            .field("llm_url", &self.llm_url)
            .field("llm_model", &self.llm_model)
            .field(
                "llm_api_key",
                if self.llm_api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("transcriber_url", &self.transcriber_url)
            .field("transcriber_model", &self.transcriber_model)
            .field("tts_command", &self.tts_command)
            .field("player_command", &self.player_command)
            .field("navigation_command", &self.navigation_command)
            .field("navigation_stop_timeout_ms", &self.navigation_stop_timeout_ms)
            .field("camera_command", &self.camera_command)
            .field("camera_width", &self.camera_width)
            .field("camera_height", &self.camera_height)
            .field("video_output", &self.video_output)
            .field("motor_i2c_address", &self.motor_i2c_address)
            .finish()
    }
}

fn default_speed() -> i64 {
    50
}
fn default_pan_channel() -> u8 {
    9
}
fn default_tilt_channel() -> u8 {
    10
}
fn default_initial_pan() -> i64 {
    80
}
fn default_initial_tilt() -> i64 {
    40
}
fn default_joystick_pulse_ms() -> u64 {
    100
}
fn default_stop_settle_ms() -> u64 {
    100
}
fn default_voice_drive_ms() -> u64 {
    2000
}
fn default_voice_turn_ms() -> u64 {
    1000
}
fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "deepseek-r1:1.5b".to_string()
}
fn default_query_timeout_secs() -> u64 {
    10
}
fn default_transcriber_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_transcriber_model() -> String {
    "base".to_string()
}
fn default_tts_command() -> Vec<String> {
    vec!["edge-tts".to_string()]
}
fn default_player_command() -> Vec<String> {
    vec!["mpg123".to_string(), "-q".to_string()]
}
fn default_navigation_stop_timeout_ms() -> u64 {
    3000
}
fn default_camera_width() -> u32 {
    640
}
fn default_camera_height() -> u32 {
    480
}
fn default_motor_i2c_address() -> u8 {
    0x40
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_speed: default_speed(),
            pan_channel: default_pan_channel(),
            tilt_channel: default_tilt_channel(),
            initial_pan: default_initial_pan(),
            initial_tilt: default_initial_tilt(),
            joystick_pulse_ms: default_joystick_pulse_ms(),
            stop_settle_ms: default_stop_settle_ms(),
            voice_drive_ms: default_voice_drive_ms(),
            voice_turn_ms: default_voice_turn_ms(),
            llm_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: String::new(),
            query_timeout_secs: default_query_timeout_secs(),
            transcriber_url: default_transcriber_url(),
            transcriber_model: default_transcriber_model(),
            tts_command: default_tts_command(),
            player_command: default_player_command(),
            navigation_command: Vec::new(),
            navigation_stop_timeout_ms: default_navigation_stop_timeout_ms(),
            camera_command: Vec::new(),
            camera_width: default_camera_width(),
            camera_height: default_camera_height(),
            video_output: None,
            motor_i2c_address: default_motor_i2c_address(),
        }
    }
}

/// Return the path to `~/.smartcar/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".smartcar").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `SMARTCAR_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SMARTCAR_LLM_URL` | `llm_url` |
/// | `SMARTCAR_LLM_MODEL` | `llm_model` |
/// | `SMARTCAR_TRANSCRIBER_URL` | `transcriber_url` |
/// | `SMARTCAR_DEFAULT_SPEED` | `default_speed` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SMARTCAR_LLM_URL") {
        cfg.llm_url = v;
    }
    if let Ok(v) = std::env::var("SMARTCAR_LLM_MODEL") {
        cfg.llm_model = v;
    }
    if let Ok(v) = std::env::var("SMARTCAR_TRANSCRIBER_URL") {
        cfg.transcriber_url = v;
    }
    if let Ok(v) = std::env::var("SMARTCAR_DEFAULT_SPEED")
        && let Ok(speed) = v.trim().parse::<i64>()
    {
        cfg.default_speed = speed;
    }
}

/// Save the config to disk, creating `~/.smartcar/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
