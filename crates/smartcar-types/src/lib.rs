use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Speed applied before any `SetSpeed` command arrives.
pub const DEFAULT_SPEED_PERCENT: u8 = 50;
/// Maximum drive speed, in percent of full PWM duty.
pub const MAX_SPEED_PERCENT: u8 = 100;

/// Horizontal (pan) gimbal limits in degrees, inclusive.
pub const PAN_MIN: u8 = 35;
pub const PAN_MAX: u8 = 125;
/// Vertical (tilt) gimbal limits in degrees, inclusive.
pub const TILT_MIN: u8 = 0;
pub const TILT_MAX: u8 = 80;

/// Degrees moved per unit of joystick deflection on the gimbal stick.
pub const GIMBAL_STEP_DEGREES: f64 = 5.0;

/// Language used for speech when the requester does not name one.
pub const DEFAULT_SPEECH_LANG: &str = "en-US";

/// Where a command came from. Everything except [`CommandSource::Autonomous`]
/// counts as manual input and takes priority over the navigation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    /// Left/right virtual joystick on the operator UI.
    Joystick,
    /// Transcribed voice command.
    Voice,
    /// Typed text command.
    Text,
    /// Direct API calls (speed slider, TTS endpoint).
    Api,
    /// Intent stream produced by the navigation process.
    Autonomous,
}

impl CommandSource {
    pub fn is_manual(self) -> bool {
        !matches!(self, CommandSource::Autonomous)
    }
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandSource::Joystick => "joystick",
            CommandSource::Voice => "voice",
            CommandSource::Text => "text",
            CommandSource::Api => "api",
            CommandSource::Autonomous => "autonomous",
        };
        f.write_str(name)
    }
}

/// Motion profiles supported by the four-wheel mecanum base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveProfile {
    Forward,
    Backward,
    StrafeLeft,
    StrafeRight,
    ForwardLeft,
    ForwardRight,
    BackwardLeft,
    BackwardRight,
    /// Rotate in place, counter-clockwise.
    TurnLeft,
    /// Rotate in place, clockwise.
    TurnRight,
}

impl DriveProfile {
    /// Per-wheel rotation direction in the order
    /// `[left_front, right_front, left_rear, right_rear]`.
    ///
    /// `1` spins the wheel forward, `-1` backward, `0` leaves it unpowered.
    pub fn wheel_directions(self) -> [i8; 4] {
        match self {
            DriveProfile::Forward => [1, 1, 1, 1],
            DriveProfile::Backward => [-1, -1, -1, -1],
            DriveProfile::StrafeLeft => [-1, 1, 1, -1],
            DriveProfile::StrafeRight => [1, -1, -1, 1],
            DriveProfile::ForwardLeft => [0, 1, 1, 0],
            DriveProfile::ForwardRight => [1, 0, 0, 1],
            DriveProfile::BackwardLeft => [-1, 0, 0, -1],
            DriveProfile::BackwardRight => [0, -1, -1, 0],
            DriveProfile::TurnLeft => [-1, 1, -1, 1],
            DriveProfile::TurnRight => [1, -1, 1, -1],
        }
    }
}

impl fmt::Display for DriveProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveProfile::Forward => "forward",
            DriveProfile::Backward => "backward",
            DriveProfile::StrafeLeft => "strafe_left",
            DriveProfile::StrafeRight => "strafe_right",
            DriveProfile::ForwardLeft => "forward_left",
            DriveProfile::ForwardRight => "forward_right",
            DriveProfile::BackwardLeft => "backward_left",
            DriveProfile::BackwardRight => "backward_right",
            DriveProfile::TurnLeft => "turn_left",
            DriveProfile::TurnRight => "turn_right",
        };
        f.write_str(name)
    }
}

/// The normalized command every input source is reduced to.
///
/// Consumed exactly once by the command arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Continuous joystick vector, both axes in `[-1, 1]`.
    Move { vx: f64, vy: f64 },
    /// Discrete, fixed-duration manoeuvre (voice "forward", "left", ...).
    Maneuver {
        profile: DriveProfile,
        duration_ms: u64,
    },
    Stop,
    SetSpeed { percent: i64 },
    ToggleAutonomous,
    /// Enter or leave autonomous mode explicitly; a no-op when already there.
    SetAutonomous { enabled: bool },
    GimbalAdjust { dx: f64, dy: f64 },
    Speak { text: String, lang: String },
}

/// A resolved, bounded-duration actuation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionPlan {
    pub profile: DriveProfile,
    pub speed_percent: u8,
    pub duration: Duration,
}

/// What the motion state machine is currently driving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveMotion {
    pub plan: MotionPlan,
    pub source: CommandSource,
    pub started_at: DateTime<Utc>,
}

/// Manual vs. autonomous operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Manual,
    Autonomous,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Manual => f.write_str("manual"),
            Mode::Autonomous => f.write_str("autonomous"),
        }
    }
}

/// Drive-side vehicle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Always within `0..=100`.
    pub speed_percent: u8,
    pub mode: Mode,
    pub active_motion: Option<ActiveMotion>,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            speed_percent: DEFAULT_SPEED_PERCENT,
            mode: Mode::Manual,
            active_motion: None,
        }
    }
}

/// Clamp an arbitrary requested speed into `0..=100`.
pub fn clamp_speed(percent: i64) -> u8 {
    percent.clamp(0, i64::from(MAX_SPEED_PERCENT)) as u8
}

/// Pan/tilt camera mount angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GimbalState {
    /// Always within `PAN_MIN..=PAN_MAX`.
    pub angle_h: u8,
    /// Always within `TILT_MIN..=TILT_MAX`.
    pub angle_v: u8,
}

impl GimbalState {
    /// Build a state, clamping both angles into their limits.
    pub fn new(angle_h: i64, angle_v: i64) -> Self {
        Self {
            angle_h: angle_h.clamp(i64::from(PAN_MIN), i64::from(PAN_MAX)) as u8,
            angle_v: angle_v.clamp(i64::from(TILT_MIN), i64::from(TILT_MAX)) as u8,
        }
    }

    /// Apply a joystick deflection. Pushing the stick up (`dy > 0`) tilts the
    /// camera towards 0°.
    pub fn apply_delta(self, dx: f64, dy: f64) -> Self {
        let step_h = scaled_step(dx);
        let step_v = scaled_step(dy);
        Self::new(
            i64::from(self.angle_h).saturating_add(step_h),
            i64::from(self.angle_v).saturating_sub(step_v),
        )
    }
}

impl Default for GimbalState {
    fn default() -> Self {
        Self {
            angle_h: 80,
            angle_v: 40,
        }
    }
}

fn scaled_step(delta: f64) -> i64 {
    if !delta.is_finite() {
        return 0;
    }
    // `as` saturates for out-of-range floats.
    (delta * GIMBAL_STEP_DEGREES).round() as i64
}

/// A request to speak a piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub lang: String,
    pub submitted_at: DateTime<Utc>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: lang.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Result of a speech request against the single-flight guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakOutcome {
    Started,
    Busy,
}

/// Why the arbiter refused to act on a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// An autonomous intent arrived while a manual motion was executing.
    ManualOverride,
    /// An autonomous intent arrived while the vehicle is in manual mode.
    NotAutonomous,
    /// A mode change is already in progress.
    TransitionInProgress,
    /// `SetAutonomous` asked for the mode the vehicle is already in.
    AlreadyInMode(Mode),
    /// The car is shutting down; no new navigation session may start.
    ShuttingDown,
}

/// Result of submitting one command to the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// The motion ran for its full duration and was followed by a stop pulse.
    Completed,
    /// The motion was cut short by a newer command.
    Interrupted,
    /// A newer command arrived before this one reached the actuator.
    Superseded,
    SpeedSet(u8),
    GimbalMoved(GimbalState),
    ModeChanged(Mode),
    Speech(SpeakOutcome),
    /// Malformed or unrecognised payload; nothing happened.
    Ignored,
    Rejected(RejectReason),
}

/// Outbound notification sent back to the operator UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Notification {
    /// Recognised voice transcript.
    Command { command: String },
    /// Assistant or voice-command reply.
    Response { response: String },
}

/// Envelope for notifications routed over the middleware bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"smartcar-runtime::voice"`
    pub source: String,
    pub payload: Notification,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: Notification) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Which virtual joystick a movement event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stick {
    /// Drives the vehicle.
    Left,
    /// Drives the camera gimbal.
    Right,
}

/// A raw payload delivered by the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Joystick { stick: Stick, x: f64, y: f64 },
    Speed(i64),
    TextCommand(String),
    Voice(Vec<u8>),
    Tts { text: String, lang: String },
    /// A command produced by the navigation process.
    NavigationIntent(Command),
}

impl InboundMessage {
    /// Classify a JSON payload by the keys it carries.
    ///
    /// Returns `None` for anything that does not match a known shape; the
    /// caller treats that as an ignored command.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        if let Some(stick) = obj.get("joystick") {
            let stick = match stick.as_str()? {
                "left" => Stick::Left,
                "right" => Stick::Right,
                _ => return None,
            };
            let x = axis(obj.get("x"))?;
            let y = axis(obj.get("y"))?;
            return Some(InboundMessage::Joystick { stick, x, y });
        }

        if let Some(speed) = obj.get("speed") {
            let percent = speed
                .as_i64()
                .or_else(|| speed.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))?;
            return Some(InboundMessage::Speed(percent));
        }

        if let Some(command) = obj.get("command") {
            return Some(InboundMessage::TextCommand(command.as_str()?.to_string()));
        }

        if let Some(audio) = obj.get("audio") {
            let bytes = audio
                .as_array()?
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()?;
            return Some(InboundMessage::Voice(bytes));
        }

        if let Some(intent) = obj.get("intent") {
            let command = serde_json::from_value(intent.clone()).ok()?;
            return Some(InboundMessage::NavigationIntent(command));
        }

        if let Some(text) = obj.get("text") {
            let lang = obj
                .get("language")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SPEECH_LANG);
            return Some(InboundMessage::Tts {
                text: text.as_str()?.to_string(),
                lang: lang.to_string(),
            });
        }

        None
    }
}

// Missing axes default to 0; present but non-numeric axes are malformed.
fn axis(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => Some(0.0),
        Some(v) => v.as_f64().filter(|f| f.is_finite()),
    }
}

/// Error kinds shared across the control, speech, and voice paths.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CarError {
    #[error("Hardware unavailable on {component}: {details}")]
    HardwareUnavailable { component: String, details: String },

    #[error("Transcription failed: {0}")]
    TranscriptionFailure(String),

    #[error("Query timed out after {0:?}")]
    QueryTimeout(Duration),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Speech synthesis failed: {0}")]
    SynthesisFailure(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Navigation session error: {0}")]
    Session(String),
}

impl CarError {
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        CarError::HardwareUnavailable {
            component: component.into(),
            details: details.into(),
        }
    }
}
