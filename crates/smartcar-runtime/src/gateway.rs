//! [`Gateway`] – the ingestion surface a transport layer talks to.
//!
//! Each raw payload is classified by [`InboundMessage::from_json`] and routed:
//!
//! | Payload | Route |
//! |---|---|
//! | `{joystick: "left", x, y}` | drive stick → arbiter `Move` |
//! | `{joystick: "right", x, y}` | camera stick → arbiter `GimbalAdjust` |
//! | `{speed}` | arbiter `SetSpeed` |
//! | `{command}` | text command pipeline |
//! | `{audio}` | voice command pipeline |
//! | `{text, language?}` | direct speech, answers `{status}` |
//! | `{intent}` | navigation stack → arbiter, as autonomous source |
//!
//! Anything else is ignored.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use smartcar_kernel::CommandArbiter;
use smartcar_types::{
    CarError, Command, CommandSource, DEFAULT_SPEECH_LANG, InboundMessage, Outcome, SpeakOutcome,
    Stick,
};
use tracing::{debug, warn};

use crate::voice::VoicePipeline;

/// Spoken when a client connects.
pub const GREETING: &str = "Hello, I am ready.";

/// Reply body of the direct speech endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsStatus {
    Success,
    Busy,
}

/// What handling one payload produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayReply {
    /// A control command was resolved by the arbiter.
    Outcome(Outcome),
    /// Direct speech request result.
    Tts(TtsStatus),
    /// Voice or text command reply, already published on the bus. `None`
    /// when the payload was dropped or empty.
    Spoken(Option<String>),
    /// A control command failed; the control core has recovered.
    Failed(CarError),
}

impl GatewayReply {
    /// The synchronous answer owed to the requester, if any.
    pub fn to_wire(&self) -> Option<Value> {
        match self {
            GatewayReply::Tts(status) => Some(serde_json::json!({ "status": status })),
            _ => None,
        }
    }
}

pub struct Gateway {
    arbiter: Arc<CommandArbiter>,
    voice: Arc<VoicePipeline>,
}

impl Gateway {
    pub fn new(arbiter: Arc<CommandArbiter>, voice: Arc<VoicePipeline>) -> Self {
        Self { arbiter, voice }
    }

    pub fn arbiter(&self) -> &Arc<CommandArbiter> {
        &self.arbiter
    }

    /// Greet a newly connected client.
    pub fn on_connect(&self) -> SpeakOutcome {
        debug!("client connected");
        match self.arbiter.submit(
            CommandSource::Api,
            Command::Speak {
                text: GREETING.into(),
                lang: DEFAULT_SPEECH_LANG.into(),
            },
        ) {
            Ok(Outcome::Speech(outcome)) => outcome,
            _ => SpeakOutcome::Busy,
        }
    }

    /// Classify and handle one JSON payload.
    pub async fn handle_json(&self, payload: &Value) -> GatewayReply {
        match InboundMessage::from_json(payload) {
            Some(message) => self.handle(message).await,
            None => {
                debug!(%payload, "unrecognised payload ignored");
                GatewayReply::Outcome(Outcome::Ignored)
            }
        }
    }

    pub async fn handle(&self, message: InboundMessage) -> GatewayReply {
        match message {
            InboundMessage::Joystick {
                stick: Stick::Left,
                x,
                y,
            } => self.control(CommandSource::Joystick, Command::Move { vx: x, vy: y }).await,
            InboundMessage::Joystick {
                stick: Stick::Right,
                x,
                y,
            } => {
                self.control(CommandSource::Joystick, Command::GimbalAdjust { dx: x, dy: y })
                    .await
            }
            InboundMessage::Speed(percent) => {
                self.control(CommandSource::Api, Command::SetSpeed { percent }).await
            }
            InboundMessage::TextCommand(text) => {
                GatewayReply::Spoken(self.voice.handle_text(&text).await)
            }
            InboundMessage::Voice(audio) => GatewayReply::Spoken(self.voice.handle_audio(audio).await),
            InboundMessage::Tts { text, lang } => {
                match self
                    .control(CommandSource::Api, Command::Speak { text, lang })
                    .await
                {
                    GatewayReply::Outcome(Outcome::Speech(SpeakOutcome::Busy)) => {
                        GatewayReply::Tts(TtsStatus::Busy)
                    }
                    // Blank text is a no-op that still owes the caller a status.
                    GatewayReply::Outcome(
                        Outcome::Speech(SpeakOutcome::Started) | Outcome::Ignored,
                    ) => GatewayReply::Tts(TtsStatus::Success),
                    other => {
                        warn!(reply = ?other, "unexpected speech outcome");
                        GatewayReply::Tts(TtsStatus::Success)
                    }
                }
            }
            InboundMessage::NavigationIntent(command) => {
                self.control(CommandSource::Autonomous, command).await
            }
        }
    }

    /// Submit on the blocking pool; motion commands hold their thread for the
    /// length of the move.
    async fn control(&self, source: CommandSource, command: Command) -> GatewayReply {
        let arbiter = Arc::clone(&self.arbiter);
        let result = tokio::task::spawn_blocking(move || arbiter.submit(source, command))
            .await
            .map_err(|e| CarError::hardware("control-core", e.to_string()))
            .and_then(|r| r);
        match result {
            Ok(outcome) => GatewayReply::Outcome(outcome),
            Err(e) => {
                warn!(%source, error = %e, "command failed");
                GatewayReply::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tts_reply_wire_shape() {
        assert_eq!(
            GatewayReply::Tts(TtsStatus::Success).to_wire(),
            Some(serde_json::json!({ "status": "success" }))
        );
        assert_eq!(
            GatewayReply::Tts(TtsStatus::Busy).to_wire(),
            Some(serde_json::json!({ "status": "busy" }))
        );
        assert_eq!(GatewayReply::Outcome(Outcome::Completed).to_wire(), None);
    }
}
