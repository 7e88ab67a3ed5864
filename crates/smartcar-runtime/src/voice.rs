//! Voice and text command handling.
//!
//! A voice payload is transcribed, published as a `{command}` notification,
//! and matched against a small keyword grammar. Keywords drive the car
//! directly; anything else becomes a language query whose answer is
//! published as `{response}` and spoken.
//!
//! | Keyword (first match wins) | Action |
//! |---|---|
//! | `forward`, `ahead` | drive forward |
//! | `backward`, `back` | drive backward |
//! | `left` / `right` | rotate in place |
//! | `stop` | stop |
//! | `autonomous`, `auto` | toggle autonomous mode |
//!
//! Only one voice payload is processed at a time; one arriving while the
//! previous is still being handled is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use smartcar_kernel::CommandArbiter;
use smartcar_middleware::NotificationBus;
use smartcar_types::{
    CarError, Command, CommandSource, DEFAULT_SPEECH_LANG, DriveProfile, Mode, Outcome,
    RejectReason,
};
use tracing::{debug, info, warn};

use crate::llm_driver::LanguageQuery;
use crate::transcription::Transcriber;

/// Event source tag for notifications published by this module.
pub const SOURCE: &str = "smartcar-runtime::voice";

/// What a transcript asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceAction {
    Drive(DriveProfile),
    Stop,
    ToggleAutonomous,
    Query(String),
}

/// Match a transcript against the keyword grammar. Substring matching is
/// case-insensitive, so "go back please" is a backward command.
pub fn parse(transcript: &str) -> VoiceAction {
    let t = transcript.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| t.contains(w));

    if has(&["forward", "ahead"]) {
        VoiceAction::Drive(DriveProfile::Forward)
    } else if has(&["backward", "back"]) {
        VoiceAction::Drive(DriveProfile::Backward)
    } else if has(&["left"]) {
        VoiceAction::Drive(DriveProfile::TurnLeft)
    } else if has(&["right"]) {
        VoiceAction::Drive(DriveProfile::TurnRight)
    } else if has(&["stop"]) {
        VoiceAction::Stop
    } else if has(&["autonomous", "auto"]) {
        VoiceAction::ToggleAutonomous
    } else {
        VoiceAction::Query(t)
    }
}

/// Durations for voice-driven manoeuvres and the language query bound.
#[derive(Debug, Clone, Copy)]
pub struct VoiceTiming {
    pub drive: Duration,
    pub turn: Duration,
    pub query_timeout: Duration,
}

impl Default for VoiceTiming {
    fn default() -> Self {
        Self {
            drive: Duration::from_secs(2),
            turn: Duration::from_secs(1),
            query_timeout: Duration::from_secs(10),
        }
    }
}

pub struct VoicePipeline {
    arbiter: Arc<CommandArbiter>,
    transcriber: Arc<dyn Transcriber>,
    llm: Arc<dyn LanguageQuery>,
    bus: NotificationBus,
    busy: AtomicBool,
    timing: VoiceTiming,
}

/// Releases the voice single-flight flag on every exit path.
struct Busy<'a>(&'a AtomicBool);

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl VoicePipeline {
    pub fn new(
        arbiter: Arc<CommandArbiter>,
        transcriber: Arc<dyn Transcriber>,
        llm: Arc<dyn LanguageQuery>,
        bus: NotificationBus,
        timing: VoiceTiming,
    ) -> Self {
        Self {
            arbiter,
            transcriber,
            llm,
            bus,
            busy: AtomicBool::new(false),
            timing,
        }
    }

    /// Handle one recorded voice command.
    ///
    /// Returns the published reply, or `None` when the payload was dropped
    /// because another one is still in progress.
    pub async fn handle_audio(&self, audio: Vec<u8>) -> Option<String> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("voice command dropped, previous one still running");
            return None;
        }
        let _busy = Busy(&self.busy);

        let reply = match self.transcriber.transcribe(audio).await {
            Ok(transcript) => {
                let transcript = transcript.to_lowercase();
                info!(%transcript, "voice command");
                self.bus.command(SOURCE, transcript.as_str());
                self.run(CommandSource::Voice, parse(&transcript)).await
            }
            Err(e) => Err(e),
        };
        Some(self.publish(reply))
    }

    /// Handle a typed command. Empty text is ignored and returns `None`.
    pub async fn handle_text(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let reply = match text_mode_request(text) {
            Some(enabled) => self.set_autonomous(enabled).await,
            None => self.ask(CommandSource::Text, text).await,
        };
        Some(self.publish(reply))
    }

    async fn run(&self, source: CommandSource, action: VoiceAction) -> Result<String, CarError> {
        match action {
            VoiceAction::Drive(profile) => {
                let duration = match profile {
                    DriveProfile::TurnLeft | DriveProfile::TurnRight => self.timing.turn,
                    _ => self.timing.drive,
                };
                let command = Command::Maneuver {
                    profile,
                    duration_ms: duration.as_millis() as u64,
                };
                self.submit(source, command).await?;
                Ok(match profile {
                    DriveProfile::Forward => "Moving forward",
                    DriveProfile::Backward => "Moving backward",
                    DriveProfile::TurnLeft => "Turning left",
                    _ => "Turning right",
                }
                .to_string())
            }
            VoiceAction::Stop => {
                self.submit(source, Command::Stop).await?;
                Ok("Stopped".to_string())
            }
            VoiceAction::ToggleAutonomous => {
                let outcome = self.submit(source, Command::ToggleAutonomous).await?;
                Ok(mode_reply(&outcome))
            }
            VoiceAction::Query(question) => self.ask(source, &question).await,
        }
    }

    async fn set_autonomous(&self, enabled: bool) -> Result<String, CarError> {
        let outcome = self
            .submit(CommandSource::Text, Command::SetAutonomous { enabled })
            .await?;
        Ok(mode_reply(&outcome))
    }

    /// Ask the language model and speak its answer.
    async fn ask(&self, source: CommandSource, question: &str) -> Result<String, CarError> {
        let answer = self.llm.query(question, self.timing.query_timeout).await?;
        let spoken = self.arbiter.submit(
            source,
            Command::Speak {
                text: answer.clone(),
                lang: DEFAULT_SPEECH_LANG.to_string(),
            },
        )?;
        debug!(?spoken, "answer queued for speech");
        Ok(answer)
    }

    /// Run `command` on the blocking pool; timed moves hold the thread for
    /// their whole duration.
    async fn submit(&self, source: CommandSource, command: Command) -> Result<Outcome, CarError> {
        let arbiter = Arc::clone(&self.arbiter);
        tokio::task::spawn_blocking(move || arbiter.submit(source, command))
            .await
            .map_err(|e| CarError::hardware("control-core", e.to_string()))?
    }

    fn publish(&self, reply: Result<String, CarError>) -> String {
        let text = reply.unwrap_or_else(|e| {
            warn!(error = %e, "command failed");
            format!("Error: {e}")
        });
        self.bus.response(SOURCE, text.as_str());
        text
    }
}

/// `"activate autonomous"` / `"deactivate autonomous"`, with or without a
/// trailing `"mode"`, in any case and spacing.
fn text_mode_request(text: &str) -> Option<bool> {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    match words.as_slice() {
        ["activate", "autonomous"] | ["activate", "autonomous", "mode"] => Some(true),
        ["deactivate", "autonomous"] | ["deactivate", "autonomous", "mode"] => Some(false),
        _ => None,
    }
}

fn mode_reply(outcome: &Outcome) -> String {
    match outcome {
        Outcome::ModeChanged(Mode::Autonomous) => "Autonomous mode activated",
        Outcome::ModeChanged(Mode::Manual) => "Autonomous mode deactivated",
        Outcome::Rejected(RejectReason::AlreadyInMode(Mode::Autonomous)) => {
            "Autonomous mode already active"
        }
        Outcome::Rejected(RejectReason::AlreadyInMode(Mode::Manual)) => {
            "Autonomous mode already inactive"
        }
        Outcome::Rejected(RejectReason::TransitionInProgress) => {
            "Autonomous mode change already in progress"
        }
        _ => "Autonomous mode unchanged",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_mode_phrases_are_recognised() {
        assert_eq!(text_mode_request("activate autonomous mode"), Some(true));
        assert_eq!(text_mode_request("Deactivate Autonomous Mode"), Some(false));
        assert_eq!(text_mode_request("  activate   autonomous "), Some(true));
        assert_eq!(text_mode_request("deactivate autonomous"), Some(false));
        assert_eq!(text_mode_request("activate autonomous mode now"), None);
        assert_eq!(text_mode_request("what is autonomous mode"), None);
    }

    #[test]
    fn keyword_grammar_matches_in_order() {
        assert_eq!(parse("Go Forward"), VoiceAction::Drive(DriveProfile::Forward));
        assert_eq!(parse("full speed ahead"), VoiceAction::Drive(DriveProfile::Forward));
        assert_eq!(parse("move backward"), VoiceAction::Drive(DriveProfile::Backward));
        assert_eq!(parse("come back"), VoiceAction::Drive(DriveProfile::Backward));
        assert_eq!(parse("turn left"), VoiceAction::Drive(DriveProfile::TurnLeft));
        assert_eq!(parse("turn right"), VoiceAction::Drive(DriveProfile::TurnRight));
        assert_eq!(parse("STOP"), VoiceAction::Stop);
        assert_eq!(parse("autonomous mode"), VoiceAction::ToggleAutonomous);
        assert_eq!(parse("go auto"), VoiceAction::ToggleAutonomous);
    }

    #[test]
    fn earlier_keywords_shadow_later_ones() {
        // "forward" beats "left"; "back" beats "stop".
        assert_eq!(parse("forward and left"), VoiceAction::Drive(DriveProfile::Forward));
        assert_eq!(parse("stop going back"), VoiceAction::Drive(DriveProfile::Backward));
        // "right" is a substring match, so this is a turn, not a query.
        assert_eq!(parse("alright then"), VoiceAction::Drive(DriveProfile::TurnRight));
    }

    #[test]
    fn everything_else_is_a_query() {
        assert_eq!(
            parse("What Is The Weather"),
            VoiceAction::Query("what is the weather".into())
        );
    }

    #[test]
    fn mode_replies() {
        assert_eq!(
            mode_reply(&Outcome::ModeChanged(Mode::Autonomous)),
            "Autonomous mode activated"
        );
        assert_eq!(
            mode_reply(&Outcome::ModeChanged(Mode::Manual)),
            "Autonomous mode deactivated"
        );
        assert_eq!(
            mode_reply(&Outcome::Rejected(RejectReason::AlreadyInMode(Mode::Manual))),
            "Autonomous mode already inactive"
        );
    }
}
