//! Spoken feedback.
//!
//! [`SpeechFeedbackScheduler`] enforces single-flight playback: while one
//! utterance is being synthesized or played, further requests are answered
//! with [`SpeakOutcome::Busy`] and dropped. Accepted requests run as a
//! spawned task with a bounded lifetime, so callers on the control path are
//! never blocked by audio.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use smartcar_kernel::SpeechSink;
use smartcar_types::{CarError, SpeakOutcome, SpeechRequest};
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on one synthesize-and-play unit of work.
pub const DEFAULT_SPEECH_TIMEOUT: Duration = Duration::from_secs(60);

/// Text-to-speech plus playback, as one opaque operation.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CarError::SynthesisFailure`] when synthesis or playback
    /// fails.
    async fn synthesize_and_play(&self, text: &str, lang: &str) -> Result<(), CarError>;
}

/// Single-flight front end for a [`SpeechSynthesizer`].
pub struct SpeechFeedbackScheduler {
    synth: Arc<dyn SpeechSynthesizer>,
    in_flight: Arc<AtomicBool>,
    current: Mutex<Option<JoinHandle<()>>>,
    handle: Handle,
    timeout: Duration,
}

/// Clears the in-flight flag when the playback task ends, however it ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SpeechFeedbackScheduler {
    /// Tasks are spawned on `handle`, which lets synchronous callers (the
    /// command arbiter) submit speech from outside the runtime.
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, handle: Handle) -> Self {
        Self {
            synth,
            in_flight: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
            handle,
            timeout: DEFAULT_SPEECH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start speaking `request` unless something is already playing.
    pub fn submit(&self, request: SpeechRequest) -> SpeakOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(text = %request.text, "speech busy, request dropped");
            return SpeakOutcome::Busy;
        }
        let guard = InFlight(Arc::clone(&self.in_flight));
        let synth = Arc::clone(&self.synth);
        let timeout = self.timeout;

        let task = self.handle.spawn(async move {
            let _guard = guard;
            let queued_for = queue_age_ms(&request);
            debug!(lang = %request.lang, queued_ms = queued_for, "speaking");
            match tokio::time::timeout(
                timeout,
                synth.synthesize_and_play(&request.text, &request.lang),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "speech playback failed"),
                Err(_) => warn!(timeout_secs = timeout.as_secs(), "speech playback timed out"),
            }
        });
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        SpeakOutcome::Started
    }

    /// Wait for the current utterance, if any, to finish.
    pub async fn wait_idle(&self) {
        let task = self.current.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "speech task ended abnormally");
            }
        }
    }
}

impl SpeechSink for SpeechFeedbackScheduler {
    fn speak(&self, text: &str, lang: &str) -> SpeakOutcome {
        self.submit(SpeechRequest::new(text, lang))
    }
}

fn queue_age_ms(request: &SpeechRequest) -> i64 {
    (chrono::Utc::now() - request.submitted_at).num_milliseconds()
}

// ────────────────────────────────────────────────────────────────────────────
// Process-backed synthesizer
// ────────────────────────────────────────────────────────────────────────────

/// Synthesizes with an `edge-tts`-compatible command line into a temporary
/// MP3 and plays it with a command-line player such as `mpg123`.
pub struct ProcessSynthesizer {
    tts: Vec<String>,
    player: Vec<String>,
}

impl ProcessSynthesizer {
    /// `tts` and `player` are argv prefixes; the text, voice, and file path
    /// are appended.
    pub fn new(tts: Vec<String>, player: Vec<String>) -> Self {
        Self { tts, player }
    }

    async fn synthesize(&self, text: &str, lang: &str, out: &Path) -> Result<(), CarError> {
        let (program, args) = split_argv(&self.tts, "tts_command")?;
        let status = Command::new(program)
            .args(args)
            .arg("--voice")
            .arg(voice_for(lang))
            .arg("--text")
            .arg(text)
            .arg("--write-media")
            .arg(out)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| CarError::SynthesisFailure(format!("{program}: {e}")))?;
        if !status.success() {
            return Err(CarError::SynthesisFailure(format!("{program} exited with {status}")));
        }
        Ok(())
    }

    async fn play(&self, file: &Path) -> Result<(), CarError> {
        let (program, args) = split_argv(&self.player, "player_command")?;
        let status = Command::new(program)
            .args(args)
            .arg(file)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| CarError::SynthesisFailure(format!("{program}: {e}")))?;
        if !status.success() {
            return Err(CarError::SynthesisFailure(format!("{program} exited with {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for ProcessSynthesizer {
    async fn synthesize_and_play(&self, text: &str, lang: &str) -> Result<(), CarError> {
        let file = tempfile::Builder::new()
            .prefix("smartcar-speech-")
            .suffix(".mp3")
            .tempfile()
            .map_err(|e| CarError::SynthesisFailure(format!("temp file: {e}")))?;
        self.synthesize(text, lang, file.path()).await?;
        self.play(file.path()).await?;
        info!(chars = text.chars().count(), "spoke");
        Ok(())
    }
}

fn split_argv<'a>(argv: &'a [String], name: &str) -> Result<(&'a str, &'a [String]), CarError> {
    argv.split_first()
        .map(|(p, rest)| (p.as_str(), rest))
        .ok_or_else(|| CarError::SynthesisFailure(format!("{name} is empty")))
}

/// Map a language tag to a neural voice. Full voice names pass through.
pub fn voice_for(lang: &str) -> String {
    if lang.ends_with("Neural") {
        return lang.to_string();
    }
    let voice = match lang {
        "en-GB" => "en-GB-SoniaNeural",
        "es-ES" => "es-ES-ElviraNeural",
        "fr-FR" => "fr-FR-DeniseNeural",
        "de-DE" => "de-DE-KatjaNeural",
        "it-IT" => "it-IT-ElsaNeural",
        "zh-CN" => "zh-CN-XiaoxiaoNeural",
        "ja-JP" => "ja-JP-NanamiNeural",
        _ => "en-US-AriaNeural",
    };
    voice.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Blocks every utterance until released.
    struct GatedSynth {
        calls: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl SpeechSynthesizer for GatedSynth {
        async fn synthesize_and_play(&self, _text: &str, _lang: &str) -> Result<(), CarError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(())
        }
    }

    struct FailingSynth;

    #[async_trait]
    impl SpeechSynthesizer for FailingSynth {
        async fn synthesize_and_play(&self, _text: &str, _lang: &str) -> Result<(), CarError> {
            Err(CarError::SynthesisFailure("no audio device".into()))
        }
    }

    #[tokio::test]
    async fn second_request_while_playing_is_busy() {
        let synth = Arc::new(GatedSynth {
            calls: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let scheduler = SpeechFeedbackScheduler::new(synth.clone(), Handle::current());

        assert_eq!(scheduler.speak("one", "en-US"), SpeakOutcome::Started);
        assert_eq!(scheduler.speak("two", "en-US"), SpeakOutcome::Busy);
        assert!(scheduler.is_busy());

        // `notify_one` stores a permit, so this cannot race the task start.
        synth.release.notify_one();
        scheduler.wait_idle().await;
        assert!(!scheduler.is_busy());
        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);

        assert_eq!(scheduler.speak("three", "en-US"), SpeakOutcome::Started);
        synth.release.notify_one();
        scheduler.wait_idle().await;
        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_releases_the_guard() {
        let scheduler = SpeechFeedbackScheduler::new(Arc::new(FailingSynth), Handle::current());
        assert_eq!(scheduler.speak("hello", "en-US"), SpeakOutcome::Started);
        scheduler.wait_idle().await;
        assert!(!scheduler.is_busy());
        assert_eq!(scheduler.speak("again", "en-US"), SpeakOutcome::Started);
    }

    #[tokio::test]
    async fn stuck_playback_is_bounded() {
        let synth = Arc::new(GatedSynth {
            calls: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let scheduler = SpeechFeedbackScheduler::new(synth, Handle::current())
            .with_timeout(Duration::from_millis(20));
        scheduler.speak("never ends", "en-US");
        scheduler.wait_idle().await;
        assert!(!scheduler.is_busy());
    }

    #[tokio::test]
    async fn missing_tts_binary_is_a_synthesis_failure() {
        let synth = ProcessSynthesizer::new(
            vec!["/nonexistent/edge-tts".into()],
            vec!["mpg123".into()],
        );
        let err = synth.synthesize_and_play("hi", "en-US").await.unwrap_err();
        assert!(matches!(err, CarError::SynthesisFailure(_)));

        let synth = ProcessSynthesizer::new(vec![], vec![]);
        assert!(synth.synthesize_and_play("hi", "en-US").await.is_err());
    }

    #[test]
    fn voice_mapping() {
        assert_eq!(voice_for("en-US"), "en-US-AriaNeural");
        assert_eq!(voice_for("fr-FR"), "fr-FR-DeniseNeural");
        assert_eq!(voice_for("en-IE-EmilyNeural"), "en-IE-EmilyNeural");
        assert_eq!(voice_for("xx"), "en-US-AriaNeural");
    }
}
