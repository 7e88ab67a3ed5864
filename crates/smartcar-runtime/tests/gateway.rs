//! End-to-end tests of the gateway over simulated hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use smartcar_hal::{ActuatorCall, ActuatorLog, SimMotor, SimNavigation, SimNavigationProbe};
use smartcar_kernel::{
    ArbiterTiming, AutonomousModeController, CommandArbiter, GimbalChannels, GimbalController,
    MotionStateMachine,
};
use smartcar_middleware::{NotificationBus, NotificationSubscriber};
use smartcar_runtime::{
    Gateway, GatewayReply, LanguageQuery, LlmDriver, SpeechFeedbackScheduler, SpeechSynthesizer,
    Transcriber, TtsStatus, VoicePipeline, VoiceTiming,
};
use smartcar_types::{
    CarError, DriveProfile, GimbalState, Mode, Notification, Outcome, RejectReason, SpeakOutcome,
};
use tokio::runtime::Handle;
use tokio::sync::Notify;

// ────────────────────────────────────────────────────────────────────────────
// Fakes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingSynth {
    spoken: Mutex<Vec<(String, String)>>,
    gated: AtomicBool,
    release: Notify,
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynth {
    async fn synthesize_and_play(&self, text: &str, lang: &str) -> Result<(), CarError> {
        self.spoken.lock().unwrap().push((text.into(), lang.into()));
        if self.gated.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(())
    }
}

/// Returns queued transcripts in order; optionally waits for a go signal.
#[derive(Default)]
struct ScriptedTranscriber {
    script: Mutex<Vec<Result<String, CarError>>>,
    gated: AtomicBool,
    release: Notify,
}

impl ScriptedTranscriber {
    fn push(&self, result: Result<&str, CarError>) {
        self.script.lock().unwrap().push(result.map(str::to_string));
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: Vec<u8>) -> Result<String, CarError> {
        if self.gated.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err(CarError::TranscriptionFailure("nothing scripted".into()));
        }
        script.remove(0)
    }
}

struct CannedLlm(&'static str);

#[async_trait]
impl LanguageQuery for CannedLlm {
    async fn query(&self, _text: &str, _timeout: Duration) -> Result<String, CarError> {
        Ok(self.0.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rig
// ────────────────────────────────────────────────────────────────────────────

struct Rig {
    gateway: Gateway,
    log: ActuatorLog,
    nav: SimNavigationProbe,
    synth: Arc<RecordingSynth>,
    speech: Arc<SpeechFeedbackScheduler>,
    transcriber: Arc<ScriptedTranscriber>,
    notifications: NotificationSubscriber,
}

fn rig_with_llm(llm: Arc<dyn LanguageQuery>, query_timeout: Duration) -> Rig {
    let motor = SimMotor::new("sim");
    let log = motor.log();
    let nav = SimNavigation::new();
    let probe = nav.probe();

    let motion = Arc::new(MotionStateMachine::new(motor, Duration::ZERO));
    let gimbal = GimbalController::new(
        motion.clone(),
        GimbalChannels::default(),
        GimbalState::default(),
    );
    let autonomy = AutonomousModeController::new(nav, Duration::from_millis(50));
    let synth = Arc::new(RecordingSynth::default());
    let speech = Arc::new(SpeechFeedbackScheduler::new(synth.clone(), Handle::current()));
    let arbiter = Arc::new(CommandArbiter::new(
        motion,
        gimbal,
        autonomy,
        speech.clone(),
        ArbiterTiming {
            joystick_pulse: Duration::from_millis(5),
        },
    ));

    let bus = NotificationBus::default();
    let notifications = bus.subscribe();
    let transcriber = Arc::new(ScriptedTranscriber::default());
    let voice = Arc::new(VoicePipeline::new(
        arbiter.clone(),
        transcriber.clone(),
        llm,
        bus,
        VoiceTiming {
            drive: Duration::from_millis(20),
            turn: Duration::from_millis(10),
            query_timeout,
        },
    ));

    Rig {
        gateway: Gateway::new(arbiter, voice),
        log,
        nav: probe,
        synth,
        speech,
        transcriber,
        notifications,
    }
}

fn rig() -> Rig {
    rig_with_llm(Arc::new(CannedLlm("It is noon.")), Duration::from_secs(10))
}

fn drain(rx: &mut NotificationSubscriber) -> Vec<Notification> {
    std::iter::from_fn(|| rx.try_recv()).map(|e| e.payload).collect()
}

fn response(text: &str) -> Notification {
    Notification::Response {
        response: text.into(),
    }
}

fn command(text: &str) -> Notification {
    Notification::Command {
        command: text.into(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Control payloads
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn left_stick_drives_and_right_stick_aims_camera() {
    let rig = rig();

    let reply = rig
        .gateway
        .handle_json(&json!({"joystick": "left", "x": 0.0, "y": 0.8}))
        .await;
    assert_eq!(reply, GatewayReply::Outcome(Outcome::Completed));

    let reply = rig
        .gateway
        .handle_json(&json!({"joystick": "right", "x": 1.0, "y": 0.0}))
        .await;
    assert_eq!(
        reply,
        GatewayReply::Outcome(Outcome::GimbalMoved(GimbalState { angle_h: 85, angle_v: 40 }))
    );

    assert_eq!(
        rig.log.calls(),
        vec![
            ActuatorCall::Drive { profile: DriveProfile::Forward, speed_percent: 40 },
            ActuatorCall::Stop,
            ActuatorCall::Servo { channel: 9, angle: 85 },
            ActuatorCall::Servo { channel: 10, angle: 40 },
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn speed_change_is_clamped() {
    let rig = rig();
    let reply = rig.gateway.handle_json(&json!({"speed": 250})).await;
    assert_eq!(reply, GatewayReply::Outcome(Outcome::SpeedSet(100)));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_payloads_are_ignored() {
    let rig = rig();
    for payload in [
        json!({"joystick": "middle", "x": 0, "y": 1}),
        json!({"joystick": "left", "x": "fast"}),
        json!({"unknown": true}),
        json!([1, 2, 3]),
    ] {
        assert_eq!(
            rig.gateway.handle_json(&payload).await,
            GatewayReply::Outcome(Outcome::Ignored)
        );
    }
    assert!(rig.log.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn navigation_intent_needs_autonomous_mode() {
    let rig = rig();
    let intent = json!({"intent": {"type": "maneuver", "profile": "forward", "duration_ms": 10}});

    assert_eq!(
        rig.gateway.handle_json(&intent).await,
        GatewayReply::Outcome(Outcome::Rejected(RejectReason::NotAutonomous))
    );

    rig.gateway.handle_json(&json!({"command": "activate autonomous"})).await;
    assert_eq!(
        rig.gateway.handle_json(&intent).await,
        GatewayReply::Outcome(Outcome::Completed)
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Voice
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn voice_forward_moves_and_notifies() {
    let mut rig = rig();
    rig.transcriber.push(Ok("Go Forward"));

    let reply = rig.gateway.handle_json(&json!({"audio": [26, 69, 223, 163]})).await;
    assert_eq!(reply, GatewayReply::Spoken(Some("Moving forward".into())));
    assert_eq!(
        rig.log.calls(),
        vec![
            ActuatorCall::Drive { profile: DriveProfile::Forward, speed_percent: 50 },
            ActuatorCall::Stop,
        ]
    );
    assert_eq!(
        drain(&mut rig.notifications),
        vec![command("go forward"), response("Moving forward")]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn voice_toggles_autonomous_mode() {
    let rig = rig();
    rig.transcriber.push(Ok("autonomous mode"));
    rig.transcriber.push(Ok("autonomous mode"));

    let on = rig.gateway.handle_json(&json!({"audio": [1]})).await;
    assert_eq!(on, GatewayReply::Spoken(Some("Autonomous mode activated".into())));
    assert_eq!(rig.gateway.arbiter().mode(), Mode::Autonomous);

    let off = rig.gateway.handle_json(&json!({"audio": [1]})).await;
    assert_eq!(off, GatewayReply::Spoken(Some("Autonomous mode deactivated".into())));
    assert_eq!(rig.nav.starts(), 1);
    assert_eq!(rig.nav.terminates(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn voice_question_is_answered_and_spoken() {
    let mut rig = rig();
    rig.transcriber.push(Ok("What time is it"));

    let reply = rig.gateway.handle_json(&json!({"audio": [1]})).await;
    assert_eq!(reply, GatewayReply::Spoken(Some("It is noon.".into())));

    rig.speech.wait_idle().await;
    assert_eq!(
        *rig.synth.spoken.lock().unwrap(),
        vec![("It is noon.".to_string(), "en-US".to_string())]
    );
    assert_eq!(
        drain(&mut rig.notifications),
        vec![command("what time is it"), response("It is noon.")]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn transcription_failure_is_reported_as_error_response() {
    let mut rig = rig();
    rig.transcriber
        .push(Err(CarError::TranscriptionFailure("unsupported codec".into())));

    let reply = rig.gateway.handle_json(&json!({"audio": [1]})).await;
    let expected = "Error: Transcription failed: unsupported codec";
    assert_eq!(reply, GatewayReply::Spoken(Some(expected.into())));
    assert_eq!(drain(&mut rig.notifications), vec![response(expected)]);
    assert!(rig.log.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn voice_payload_during_processing_is_dropped() {
    let rig = Arc::new(rig());
    rig.transcriber.gated.store(true, Ordering::SeqCst);
    rig.transcriber.push(Ok("stop"));

    let first = {
        let rig = Arc::clone(&rig);
        tokio::spawn(async move { rig.gateway.handle_json(&json!({"audio": [1]})).await })
    };
    // Let the first payload reach the transcriber.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = rig.gateway.handle_json(&json!({"audio": [2]})).await;
    assert_eq!(second, GatewayReply::Spoken(None));

    rig.transcriber.release.notify_one();
    assert_eq!(
        first.await.unwrap(),
        GatewayReply::Spoken(Some("Stopped".into()))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_language_model_times_out() {
    // A server that accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let llm = Arc::new(LlmDriver::new(format!("http://{addr}"), "deepseek-r1:1.5b"));
    let rig = rig_with_llm(llm, Duration::from_millis(100));

    let reply = rig.gateway.handle_json(&json!({"command": "tell me a joke"})).await;
    assert_eq!(
        reply,
        GatewayReply::Spoken(Some("Error: Query timed out after 100ms".into()))
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Text commands
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn text_commands_set_mode_explicitly() {
    let rig = rig();

    let reply = rig.gateway.handle_json(&json!({"command": ""})).await;
    assert_eq!(reply, GatewayReply::Spoken(None));

    let reply = rig.gateway.handle_json(&json!({"command": "Activate Autonomous"})).await;
    assert_eq!(reply, GatewayReply::Spoken(Some("Autonomous mode activated".into())));

    let reply = rig.gateway.handle_json(&json!({"command": "activate autonomous"})).await;
    assert_eq!(reply, GatewayReply::Spoken(Some("Autonomous mode already active".into())));

    let reply = rig.gateway.handle_json(&json!({"command": "deactivate autonomous"})).await;
    assert_eq!(reply, GatewayReply::Spoken(Some("Autonomous mode deactivated".into())));
    assert_eq!(rig.nav.starts(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn ui_mode_phrases_switch_modes() {
    let rig = rig();

    let reply = rig.gateway.handle_json(&json!({"command": "activate autonomous mode"})).await;
    assert_eq!(reply, GatewayReply::Spoken(Some("Autonomous mode activated".into())));
    assert_eq!(rig.gateway.arbiter().mode(), Mode::Autonomous);

    let reply = rig.gateway.handle_json(&json!({"command": "Deactivate Autonomous Mode"})).await;
    assert_eq!(reply, GatewayReply::Spoken(Some("Autonomous mode deactivated".into())));
    assert_eq!(rig.gateway.arbiter().mode(), Mode::Manual);
    assert_eq!(rig.nav.starts(), 1);
    assert!(!rig.nav.is_alive());
}

#[tokio::test(flavor = "multi_thread")]
async fn free_text_goes_to_the_language_model() {
    let mut rig = rig();
    let reply = rig.gateway.handle_json(&json!({"command": "what time is it?"})).await;
    assert_eq!(reply, GatewayReply::Spoken(Some("It is noon.".into())));
    assert_eq!(drain(&mut rig.notifications), vec![response("It is noon.")]);
}

// ────────────────────────────────────────────────────────────────────────────
// Speech
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn direct_speech_is_single_flight() {
    let rig = rig();
    rig.synth.gated.store(true, Ordering::SeqCst);

    let first = rig.gateway.handle_json(&json!({"text": "hello", "language": "en-GB"})).await;
    assert_eq!(first, GatewayReply::Tts(TtsStatus::Success));
    assert_eq!(first.to_wire(), Some(json!({"status": "success"})));

    let second = rig.gateway.handle_json(&json!({"text": "again"})).await;
    assert_eq!(second, GatewayReply::Tts(TtsStatus::Busy));

    rig.synth.release.notify_one();
    rig.speech.wait_idle().await;
    assert_eq!(
        *rig.synth.spoken.lock().unwrap(),
        vec![("hello".to_string(), "en-GB".to_string())]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_speech_text_still_reports_success() {
    let rig = rig();
    for text in ["", "   "] {
        let reply = rig.gateway.handle_json(&json!({"text": text})).await;
        assert_eq!(reply.to_wire(), Some(json!({"status": "success"})));
    }
    assert!(rig.synth.spoken.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_greets_the_operator() {
    let rig = rig();
    assert_eq!(rig.gateway.on_connect(), SpeakOutcome::Started);
    rig.speech.wait_idle().await;
    assert_eq!(
        *rig.synth.spoken.lock().unwrap(),
        vec![("Hello, I am ready.".to_string(), "en-US".to_string())]
    );
}
