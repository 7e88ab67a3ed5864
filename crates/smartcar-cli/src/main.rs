//! `smartcar` – control core of the camera car
//!
//! This binary wires the hardware drivers, the control core and the feedback
//! services together and exposes them as a newline-delimited JSON stream:
//!
//! 1. Loads `~/.smartcar/config.toml`, writing a default one on first run.
//! 2. Probes the local language model server and reports whether the
//!    configured model is available.
//! 3. Reads one JSON payload per line from **stdin** (`{joystick, x, y}`,
//!    `{speed}`, `{command}`, `{audio}`, `{text, language}`, `{intent}`) and
//!    writes `{command}` / `{response}` notifications and `{status}` replies
//!    to **stdout**.
//! 4. Optionally records the annotated camera feed to `video_output`.
//! 5. On Ctrl-C / SIGTERM or end of input: releases the camera, terminates
//!    the navigation session and stops the motors, in that order.
//!
//! Logs and the banner go to stderr.

mod config;
mod ollama;
mod recorder;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use colored::Colorize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use smartcar_hal::{
    Camera, MjpegProcessCamera, MotorActuator, NavigationProcess, ProcessNavigation, SimCamera,
    SimNavigation,
};
use smartcar_kernel::{
    ArbiterTiming, AutonomousModeController, CommandArbiter, GimbalChannels, GimbalController,
    MotionStateMachine,
};
use smartcar_middleware::{NotificationBus, to_wire};
use smartcar_runtime::{
    Gateway, GatewayReply, HttpTranscriber, LlmDriver, ProcessSynthesizer,
    SpeechFeedbackScheduler, VideoAnnotator, VoicePipeline, VoiceTiming,
    telemetry::init_tracing,
};
use smartcar_types::{CarError, GimbalState};

use config::Config;

/// How long in-flight blocking work gets once the input loop has ended.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let _telemetry = init_tracing("smartcar");

    print_banner();

    let cfg = load_config();
    debug!(?cfg, "configuration");
    probe_language_model(&cfg);

    // ── Shutdown signalling ───────────────────────────────────────────────
    // The flag stops the recorder thread; the notify wakes the input loop.
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        let wake = wake.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("{}", "⚠  Signal received – shutting down …".yellow().bold());
            shutdown.store(true, Ordering::SeqCst);
            wake.notify_one();
        }) {
            warn!(error = %e, "Failed to install signal handler; only end of input stops the car");
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let car = match Car::assemble(&cfg, &runtime) {
        Ok(car) => car,
        Err(e) => {
            error!(error = %e, "failed to bring up the car");
            eprintln!("{}: {}", "Start-up failed".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let recorder = spawn_recorder(&cfg, &car, &shutdown);

    eprintln!("  {} Ready. Reading JSON commands from stdin.\n", "✓".green().bold());
    runtime.block_on(serve(car.gateway.clone(), car.bus.clone(), wake));

    // ── Ordered shutdown: camera, then navigation, then motors ────────────
    shutdown.store(true, Ordering::SeqCst);
    if let Some(handle) = recorder {
        match handle.join() {
            Ok(Ok(frames)) => debug!(frames, "video recorder joined"),
            Ok(Err(e)) => eprintln!("{}: {}", "Video recording failed".red(), e),
            Err(_) => warn!("video recorder thread panicked"),
        }
    }
    car.arbiter.shutdown();
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    eprintln!("{}", "  ✓ Motors stopped. Goodbye.".green());
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

struct Car {
    arbiter: Arc<CommandArbiter>,
    gateway: Arc<Gateway>,
    bus: NotificationBus,
}

impl Car {
    fn assemble(cfg: &Config, runtime: &Runtime) -> Result<Self, CarError> {
        let motion = Arc::new(
            MotionStateMachine::new(open_motor(cfg)?, cfg.stop_settle())
                .with_speed(cfg.default_speed),
        );

        let gimbal = GimbalController::new(
            motion.clone(),
            GimbalChannels {
                pan: cfg.pan_channel,
                tilt: cfg.tilt_channel,
            },
            GimbalState::new(cfg.initial_pan, cfg.initial_tilt),
        );
        let pose = gimbal.center();
        info!(angle_h = pose.angle_h, angle_v = pose.angle_v, "gimbal centred");

        let autonomy =
            AutonomousModeController::new(open_navigation(cfg), cfg.navigation_stop_timeout());

        let speech = Arc::new(SpeechFeedbackScheduler::new(
            Arc::new(ProcessSynthesizer::new(
                cfg.tts_command.clone(),
                cfg.player_command.clone(),
            )),
            runtime.handle().clone(),
        ));

        let arbiter = Arc::new(CommandArbiter::new(
            motion,
            gimbal,
            autonomy,
            speech,
            ArbiterTiming {
                joystick_pulse: cfg.joystick_pulse(),
            },
        ));

        let bus = NotificationBus::default();
        let voice = Arc::new(VoicePipeline::new(
            arbiter.clone(),
            Arc::new(HttpTranscriber::new(&cfg.transcriber_url, &cfg.transcriber_model)),
            Arc::new(LlmDriver::new(&cfg.llm_url, &cfg.llm_model).with_api_key(&cfg.llm_api_key)),
            bus.clone(),
            VoiceTiming {
                drive: Duration::from_millis(cfg.voice_drive_ms),
                turn: Duration::from_millis(cfg.voice_turn_ms),
                query_timeout: cfg.query_timeout(),
            },
        ));

        Ok(Self {
            gateway: Arc::new(Gateway::new(arbiter.clone(), voice)),
            arbiter,
            bus,
        })
    }
}

#[cfg(feature = "pca9685")]
fn open_motor(cfg: &Config) -> Result<Box<dyn MotorActuator>, CarError> {
    use smartcar_hal::pca9685::{Pca9685Motor, WheelLayout};
    Ok(Box::new(Pca9685Motor::open(cfg.motor_i2c_address, WheelLayout::default())?))
}

#[cfg(not(feature = "pca9685"))]
fn open_motor(_cfg: &Config) -> Result<Box<dyn MotorActuator>, CarError> {
    warn!("built without the `pca9685` feature; using the simulated motor driver");
    Ok(Box::new(smartcar_hal::SimMotor::new("sim-motor")))
}

fn open_navigation(cfg: &Config) -> Box<dyn NavigationProcess> {
    if cfg.navigation_command.is_empty() {
        info!("no navigation_command configured; autonomous mode is simulated");
        Box::new(SimNavigation::new())
    } else {
        Box::new(ProcessNavigation::new(cfg.navigation_command.clone()))
    }
}

fn open_camera(cfg: &Config) -> Result<Box<dyn Camera>, CarError> {
    if cfg.camera_command.is_empty() {
        info!("no camera_command configured; recording the simulated camera");
        Ok(Box::new(SimCamera::new("front")))
    } else {
        Ok(Box::new(MjpegProcessCamera::spawn(
            "front",
            &cfg.camera_command,
            cfg.camera_width,
            cfg.camera_height,
        )?))
    }
}

/// Start the recorder thread when `video_output` is set. A camera that
/// cannot be opened disables video without stopping the car.
fn spawn_recorder(
    cfg: &Config,
    car: &Car,
    shutdown: &Arc<AtomicBool>,
) -> Option<JoinHandle<std::io::Result<usize>>> {
    let path = cfg.video_output.clone()?;
    let camera = match open_camera(cfg) {
        Ok(camera) => camera,
        Err(e) => {
            warn!(error = %e, "camera unavailable; video recording disabled");
            return None;
        }
    };
    let video = VideoAnnotator::new(camera, car.arbiter.clone());
    let shutdown = shutdown.clone();
    let spawned = thread::Builder::new()
        .name("video-recorder".into())
        .spawn(move || recorder::record(video, &path, &shutdown));
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "failed to start video recorder");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON-lines transport
// ─────────────────────────────────────────────────────────────────────────────

/// Read payloads from stdin until end of input or `wake` fires. Each payload
/// is handled on its own task so a newer command can preempt a running move.
async fn serve(gateway: Arc<Gateway>, bus: NotificationBus, wake: Arc<Notify>) {
    let mut notifications = bus.subscribe();
    let forward = tokio::spawn(async move {
        while let Some(event) = notifications.recv().await {
            println!("{}", to_wire(&event));
        }
    });

    let greeting = gateway.on_connect();
    debug!(?greeting, "operator greeted");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = wake.notified() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => dispatch(&gateway, &line),
                Ok(None) => {
                    info!("input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read input");
                    break;
                }
            },
        }
    }

    forward.abort();
}

fn dispatch(gateway: &Arc<Gateway>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let payload: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "ignoring non-JSON input line");
            return;
        }
    };
    let gateway = Arc::clone(gateway);
    tokio::spawn(async move {
        let reply = gateway.handle_json(&payload).await;
        match &reply {
            GatewayReply::Failed(e) => warn!(error = %e, "command failed"),
            other => debug!(reply = ?other, "handled"),
        }
        if let Some(wire) = reply.to_wire() {
            println!("{wire}");
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Start-up
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            eprintln!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            match config::save(&Config::default()) {
                Ok(()) => eprintln!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => eprintln!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            eprintln!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn probe_language_model(cfg: &Config) {
    eprint!("  Probing language model server at {} … ", cfg.llm_url.dimmed());
    match ollama::fetch_models(&cfg.llm_url) {
        Ok(models) if ollama::has_model(&models, &cfg.llm_model) => {
            eprintln!("{} ({} ready)", "online".green(), cfg.llm_model.bold());
        }
        Ok(models) => {
            eprintln!("{}", "online".green());
            eprintln!(
                "  {}  Run `{}` to download it.",
                format!("Model {} not found.", cfg.llm_model).yellow(),
                format!("ollama pull {}", cfg.llm_model).bold()
            );
            for m in &models {
                eprintln!("    • {}", m.name);
            }
        }
        Err(e) => {
            eprintln!("{}", "offline".yellow());
            debug!(error = %e, "language model probe failed");
            eprintln!(
                "  {}",
                "Questions will fail until the server is reachable.".dimmed()
            );
        }
    }
    eprintln!();
}

fn print_banner() {
    eprintln!();
    eprintln!("{}", r#"   ____                 __  _____          "#.bold().cyan());
    eprintln!("{}", r#"  / __/_ _  ___ _____/ /_/ ___/__ _____   "#.bold().cyan());
    eprintln!("{}", r#" _\ \/  ' \/ _ `/ __/ __/ /__/ _ `/ __/   "#.bold().cyan());
    eprintln!("{}", r#"/___/_/_/_/\_,_/_/  \__/\___/\_,_/_/      "#.bold().cyan());
    eprintln!();
    eprintln!(
        "  {} {}",
        "SmartCar".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    eprintln!("  Camera car control core");
    eprintln!();
}
