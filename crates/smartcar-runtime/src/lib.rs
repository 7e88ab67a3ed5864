//! `smartcar-runtime` – Feedback, voice, and video services
//!
//! Everything around the control core that talks to slow or external
//! services: speech, language queries, transcription, and the camera feed.
//!
//! # Modules
//!
//! - [`speech`] – [`SpeechFeedbackScheduler`][speech::SpeechFeedbackScheduler]:
//!   single-flight text-to-speech playback on spawned tasks, backed by a
//!   [`SpeechSynthesizer`][speech::SpeechSynthesizer] such as
//!   [`ProcessSynthesizer`][speech::ProcessSynthesizer] (`edge-tts` + `mpg123`).
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: OpenAI-compatible
//!   chat client implementing the bounded
//!   [`LanguageQuery`][llm_driver::LanguageQuery] capability.
//! - [`transcription`] – [`HttpTranscriber`][transcription::HttpTranscriber]:
//!   Whisper-server client implementing
//!   [`Transcriber`][transcription::Transcriber].
//! - [`voice`] – [`VoicePipeline`][voice::VoicePipeline]: voice and text
//!   command grammar, notifications, and spoken replies.
//! - [`video`] – [`VideoAnnotator`][video::VideoAnnotator]: lazy, restartable
//!   annotated frame sequence and its multipart encoding.
//! - [`gateway`] – [`Gateway`][gateway::Gateway]: routes raw transport
//!   payloads to the right component.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with optional OTLP span export.

pub mod gateway;
pub mod llm_driver;
pub mod speech;
pub mod telemetry;
pub mod transcription;
pub mod video;
pub mod voice;

pub use gateway::{GREETING, Gateway, GatewayReply, TtsStatus};
pub use llm_driver::{LanguageQuery, LlmDriver};
pub use speech::{ProcessSynthesizer, SpeechFeedbackScheduler, SpeechSynthesizer};
pub use transcription::{HttpTranscriber, Transcriber};
pub use video::{AnnotatedFrame, OverlayLine, VideoAnnotator};
pub use voice::{VoicePipeline, VoiceTiming};
