//! Writes the annotated camera feed to a file as a multipart MJPEG stream.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use smartcar_runtime::VideoAnnotator;
use tracing::{info, warn};

/// Cap on the recording rate; simulated cameras produce frames instantly.
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Record until `shutdown` is set or the camera stops delivering, then
/// release the camera. Returns the number of frames written.
pub fn record(
    mut video: VideoAnnotator,
    path: &Path,
    shutdown: &Arc<AtomicBool>,
) -> io::Result<usize> {
    let result = write_frames(&mut video, path, shutdown);
    video.release();
    match &result {
        Ok(frames) => info!(frames, path = %path.display(), "video recording finished"),
        Err(e) => warn!(error = %e, path = %path.display(), "video recording failed"),
    }
    result
}

fn write_frames(
    video: &mut VideoAnnotator,
    path: &Path,
    shutdown: &Arc<AtomicBool>,
) -> io::Result<usize> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for frame in video.frames() {
        let started = Instant::now();
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        out.write_all(&frame.multipart_chunk())?;
        written += 1;
        if let Some(rest) = FRAME_INTERVAL.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
    out.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartcar_hal::SimCamera;
    use smartcar_kernel::{StatusSnapshot, StatusSource};
    use smartcar_types::{GimbalState, Mode};

    struct Idle;

    impl StatusSource for Idle {
        fn snapshot(&self) -> StatusSnapshot {
            StatusSnapshot {
                speed_percent: 50,
                gimbal: GimbalState::default(),
                mode: Mode::Manual,
            }
        }
    }

    #[test]
    fn records_until_the_camera_fails() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("feed.mjpeg");
        let video = VideoAnnotator::new(SimCamera::new("front").with_frame_limit(3), Arc::new(Idle));

        let frames = record(video, &path, &Arc::new(AtomicBool::new(false))).expect("record");
        assert_eq!(frames, 3);

        let bytes = std::fs::read(&path).expect("read");
        let boundary = b"--frame\r\n";
        let parts = bytes.windows(boundary.len()).filter(|w| w == boundary).count();
        assert_eq!(parts, 3);
    }

    #[test]
    fn shutdown_flag_stops_recording() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("feed.mjpeg");
        let video = VideoAnnotator::new(SimCamera::new("front"), Arc::new(Idle));

        let frames = record(video, &path, &Arc::new(AtomicBool::new(true))).expect("record");
        assert_eq!(frames, 0);
    }

    #[test]
    fn unwritable_output_is_returned_to_the_caller() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("missing").join("feed.mjpeg");
        let video = VideoAnnotator::new(SimCamera::new("front"), Arc::new(Idle));

        let err = record(video, &path, &Arc::new(AtomicBool::new(false))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
