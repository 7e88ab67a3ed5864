//! `Camera` trait and the MJPEG capture-process driver.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use smartcar_types::CarError;
use tracing::{debug, info, warn};

/// JPEG start-of-image marker.
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
const EOI: u8 = 0xD9;

/// Upper bound on a single encoded frame; anything larger is a corrupt stream.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// One frame as delivered by a camera driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Encoded image (JPEG for every driver in this crate).
    pub data: Vec<u8>,
}

/// A camera or image-capture device with a single reader.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Block until the next frame is available and return it.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::HardwareUnavailable`] when the device is gone or
    /// the stream has ended. Callers treat this as end of stream.
    fn capture(&mut self) -> Result<CameraFrame, CarError>;

    /// Release the underlying device. Further captures fail.
    fn release(&mut self) {}
}

impl<T: Camera + ?Sized> Camera for Box<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn capture(&mut self) -> Result<CameraFrame, CarError> {
        (**self).capture()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Reads frames from a child process that writes an MJPEG stream to stdout,
/// e.g. `rpicam-vid -t 0 --codec mjpeg -o -`.
pub struct MjpegProcessCamera {
    id: String,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl MjpegProcessCamera {
    /// Spawn `argv` and start reading its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`CarError::HardwareUnavailable`] if `argv` is empty or the
    /// process cannot be spawned.
    pub fn spawn(
        id: impl Into<String>,
        argv: &[String],
        width: u32,
        height: u32,
    ) -> Result<Self, CarError> {
        let id = id.into();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CarError::hardware(&id, "camera command is empty"))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CarError::hardware(&id, format!("failed to spawn {program}: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| CarError::hardware(&id, "capture process has no stdout"))?;
        info!(camera = %id, program = %program, "camera capture process started");
        Ok(Self {
            id,
            width,
            height,
            child: Some(child),
            stdout: Some(stdout),
        })
    }
}

impl Camera for MjpegProcessCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, CarError> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| CarError::hardware(&self.id, "camera released"))?;
        match read_jpeg(stdout) {
            Ok(Some(data)) => Ok(CameraFrame {
                width: self.width,
                height: self.height,
                data,
            }),
            Ok(None) => Err(CarError::hardware(&self.id, "capture stream ended")),
            Err(e) => Err(CarError::hardware(&self.id, e.to_string())),
        }
    }

    fn release(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!(camera = %self.id, error = %e, "capture process already gone");
            }
            if let Err(e) = child.wait() {
                warn!(camera = %self.id, error = %e, "failed to reap capture process");
            }
            info!(camera = %self.id, "camera released");
        }
    }
}

impl Drop for MjpegProcessCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read the next complete JPEG image from an MJPEG byte stream.
///
/// Bytes before the first start-of-image marker are skipped. Returns
/// `Ok(None)` on a clean end of stream.
pub fn read_jpeg<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut prev = None;
    let mut byte = [0u8; 1];

    // Seek to SOI.
    loop {
        if reader.read(&mut byte)? == 0 {
            return Ok(None);
        }
        if prev == Some(SOI[0]) && byte[0] == SOI[1] {
            break;
        }
        prev = Some(byte[0]);
    }

    let mut frame = SOI.to_vec();
    loop {
        if reader.read(&mut byte)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a frame",
            ));
        }
        frame.push(byte[0]);
        let n = frame.len();
        if frame[n - 2] == 0xFF && frame[n - 1] == EOI {
            return Ok(Some(frame));
        }
        if n > MAX_FRAME_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
        }
    }
}
