//! [`VideoAnnotator`] – camera frames stamped with the current vehicle state.
//!
//! The annotator is the camera's only reader. [`VideoAnnotator::frames`]
//! yields a lazy sequence that reads one frame per `next()`, snapshots the
//! status at that moment, and draws the overlay into the picture. A failed
//! read ends the sequence; calling `frames()` again restarts it against the
//! same camera. A frame that does not decode is skipped.
//!
//! Text is rendered with `embedded-graphics`' built-in ISO-8859-1 bitmap
//! fonts onto an `image` buffer, then re-encoded as JPEG.

use std::convert::Infallible;
use std::sync::Arc;

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::iso_8859_1::{FONT_9X15_BOLD, FONT_10X20};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, ImageFormat, Rgb, RgbImage};
use smartcar_hal::{Camera, CameraFrame};
use smartcar_kernel::{StatusSnapshot, StatusSource};
use smartcar_types::Mode;
use tracing::{debug, warn};

/// Multipart boundary for the `multipart/x-mixed-replace` stream.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` of the whole stream.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const GREEN: [u8; 3] = [0, 255, 0];
const WHITE: [u8; 3] = [255, 255, 255];

/// One line of overlay text. `origin` is the left end of its baseline, in
/// pixels from the top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLine {
    pub text: String,
    pub origin: (u32, u32),
    pub scale: f32,
    pub color: [u8; 3],
}

/// Build the overlay for `status`: the autonomy marker (autonomous mode
/// only), then speed, then camera angles.
pub fn overlay_for(status: &StatusSnapshot) -> Vec<OverlayLine> {
    let mut lines = Vec::with_capacity(3);
    if status.mode == Mode::Autonomous {
        lines.push(OverlayLine {
            text: "SLAM Active".into(),
            origin: (50, 50),
            scale: 1.0,
            color: GREEN,
        });
    }
    lines.push(OverlayLine {
        text: format!("Speed: {}%", status.speed_percent),
        origin: (50, 100),
        scale: 0.7,
        color: WHITE,
    });
    lines.push(OverlayLine {
        text: format!(
            "Camera: H:{}° V:{}°",
            status.gimbal.angle_h, status.gimbal.angle_v
        ),
        origin: (50, 150),
        scale: 0.7,
        color: WHITE,
    });
    lines
}

/// Re-encoding quality.
const JPEG_QUALITY: u8 = 95;

/// A camera frame plus the state it was annotated with. Immutable once
/// produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedFrame {
    /// The frame as the camera delivered it.
    pub frame: CameraFrame,
    pub status: StatusSnapshot,
    pub overlay: Vec<OverlayLine>,
    /// JPEG with the overlay drawn in.
    pub jpeg: Vec<u8>,
}

impl AnnotatedFrame {
    /// One part of the multipart stream:
    /// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`.
    pub fn multipart_chunk(&self) -> Vec<u8> {
        let mut chunk = Vec::with_capacity(self.jpeg.len() + 48);
        chunk.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes());
        chunk.extend_from_slice(&self.jpeg);
        chunk.extend_from_slice(b"\r\n");
        chunk
    }
}

/// Decode `frame`, draw `overlay` onto it and encode the result as JPEG.
pub fn render(frame: &CameraFrame, overlay: &[OverlayLine]) -> Result<Vec<u8>, ImageError> {
    let mut image = image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)?.to_rgb8();
    let mut canvas = Canvas(&mut image);
    for line in overlay {
        let font = if line.scale >= 1.0 {
            &FONT_10X20
        } else {
            &FONT_9X15_BOLD
        };
        let [r, g, b] = line.color;
        let style = MonoTextStyle::new(font, Rgb888::new(r, g, b));
        let origin = Point::new(line.origin.0 as i32, line.origin.1 as i32);
        let Ok(_) = Text::with_baseline(&line.text, origin, style, Baseline::Alphabetic)
            .draw(&mut canvas);
    }

    let mut jpeg = Vec::with_capacity(frame.data.len());
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&image)?;
    Ok(jpeg)
}

/// `embedded-graphics` draw target over an RGB image buffer. Pixels outside
/// the image are clipped.
struct Canvas<'a>(&'a mut RgbImage);

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = self.0.dimensions();
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < width && y < height {
                self.0.put_pixel(x, y, Rgb([color.r(), color.g(), color.b()]));
            }
        }
        Ok(())
    }
}

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        let (width, height) = self.0.dimensions();
        Size::new(width, height)
    }
}

/// Owns the camera and stamps each frame with the current status.
pub struct VideoAnnotator {
    camera: Box<dyn Camera>,
    status: Arc<dyn StatusSource>,
}

impl VideoAnnotator {
    pub fn new(camera: impl Camera + 'static, status: Arc<dyn StatusSource>) -> Self {
        Self {
            camera: Box::new(camera),
            status,
        }
    }

    /// Start a new frame sequence. Nothing is read until the first `next()`.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            annotator: self,
            done: false,
        }
    }

    /// Give the camera device back to the system. Sequences started after
    /// this end immediately.
    pub fn release(&mut self) {
        debug!(camera = %self.camera.id(), "releasing camera");
        self.camera.release();
    }
}

/// Lazy, unbounded sequence of [`AnnotatedFrame`]s. Ends on the first failed
/// camera read.
pub struct Frames<'a> {
    annotator: &'a mut VideoAnnotator,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = AnnotatedFrame;

    fn next(&mut self) -> Option<AnnotatedFrame> {
        while !self.done {
            let frame = match self.annotator.camera.capture() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(camera = %self.annotator.camera.id(), error = %e, "camera read failed, ending frame sequence");
                    self.done = true;
                    break;
                }
            };
            let status = self.annotator.status.snapshot();
            let overlay = overlay_for(&status);
            match render(&frame, &overlay) {
                Ok(jpeg) => {
                    return Some(AnnotatedFrame {
                        frame,
                        status,
                        overlay,
                        jpeg,
                    });
                }
                Err(e) => {
                    warn!(camera = %self.annotator.camera.id(), error = %e, "undecodable frame skipped");
                }
            }
        }
        None
    }
}

impl std::iter::FusedIterator for Frames<'_> {}
