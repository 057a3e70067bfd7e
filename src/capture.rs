//! Frame sources: live cameras and stored videos. The production
//! implementations drive an external `ffmpeg` process and read decoded
//! frames back from its stdout

use crate::settings::CaptureSettings;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::Deserialize;
use image::{ImageFormat, RgbImage};
use std::fmt::Debug;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// A lazy, forward-only sequence of decoded frames
pub type FrameSeq = Box<dyn Iterator<Item = RgbImage> + Send>;

/// An open camera device
pub trait Camera: Send {
    /// Grab a single frame
    fn read(&mut self) -> Result<RgbImage>;

    /// Give the device back. Must be safe to call more than once
    fn release(&mut self);
}

/// Opens camera devices by index
pub trait CameraSource: Debug + Send + Sync {
    fn open(&self, index: i32) -> Result<Box<dyn Camera>>;
}

/// Opens stored videos as frame sequences. A video that cannot be opened is
/// an empty sequence, not an error
pub trait VideoSource: Debug + Send + Sync {
    fn frames(&self, path: &Path) -> FrameSeq;
}

/// Camera and video capture through `ffmpeg`/`ffprobe`
#[derive(Debug, Clone)]
pub struct FfmpegCapture {
    ffmpeg: String,
    ffprobe: String,
    camera_device: String,
    camera_format: String,
    camera_timeout: Duration,
}

impl FfmpegCapture {
    pub fn new(settings: &CaptureSettings) -> Self {
        FfmpegCapture {
            ffmpeg: settings.ffmpeg.clone(),
            ffprobe: settings.ffprobe.clone(),
            camera_device: settings.camera_device.clone(),
            camera_format: settings.camera_format.clone(),
            camera_timeout: Duration::from_millis(settings.camera_timeout_ms),
        }
    }

    /// Device path for a camera index, e.g. `/dev/video0`
    pub fn device_path(&self, index: i32) -> Option<String> {
        if index < 0 {
            return None;
        }
        Some(self.camera_device.replace("{index}", &index.to_string()))
    }

    /// Frame dimensions of the first video stream in `path`
    fn probe(&self, path: &Path) -> Result<(u32, u32)> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height"])
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.ffprobe))?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe exited with {}", output.status));
        }
        parse_dimensions(&output.stdout)?
            .ok_or_else(|| anyhow!("no video stream in {}", path.display()))
    }

    fn open_video(&self, path: &Path) -> Result<FfmpegFrames> {
        let (width, height) = self.probe(path)?;

        // -noautorotate keeps the decoded size equal to the probed size
        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-noautorotate", "-i"])
            .arg(path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run {}", self.ffmpeg))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;

        debug!("opened {} ({width}x{height})", path.display());
        Ok(FfmpegFrames {
            child,
            stdout,
            width,
            height,
            done: false,
        })
    }
}

impl CameraSource for FfmpegCapture {
    fn open(&self, index: i32) -> Result<Box<dyn Camera>> {
        let device = self
            .device_path(index)
            .ok_or_else(|| anyhow!("invalid camera index {index}"))?;

        if device.starts_with('/') && !Path::new(&device).exists() {
            return Err(anyhow!("camera device {device} does not exist"));
        }

        let child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-f"])
            .arg(&self.camera_format)
            .arg("-i")
            .arg(&device)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run {}", self.ffmpeg))?;

        debug!("opened camera {device}");
        Ok(Box::new(FfmpegCamera {
            child: Some(child),
            timeout: self.camera_timeout,
        }))
    }
}

impl VideoSource for FfmpegCapture {
    fn frames(&self, path: &Path) -> FrameSeq {
        match self.open_video(path) {
            Ok(frames) => Box::new(frames),
            Err(e) => {
                warn!("could not open video {}: {e:#}", path.display());
                Box::new(std::iter::empty())
            }
        }
    }
}

/// A camera backed by an `ffmpeg` process that emits one PNG frame
struct FfmpegCamera {
    child: Option<Child>,
    timeout: Duration,
}

impl Camera for FfmpegCamera {
    fn read(&mut self) -> Result<RgbImage> {
        let mut stdout = self
            .child
            .as_mut()
            .and_then(|child| child.stdout.take())
            .ok_or_else(|| anyhow!("camera already read or released"))?;

        // Read on a helper thread so a stalled device cannot block past the timeout
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            let mut data = Vec::new();
            let res = stdout.read_to_end(&mut data).map(|_| data);
            let _ = tx.send(res);
        });

        let data = match rx.recv_timeout(self.timeout) {
            Ok(res) => res.context("failed to read camera frame")?,
            Err(RecvTimeoutError::Timeout) => {
                self.release();
                return Err(anyhow!("camera did not deliver a frame in {:?}", self.timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("camera reader exited unexpectedly"))
            }
        };

        if data.is_empty() {
            return Err(anyhow!("camera produced no frame"));
        }
        let frame = image::load_from_memory_with_format(&data, ImageFormat::Png)?.to_rgb8();
        Ok(frame)
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Raw RGB frames read from an `ffmpeg` process
struct FfmpegFrames {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    done: bool,
}

impl Iterator for FfmpegFrames {
    type Item = RgbImage;

    fn next(&mut self) -> Option<RgbImage> {
        if self.done {
            return None;
        }

        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => RgbImage::from_raw(self.width, self.height, buffer),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    warn!("video decoding stopped: {e}");
                }
                self.done = true;
                None
            }
        }
    }
}

impl Drop for FfmpegFrames {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Frame size of the first stream in `ffprobe -of json` output that reports
/// a non-zero width and height
fn parse_dimensions(output: &[u8]) -> Result<Option<(u32, u32)>> {
    let probe: ProbeOutput =
        serde_json::from_slice(output).context("unreadable ffprobe output")?;
    Ok(probe.streams.iter().find_map(|stream| match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    }))
}
