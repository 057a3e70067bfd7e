//! Test doubles: a deterministic detector, synthetic images and scripted
//! frame sources

use crate::capture::{Camera, CameraSource, FrameSeq, VideoSource};
use crate::detector::{DetectParams, FaceDetector, Rect};
use anyhow::{anyhow, Result};
use image::{GrayImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);
const FACE: Rgb<u8> = Rgb([255, 255, 255]);

/// A dark image with a white square for every face
pub fn with_faces(width: u32, height: u32, faces: &[Rect]) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, BACKGROUND);
    for face in faces {
        for y in face.y..(face.y + face.height).min(height) {
            for x in face.x..(face.x + face.width).min(width) {
                image.put_pixel(x, y, FACE);
            }
        }
    }
    image
}

pub fn png(image: &RgbImage) -> Vec<u8> {
    let mut data = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
        .unwrap();
    data
}

/// Reports every 4-connected blob of bright pixels as a face
#[derive(Debug)]
pub struct BlobDetector;

impl FaceDetector for BlobDetector {
    fn detect(&self, image: &GrayImage, _params: &DetectParams) -> Vec<Rect> {
        let (width, height) = image.dimensions();
        let mut seen = vec![false; (width * height) as usize];
        let mut faces = vec![];

        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) as usize;
                if seen[idx] || image.get_pixel(x, y)[0] < 200 {
                    continue;
                }

                let (mut x0, mut y0, mut x1, mut y1) = (x, y, x, y);
                let mut stack = vec![(x, y)];
                seen[idx] = true;
                while let Some((px, py)) = stack.pop() {
                    x0 = x0.min(px);
                    y0 = y0.min(py);
                    x1 = x1.max(px);
                    y1 = y1.max(py);

                    let neighbours = [
                        (px.wrapping_sub(1), py),
                        (px + 1, py),
                        (px, py.wrapping_sub(1)),
                        (px, py + 1),
                    ];
                    for (nx, ny) in neighbours {
                        if nx >= width || ny >= height {
                            continue;
                        }
                        let nidx = (ny * width + nx) as usize;
                        if !seen[nidx] && image.get_pixel(nx, ny)[0] >= 200 {
                            seen[nidx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
                faces.push(Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1));
            }
        }
        faces
    }
}

/// A camera source that hands out scripted devices and counts how often they
/// are opened and released
#[derive(Debug)]
pub struct ScriptedCamera {
    frame: Option<RgbImage>,
    openable: bool,
    pub opened: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl ScriptedCamera {
    fn new(frame: Option<RgbImage>, openable: bool) -> Self {
        ScriptedCamera {
            frame,
            openable,
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Opens and delivers `frame`
    pub fn working(frame: RgbImage) -> Self {
        Self::new(Some(frame), true)
    }

    /// Opens, but every read fails
    pub fn unreadable() -> Self {
        Self::new(None, true)
    }

    /// Cannot be opened at all
    pub fn missing() -> Self {
        Self::new(None, false)
    }
}

impl CameraSource for ScriptedCamera {
    fn open(&self, index: i32) -> Result<Box<dyn Camera>> {
        if !self.openable {
            return Err(anyhow!("no camera at index {index}"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDevice {
            frame: self.frame.clone(),
            released: self.released.clone(),
        }))
    }
}

struct ScriptedDevice {
    frame: Option<RgbImage>,
    released: Arc<AtomicUsize>,
}

impl Camera for ScriptedDevice {
    fn read(&mut self) -> Result<RgbImage> {
        self.frame.take().ok_or_else(|| anyhow!("no frame"))
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A video source that plays back the same frames for any path
#[derive(Debug)]
pub struct ScriptedVideo {
    frames: Vec<RgbImage>,
    opened: Mutex<Vec<PathBuf>>,
}

impl ScriptedVideo {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        ScriptedVideo {
            frames,
            opened: Mutex::new(vec![]),
        }
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl VideoSource for ScriptedVideo {
    fn frames(&self, path: &Path) -> FrameSeq {
        self.opened.lock().unwrap().push(path.to_path_buf());
        Box::new(self.frames.clone().into_iter())
    }
}

#[test]
fn test_blob_detector() {
    // blobs come back in scan order
    let faces = [Rect::new(10, 0, 6, 6), Rect::new(2, 2, 5, 4)];
    let image = image::imageops::grayscale(&with_faces(20, 12, &faces));
    let found = BlobDetector.detect(&image, &DetectParams::new(1.1, 4));
    assert_eq!(found, faces.to_vec());
}
