//! The face detection primitive. Everything upstream of this module only sees
//! `FaceDetector::detect`: given a grayscale image and a tuning, return the
//! bounding rectangles of the faces in it

use anyhow::{anyhow, Context, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Smallest face the SeetaFace cascade accepts
const MIN_CASCADE_FACE: u32 = 20;

/// Side of the cascade's scan window. Smaller images cannot hold a face
const CASCADE_WINDOW: u32 = 40;

/// An axis-aligned face bounding box in pixel coordinates, relative to the
/// top-left corner of the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a rectangle from signed detector output, clipped to a
    /// `width` x `height` image. Returns `None` if nothing is left
    pub fn clipped(x: i64, y: i64, w: i64, h: i64, width: u32, height: u32) -> Option<Rect> {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + w).min(width as i64);
        let y1 = (y + h).min(height as i64);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }

    /// Intersect with the bounds of a `width` x `height` image
    pub fn clip(&self, width: u32, height: u32) -> Option<Rect> {
        Rect::clipped(
            self.x as i64,
            self.y as i64,
            self.width as i64,
            self.height as i64,
            width,
            height,
        )
    }
}

/// Detector tuning. Every endpoint carries its own copy, so the live camera
/// path can be stricter than the plain image path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    /// Ratio between two consecutive scan scales, must be greater than 1
    pub scale_factor: f32,

    /// How much evidence a candidate needs before it is reported
    pub min_neighbors: u32,

    /// Faces smaller than `[width, height]` are dropped
    #[serde(default)]
    pub min_size: Option<[u32; 2]>,
}

impl DetectParams {
    pub const fn new(scale_factor: f32, min_neighbors: u32) -> Self {
        DetectParams {
            scale_factor,
            min_neighbors,
            min_size: None,
        }
    }

    pub const fn with_min_size(mut self, width: u32, height: u32) -> Self {
        self.min_size = Some([width, height]);
        self
    }

    /// Whether `rect` passes the minimum-size filter
    pub fn accepts(&self, rect: &Rect) -> bool {
        match self.min_size {
            Some([w, h]) => rect.width >= w && rect.height >= h,
            None => true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scale_factor.is_nan() || self.scale_factor <= 1.0 {
            return Err(anyhow!(
                "scale_factor must be greater than 1.0, got {}",
                self.scale_factor
            ));
        }
        if self.min_neighbors == 0 {
            return Err(anyhow!("min_neighbors must be at least 1"));
        }
        if let Some([w, h]) = self.min_size {
            if w == 0 || h == 0 {
                return Err(anyhow!("min_size components must be positive"));
            }
        }
        Ok(())
    }

    /// Pyramid step used by the cascade. The cascade shrinks the image where
    /// a Haar detector grows the window, so the factor is inverted
    pub(crate) fn pyramid_scale(&self) -> f32 {
        (1.0 / self.scale_factor).clamp(0.01, 0.99)
    }

    /// Score threshold used by the cascade in place of neighbour grouping
    pub(crate) fn score_threshold(&self) -> f64 {
        self.min_neighbors.max(1) as f64
    }

    /// Minimum window size handed to the cascade
    pub(crate) fn min_face_size(&self) -> u32 {
        self.min_size
            .map(|[w, h]| w.max(h))
            .unwrap_or(MIN_CASCADE_FACE)
            .max(MIN_CASCADE_FACE)
    }
}

/// An opaque face detector. Implementations must be pure: the same image and
/// tuning always give the same rectangles
pub trait FaceDetector: Debug + Send + Sync {
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Vec<Rect>;
}

/// Face detector backed by the pre-trained SeetaFace funnel cascade
pub struct RustfaceDetector {
    model: rustface::Model,
}

impl Debug for RustfaceDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RustfaceDetector {{ model: <seetaface> }}")
    }
}

impl RustfaceDetector {
    /// Load the cascade model once at startup
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open detector model {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to load detector model {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let model = rustface::read_model(reader)?;
        Ok(RustfaceDetector { model })
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Vec<Rect> {
        let (width, height) = image.dimensions();
        if width.min(height) < CASCADE_WINDOW {
            return vec![];
        }

        // The rustface detector keeps scratch buffers, so each call gets its own
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(params.min_face_size());
        detector.set_pyramid_scale_factor(params.pyramid_scale());
        detector.set_score_thresh(params.score_threshold());
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(image.as_raw(), width, height));

        faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                Rect::clipped(
                    bbox.x() as i64,
                    bbox.y() as i64,
                    bbox.width() as i64,
                    bbox.height() as i64,
                    width,
                    height,
                )
            })
            .collect()
    }
}
