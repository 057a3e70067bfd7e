//! Response renderers. A renderer sees every decoded frame together with the
//! faces found in it and produces the JSON body of the response

use crate::config::{BOX_COLOR, BOX_THICKNESS};
use crate::detector::Rect;
use crate::gateway::Error;
use crate::sink::{ArtifactName, ResultSink};
use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use serde::Serialize;
use tracing::debug;

const JPEG_QUALITY: u8 = 95;

/// A rendering strategy
pub trait Render {
    type Output;

    /// Handle frame number `index` and the faces detected in it
    fn frame(&mut self, index: usize, image: RgbImage, faces: &[Rect]) -> Result<(), Error>;

    fn finish(self) -> Result<Self::Output, Error>;
}

/// Response of the persist-mode single image endpoints
#[derive(Debug, Serialize)]
pub struct PersistedImage {
    pub message: &'static str,
    pub image_path: String,
}

/// Response of the video endpoint
#[derive(Debug, Serialize)]
pub struct Screenshots {
    pub message: &'static str,
    pub screenshots: Vec<String>,
}

/// Response of the inline endpoint
#[derive(Debug, Serialize)]
pub struct InlineFaces {
    pub faces: Vec<Rect>,
}

/// Draw every face as an unfilled border
pub fn draw_faces(image: &mut RgbImage, faces: &[Rect]) {
    for face in faces {
        for inset in 0..BOX_THICKNESS {
            if face.width <= 2 * inset || face.height <= 2 * inset {
                break;
            }
            let rect = imageproc::rect::Rect::at((face.x + inset) as i32, (face.y + inset) as i32)
                .of_size(face.width - 2 * inset, face.height - 2 * inset);
            draw_hollow_rect_mut(image, rect, Rgb(BOX_COLOR));
        }
    }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY)
        .encode_image(image)
        .map_err(|e| anyhow!("failed to encode jpeg: {e}"))?;
    Ok(data)
}

/// Draw the faces onto the frame and persist it as a single artifact
pub struct Persist<'a> {
    sink: &'a dyn ResultSink,
    name: String,
    message: &'static str,
    path: Option<String>,
}

impl<'a> Persist<'a> {
    pub fn new(sink: &'a dyn ResultSink, name: String, message: &'static str) -> Self {
        Persist {
            sink,
            name,
            message,
            path: None,
        }
    }
}

impl Render for Persist<'_> {
    type Output = PersistedImage;

    fn frame(&mut self, _index: usize, mut image: RgbImage, faces: &[Rect]) -> Result<(), Error> {
        if !faces.is_empty() {
            draw_faces(&mut image, faces);
        }
        let path = self.sink.put(&self.name, &encode_jpeg(&image)?)?;
        debug!("persisted {} face(s) to {path}", faces.len());
        self.path = Some(path);
        Ok(())
    }

    fn finish(self) -> Result<PersistedImage, Error> {
        let image_path = self
            .path
            .ok_or_else(|| anyhow!("no frame was rendered for {}", self.name))?;
        Ok(PersistedImage {
            message: self.message,
            image_path,
        })
    }
}

/// Persist only the frames that contain at least one face, each under its
/// own frame-indexed name
pub struct Screenshot<'a> {
    sink: &'a dyn ResultSink,
    names: ArtifactName,
    stem: &'static str,
    message: &'static str,
    paths: Vec<String>,
}

impl<'a> Screenshot<'a> {
    pub fn new(
        sink: &'a dyn ResultSink,
        names: ArtifactName,
        stem: &'static str,
        message: &'static str,
    ) -> Self {
        Screenshot {
            sink,
            names,
            stem,
            message,
            paths: vec![],
        }
    }
}

impl Render for Screenshot<'_> {
    type Output = Screenshots;

    fn frame(&mut self, index: usize, mut image: RgbImage, faces: &[Rect]) -> Result<(), Error> {
        if faces.is_empty() {
            return Ok(());
        }
        draw_faces(&mut image, faces);
        let name = self.names.indexed(self.stem, index, "jpg");
        let path = self.sink.put(&name, &encode_jpeg(&image)?)?;
        debug!("frame {index}: persisted {} face(s) to {path}", faces.len());
        self.paths.push(path);
        Ok(())
    }

    fn finish(self) -> Result<Screenshots, Error> {
        Ok(Screenshots {
            message: self.message,
            screenshots: self.paths,
        })
    }
}

/// Return the rectangles themselves, nothing is drawn or stored
#[derive(Debug, Default)]
pub struct Inline {
    faces: Vec<Rect>,
}

impl Render for Inline {
    type Output = InlineFaces;

    fn frame(&mut self, _index: usize, _image: RgbImage, faces: &[Rect]) -> Result<(), Error> {
        self.faces.extend_from_slice(faces);
        Ok(())
    }

    fn finish(self) -> Result<InlineFaces, Error> {
        Ok(InlineFaces { faces: self.faces })
    }
}
