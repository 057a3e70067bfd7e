//! The detection gateway owns the detector and the output sink, and runs
//! every request through the same decode -> detect -> render pipeline. The
//! endpoints only differ in which decoder, tuning and renderer they pick

use crate::capture::{CameraSource, VideoSource};
use crate::config::*;
use crate::decode::{Base64Frame, CameraHandle, Decode, RawUpload, VideoUpload};
use crate::detector::{DetectParams, FaceDetector, Rect};
use crate::render::{Inline, InlineFaces, Persist, PersistedImage, Render, Screenshot, Screenshots};
use crate::settings::DetectorSettings;
use crate::sink::{ArtifactName, ResultSink};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Everything that can go wrong while serving a detection request
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing form field `{0}`")]
    MissingField(&'static str),

    #[error("No image data received")]
    NoImageData,

    #[error("malformed data uri: missing `,` separator")]
    MalformedDataUri,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("decoded image is empty")]
    EmptyImage,

    #[error("upload exceeds the limit of {0} bytes")]
    TooLarge(usize),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("Could not access camera")]
    CameraUnavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Whether the client caused this error
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::Internal(_))
    }
}

/// Detector tuning for each endpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub image: DetectParams,
    pub video: DetectParams,
    pub camera: DetectParams,
    pub live: DetectParams,
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning::from(&DetectorSettings::default())
    }
}

impl From<&DetectorSettings> for Tuning {
    fn from(settings: &DetectorSettings) -> Self {
        Tuning {
            image: settings.image,
            video: settings.video,
            camera: settings.camera,
            live: settings.live,
        }
    }
}

#[derive(Debug)]
pub struct Gateway {
    detector: Arc<dyn FaceDetector>,
    sink: Arc<dyn ResultSink>,
    camera: Arc<dyn CameraSource>,
    video: Arc<dyn VideoSource>,
    tuning: Tuning,
    unique_names: bool,
}

impl Gateway {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        sink: Arc<dyn ResultSink>,
        camera: Arc<dyn CameraSource>,
        video: Arc<dyn VideoSource>,
    ) -> Self {
        Gateway {
            detector,
            sink,
            camera,
            video,
            tuning: Tuning::default(),
            unique_names: true,
        }
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_unique_names(mut self, unique_names: bool) -> Self {
        self.unique_names = unique_names;
        self
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn sink(&self) -> &dyn ResultSink {
        self.sink.as_ref()
    }

    fn names(&self) -> ArtifactName {
        ArtifactName::new(self.unique_names)
    }

    /// Run the detector on a colour image. The returned rectangles lie inside
    /// the image and pass the tuning's minimum size
    pub fn detect(&self, image: &RgbImage, params: &DetectParams) -> Vec<Rect> {
        let (width, height) = image.dimensions();
        let gray = image::imageops::grayscale(image);

        self.detector
            .detect(&gray, params)
            .into_iter()
            .filter_map(|rect| rect.clip(width, height))
            .filter(|rect| params.accepts(rect))
            .collect()
    }

    /// The request pipeline: decode, detect on every frame, render
    pub fn run<D, R>(&self, decoder: D, params: &DetectParams, mut renderer: R) -> Result<R::Output, Error>
    where
        D: Decode,
        R: Render,
    {
        let frames = decoder.decode()?;
        let mut count = 0;
        for (index, image) in frames.into_seq().enumerate() {
            let faces = self.detect(&image, params);
            debug!("frame {index}: {} face(s)", faces.len());
            renderer.frame(index, image, &faces)?;
            count += 1;
        }
        debug!("processed {count} frame(s)");
        renderer.finish()
    }

    /// Detect faces in an uploaded image and persist the annotated result
    pub fn detect_image(&self, upload: Option<&[u8]>) -> Result<PersistedImage, Error> {
        let name = self.names().file(DETECTED_FACE, "jpg");
        self.run(
            RawUpload { data: upload },
            &self.tuning.image,
            Persist::new(self.sink(), name, IMAGE_MESSAGE),
        )
    }

    /// Scan an uploaded video and persist every frame that contains a face
    pub fn detect_video(&self, upload: Option<&[u8]>) -> Result<Screenshots, Error> {
        let names = self.names();
        let decoder = VideoUpload {
            data: upload,
            name: names.file(UPLOADED_VIDEO, "mp4"),
            sink: self.sink(),
            source: self.video.as_ref(),
        };
        self.run(
            decoder,
            &self.tuning.video,
            Screenshot::new(self.sink(), names, VIDEO_FRAME, VIDEO_MESSAGE),
        )
    }

    /// Grab one frame from a camera and persist the annotated result
    pub fn detect_camera(&self, index: i32) -> Result<PersistedImage, Error> {
        let name = self.names().file(CAMERA_DETECTED, "jpg");
        self.run(
            CameraHandle {
                index,
                source: self.camera.as_ref(),
            },
            &self.tuning.camera,
            Persist::new(self.sink(), name, CAMERA_MESSAGE),
        )
    }

    /// Detect faces in a base64 still frame and return the rectangles
    pub fn detect_live(&self, data_uri: Option<&str>) -> Result<InlineFaces, Error> {
        self.run(
            Base64Frame { data_uri },
            &self.tuning.live,
            Inline::default(),
        )
    }
}
