//! Input decoders. Each endpoint has its own way of turning a request into
//! frames; all of them end in either decoded frames or a distinguishable error

use crate::capture::{Camera, CameraSource, FrameSeq, VideoSource};
use crate::gateway::Error;
use crate::sink::ResultSink;
use base64::{engine::general_purpose, Engine as _};
use image::RgbImage;
use std::iter;
use tracing::{debug, warn};

/// Decoded input: one still image or a lazy sequence of video frames
pub enum Frames {
    Still(RgbImage),
    Sequence(FrameSeq),
}

impl Frames {
    pub fn into_seq(self) -> FrameSeq {
        match self {
            Frames::Still(image) => Box::new(iter::once(image)),
            Frames::Sequence(frames) => frames,
        }
    }
}

/// A decoding strategy
pub trait Decode {
    fn decode(self) -> Result<Frames, Error>;
}

/// Decode encoded image bytes into a 3-channel colour image
pub fn decode_color(data: &[u8]) -> Result<RgbImage, Error> {
    let image = image::load_from_memory(data).map_err(Error::Decode)?.to_rgb8();
    non_empty(image)
}

fn non_empty(image: RgbImage) -> Result<RgbImage, Error> {
    match image.width() > 0 && image.height() > 0 {
        true => Ok(image),
        false => Err(Error::EmptyImage),
    }
}

/// Everything after the first `,` of a `data:<mime>;base64,<payload>` URI
pub fn strip_data_uri(uri: &str) -> Result<&str, Error> {
    uri.split_once(',')
        .map(|(_, payload)| payload.trim())
        .ok_or(Error::MalformedDataUri)
}

/// An uploaded image file
pub struct RawUpload<'a> {
    pub data: Option<&'a [u8]>,
}

impl Decode for RawUpload<'_> {
    fn decode(self) -> Result<Frames, Error> {
        let data = self.data.ok_or(Error::MissingField("image"))?;
        Ok(Frames::Still(decode_color(data)?))
    }
}

/// An uploaded video file. It is persisted through the sink first and then
/// read back by the video source
pub struct VideoUpload<'a> {
    pub data: Option<&'a [u8]>,
    pub name: String,
    pub sink: &'a dyn ResultSink,
    pub source: &'a dyn VideoSource,
}

impl Decode for VideoUpload<'_> {
    fn decode(self) -> Result<Frames, Error> {
        let data = self.data.ok_or(Error::MissingField("video"))?;
        let location = self.sink.store_upload(&self.name, data)?;
        debug!("stored {} byte video at {}", data.len(), location.display());
        Ok(Frames::Sequence(self.source.frames(&location)))
    }
}

/// Releases a camera on every exit path
struct CameraGuard(Box<dyn Camera>);

impl Drop for CameraGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A single frame grabbed from a live camera
pub struct CameraHandle<'a> {
    pub index: i32,
    pub source: &'a dyn CameraSource,
}

impl Decode for CameraHandle<'_> {
    fn decode(self) -> Result<Frames, Error> {
        let camera = self.source.open(self.index).map_err(|e| {
            warn!("could not open camera {}: {e:#}", self.index);
            Error::CameraUnavailable
        })?;
        let mut guard = CameraGuard(camera);

        let frame = guard.0.read().map_err(|e| {
            warn!("could not read camera {}: {e:#}", self.index);
            Error::CameraUnavailable
        })?;
        let frame = non_empty(frame).map_err(|_| Error::CameraUnavailable)?;

        drop(guard);
        Ok(Frames::Still(frame))
    }
}

/// A still frame sent as a base64 data URI
pub struct Base64Frame<'a> {
    pub data_uri: Option<&'a str>,
}

impl Decode for Base64Frame<'_> {
    fn decode(self) -> Result<Frames, Error> {
        let uri = self
            .data_uri
            .filter(|uri| !uri.is_empty())
            .ok_or(Error::NoImageData)?;
        let payload = general_purpose::STANDARD.decode(strip_data_uri(uri)?)?;
        Ok(Frames::Still(decode_color(&payload)?))
    }
}
