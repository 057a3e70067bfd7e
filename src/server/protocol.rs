use serde::Deserialize;

/// Body of `POST /detect-camera`
#[derive(Debug, Default, Deserialize)]
pub struct CameraRequest {
    #[serde(default)]
    pub camera_index: i32,
}

/// Body of `POST /detect-live-camera`. `image` is a base64 data URI
#[derive(Debug, Default, Deserialize)]
pub struct LiveFrameRequest {
    #[serde(default)]
    pub image: Option<String>,
}
