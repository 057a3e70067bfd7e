pub mod capture;
pub mod decode;
pub mod detector;
pub mod gateway;
pub mod render;
pub mod server;
pub mod settings;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

/// Facegate compile-time configuration. Anything an operator may want to
/// change lives in `settings` instead
pub mod config {
    /// Log filter used when `RUST_LOG` is not set
    pub const RUST_LOG: &str = "facegate=debug,actix_web=info,actix_server=info";

    /// Environment variable prefix for runtime settings
    pub const ENV_PREFIX: &str = "FACEGATE";

    /// Default listening port (same as the browser client expects)
    pub const DEFAULT_PORT: u16 = 5000;

    /// Default upper bound on a single upload or JSON body
    pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

    /// Artifact stems. With unique naming enabled a request id is appended
    pub const DETECTED_FACE: &str = "detected_face";
    pub const UPLOADED_VIDEO: &str = "uploaded_video";
    pub const VIDEO_FRAME: &str = "frame";
    pub const CAMERA_DETECTED: &str = "camera_detected";

    pub const IMAGE_MESSAGE: &str = "Face(s) detected";
    pub const VIDEO_MESSAGE: &str = "Face(s) detected in video";
    pub const CAMERA_MESSAGE: &str = "Face(s) detected from camera";
    pub const CAMERA_UNAVAILABLE: &str = "Could not access camera";
    pub const NO_IMAGE_DATA: &str = "No image data received";

    /// Border colour and thickness of drawn face rectangles
    pub const BOX_COLOR: [u8; 3] = [0, 0, 255];
    pub const BOX_THICKNESS: u32 = 2;
}

/// Small helpers shared by the sink and the HTTP layer
pub mod util {
    /// Guess a content type from an artifact name
    pub fn content_type(name: &str) -> &'static str {
        match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
            Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
            Some(ext) if ext == "png" => "image/png",
            Some(ext) if ext == "mp4" => "video/mp4",
            _ => "application/octet-stream",
        }
    }

    /// An artifact name is a single, non-hidden path component
    pub fn is_valid_artifact_name(name: &str) -> bool {
        !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    }

}
