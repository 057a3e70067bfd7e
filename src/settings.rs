//! Runtime settings, layered from serde defaults, an optional TOML file and
//! `FACEGATE__*` environment variables

use crate::config::{DEFAULT_PORT, ENV_PREFIX, MAX_UPLOAD_BYTES};
use crate::detector::DetectParams;
use crate::util::is_valid_artifact_name;
use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub detector: DetectorSettings,
    pub storage: StorageSettings,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,

    /// Number of HTTP workers, defaults to the number of cores
    pub workers: Option<usize>,

    /// Largest accepted upload or JSON body, in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            workers: None,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

/// Detector model and the per-endpoint tunings. A tuning section only
/// overrides the keys it names, the rest keep that endpoint's default
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawDetectorSettings")]
pub struct DetectorSettings {
    pub model_path: PathBuf,
    pub image: DetectParams,
    pub video: DetectParams,
    pub camera: DetectParams,
    pub live: DetectParams,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        let plain = DetectParams::new(1.1, 4);
        DetectorSettings {
            model_path: "model/seeta_fd_frontal_v1.0.bin".into(),
            image: plain,
            video: plain,
            camera: plain,
            live: DetectParams::new(1.1, 5).with_min_size(30, 30),
        }
    }
}

/// A tuning section as written in the file or environment
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TuningOverride {
    scale_factor: Option<f32>,
    min_neighbors: Option<u32>,
    min_size: Option<[u32; 2]>,
}

impl TuningOverride {
    fn apply(self, mut params: DetectParams) -> DetectParams {
        if let Some(scale_factor) = self.scale_factor {
            params.scale_factor = scale_factor;
        }
        if let Some(min_neighbors) = self.min_neighbors {
            params.min_neighbors = min_neighbors;
        }
        if let Some(min_size) = self.min_size {
            params.min_size = Some(min_size);
        }
        params
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDetectorSettings {
    model_path: Option<PathBuf>,
    image: TuningOverride,
    video: TuningOverride,
    camera: TuningOverride,
    live: TuningOverride,
}

impl From<RawDetectorSettings> for DetectorSettings {
    fn from(raw: RawDetectorSettings) -> Self {
        let defaults = DetectorSettings::default();
        DetectorSettings {
            model_path: raw.model_path.unwrap_or(defaults.model_path),
            image: raw.image.apply(defaults.image),
            video: raw.video.apply(defaults.video),
            camera: raw.camera.apply(defaults.camera),
            live: raw.live.apply(defaults.live),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory persisted artifacts are written to
    pub result_dir: PathBuf,

    /// Prefix of the artifact paths returned to clients
    pub public_prefix: String,

    /// Give every request its own artifact names. When off, the fixed names
    /// are shared and concurrent requests overwrite each other's results
    pub unique_names: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            result_dir: "static".into(),
            public_prefix: "static".into(),
            unique_names: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub ffmpeg: String,
    pub ffprobe: String,

    /// Device path template, `{index}` is replaced by the camera index
    pub camera_device: String,

    /// ffmpeg input format used for cameras
    pub camera_format: String,

    pub camera_timeout_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            camera_device: "/dev/video{index}".into(),
            camera_format: "video4linux2".into(),
            camera_timeout_ms: 5000,
        }
    }
}

impl Settings {
    /// Load settings from an optional file, then the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
            .context("invalid settings")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let tunings = [
            ("image", &self.detector.image),
            ("video", &self.detector.video),
            ("camera", &self.detector.camera),
            ("live", &self.detector.live),
        ];
        for (name, params) in tunings {
            params
                .validate()
                .with_context(|| format!("invalid detector.{name} tuning"))?;
        }
        if self.server.max_upload_bytes == 0 {
            return Err(anyhow!("server.max_upload_bytes must be positive"));
        }
        if self.capture.camera_timeout_ms == 0 {
            return Err(anyhow!("capture.camera_timeout_ms must be positive"));
        }
        let prefix = self.storage.public_prefix.trim_matches('/');
        if prefix.is_empty() || !prefix.split('/').all(is_valid_artifact_name) {
            return Err(anyhow!(
                "storage.public_prefix `{}` is not a usable url path",
                self.storage.public_prefix
            ));
        }
        if !self.capture.camera_device.contains("{index}") {
            return Err(anyhow!("capture.camera_device must contain {{index}}"));
        }
        Ok(())
    }
}
