//! Where results go. Persist-mode endpoints hand their encoded artifacts to a
//! `ResultSink` and return the public path it gives back

use crate::util;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Names the artifacts of a single request. With a request id every request
/// gets its own files; without one the names are fixed and a later request
/// overwrites the files of an earlier one
#[derive(Debug, Clone)]
pub struct ArtifactName {
    request_id: Option<String>,
}

impl ArtifactName {
    pub fn unique() -> Self {
        ArtifactName {
            request_id: Some(Uuid::new_v4().simple().to_string()),
        }
    }

    pub fn fixed() -> Self {
        ArtifactName { request_id: None }
    }

    pub fn new(unique: bool) -> Self {
        match unique {
            true => Self::unique(),
            false => Self::fixed(),
        }
    }

    /// `detected_face.jpg` or `detected_face_<id>.jpg`
    pub fn file(&self, stem: &str, ext: &str) -> String {
        match &self.request_id {
            Some(id) => format!("{stem}_{id}.{ext}"),
            None => format!("{stem}.{ext}"),
        }
    }

    /// `frame_3.jpg` or `frame_<id>_3.jpg`
    pub fn indexed(&self, stem: &str, index: usize, ext: &str) -> String {
        match &self.request_id {
            Some(id) => format!("{stem}_{id}_{index}.{ext}"),
            None => format!("{stem}_{index}.{ext}"),
        }
    }
}

/// An output sink for persisted results
pub trait ResultSink: Debug + Send + Sync {
    /// Store a result artifact under `name`, returning its public path
    fn put(&self, name: &str, data: &[u8]) -> Result<String>;

    /// Store an upload that a frame source will read back, returning the
    /// location to read it from
    fn store_upload(&self, name: &str, data: &[u8]) -> Result<PathBuf>;

    /// Read back a stored artifact
    fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

fn check_name(name: &str) -> Result<()> {
    match util::is_valid_artifact_name(name) {
        true => Ok(()),
        false => Err(anyhow!("invalid artifact name {name:?}")),
    }
}

/// Stores artifacts as plain files in a result directory
#[derive(Debug)]
pub struct DiskSink {
    /// The directory artifacts are written to
    dir: PathBuf,

    /// Prefix of the returned public paths
    public_prefix: String,
}

impl DiskSink {
    pub fn new<P: Into<PathBuf>>(dir: P, public_prefix: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create result directory {}", dir.display()))?;
        Ok(DiskSink {
            dir,
            public_prefix: public_prefix.trim_matches('/').to_string(),
        })
    }

    fn public_path(&self, name: &str) -> String {
        match self.public_prefix.is_empty() {
            true => name.to_string(),
            false => format!("{}/{name}", self.public_prefix),
        }
    }
}

impl ResultSink for DiskSink {
    fn put(&self, name: &str, data: &[u8]) -> Result<String> {
        self.store_upload(name, data)?;
        Ok(self.public_path(name))
    }

    fn store_upload(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        check_name(name)?;
        let path = self.dir.join(name);
        fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
        debug!("wrote {} bytes to {}", data.len(), path.display());
        Ok(path)
    }

    fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if !util::is_valid_artifact_name(name) {
            return Ok(None);
        }
        match fs::read(self.dir.join(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps artifacts in process memory. Uploads are not readable by an external
/// frame source, so this sink pairs with in-process sources only
#[derive(Debug)]
pub struct MemorySink {
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
    public_prefix: String,
}

impl MemorySink {
    pub fn new(public_prefix: &str) -> Self {
        MemorySink {
            artifacts: RwLock::new(HashMap::new()),
            public_prefix: public_prefix.trim_matches('/').to_string(),
        }
    }

    /// Names of everything stored so far
    pub fn names(&self) -> Vec<String> {
        let artifacts = self.artifacts.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = artifacts.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ResultSink for MemorySink {
    fn put(&self, name: &str, data: &[u8]) -> Result<String> {
        check_name(name)?;
        self.artifacts
            .write()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .insert(name.to_string(), data.to_vec());
        match self.public_prefix.is_empty() {
            true => Ok(name.to_string()),
            false => Ok(format!("{}/{name}", self.public_prefix)),
        }
    }

    fn store_upload(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        self.put(name, data)?;
        Ok(PathBuf::from(name))
    }

    fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let artifacts = self
            .artifacts
            .read()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        Ok(artifacts.get(name).cloned())
    }
}
