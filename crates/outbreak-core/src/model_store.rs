//! Versioned anomaly-model store
//!
//! Models are written as numbered JSON artifacts next to a manifest:
//!
//! ```text
//! models/
//! ├── manifest.json
//! ├── outbreak_model.v0001.json
//! └── outbreak_model.v0002.json
//! ```
//!
//! The manifest records each version's SHA-256, training time and row count.
//! Loads verify the checksum, so a truncated or hand-edited artifact is
//! rejected instead of silently scoring with a different model. Files are
//! written to a temporary name and renamed into place.

use crate::anomaly::AnomalyModel;
use crate::error::{Result, SurveillanceError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File name prefix of model artifacts
pub const ARTIFACT_PREFIX: &str = "outbreak_model";

const MANIFEST_FILE: &str = "manifest.json";

/// One stored model version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub version: u32,
    /// Artifact file name, relative to the store directory
    pub file: String,
    /// Hex SHA-256 of the artifact bytes
    pub sha256: String,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    entries: Vec<ModelEntry>,
}

/// When a stored model should be replaced by a fresh one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrainPolicy {
    /// Train once when no model exists, never again
    #[default]
    Never,
    /// Retrain when the latest model is older than this many days
    MaxAge { days: u32 },
}

impl RetrainPolicy {
    /// Whether a model trained as `entry` is stale at `now`
    pub fn is_stale(&self, entry: &ModelEntry, now: DateTime<Utc>) -> bool {
        match self {
            RetrainPolicy::Never => false,
            RetrainPolicy::MaxAge { days } => now - entry.trained_at > Duration::days(i64::from(*days)),
        }
    }
}

/// Directory-backed model store
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    /// Point at a store directory; nothing is touched until the first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ModelStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    fn read_manifest(&self) -> Result<Manifest> {
        match fs::read(self.manifest_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomically(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let tmp = self.dir.join(format!(".{}.tmp", name));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.dir.join(name))?;
        Ok(())
    }

    /// All stored versions, oldest first
    pub fn versions(&self) -> Result<Vec<ModelEntry>> {
        let mut entries = self.read_manifest()?.entries;
        entries.sort_by_key(|e| e.version);
        Ok(entries)
    }

    /// Most recent version, if any
    pub fn latest_entry(&self) -> Result<Option<ModelEntry>> {
        Ok(self.versions()?.pop())
    }

    /// Persist a model as the next version
    pub fn save(&self, model: &AnomalyModel) -> Result<ModelEntry> {
        fs::create_dir_all(&self.dir)?;

        let mut manifest = self.read_manifest()?;
        let version = manifest.entries.iter().map(|e| e.version).max().unwrap_or(0) + 1;
        let file = format!("{}.v{:04}.json", ARTIFACT_PREFIX, version);

        let bytes = serde_json::to_vec(model)?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        self.write_atomically(&file, &bytes)?;

        let entry = ModelEntry {
            version,
            file,
            sha256,
            trained_at: model.trained_at,
            training_rows: model.training_rows,
        };
        manifest.entries.push(entry.clone());
        self.write_atomically(MANIFEST_FILE, &serde_json::to_vec_pretty(&manifest)?)?;

        tracing::info!(version, file = %entry.file, "model artifact saved");
        Ok(entry)
    }

    /// Load a specific version, verifying its checksum
    pub fn load(&self, version: u32) -> Result<AnomalyModel> {
        let entry = self
            .versions()?
            .into_iter()
            .find(|e| e.version == version)
            .ok_or_else(|| {
                SurveillanceError::ModelUnavailable(format!(
                    "version {} not found in {}",
                    version,
                    self.dir.display()
                ))
            })?;
        self.load_entry(&entry)
    }

    /// Load the most recent version
    pub fn load_latest(&self) -> Result<(ModelEntry, AnomalyModel)> {
        let entry = self.latest_entry()?.ok_or_else(|| {
            SurveillanceError::ModelUnavailable(format!("no model in {}", self.dir.display()))
        })?;
        let model = self.load_entry(&entry)?;
        Ok((entry, model))
    }

    fn load_entry(&self, entry: &ModelEntry) -> Result<AnomalyModel> {
        let path = self.dir.join(&entry.file);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SurveillanceError::ModelUnavailable(format!(
                    "artifact {} is missing",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        if hex::encode(Sha256::digest(&bytes)) != entry.sha256 {
            return Err(SurveillanceError::ModelIntegrity {
                version: entry.version,
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}
