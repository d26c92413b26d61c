//! Per-run outputs that later phases load instead of recomputing.
//!
//! Each artifact is its own JSON file under `{dir}/{run_id}/` and can be
//! loaded independently of the others.

use crate::Result;
use bridge_traits::{CatalogEntry, FileSystemAccess};
use bytes::Bytes;
use core_catalog::{DestinationRecord, IdMapping, MatchResult, SourceRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// Extracted and parent-enriched source records.
    RawRecords,
    /// Output of Transform.
    TransformedRecords,
    MatchResults,
    /// Source id to destination id of every written product.
    IdMapping,
    /// Destination catalog the matcher indexes.
    CatalogSnapshot,
}

impl Artifact {
    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::RawRecords => "raw_records.json",
            Artifact::TransformedRecords => "transformed_records.json",
            Artifact::MatchResults => "match_results.json",
            Artifact::IdMapping => "id_mapping.json",
            Artifact::CatalogSnapshot => "catalog_snapshot.json",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Artifact::RawRecords => "raw_records",
            Artifact::TransformedRecords => "transformed_records",
            Artifact::MatchResults => "match_results",
            Artifact::IdMapping => "id_mapping",
            Artifact::CatalogSnapshot => "catalog_snapshot",
        }
    }
}

pub struct ArtifactStore {
    fs: Arc<dyn FileSystemAccess>,
    dir: PathBuf,
    /// Held from the temp write to the rename; saves share temp paths.
    write_lock: Mutex<()>,
}

impl ArtifactStore {
    pub fn new(fs: Arc<dyn FileSystemAccess>, checkpoint_dir: &Path, run_id: &str) -> Self {
        Self {
            fs,
            dir: checkpoint_dir.join(run_id),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    pub async fn exists(&self, artifact: Artifact) -> Result<bool> {
        Ok(self.fs.exists(&self.path(artifact)).await?)
    }

    async fn save<T: Serialize + ?Sized>(&self, artifact: Artifact, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        let size = data.len();
        let path = self.path(artifact);
        let temp = self.dir.join(format!("{}.tmp", artifact.file_name()));

        let _writing = self.write_lock.lock().await;
        self.fs.create_dir_all(&self.dir).await?;
        self.fs.write_file(&temp, Bytes::from(data)).await?;
        self.fs.rename(&temp, &path).await?;

        debug!(artifact = artifact.name(), bytes = size, "Artifact saved");
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, artifact: Artifact) -> Result<Option<T>> {
        let path = self.path(artifact);
        if !self.fs.exists(&path).await? {
            return Ok(None);
        }
        let data = self.fs.read_file(&path).await?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    pub async fn save_raw_records(&self, records: &[SourceRecord]) -> Result<()> {
        self.save(Artifact::RawRecords, records).await
    }

    pub async fn load_raw_records(&self) -> Result<Option<Vec<SourceRecord>>> {
        self.load(Artifact::RawRecords).await
    }

    pub async fn save_transformed(&self, records: &[DestinationRecord]) -> Result<()> {
        self.save(Artifact::TransformedRecords, records).await
    }

    pub async fn load_transformed(&self) -> Result<Option<Vec<DestinationRecord>>> {
        self.load(Artifact::TransformedRecords).await
    }

    pub async fn save_match_results(&self, results: &[MatchResult]) -> Result<()> {
        self.save(Artifact::MatchResults, results).await
    }

    pub async fn load_match_results(&self) -> Result<Option<Vec<MatchResult>>> {
        self.load(Artifact::MatchResults).await
    }

    pub async fn save_id_mapping(&self, mapping: &IdMapping) -> Result<()> {
        self.save(Artifact::IdMapping, mapping).await
    }

    pub async fn load_id_mapping(&self) -> Result<Option<IdMapping>> {
        self.load(Artifact::IdMapping).await
    }

    pub async fn save_catalog_snapshot(&self, entries: &[CatalogEntry]) -> Result<()> {
        self.save(Artifact::CatalogSnapshot, entries).await
    }

    pub async fn load_catalog_snapshot(&self) -> Result<Option<Vec<CatalogEntry>>> {
        self.load(Artifact::CatalogSnapshot).await
    }
}
