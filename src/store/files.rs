use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoordinatorError, Result};

/// What an artifact is for, within its job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Input,
    Shard,
    TaskOutput,
    FinalOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub name: String,
    pub size: u64,
    pub sha256: String,
    pub role: ArtifactRole,
}

struct ArtifactSlot {
    meta: ArtifactMeta,
    /// Creation order within the job, used by `list`.
    seq: u64,
    /// A slot exists from the moment a writer reserves the name; readers only
    /// see it once the rename has landed and this flips to true.
    finalized: bool,
}

struct JobArtifacts {
    next_seq: u64,
    slots: HashMap<String, ArtifactSlot>,
}

/// File-backed artifact store, one directory per job.
///
/// The in-memory index is the single source of truth for visibility: a name
/// missing from the index (or not yet finalized) is `NotFound` even if bytes
/// are mid-flight on disk. The index lock is never held across file I/O.
pub struct ArtifactStore {
    root: PathBuf,
    index: Mutex<HashMap<String, JobArtifacts>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            index: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Creates the directory and index entry for a new job. Idempotent.
    pub async fn register_job(&self, job_id: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.job_dir(job_id)).await?;

        let mut index = self.index.lock().unwrap();
        index.entry(job_id.to_string()).or_insert(JobArtifacts {
            next_seq: 0,
            slots: HashMap::new(),
        });

        Ok(())
    }

    /// Writes an artifact atomically (stage into a temp sibling, then rename).
    ///
    /// Fails with `JobUnknown` if the job was never registered and `Conflict`
    /// if the name is already finalized or mid-write.
    pub async fn put(
        &self,
        job_id: &str,
        name: &str,
        role: ArtifactRole,
        bytes: &[u8],
    ) -> Result<ArtifactMeta> {
        validate_name(name)?;

        let meta = ArtifactMeta {
            name: name.to_string(),
            size: bytes.len() as u64,
            sha256: content_hash(bytes),
            role,
        };

        // Reserve the name before touching the filesystem.
        {
            let mut index = self.index.lock().unwrap();
            let job = index
                .get_mut(job_id)
                .ok_or_else(|| CoordinatorError::JobUnknown(job_id.to_string()))?;

            if job.slots.contains_key(name) {
                return Err(CoordinatorError::Conflict(format!(
                    "artifact {}/{} already exists",
                    job_id, name
                )));
            }

            let seq = job.next_seq;
            job.next_seq += 1;
            job.slots.insert(
                name.to_string(),
                ArtifactSlot {
                    meta: meta.clone(),
                    seq,
                    finalized: false,
                },
            );
        }

        let dir = self.job_dir(job_id);
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let staged = dir.join(format!(".tmp-{}-{}", name, &nonce[..8]));
        let target = dir.join(name);

        let written = async {
            tokio::fs::write(&staged, bytes).await?;
            tokio::fs::rename(&staged, &target).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&staged).await;
            let mut index = self.index.lock().unwrap();
            if let Some(job) = index.get_mut(job_id) {
                job.slots.remove(name);
            }
            return Err(e.into());
        }

        {
            let mut index = self.index.lock().unwrap();
            if let Some(slot) = index.get_mut(job_id).and_then(|j| j.slots.get_mut(name)) {
                slot.finalized = true;
            }
        }

        tracing::debug!(
            "Stored artifact {}/{} ({} bytes, {:?})",
            job_id,
            name,
            meta.size,
            role
        );

        Ok(meta)
    }

    /// Returns the content and recorded hash of a finalized artifact.
    pub async fn get(&self, job_id: &str, name: &str) -> Result<(Vec<u8>, String)> {
        let sha256 = match self.meta(job_id, name) {
            Some(meta) => meta.sha256,
            None => {
                return Err(CoordinatorError::NotFound(format!(
                    "artifact {}/{}",
                    job_id, name
                )))
            }
        };

        let bytes = tokio::fs::read(self.job_dir(job_id).join(name)).await?;
        Ok((bytes, sha256))
    }

    /// Metadata of a finalized artifact, or `None` if invisible to readers.
    pub fn meta(&self, job_id: &str, name: &str) -> Option<ArtifactMeta> {
        let index = self.index.lock().unwrap();
        index
            .get(job_id)?
            .slots
            .get(name)
            .filter(|slot| slot.finalized)
            .map(|slot| slot.meta.clone())
    }

    pub fn is_finalized(&self, job_id: &str, name: &str) -> bool {
        self.meta(job_id, name).is_some()
    }

    /// Finalized artifact names in creation order, ties broken by name.
    pub fn list(&self, job_id: &str) -> Result<Vec<String>> {
        let index = self.index.lock().unwrap();
        let job = index
            .get(job_id)
            .ok_or_else(|| CoordinatorError::JobUnknown(job_id.to_string()))?;

        let mut entries: Vec<(u64, String)> = job
            .slots
            .values()
            .filter(|slot| slot.finalized)
            .map(|slot| (slot.seq, slot.meta.name.clone()))
            .collect();
        entries.sort();

        Ok(entries.into_iter().map(|(_, name)| name).collect())
    }

    /// Promotes a task output to the job's final output. Metadata-only.
    pub fn mark_final(&self, job_id: &str, name: &str) -> Result<()> {
        let mut index = self.index.lock().unwrap();
        let slot = index
            .get_mut(job_id)
            .and_then(|job| job.slots.get_mut(name))
            .filter(|slot| slot.finalized)
            .ok_or_else(|| CoordinatorError::NotFound(format!("artifact {}/{}", job_id, name)))?;

        slot.meta.role = ArtifactRole::FinalOutput;
        Ok(())
    }

    /// Removes every artifact of a job. Readers stop seeing the job the
    /// moment the index entry is gone; the directory is deleted afterwards.
    pub async fn drop_job(&self, job_id: &str) -> Result<()> {
        {
            let mut index = self.index.lock().unwrap();
            index.remove(job_id);
        }

        match tokio::fs::remove_dir_all(self.job_dir(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Artifact names become file names, so anything that could escape the job
/// directory (or collide with the staging prefix) is rejected up front.
fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if ok {
        Ok(())
    } else {
        Err(CoordinatorError::BadRequest(format!(
            "invalid artifact name: {:?}",
            name
        )))
    }
}
