//! In-memory index of finished build artifacts.
//!
//! The store answers "which file should be sent for this build id" and owns
//! the artifacts' lifetime on disk.
//!
//! Expiry policy: every artifact's files are deleted a fixed TTL after it is
//! registered, whether or not it was downloaded. Downloads are one-time: a
//! download checks out a [`DownloadLease`]; when the transfer completes the
//! entry becomes delivered and can no longer be resolved. An entry under lease
//! is never deleted; if it expires mid-transfer it is deleted as soon as the
//! lease is released.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::build_id::BuildId;
use crate::error::{BuildError, BuildResult};

/// Files produced by one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub unsigned: PathBuf,
    pub signed: Option<PathBuf>,
}

impl Artifact {
    pub fn is_signed(&self) -> bool {
        self.signed.is_some()
    }

    /// The file served for downloads: the signed one when present.
    pub fn download_path(&self) -> &Path {
        self.signed.as_deref().unwrap_or(&self.unsigned)
    }

    fn files(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.unsigned.as_path()).chain(self.signed.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Downloading,
    Delivered,
}

#[derive(Debug)]
struct Entry {
    artifact: Artifact,
    expires_at: Instant,
    state: EntryState,
}

/// Counts of tracked entries by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStatus {
    pub pending: usize,
    pub downloading: usize,
    pub delivered: usize,
}

#[derive(Debug)]
pub struct ArtifactStore {
    entries: Mutex<HashMap<BuildId, Entry>>,
    ttl: Duration,
}

impl ArtifactStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BuildId, Entry>> {
        // The map stays consistent even if a holder panicked.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Track a finished build's artifact. Fails if the id is already in use.
    pub fn register(&self, id: BuildId, artifact: Artifact) -> BuildResult<()> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return Err(BuildError::Internal(format!(
                "build id {id} is already registered"
            )));
        }
        entries.insert(
            id,
            Entry {
                artifact,
                expires_at: Instant::now() + self.ttl,
                state: EntryState::Pending,
            },
        );
        Ok(())
    }

    /// The file a download for `id` would serve right now.
    pub fn resolve(&self, id: &BuildId) -> BuildResult<PathBuf> {
        let entries = self.lock();
        let entry = entries
            .get(id)
            .filter(|e| e.state == EntryState::Pending && e.expires_at > Instant::now())
            .ok_or_else(|| not_found(id))?;
        let path = entry.artifact.download_path();
        if !path.is_file() {
            return Err(not_found(id));
        }
        Ok(path.to_path_buf())
    }

    pub fn state(&self, id: &BuildId) -> Option<EntryState> {
        self.lock().get(id).map(|e| e.state)
    }

    /// Reserve the artifact for a single download.
    ///
    /// While the returned lease is alive, other checkouts of the same id fail
    /// and the files are not deleted.
    pub fn checkout(self: &Arc<Self>, id: &BuildId) -> BuildResult<DownloadLease> {
        let path = self.resolve(id)?;
        let mut entries = self.lock();
        let entry = entries
            .get_mut(id)
            .filter(|e| e.state == EntryState::Pending)
            .ok_or_else(|| not_found(id))?;
        entry.state = EntryState::Downloading;
        Ok(DownloadLease {
            store: Arc::clone(self),
            id: id.clone(),
            path,
            completed: false,
        })
    }

    /// Delete every entry whose TTL has passed at `now` and is not under lease.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let expired: Vec<(BuildId, Artifact)> = {
            let mut entries = self.lock();
            let ids: Vec<BuildId> = entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now && e.state != EntryState::Downloading)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|e| (id, e.artifact)))
                .collect()
        };

        for (id, artifact) in &expired {
            delete_artifact_files(id, artifact);
            info!(op = "store.expired", build_id = %id, "Artifact expired and removed");
        }
        expired.len()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Drop every entry not under lease and delete its files.
    pub fn purge(&self) -> usize {
        self.sweep_at(Instant::now() + self.ttl)
    }

    pub fn status(&self) -> StoreStatus {
        let entries = self.lock();
        let mut status = StoreStatus::default();
        for entry in entries.values() {
            match entry.state {
                EntryState::Pending => status.pending += 1,
                EntryState::Downloading => status.downloading += 1,
                EntryState::Delivered => status.delivered += 1,
            }
        }
        status
    }

    fn release(&self, id: &BuildId, completed: bool) {
        let removed = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            entry.state = if completed {
                EntryState::Delivered
            } else {
                EntryState::Pending
            };
            if entry.expires_at <= Instant::now() {
                entries.remove(id)
            } else {
                None
            }
        };
        if let Some(entry) = removed {
            delete_artifact_files(id, &entry.artifact);
            info!(op = "store.expired", build_id = %id, "Artifact expired during download and removed");
        }
    }
}

/// Exclusive, one-shot access to an artifact for the duration of a transfer.
///
/// Call [`DownloadLease::complete`] once every byte was handed off; dropping
/// the lease without completing puts the artifact back up for download.
#[derive(Debug)]
pub struct DownloadLease {
    store: Arc<ArtifactStore>,
    id: BuildId,
    path: PathBuf,
    completed: bool,
}

impl DownloadLease {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn build_id(&self) -> &BuildId {
        &self.id
    }

    /// File name to suggest to the client.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.apk", self.id))
    }

    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for DownloadLease {
    fn drop(&mut self) {
        self.store.release(&self.id, self.completed);
    }
}

fn not_found(id: &BuildId) -> BuildError {
    BuildError::NotFound(format!("no artifact for build {id}"))
}

fn delete_artifact_files(id: &BuildId, artifact: &Artifact) {
    for path in artifact.files() {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                op = "store.delete_failed",
                build_id = %id,
                path = %path.display(),
                error = %e,
                "Failed to delete artifact file"
            ),
        }
    }
}

/// SHA-256 and size of a file, streamed.
pub fn sha256_file(path: &Path) -> io::Result<(String, u64)> {
    let f = File::open(path)?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}
