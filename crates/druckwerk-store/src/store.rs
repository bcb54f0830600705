// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The artifact store proper.
//
// Handles are 32 lowercase hex characters (128 random bits) and never
// contain path separators. A handle is either present with a readable file
// or absent; cross-owner lookups report `NotFound` without revealing
// whether the handle exists for someone else.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::{FileHandle, OwnerId};

/// A live artifact entry.
#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    created_at: DateTime<Utc>,
}

/// Owner-scoped map from opaque handle to on-disk temp file.
///
/// Every mutation serializes on a per-owner lock; reads are lock-free
/// snapshots of the handle map.
pub struct ArtifactStore {
    root: PathBuf,
    entries: DashMap<(OwnerId, FileHandle), Entry>,
    owner_locks: DashMap<OwnerId, Arc<Mutex<()>>>,
}

impl ArtifactStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!(root = %root.display(), "artifact store ready");
        Ok(Self {
            root,
            entries: DashMap::new(),
            owner_locks: DashMap::new(),
        })
    }

    fn owner_lock(&self, owner: &OwnerId) -> Arc<Mutex<()>> {
        self.owner_locks
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Store `bytes` as a new artifact and return its handle.
    ///
    /// The write is atomic: bytes land in a `.part` file that is renamed
    /// into place, so a handle never points at a half-written file.
    #[instrument(skip(self, bytes), fields(owner = %owner, extension, bytes_len = bytes.len()))]
    pub async fn put(&self, owner: &OwnerId, extension: &str, bytes: &[u8]) -> Result<FileHandle> {
        let extension = sanitize_extension(extension)?;
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;

        let handle = new_handle();
        let path = self.root.join(format!("{}.{}", handle.as_str(), extension));
        let part = self.root.join(format!("{}.{}.part", handle.as_str(), extension));

        tokio::fs::write(&part, bytes).await?;
        tokio::fs::rename(&part, &path).await?;

        self.entries.insert(
            (owner.clone(), handle.clone()),
            Entry {
                path: path.clone(),
                created_at: Utc::now(),
            },
        );
        debug!(handle = %handle, path = %path.display(), "artifact stored");
        Ok(handle)
    }

    /// Resolve a handle to its absolute path.
    ///
    /// Cross-owner access is indistinguishable from a missing handle.
    pub fn path(&self, owner: &OwnerId, handle: &FileHandle) -> Result<PathBuf> {
        self.entries
            .get(&(owner.clone(), handle.clone()))
            .map(|entry| entry.path.clone())
            .ok_or_else(|| DruckwerkError::NotFound(format!("no such file: {handle}")))
    }

    /// When the artifact was created, if it exists for this owner.
    pub fn created_at(&self, owner: &OwnerId, handle: &FileHandle) -> Option<DateTime<Utc>> {
        self.entries
            .get(&(owner.clone(), handle.clone()))
            .map(|entry| entry.created_at)
    }

    /// Read the full contents of an owned artifact.
    pub async fn read(&self, owner: &OwnerId, handle: &FileHandle) -> Result<Vec<u8>> {
        let path = self.path(owner, handle)?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Replace an artifact with new bytes under a fresh handle.
    ///
    /// Either the new artifact exists and the old one is gone, or the old
    /// one is untouched (when writing the replacement fails).
    #[instrument(skip(self, bytes), fields(owner = %owner, old = %old, bytes_len = bytes.len()))]
    pub async fn replace(
        &self,
        owner: &OwnerId,
        old: &FileHandle,
        extension: &str,
        bytes: &[u8],
    ) -> Result<FileHandle> {
        let extension = sanitize_extension(extension)?;
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;

        let old_entry = self
            .entries
            .get(&(owner.clone(), old.clone()))
            .map(|e| e.clone())
            .ok_or_else(|| DruckwerkError::NotFound(format!("no such file: {old}")))?;

        let handle = new_handle();
        let path = self.root.join(format!("{}.{}", handle.as_str(), extension));
        let part = self.root.join(format!("{}.{}.part", handle.as_str(), extension));

        tokio::fs::write(&part, bytes).await?;
        tokio::fs::rename(&part, &path).await?;

        self.entries.insert(
            (owner.clone(), handle.clone()),
            Entry {
                path,
                created_at: Utc::now(),
            },
        );
        self.entries.remove(&(owner.clone(), old.clone()));
        if let Err(e) = tokio::fs::remove_file(&old_entry.path).await {
            warn!(path = %old_entry.path.display(), %e, "could not unlink replaced artifact");
        }
        debug!(old = %old, new = %handle, "artifact replaced");
        Ok(handle)
    }

    /// Delete an artifact. Succeeds when the handle was already absent.
    #[instrument(skip(self), fields(owner = %owner, handle = %handle))]
    pub async fn delete(&self, owner: &OwnerId, handle: &FileHandle) -> Result<()> {
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;

        if let Some((_, entry)) = self.entries.remove(&(owner.clone(), handle.clone())) {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => debug!(path = %entry.path.display(), "artifact deleted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Best-effort removal of every live artifact, for shutdown.
    pub async fn on_terminate(&self) {
        let keys: Vec<_> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        info!(count = keys.len(), "sweeping artifacts on termination");
        for (owner, handle) in keys {
            if let Err(e) = self.delete(&owner, &handle).await {
                warn!(%owner, %handle, %e, "artifact sweep failed");
            }
        }
    }
}

/// Generate a fresh 128-bit handle.
fn new_handle() -> FileHandle {
    let mut raw = [0u8; 16];
    rand::rng().fill_bytes(&mut raw);
    FileHandle(hex::encode(raw))
}

/// Accept only plain alphanumeric extensions (no dots, no separators).
fn sanitize_extension(extension: &str) -> Result<String> {
    let trimmed = extension.trim_start_matches('.');
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DruckwerkError::InvalidArgument(format!(
            "bad artifact extension '{extension}'"
        )));
    }
    Ok(trimmed.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("artifacts")).expect("store");
        (dir, store)
    }

    #[tokio::test]
    async fn put_and_read_round_trip() {
        let (_dir, store) = store();
        let owner = OwnerId::from("alice");

        let handle = store.put(&owner, "pdf", b"%PDF-1.5").await.expect("put");
        let bytes = store.read(&owner, &handle).await.expect("read");
        assert_eq!(bytes, b"%PDF-1.5");
        assert!(store.created_at(&owner, &handle).is_some());
    }

    #[tokio::test]
    async fn handles_are_opaque() {
        let (_dir, store) = store();
        let owner = OwnerId::from("alice");

        let handle = store.put(&owner, ".PDF", b"x").await.expect("put");
        assert_eq!(handle.as_str().len(), 32);
        assert!(handle.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!handle.as_str().contains('/'));
        assert!(!handle.as_str().contains('.'));
    }

    #[tokio::test]
    async fn cross_owner_lookup_is_not_found() {
        let (_dir, store) = store();
        let alice = OwnerId::from("alice");
        let bob = OwnerId::from("bob");

        let handle = store.put(&alice, "pdf", b"x").await.expect("put");
        assert!(store.path(&alice, &handle).is_ok());

        let err = store.path(&bob, &handle).expect_err("must be hidden");
        assert!(err.is_not_found());
        let err = store.read(&bob, &handle).await.expect_err("must be hidden");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn replace_swaps_handle_and_file() {
        let (_dir, store) = store();
        let owner = OwnerId::from("alice");

        let old = store.put(&owner, "pdf", b"one").await.expect("put");
        let old_path = store.path(&owner, &old).expect("path");

        let new = store.replace(&owner, &old, "pdf", b"two").await.expect("replace");
        assert_ne!(old, new);
        assert!(store.path(&owner, &old).is_err());
        assert!(!old_path.exists());
        assert_eq!(store.read(&owner, &new).await.expect("read"), b"two");
    }

    #[tokio::test]
    async fn replace_of_missing_handle_fails() {
        let (_dir, store) = store();
        let owner = OwnerId::from("alice");
        let err = store
            .replace(&owner, &FileHandle::from("feedface"), "pdf", b"x")
            .await
            .expect_err("no such handle");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        let owner = OwnerId::from("alice");

        let handle = store.put(&owner, "pdf", b"x").await.expect("put");
        let path = store.path(&owner, &handle).expect("path");

        store.delete(&owner, &handle).await.expect("first delete");
        assert!(!path.exists());
        store.delete(&owner, &handle).await.expect("second delete");
        store
            .delete(&owner, &FileHandle::from("never-existed"))
            .await
            .expect("absent delete");
    }

    #[tokio::test]
    async fn terminate_sweeps_all_owners() {
        let (_dir, store) = store();
        let alice = OwnerId::from("alice");
        let bob = OwnerId::from("bob");

        let h1 = store.put(&alice, "pdf", b"x").await.expect("put");
        let h2 = store.put(&bob, "pdf", b"y").await.expect("put");
        let p1 = store.path(&alice, &h1).expect("path");
        let p2 = store.path(&bob, &h2).expect("path");

        store.on_terminate().await;
        assert!(!p1.exists());
        assert!(!p2.exists());
        assert!(store.path(&alice, &h1).is_err());
        assert!(store.path(&bob, &h2).is_err());
    }

    #[tokio::test]
    async fn bad_extension_is_rejected() {
        let (_dir, store) = store();
        let owner = OwnerId::from("alice");
        assert!(store.put(&owner, "p/df", b"x").await.is_err());
        assert!(store.put(&owner, "", b"x").await.is_err());
        assert!(store.put(&owner, "..", b"x").await.is_err());
    }
}
