// src/snapshot.rs

//! Pre-image capture for files touched by a transaction.
//!
//! Keyed by `sha256(absolute path)`, not by content — unlike a
//! content-addressed object store, the goal here is "what did this path
//! look like before the transaction touched it", so two files with
//! identical content still get distinct snapshot entries. Content is
//! kept in memory only up to 1 MiB; anything larger is read back from
//! disk on restore.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hash::{hash_bytes, hash_str};

const INLINE_LIMIT: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Original absolute path this is a pre-image of.
    pub path: PathBuf,
    /// Whether the path existed at capture time.
    pub existed: bool,
    /// SHA-256 of the original content, if it existed.
    pub hash: Option<String>,
    /// Unix file mode bits, if it existed and the platform supports them.
    pub mode: Option<u32>,
    pub captured_at: DateTime<Utc>,
    /// True if `content` was small enough to also be cached in memory.
    pub inline: bool,
}

#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub meta: SnapshotMeta,
    /// Original bytes, if `meta.inline` and present on disk.
    pub content: Option<Vec<u8>>,
}

/// Snapshot store for a single transaction's snapshot directory.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_for(&self, path: &Path) -> String {
        hash_str(&path.display().to_string()).to_string()
    }

    fn snapshot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.snapshot"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.meta.json"))
    }

    /// Does a snapshot already exist for `path`? Re-staging the same path
    /// must not overwrite its first pre-image.
    pub fn exists(&self, path: &Path) -> bool {
        self.meta_path(&self.key_for(path)).exists()
    }

    /// Capture the pre-image of `path` if one hasn't been captured yet.
    /// No-op if a snapshot for this path already exists (first-staging
    /// invariant — exactly one snapshot per path per transaction).
    pub fn capture(&self, path: &Path) -> Result<FileSnapshot> {
        let key = self.key_for(path);
        if let Some(existing) = self.load(&key)? {
            return Ok(existing);
        }

        let meta_path = self.meta_path(&key);
        match fs::metadata(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let meta = SnapshotMeta {
                    path: path.to_path_buf(),
                    existed: false,
                    hash: None,
                    mode: None,
                    captured_at: Utc::now(),
                    inline: false,
                };
                write_meta(&meta_path, &meta)?;
                Ok(FileSnapshot { meta, content: None })
            }
            Err(e) => Err(e.into()),
            Ok(metadata) => {
                let content = fs::read(path)?;
                let hash = hash_bytes(&content);
                let inline = content.len() as u64 <= INLINE_LIMIT;

                fs::write(self.snapshot_path(&key), &content)?;

                let meta = SnapshotMeta {
                    path: path.to_path_buf(),
                    existed: true,
                    hash: Some(hash.to_string()),
                    mode: file_mode(&metadata),
                    captured_at: Utc::now(),
                    inline,
                };
                write_meta(&meta_path, &meta)?;

                Ok(FileSnapshot {
                    meta,
                    content: if inline { Some(content) } else { None },
                })
            }
        }
    }

    /// Load a previously captured snapshot by path, if one exists.
    pub fn get(&self, path: &Path) -> Result<Option<FileSnapshot>> {
        self.load(&self.key_for(path))
    }

    fn load(&self, key: &str) -> Result<Option<FileSnapshot>> {
        let meta_path = self.meta_path(key);
        if !meta_path.exists() {
            return Ok(None);
        }
        let meta: SnapshotMeta = serde_json::from_slice(&fs::read(&meta_path)?)?;
        let snapshot_path = self.snapshot_path(key);
        let content = if meta.existed && snapshot_path.exists() {
            Some(fs::read(&snapshot_path)?)
        } else {
            None
        };
        Ok(Some(FileSnapshot { meta, content }))
    }

    /// Restore `path` to this snapshot's pre-image: write back the
    /// content (reading it from disk if it wasn't cached inline) or
    /// remove the path if it didn't exist pre-transaction.
    pub fn restore(&self, snapshot: &FileSnapshot) -> Result<()> {
        let target = &snapshot.meta.path;
        if !snapshot.meta.existed {
            if target.exists() {
                fs::remove_file(target)?;
            }
            return Ok(());
        }

        let content = match &snapshot.content {
            Some(c) => c.clone(),
            None => {
                let key = self.key_for(target);
                fs::read(self.snapshot_path(&key))?
            }
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, &content)?;

        #[cfg(unix)]
        if let Some(mode) = snapshot.meta.mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(target, fs::Permissions::from_mode(mode))?;
        }

        Ok(())
    }

    /// List every snapshot key currently persisted (used by crash
    /// recovery to reload snapshots without knowing the path set ahead
    /// of time).
    pub fn load_all(&self) -> Result<Vec<FileSnapshot>> {
        let mut out = Vec::new();
        if !self.dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(key) = name.strip_suffix(".meta.json") {
                if let Some(snap) = self.load(key)? {
                    out.push(snap);
                }
            }
        }
        Ok(out)
    }

    /// Remove the entire snapshot directory. Called on commit and after
    /// a successful full rollback.
    pub fn clear(self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

fn write_meta(path: &Path, meta: &SnapshotMeta) -> Result<()> {
    let json = serde_json::to_vec_pretty(meta)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> Option<u32> {
    None
}
