// src/path.rs

//! Project-relative path resolution.
//!
//! Every path the File Transaction Engine stages comes in relative to a
//! transaction's base directory. Before it touches the filesystem it is
//! sanitised and joined defensively, so a model-generated edit can never
//! escape the project tree via `..`, an absolute path, or a symlink that
//! resolves outside the root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Reject anything that looks like an escape attempt and normalize the
/// rest: no leading slash, no `..`, `.` components dropped, empty input
/// rejected.
///
/// ```
/// use patchtx::path::sanitize_path;
/// assert_eq!(sanitize_path("a/b.rs").unwrap().to_str().unwrap(), "a/b.rs");
/// assert!(sanitize_path("../escape").is_err());
/// assert!(sanitize_path("/abs/path").is_err());
/// ```
pub fn sanitize_path(rel: impl AsRef<str>) -> Result<PathBuf> {
    let rel = rel.as_ref();
    if rel.is_empty() {
        return Err(Error::InvalidPath("empty path".to_string()));
    }

    let mut out = PathBuf::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(rel.to_string()));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::PathTraversal(rel.to_string()));
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(Error::InvalidPath(rel.to_string()));
    }

    Ok(out)
}

/// Sanitize `rel` and join it under `base`, then defend against symlink
/// escapes: if `base` exists on disk, canonicalize it and verify the
/// joined path's existing ancestor still lives under it.
pub fn safe_join(base: &Path, rel: impl AsRef<str>) -> Result<PathBuf> {
    let sanitized = sanitize_path(rel)?;
    let joined = base.join(&sanitized);

    if let Ok(canonical_base) = base.canonicalize() {
        let mut probe = joined.as_path();
        loop {
            if let Ok(canonical_probe) = probe.canonicalize() {
                if !canonical_probe.starts_with(&canonical_base) {
                    return Err(Error::PathTraversal(sanitized.display().to_string()));
                }
                break;
            }
            match probe.parent() {
                Some(parent) if parent != probe => probe = parent,
                _ => break,
            }
        }
    }

    Ok(joined)
}

/// Stricter sibling of [`sanitize_path`] for bare filenames: rejects any
/// path separator outright instead of normalizing it away.
pub fn sanitize_filename(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidPath(name.to_string()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidPath(name.to_string()));
    }
    Ok(name)
}
