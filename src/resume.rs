// src/resume.rs

//! Resume algorithm: pick a checkpoint, verify the journal
//! hash chain up to it, validate on-disk file state against what the
//! checkpoint expects, optionally repair divergences, and hand the
//! journal back a cursor to resume recording from.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hash::hash_bytes;
use crate::journal::{JournalCheckpoint, RunJournal};
use crate::registry::{UnrecoverableError, UnrecoverableKind};

/// Driver-supplied knobs for a resume attempt.
#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    pub checkpoint_name: Option<String>,
    pub use_latest: bool,
    pub use_last_good: bool,
    pub strict: bool,
    pub allow_repair: bool,
    pub validate_all_files: bool,
    pub skip_diverged: bool,
    pub dry_run: bool,
    pub restore_from_checkpoint: bool,
    pub backup_before_resume: bool,
}

/// One path whose observed state didn't match what the checkpoint
/// expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivergenceKind {
    FileMissing,
    HashMismatch,
    FileExtra,
    FileError,
}

#[derive(Debug, Clone)]
pub struct Divergence {
    pub path: PathBuf,
    pub kind: DivergenceKind,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub repaired: bool,
    pub detail: Option<String>,
}

/// The outcome of resume's checkpoint selection + validation pass.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub checkpoint_name: String,
    pub files_validated: usize,
    pub files_matched: usize,
    pub files_diverged: usize,
    pub journal_integrity_ok: bool,
    pub divergences: Vec<Divergence>,
}

impl ValidationReport {
    /// No divergence remains unrepaired — resume can proceed safely.
    pub fn safe_to_resume(&self) -> bool {
        self.journal_integrity_ok && self.divergences.iter().all(|d| d.repaired || d.kind == DivergenceKind::FileExtra)
    }
}

/// Select a checkpoint: a named checkpoint wins;
/// else the latest by creation time; else the most recent *good*
/// checkpoint (every entry before it completed).
fn select_checkpoint<'a>(journal: &'a RunJournal, options: &ResumeOptions) -> Result<&'a JournalCheckpoint> {
    if let Some(name) = &options.checkpoint_name {
        return journal.checkpoints.get(name).ok_or_else(|| Error::UnknownCheckpoint(name.clone()));
    }
    if options.use_latest {
        if let Some(cp) = journal.latest_checkpoint() {
            return Ok(cp);
        }
    }
    if options.use_last_good {
        if let Some(cp) = journal.latest_good_checkpoint() {
            return Ok(cp);
        }
    }
    journal
        .latest_checkpoint()
        .or_else(|| journal.latest_good_checkpoint())
        .ok_or_else(|| Error::invalid_state("at least one checkpoint", "journal has none"))
}

fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(hash_bytes(&bytes).to_string())
}

use std::io;

/// Validate on-disk file state against `checkpoint`'s expected hashes
/// (union with `journal.file_states` when `validate_all_files` is set).
/// Returns the divergences found plus the total number of paths checked.
fn validate_files(base_dir: &Path, checkpoint: &JournalCheckpoint, journal: &RunJournal, options: &ResumeOptions) -> (Vec<Divergence>, usize) {
    let mut expected: HashMap<PathBuf, String> = checkpoint.file_hashes.clone();
    if options.validate_all_files {
        for (path, hash) in &journal.file_states {
            expected.entry(path.clone()).or_insert_with(|| hash.clone());
        }
    }
    let total = expected.len();

    let mut divergences = Vec::new();
    for (rel, expected_hash) in &expected {
        let abs = if rel.is_absolute() { rel.clone() } else { base_dir.join(rel) };
        match fs::metadata(&abs) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                divergences.push(Divergence {
                    path: rel.clone(),
                    kind: DivergenceKind::FileMissing,
                    expected_hash: Some(expected_hash.clone()),
                    actual_hash: None,
                    repaired: false,
                    detail: None,
                });
            }
            Err(e) => {
                divergences.push(Divergence {
                    path: rel.clone(),
                    kind: DivergenceKind::FileError,
                    expected_hash: Some(expected_hash.clone()),
                    actual_hash: None,
                    repaired: false,
                    detail: Some(e.to_string()),
                });
            }
            Ok(_) => match hash_file(&abs) {
                Ok(actual) if actual == *expected_hash => {}
                Ok(actual) => {
                    divergences.push(Divergence {
                        path: rel.clone(),
                        kind: DivergenceKind::HashMismatch,
                        expected_hash: Some(expected_hash.clone()),
                        actual_hash: Some(actual),
                        repaired: false,
                        detail: None,
                    });
                }
                Err(e) => {
                    divergences.push(Divergence {
                        path: rel.clone(),
                        kind: DivergenceKind::FileError,
                        expected_hash: Some(expected_hash.clone()),
                        actual_hash: None,
                        repaired: false,
                        detail: Some(e.to_string()),
                    });
                }
            },
        }
    }
    (divergences, total)
}

/// Repair divergences in place where the checkpoint's content map has a
/// pre-image to restore; `file_missing` and `hash_mismatch` are
/// repairable this way, `file_extra` is only ever a warning and is left
/// untouched, and anything else without checkpoint content surfaces an
/// `UnrecoverableError::SnapshotMissing`.
fn repair(base_dir: &Path, checkpoint: &JournalCheckpoint, divergences: &mut [Divergence]) -> Result<()> {
    let Some(contents) = &checkpoint.file_contents else {
        if divergences.iter().any(|d| matches!(d.kind, DivergenceKind::FileMissing | DivergenceKind::HashMismatch)) {
            return Err(Error::from(UnrecoverableError::new(
                UnrecoverableKind::SnapshotMissing,
                "checkpoint has no content map to repair from",
            )));
        }
        return Ok(());
    };

    for divergence in divergences.iter_mut() {
        match divergence.kind {
            DivergenceKind::FileMissing | DivergenceKind::HashMismatch => {
                let Some(content) = contents.get(&divergence.path) else {
                    return Err(Error::from(UnrecoverableError::new(
                        UnrecoverableKind::SnapshotMissing,
                        format!("no checkpoint content for {}", divergence.path.display()),
                    )));
                };
                let abs = if divergence.path.is_absolute() { divergence.path.clone() } else { base_dir.join(&divergence.path) };
                if let Some(parent) = abs.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&abs, content)?;
                divergence.repaired = true;
            }
            DivergenceKind::FileExtra | DivergenceKind::FileError => {}
        }
    }
    Ok(())
}

/// Run the full resume algorithm: select, verify, validate, and
/// (unless `dry_run`) repair/restore/rewind. Returns the
/// [`ValidationReport`] either way; a `dry_run` stops there without
/// mutating the journal or filesystem.
pub fn resume(journal: &mut RunJournal, base_dir: &Path, options: &ResumeOptions) -> Result<ValidationReport> {
    let checkpoint = select_checkpoint(journal, options)?.clone();

    // Step 2: verify journal integrity by recomputing the hash up to
    // the checkpoint's entry index and comparing.
    let recomputed = journal.hash_up_to(checkpoint.entry_index)?;
    let journal_integrity_ok = recomputed.to_string() == checkpoint.journal_hash;
    if !journal_integrity_ok && options.strict {
        return Err(Error::JournalIntegrity {
            expected: checkpoint.journal_hash.clone(),
            found: recomputed.to_string(),
        });
    }

    let (mut divergences, files_validated) = validate_files(base_dir, &checkpoint, journal, options);

    // Step 4: handle divergences.
    if !divergences.is_empty() {
        if options.strict {
            return Err(Error::invalid_state(
                "no file divergence",
                format!("{} diverged path(s) at checkpoint {}", divergences.len(), checkpoint.name),
            ));
        }
        if options.allow_repair && !options.dry_run {
            repair(base_dir, &checkpoint, &mut divergences)?;
        }
    }

    let files_diverged = divergences.len();
    let files_matched = files_validated.saturating_sub(files_diverged);

    let report = ValidationReport {
        checkpoint_name: checkpoint.name.clone(),
        files_validated,
        files_matched,
        files_diverged,
        journal_integrity_ok,
        divergences,
    };

    // Step 5: dry-run stops here without mutating anything.
    if options.dry_run {
        return Ok(report);
    }

    if !options.skip_diverged && !report.safe_to_resume() && options.allow_repair {
        // repair() already ran above; anything still unrepaired here is
        // a file_extra warning, which is fine to proceed past.
    } else if !options.skip_diverged && !report.safe_to_resume() && !options.allow_repair {
        return Err(Error::invalid_state("safe to resume", "unrepaired divergences and repair not allowed"));
    }

    // Step 6: optional pre-resume backup checkpoint.
    if options.backup_before_resume {
        journal.create_checkpoint(format!("pre_resume_{}", checkpoint.entry_index), Some("automatic pre-resume backup".to_string()), true)?;
    }

    // Step 7: optionally overwrite files with checkpoint contents
    // wholesale (distinct from repair, which only touches diverged
    // paths).
    if options.restore_from_checkpoint {
        if let Some(contents) = &checkpoint.file_contents {
            for (rel, content) in contents {
                let abs = if rel.is_absolute() { rel.clone() } else { base_dir.join(rel) };
                if let Some(parent) = abs.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&abs, content)?;
            }
        }
    }

    // Step 8: rewind the journal to the checkpoint's entry index.
    journal.resume_from_entry(checkpoint.entry_index)?;

    Ok(report)
}
