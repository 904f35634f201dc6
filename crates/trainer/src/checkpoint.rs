use crate::error::TrainerError;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Weights file together with its validation score (mAP50-95).
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub path: PathBuf,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionDecision {
    Promote,
    Keep,
}

/// Promote when a candidate exists and either there is no canonical
/// checkpoint or the candidate scores at least as well.
pub fn decide(candidate: Option<f64>, canonical: Option<f64>) -> PromotionDecision {
    match (candidate, canonical) {
        (None, _) => PromotionDecision::Keep,
        (Some(_), None) => PromotionDecision::Promote,
        (Some(new), Some(current)) if new >= current => PromotionDecision::Promote,
        _ => PromotionDecision::Keep,
    }
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }

    let mut fa = File::open(a)?;
    let mut fb = File::open(b)?;
    let mut buf_a = vec![0u8; 64 * 1024];
    let mut buf_b = vec![0u8; 64 * 1024];
    loop {
        let n = fa.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        fb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// Replace `canonical` with the bytes of `candidate`.
///
/// The copy is written to a temporary file next to `canonical` and renamed
/// over it, so readers see either the old or the new weights, never a partial
/// file. Promoting identical bytes leaves the canonical file untouched.
pub fn promote_checkpoint(candidate: &Path, canonical: &Path) -> Result<(), TrainerError> {
    if !candidate.is_file() {
        return Err(TrainerError::Checkpoint(format!(
            "candidate {} does not exist",
            candidate.display()
        )));
    }

    if canonical.exists() && same_contents(candidate, canonical)? {
        tracing::info!(canonical = %canonical.display(), "Candidate already canonical");
        return Ok(());
    }

    let dir = match canonical.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut staged = NamedTempFile::new_in(&dir)?;
    io::copy(&mut File::open(candidate)?, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    staged.persist(canonical).map_err(|e| {
        TrainerError::Checkpoint(format!("failed to replace {}: {}", canonical.display(), e.error))
    })?;

    tracing::info!(
        candidate = %candidate.display(),
        canonical = %canonical.display(),
        "Checkpoint promoted"
    );
    Ok(())
}
