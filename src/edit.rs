use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Suffix of the pristine copy kept when backups are enabled.
pub const BACKUP_SUFFIX: &str = "orig";

/// Full text of one target file at one point in time.
///
/// Read fresh for every fix and dropped when the fix finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub path: PathBuf,
    pub text: String,
    /// What the file must still contain when the rewrite happens.
    pub verification: EditVerification,
}

/// Verification strategy for the on-disk content before a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (faster for large files)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("{file} changed on disk since it was read")]
    SnapshotMismatch { file: PathBuf },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{file} is not valid UTF-8: {source}")]
    Utf8 {
        file: PathBuf,
        source: std::str::Utf8Error,
    },

    #[error("Path has no parent directory: {0}")]
    NoParent(PathBuf),
}

/// Options for [`write_back`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Keep `<file>.orig` with the content before the first rewrite.
    pub backup: bool,
}

/// Result of writing a snapshot back.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "WriteResult should be checked for written/unchanged"]
pub enum WriteResult {
    Written {
        file: PathBuf,
        backup: Option<PathBuf>,
    },
    /// New text equals the snapshot; nothing touched.
    Unchanged { file: PathBuf },
}

impl SourceSnapshot {
    /// Read the current content of `path`.
    pub fn read(path: impl Into<PathBuf>) -> Result<Self, EditError> {
        let path = path.into();
        let bytes = fs::read(&path)?;
        let text = String::from_utf8(bytes).map_err(|e| EditError::Utf8 {
            file: path.clone(),
            source: e.utf8_error(),
        })?;
        let verification = EditVerification::from_text(&text);
        Ok(Self {
            path,
            text,
            verification,
        })
    }
}

/// Backup location for `path`: `<path>.orig`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Replace the snapshot's file with `new_text`.
///
/// The file is re-read and checked against the snapshot first, so a file
/// modified by someone else in the meantime is left alone. The write is
/// atomic (tempfile + fsync + rename) and keeps the original permissions.
pub fn write_back(
    snapshot: &SourceSnapshot,
    new_text: &str,
    options: WriteOptions,
) -> Result<WriteResult, EditError> {
    let path = &snapshot.path;
    if new_text == snapshot.text {
        return Ok(WriteResult::Unchanged { file: path.clone() });
    }

    let current = fs::read(path)?;
    let current_text = std::str::from_utf8(&current).map_err(|source| EditError::Utf8 {
        file: path.clone(),
        source,
    })?;
    if !snapshot.verification.matches(current_text) {
        return Err(EditError::SnapshotMismatch { file: path.clone() });
    }

    let permissions = fs::metadata(path)?.permissions();

    let backup = if options.backup {
        let backup = backup_path(path);
        // Never replace an existing backup: it holds the pristine file.
        if !backup.exists() {
            atomic_write(&backup, &current, &permissions)?;
            debug!(backup = %backup.display(), "wrote backup");
        }
        Some(backup)
    } else {
        None
    };

    atomic_write(path, new_text.as_bytes(), &permissions)?;

    // Bytecode caches compare the source mtime.
    let now = filetime::FileTime::now();
    filetime::set_file_mtime(path, now)?;

    Ok(WriteResult::Written {
        file: path.clone(),
        backup,
    })
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or nothing changes.
fn atomic_write(path: &Path, content: &[u8], permissions: &fs::Permissions) -> Result<(), EditError> {
    // Same directory keeps the rename on one filesystem.
    let parent = path
        .parent()
        .ok_or_else(|| EditError::NoParent(path.to_path_buf()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), permissions.clone())?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
