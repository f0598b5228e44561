//! Patch applier - runs one fix through locate, read, detect, transform
//! and write, and folds every fault into a [`PatchOutcome`].
//!
//! State machine per fix:
//!
//! ```text
//! Start -> Located -> NotNeeded
//!                  -> Transforming -> Written
//!       -> Faulted (from any state)
//! ```
//!
//! Every transition is logged. Nothing raised inside a fix crosses
//! [`apply_fix`].

use crate::config::FixDefinition;
use crate::detect::{detect, PatternError};
use crate::edit::{write_back, EditError, SourceSnapshot, WriteOptions, WriteResult};
use crate::locate::{LocateError, ModuleLocator};
use crate::safety::{RootGuard, SafetyError};
use crate::transform::transform;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

/// Result of attempting one fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
#[must_use = "PatchOutcome should be reported"]
pub enum PatchOutcome {
    /// Signature absent, or nothing left to rewrite.
    ///
    /// `signature_present` marks a file where the signature still matches
    /// but no occurrence fits the replacement rule, e.g. a line-mode
    /// signature followed by a trailing comment.
    AlreadyCompatible {
        file: PathBuf,
        #[serde(skip_serializing_if = "is_false")]
        signature_present: bool,
    },
    /// Signature found and the file rewritten (or, in a dry run, would be).
    Patched {
        file: PathBuf,
        replacements: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        backup: Option<PathBuf>,
    },
    Failed { stage: FaultStage, reason: String },
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PatchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, PatchOutcome::Failed { .. })
    }

    pub fn is_patched(&self) -> bool {
        matches!(self, PatchOutcome::Patched { .. })
    }

    pub fn is_already_compatible(&self) -> bool {
        matches!(self, PatchOutcome::AlreadyCompatible { .. })
    }

    /// Compatible by outcome, yet the deprecated signature is still in the file.
    pub fn is_unmatched(&self) -> bool {
        matches!(
            self,
            PatchOutcome::AlreadyCompatible {
                signature_present: true,
                ..
            }
        )
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOutcome::AlreadyCompatible {
                file,
                signature_present: false,
            } => write!(f, "Already compatible: {}", file.display()),
            PatchOutcome::AlreadyCompatible { file, .. } => write!(
                f,
                "Signature present but unmatched by the rule: {}",
                file.display()
            ),
            PatchOutcome::Patched {
                file, replacements, ..
            } => {
                write!(f, "Patched {} ({} replacements)", file.display(), replacements)
            }
            PatchOutcome::Failed { stage, reason } => {
                write!(f, "Failed ({}): {}", stage, reason)
            }
        }
    }
}

/// Where in the pipeline a fix faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStage {
    Locate,
    Read,
    Pattern,
    Write,
}

impl fmt::Display for FaultStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultStage::Locate => "locate",
            FaultStage::Read => "read",
            FaultStage::Pattern => "pattern",
            FaultStage::Write => "write",
        };
        f.write_str(name)
    }
}

/// Faults inside one fix attempt. Never escapes [`apply_fix`].
#[derive(Error, Debug)]
pub enum PatchError {
    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Guard(#[from] SafetyError),

    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: EditError },

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: EditError },
}

impl PatchError {
    pub fn stage(&self) -> FaultStage {
        match self {
            PatchError::Locate(_) | PatchError::Guard(_) => FaultStage::Locate,
            PatchError::Read { .. } => FaultStage::Read,
            PatchError::Pattern(_) => FaultStage::Pattern,
            PatchError::Write { .. } => FaultStage::Write,
        }
    }
}

/// How a fix run treats the filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Run the full pipeline but skip the write.
    pub dry_run: bool,
    pub write: WriteOptions,
}

/// Apply one fix. Always returns an outcome.
pub fn apply_fix(
    fix: &FixDefinition,
    locator: &dyn ModuleLocator,
    guard: Option<&RootGuard>,
    options: ApplyOptions,
) -> PatchOutcome {
    let span = info_span!("fix", id = %fix.id, module = %fix.module);
    let _enter = span.enter();

    match try_apply(fix, locator, guard, options) {
        Ok(outcome) => outcome,
        Err(error) => {
            let stage = error.stage();
            warn!(state = "faulted", %stage, %error, "fix failed");
            PatchOutcome::Failed {
                stage,
                reason: error.to_string(),
            }
        }
    }
}

fn try_apply(
    fix: &FixDefinition,
    locator: &dyn ModuleLocator,
    guard: Option<&RootGuard>,
    options: ApplyOptions,
) -> Result<PatchOutcome, PatchError> {
    debug!(state = "start");

    let mut path = locator.locate(&fix.module)?;
    if let Some(guard) = guard {
        path = guard.validate_path(&path)?;
    }
    debug!(state = "located", file = %path.display());

    let snapshot = SourceSnapshot::read(&path).map_err(|source| PatchError::Read {
        path: path.clone(),
        source,
    })?;

    let detection = detect(&snapshot.text, &fix.signature)?;
    if !detection.present {
        info!(state = "not_needed", file = %path.display(), "signature absent");
        return Ok(PatchOutcome::AlreadyCompatible {
            file: path,
            signature_present: false,
        });
    }

    debug!(
        state = "transforming",
        captures = detection.captures.len(),
        "signature present"
    );
    let transformed = transform(&snapshot.text, &fix.signature, &detection, &fix.replacement)?;
    if transformed.text == snapshot.text {
        warn!(
            state = "not_needed",
            file = %path.display(),
            "signature present but no occurrence matches the replacement rule"
        );
        return Ok(PatchOutcome::AlreadyCompatible {
            file: path,
            signature_present: true,
        });
    }

    if options.dry_run {
        info!(
            state = "written",
            dry_run = true,
            replacements = transformed.replacements,
            "would patch"
        );
        return Ok(PatchOutcome::Patched {
            file: path,
            replacements: transformed.replacements,
            backup: None,
        });
    }

    let written = write_back(&snapshot, &transformed.text, options.write).map_err(|source| {
        PatchError::Write {
            path: path.clone(),
            source,
        }
    })?;

    match written {
        WriteResult::Written { file, backup } => {
            info!(
                state = "written",
                file = %file.display(),
                replacements = transformed.replacements,
                "patched"
            );
            Ok(PatchOutcome::Patched {
                file,
                replacements: transformed.replacements,
                backup,
            })
        }
        WriteResult::Unchanged { file } => Ok(PatchOutcome::AlreadyCompatible {
            file,
            signature_present: false,
        }),
    }
}
