//! site-patcher: compatibility patching of installed Python package sources
//!
//! Rewrites known-incompatible constructs inside already-installed
//! third-party modules so that code depending on them keeps working with
//! newer releases, without touching its own call sites.
//!
//! # Architecture
//!
//! One fix flows through a fixed pipeline:
//!
//! 1. [`locate`]: dotted module name to source file
//! 2. [`detect`]: is the deprecated signature still present
//! 3. [`transform`]: textual replacement of every matching occurrence
//! 4. [`edit`]: verified atomic write-back
//!
//! [`applicator::apply_fix`] drives the pipeline for one fix and turns every
//! fault into a [`PatchOutcome`]; [`FixRegistry`] runs an ordered fix set
//! and collects a [`RegistryReport`].
//!
//! # Safety
//!
//! - A fix never rewrites a file whose signature is absent
//! - Re-running a fix set is a no-op
//! - The file is re-checked against its snapshot right before the write
//! - Atomic file writes (tempfile + fsync + rename), permissions kept
//! - Optional `.orig` backups of the pristine file
//!
//! # Example
//!
//! ```no_run
//! use site_patcher::{builtin_fix_set, FixRegistry, Locator};
//!
//! let config = builtin_fix_set().expect("built-in fixes are valid");
//! let report = FixRegistry::from_config(&config, Locator::from_env()).run();
//! println!("{report}");
//! ```

pub mod applicator;
pub mod cache;
pub mod config;
pub mod detect;
pub mod edit;
pub mod locate;
pub mod registry;
pub mod report;
pub mod safety;
pub mod transform;

// Re-exports
pub use applicator::{apply_fix, ApplyOptions, FaultStage, PatchError, PatchOutcome};
pub use config::{
    builtin_fix_set, load_from_path, load_from_str, ConfigError, Derive, FixConfig,
    FixDefinition, Replacement, Signature,
};
pub use detect::{detect, Detection, PatternError};
pub use edit::{EditError, SourceSnapshot, WriteOptions};
pub use locate::{InterpreterLocator, LocateError, Locator, ModuleLocator, SearchPathLocator};
pub use registry::FixRegistry;
pub use report::{RegistryReport, ReportEntry};
pub use safety::{RootGuard, SafetyError};
pub use transform::{transform, Transformed};

use colored::Colorize;

/// Apply the built-in fix set to the current environment.
///
/// Meant to be called once at startup, before the patched modules are
/// imported. Modules are located with [`Locator::from_env`]. Prints one
/// status line per fix; failures are reported and never returned.
pub fn apply_all_fixes() {
    println!("Applying compatibility fixes for newer dependencies...");

    let config = match builtin_fix_set() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Error loading compatibility fixes: {}", "✗".red(), e);
            return;
        }
    };

    let report = FixRegistry::from_config(&config, Locator::from_env()).run();
    report.print_status();

    if report.has_failures() {
        eprintln!(
            "{} {} of {} compatibility fixes failed",
            "✗".red(),
            report.failed(),
            report.entries.len()
        );
    } else {
        println!("{} All compatibility fixes applied", "✓".green());
    }
}
