//! Fix registry - ordered, sequential, fault-tolerant execution of fixes.

use crate::applicator::{apply_fix, ApplyOptions, PatchOutcome};
use crate::config::{FixConfig, FixDefinition};
use crate::edit::WriteOptions;
use crate::locate::{Locator, ModuleLocator};
use crate::report::{RegistryReport, ReportEntry};
use crate::safety::RootGuard;
use tracing::info;

/// An ordered set of fixes bound to a module locator.
pub struct FixRegistry {
    fixes: Vec<FixDefinition>,
    locator: Box<dyn ModuleLocator>,
    guard: Option<RootGuard>,
    options: ApplyOptions,
}

impl FixRegistry {
    pub fn new(fixes: Vec<FixDefinition>, locator: impl ModuleLocator + 'static) -> Self {
        Self {
            fixes,
            locator: Box::new(locator),
            guard: None,
            options: ApplyOptions::default(),
        }
    }

    /// Build a registry from a loaded fix set.
    ///
    /// Path-based locators also get a [`RootGuard`] over their roots, and
    /// `meta.backup` turns on backups.
    pub fn from_config(config: &FixConfig, locator: Locator) -> Self {
        let guard = locator.roots().map(RootGuard::new);
        let options = ApplyOptions {
            dry_run: false,
            write: WriteOptions {
                backup: config.meta.backup,
            },
        };
        Self {
            fixes: config.fixes.clone(),
            locator: Box::new(locator),
            guard,
            options,
        }
    }

    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    /// Run every fix in order.
    ///
    /// Each fix runs to completion before the next starts, and a failed fix
    /// never stops the ones after it.
    pub fn run(&self) -> RegistryReport {
        let mut entries = Vec::with_capacity(self.fixes.len());

        for fix in &self.fixes {
            let outcome: PatchOutcome = apply_fix(
                fix,
                self.locator.as_ref(),
                self.guard.as_ref(),
                self.options,
            );
            entries.push(ReportEntry {
                id: fix.id.clone(),
                name: fix.display_name().to_string(),
                module: fix.module.clone(),
                outcome,
            });
        }

        let report = RegistryReport {
            dry_run: self.options.dry_run,
            entries,
        };
        info!(
            patched = report.patched(),
            already_compatible = report.already_compatible(),
            failed = report.failed(),
            "fix run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applicator::FaultStage;
    use crate::config::{Replacement, Signature};
    use crate::locate::LocateError;
    use std::path::PathBuf;

    /// Resolves only the modules it was given.
    struct MapLocator(Vec<(&'static str, PathBuf)>);

    impl ModuleLocator for MapLocator {
        fn locate(&self, module: &str) -> Result<PathBuf, LocateError> {
            self.0
                .iter()
                .find(|(name, _)| *name == module)
                .map(|(_, path)| path.clone())
                .ok_or_else(|| LocateError::NotFound {
                    module: module.to_string(),
                })
        }
    }

    fn text_fix(id: &str, module: &str, search: &str, replacement: &str) -> FixDefinition {
        FixDefinition {
            id: id.to_string(),
            name: String::new(),
            module: module.to_string(),
            signature: Signature::Literal {
                text: search.to_string(),
            },
            replacement: Replacement::Text {
                text: replacement.to_string(),
            },
        }
    }

    #[test]
    fn test_failed_fix_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.py");
        let c = dir.path().join("c.py");
        std::fs::write(&a, "old_a()\n").unwrap();
        std::fs::write(&c, "fine()\n").unwrap();

        let registry = FixRegistry::new(
            vec![
                text_fix("first", "a", "old_a", "new_a"),
                text_fix("second", "b", "old_b", "new_b"),
                text_fix("third", "c", "old_c", "new_c"),
            ],
            MapLocator(vec![("a", a), ("c", c)]),
        );

        let report = registry.run();
        let ids: Vec<&str> = report.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["first", "second", "third"]);
        assert!(report.entries[0].outcome.is_patched());
        assert!(matches!(
            report.entries[1].outcome,
            PatchOutcome::Failed {
                stage: FaultStage::Locate,
                ..
            }
        ));
        assert!(report.entries[2].outcome.is_already_compatible());
        assert_eq!(report.failed(), 1);
        assert!(report.has_failures());
    }

    #[test]
    fn test_empty_registry_reports_nothing() {
        let registry = FixRegistry::new(Vec::new(), MapLocator(Vec::new()));
        let report = registry.run();
        assert!(report.entries.is_empty());
        assert!(!report.has_failures());
    }
}
