//! Fix run reports and their console rendering.

use crate::applicator::PatchOutcome;
use colored::Colorize;
use serde::Serialize;
use std::fmt;

/// Outcome of one fix, with the fix's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub id: String,
    pub name: String,
    pub module: String,
    #[serde(flatten)]
    pub outcome: PatchOutcome,
}

/// Outcomes of a full registry run, in fix order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryReport {
    pub dry_run: bool,
    pub entries: Vec<ReportEntry>,
}

impl RegistryReport {
    pub fn patched(&self) -> usize {
        self.count(PatchOutcome::is_patched)
    }

    pub fn already_compatible(&self) -> usize {
        self.count(PatchOutcome::is_already_compatible)
    }

    pub fn failed(&self) -> usize {
        self.count(PatchOutcome::is_failed)
    }

    /// Compatible fixes whose signature is still in the file.
    pub fn unmatched(&self) -> usize {
        self.count(PatchOutcome::is_unmatched)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, pred: fn(&PatchOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    /// Print one colored status line per fix.
    pub fn print_status(&self) {
        for entry in &self.entries {
            print_entry(entry, self.dry_run);
        }
    }

    /// Concatenate the entries of several runs, in order.
    pub fn combine<'a>(dry_run: bool, reports: impl IntoIterator<Item = &'a RegistryReport>) -> Self {
        Self {
            dry_run,
            entries: reports
                .into_iter()
                .flat_map(|r| r.entries.iter().cloned())
                .collect(),
        }
    }

    /// Print the totals.
    pub fn print_summary(&self) {
        let verb = if self.dry_run { "would patch" } else { "patched" };
        println!("{}", "Summary:".bold());
        println!("  {} {}", format!("{}", self.patched()).green(), verb);
        println!(
            "  {} already compatible",
            format!("{}", self.already_compatible()).yellow()
        );
        println!("  {} failed", format!("{}", self.failed()).red());
        if self.unmatched() > 0 {
            println!(
                "  {} with the signature still present",
                format!("{}", self.unmatched()).yellow()
            );
        }
    }
}

fn print_entry(entry: &ReportEntry, dry_run: bool) {
    match &entry.outcome {
        PatchOutcome::Patched {
            file,
            replacements,
            backup,
        } => {
            let verb = if dry_run { "Would patch" } else { "Patched" };
            println!(
                "{} {}: {} {} ({} replacements)",
                "✓".green(),
                entry.name,
                verb,
                file.display(),
                replacements
            );
            if let Some(backup) = backup {
                println!("  {}", format!("Backup: {}", backup.display()).dimmed());
            }
        }
        PatchOutcome::AlreadyCompatible {
            file,
            signature_present: false,
        } => {
            println!(
                "{} {}: No need to patch {}",
                "⊙".yellow(),
                entry.name,
                file.display()
            );
        }
        PatchOutcome::AlreadyCompatible { file, .. } => {
            println!(
                "{} {}: {} {}",
                "⚠".yellow(),
                entry.name,
                "Signature still present but not rewritten in".yellow(),
                file.display()
            );
        }
        PatchOutcome::Failed { stage, reason } => {
            eprintln!(
                "{} {}: Failed to patch ({}) - {}",
                "✗".red(),
                entry.name,
                stage,
                reason
            );
        }
    }
}

impl fmt::Display for RegistryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}: {}", entry.id, entry.outcome)?;
        }
        write!(
            f,
            "{} patched, {} already compatible, {} failed",
            self.patched(),
            self.already_compatible(),
            self.failed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applicator::FaultStage;
    use std::path::PathBuf;

    fn entry(id: &str, outcome: PatchOutcome) -> ReportEntry {
        ReportEntry {
            id: id.to_string(),
            name: id.to_string(),
            module: "pkg".to_string(),
            outcome,
        }
    }

    fn sample() -> RegistryReport {
        RegistryReport {
            dry_run: false,
            entries: vec![
                entry(
                    "a",
                    PatchOutcome::Patched {
                        file: PathBuf::from("/site/a.py"),
                        replacements: 1,
                        backup: None,
                    },
                ),
                entry(
                    "b",
                    PatchOutcome::Failed {
                        stage: FaultStage::Locate,
                        reason: "module 'b' not found".to_string(),
                    },
                ),
                entry(
                    "c",
                    PatchOutcome::AlreadyCompatible {
                        file: PathBuf::from("/site/c.py"),
                        signature_present: false,
                    },
                ),
            ],
        }
    }

    #[test]
    fn test_counts() {
        let report = sample();
        assert_eq!(report.patched(), 1);
        assert_eq!(report.already_compatible(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn test_display_lists_every_fix() {
        let text = sample().to_string();
        assert!(text.contains("a: Patched /site/a.py"));
        assert!(text.contains("b: Failed (locate)"));
        assert!(text.ends_with("1 patched, 1 already compatible, 1 failed"));
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        let entries = value["entries"].as_array().unwrap();
        assert_eq!(entries[0]["outcome"], "patched");
        assert_eq!(entries[0]["replacements"], 1);
        assert!(entries[0].get("backup").is_none());
        assert_eq!(entries[1]["outcome"], "failed");
        assert_eq!(entries[1]["stage"], "locate");
        assert_eq!(entries[2]["outcome"], "already_compatible");
        assert!(entries[2].get("signature_present").is_none());
    }

    #[test]
    fn test_unmatched_is_counted_and_serialized() {
        let mut report = sample();
        report.entries.push(entry(
            "d",
            PatchOutcome::AlreadyCompatible {
                file: PathBuf::from("/site/d.py"),
                signature_present: true,
            },
        ));
        assert_eq!(report.already_compatible(), 2);
        assert_eq!(report.unmatched(), 1);
        assert!(report.to_string().contains("d: Signature present"));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["entries"][3]["signature_present"], true);
    }

    #[test]
    fn test_combine_keeps_order() {
        let first = sample();
        let mut second = sample();
        second.entries.truncate(1);
        second.entries[0].id = "e".to_string();

        let combined = RegistryReport::combine(true, [&first, &second]);
        assert!(combined.dry_run);
        let ids: Vec<&str> = combined.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "e"]);
        assert_eq!(combined.patched(), 2);
        assert_eq!(combined.failed(), 1);
    }
}
