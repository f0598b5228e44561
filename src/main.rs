use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use site_patcher::config::{builtin_fix_set, load_from_path, FixConfig};
use site_patcher::{
    detect, transform, ApplyOptions, FixRegistry, Locator, PatchOutcome, RegistryReport,
    WriteOptions,
};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "site-patcher")]
#[command(about = "Patch deprecated APIs inside installed Python packages", long_about = None)]
#[command(version)]
struct Cli {
    /// Log every pipeline step (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct TargetArgs {
    /// Fix set file, or directory of .toml fix sets (default: built-in set)
    #[arg(short, long)]
    fixes: Option<PathBuf>,

    /// Directory to resolve modules against, e.g. a site-packages dir (repeatable)
    #[arg(short = 'p', long = "search-path")]
    search_paths: Vec<PathBuf>,

    /// Python interpreter used to locate modules
    #[arg(long)]
    python: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply fixes to the installed packages
    Apply {
        #[command(flatten)]
        target: TargetArgs,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Keep <file>.orig with the pristine content before rewriting
        #[arg(short, long)]
        backup: bool,
    },

    /// Report which fixes are still needed, without modifying files
    Check {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List fixes and the modules they target
    List {
        /// Fix set file, or directory of .toml fix sets (default: built-in set)
        #[arg(short, long)]
        fixes: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Apply {
            target,
            dry_run,
            diff,
            backup,
        } => cmd_apply(target, dry_run, diff, backup),

        Commands::Check { target } => cmd_check(target),

        Commands::List { fixes } => cmd_list(fixes),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Helper: Load the fix sets to run, in order.
///
/// `None` means the built-in set. A directory contributes every `*.toml`
/// file directly inside it, sorted by name.
fn load_fix_sets(fixes: Option<&Path>) -> Result<Vec<(String, FixConfig)>> {
    let Some(path) = fixes else {
        return Ok(vec![("built-in".to_string(), builtin_fix_set()?)]);
    };

    if !path.is_dir() {
        let config = load_from_path(path)?;
        return Ok(vec![(path.display().to_string(), config)]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No .toml fix sets found in {}", path.display());
    }

    files
        .into_iter()
        .map(|file| {
            let config = load_from_path(&file)?;
            Ok((file.display().to_string(), config))
        })
        .collect()
}

fn build_registry(target: &TargetArgs, config: &FixConfig, options: ApplyOptions) -> FixRegistry {
    let locator = Locator::resolve(
        target.search_paths.clone(),
        target.python.clone(),
        &config.meta.search_paths,
    );
    FixRegistry::from_config(config, locator).with_options(options)
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// Replay the patched fixes of `report` in memory, starting from `before`.
///
/// Gives the post-patch text of every touched file without reading it back,
/// which is what a dry run needs.
fn replay(
    config: &FixConfig,
    report: &RegistryReport,
    before: &BTreeMap<PathBuf, String>,
) -> BTreeMap<PathBuf, String> {
    let mut after = before.clone();
    for (fix, entry) in config.fixes.iter().zip(&report.entries) {
        let PatchOutcome::Patched { file, .. } = &entry.outcome else {
            continue;
        };
        let Some(text) = after.get_mut(file) else {
            continue;
        };
        let Ok(detection) = detect(text, &fix.signature) else {
            continue;
        };
        if let Ok(out) = transform(text, &fix.signature, &detection, &fix.replacement) {
            *text = out.text;
        }
    }
    after
}

fn patched_files(report: &RegistryReport) -> BTreeMap<PathBuf, String> {
    let mut files = BTreeMap::new();
    for entry in &report.entries {
        if let PatchOutcome::Patched { file, .. } = &entry.outcome {
            if let Ok(content) = fs::read_to_string(file) {
                files.entry(file.clone()).or_insert(content);
            }
        }
    }
    files
}

fn cmd_apply(target: TargetArgs, dry_run: bool, show_diff: bool, backup: bool) -> Result<()> {
    let fix_sets = load_fix_sets(target.fixes.as_deref())?;

    let mut reports = Vec::new();

    for (label, config) in &fix_sets {
        if !target.json {
            println!("Applying fixes from {}...", label);
            if dry_run {
                println!("{}", "  [DRY RUN - showing what would be patched]".cyan());
            }
        }

        let options = ApplyOptions {
            dry_run,
            write: WriteOptions {
                backup: backup || config.meta.backup,
            },
        };

        // Capture file contents before patching (for diff output).
        let before = if show_diff {
            let preview = ApplyOptions {
                dry_run: true,
                ..options
            };
            patched_files(&build_registry(&target, config, preview).run())
        } else {
            BTreeMap::new()
        };

        let report = build_registry(&target, config, options).run();

        if !target.json {
            report.print_status();

            if show_diff {
                let after = if dry_run {
                    replay(config, &report, &before)
                } else {
                    before
                        .keys()
                        .filter_map(|file| {
                            fs::read_to_string(file).ok().map(|c| (file.clone(), c))
                        })
                        .collect()
                };
                for (file, original) in &before {
                    if let Some(modified) = after.get(file) {
                        if original != modified {
                            display_diff(file, original, modified);
                        }
                    }
                }
            }
            println!();
        }

        reports.push(report);
    }

    let total = RegistryReport::combine(dry_run, &reports);
    if target.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        total.print_summary();
    }

    if total.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_check(target: TargetArgs) -> Result<()> {
    let fix_sets = load_fix_sets(target.fixes.as_deref())?;
    let options = ApplyOptions {
        dry_run: true,
        ..ApplyOptions::default()
    };

    let mut reports = Vec::new();
    for (_, config) in &fix_sets {
        reports.push(build_registry(&target, config, options).run());
    }

    let mut compatible = Vec::new();
    let mut needed = Vec::new();
    let mut failed = Vec::new();
    for entry in reports.iter().flat_map(|r| &r.entries) {
        match &entry.outcome {
            PatchOutcome::AlreadyCompatible {
                signature_present, ..
            } => compatible.push((&entry.id, *signature_present)),
            PatchOutcome::Patched { file, .. } => {
                needed.push((&entry.id, file.display().to_string()))
            }
            PatchOutcome::Failed { reason, .. } => failed.push((&entry.id, reason.clone())),
        }
    }

    if target.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!("{}", "Fix Status Report".bold());
        println!();

        if !compatible.is_empty() {
            println!(
                "{} {} ({} fixes)",
                "✓".green(),
                "COMPATIBLE".green().bold(),
                compatible.len()
            );
            for (id, signature_present) in &compatible {
                if *signature_present {
                    println!(
                        "  - {} {}",
                        id,
                        "(signature still present, not rewritten)".yellow()
                    );
                } else {
                    println!("  - {}", id);
                }
            }
            println!();
        }

        if !needed.is_empty() {
            println!(
                "{} {} ({} fixes)",
                "⊙".yellow(),
                "NEEDS PATCH".yellow().bold(),
                needed.len()
            );
            for (id, file) in &needed {
                println!("  - {} ({})", id, file.dimmed());
            }
            println!();
        }

        if !failed.is_empty() {
            println!(
                "{} {} ({} fixes)",
                "✗".red(),
                "FAILED".red().bold(),
                failed.len()
            );
            for (id, reason) in &failed {
                println!("  - {} ({})", id, reason.dimmed());
            }
            println!();
        }
    }

    if !needed.is_empty() || !failed.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(fixes: Option<PathBuf>) -> Result<()> {
    let fix_sets = load_fix_sets(fixes.as_deref())?;

    for (label, config) in &fix_sets {
        let title = if config.meta.name.is_empty() {
            label.as_str()
        } else {
            config.meta.name.as_str()
        };
        println!("{} ({})", title.bold(), label.dimmed());
        if let Some(description) = &config.meta.description {
            println!("  {}", description.dimmed());
        }

        let mut by_module: HashMap<&str, usize> = HashMap::new();
        for fix in &config.fixes {
            *by_module.entry(fix.module.as_str()).or_default() += 1;
            println!(
                "  {} {} [{} -> {}]",
                fix.id.cyan(),
                fix.display_name(),
                fix.signature.kind(),
                fix.replacement.kind()
            );
            println!("      module: {}", fix.module);
        }
        let shared = by_module.values().filter(|count| **count > 1).count();
        if shared > 0 {
            println!(
                "  {}",
                format!("{shared} module(s) targeted by more than one fix").dimmed()
            );
        }
        println!();
    }

    Ok(())
}
