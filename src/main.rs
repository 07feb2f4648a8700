use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use patchup::script::{check_script, load_from_path, run_script, PatchOutcome, ScriptReport};
use patchup::workspace::Workspace;
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "patchup")]
#[command(about = "Declarative maintenance patches for web project trees", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run maintenance scripts against a working tree
    Run {
        /// Script files to run (otherwise runs everything in scripts/)
        #[arg(value_name = "SCRIPT")]
        scripts: Vec<PathBuf>,

        /// Path to the working root (auto-detected if not specified)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Dry run - report what would change without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Emit machine-readable JSON instead of human output
        #[arg(long)]
        json: bool,
    },

    /// Check which patches are applied without writing
    Status {
        /// Path to the working root (auto-detected if not specified)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Emit machine-readable JSON instead of human output
        #[arg(long)]
        json: bool,
    },

    /// List available scripts and the patches they declare
    List {
        /// Path to the working root (auto-detected if not specified)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scripts,
            root,
            dry_run,
            diff,
            json,
        } => cmd_run(root, scripts, dry_run, diff, json),

        Commands::Status { root, json } => cmd_status(root, json),

        Commands::List { root } => cmd_list(root),
    }
}

/// Helper: Discover all .toml script files in a scripts/ directory.
///
/// Discovery order:
/// 1. `<root>/scripts` (script files kept alongside the target project).
/// 2. `./scripts` relative to the current working directory.
fn discover_scripts(root: &Path) -> Result<Vec<PathBuf>> {
    let cwd_scripts = env::current_dir().ok().map(|cwd| cwd.join("scripts"));
    let root_scripts = root.join("scripts");

    let candidate_dirs: Vec<PathBuf> = std::iter::once(root_scripts).chain(cwd_scripts).collect();

    for scripts_dir in candidate_dirs {
        if !scripts_dir.exists() {
            continue;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&scripts_dir).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
            {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();

        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml script files found in either ./scripts or {}/scripts",
        root.display()
    )
}

/// Resolve the working root using multiple detection strategies
///
/// Priority order:
/// 1. Explicit --root flag
/// 2. PATCHUP_ROOT environment variable
/// 3. Auto-detect by walking up from the current directory
/// 4. Git toplevel
fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf> {
    // 1. Explicit flag (highest priority)
    if let Some(path) = cli_root {
        return Ok(path.canonicalize()?);
    }

    // 2. Environment variable
    if let Ok(env_path) = env::var("PATCHUP_ROOT") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: PATCHUP_ROOT is set but path doesn't exist: {}",
                env_path
            )
            .yellow()
        );
    }

    // 3. Auto-detect from current directory
    if let Some(path) = auto_detect_root() {
        println!(
            "{}",
            format!("Auto-detected working root: {}", path.display()).dimmed()
        );
        return Ok(path);
    }

    // 4. Git toplevel
    if let Some(path) = find_root_via_git() {
        println!(
            "{}",
            format!("Using git toplevel as working root: {}", path.display()).dimmed()
        );
        return Ok(path);
    }

    // 5. Helpful error with multiple solutions
    anyhow::bail!(
        "{}\n{}\n  {}\n  {}\n  {}",
        "Could not find a working root.".red(),
        "Try one of:".bold(),
        "1. cd into the target project and run again",
        "2. Specify explicitly: patchup run --root /path/to/project",
        "3. Set environment variable: export PATCHUP_ROOT=/path/to/project"
    )
}

/// Auto-detect the working root by walking up from the current directory.
///
/// A directory qualifies when it keeps a CHANGELOG.md next to a backend/ or
/// frontend/ tree, the shape the maintenance scripts target.
fn auto_detect_root() -> Option<PathBuf> {
    let current = env::current_dir().ok()?;

    for ancestor in current.ancestors() {
        if !ancestor.join("CHANGELOG.md").exists() {
            continue;
        }

        let has_backend = ancestor.join("backend").exists();
        let has_frontend = ancestor.join("frontend").exists();

        if has_backend || has_frontend {
            return Some(ancestor.to_path_buf());
        }
    }

    None
}

/// Fall back to the enclosing git repository, provided it carries the
/// changelog the scripts record into.
fn find_root_via_git() -> Option<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let toplevel = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());

    if toplevel.join("CHANGELOG.md").exists() {
        Some(toplevel)
    } else {
        None
    }
}

/// Helper: Show unified diff between original and new content
fn display_diff(file: &str, original: &str, modified: &str) {
    println!("\n{}", format!("--- {file} (original)").dimmed());
    println!("{}", format!("+++ {file} (patched)").dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{change}").red(),
            ChangeTag::Insert => format!("+{change}").green(),
            ChangeTag::Equal => format!(" {change}").normal(),
        };
        print!("{}", sign);
    }
}

/// Machine-readable shape of one script's report.
fn report_json(script_file: &Path, report: &ScriptReport) -> serde_json::Value {
    let patches: Vec<serde_json::Value> = report
        .outcomes
        .iter()
        .map(|(id, outcome)| match outcome {
            Ok(PatchOutcome::Applied { file, kind }) => serde_json::json!({
                "id": id, "status": "applied", "file": file, "kind": kind,
            }),
            Ok(PatchOutcome::AlreadyApplied { file }) => serde_json::json!({
                "id": id, "status": "already-applied", "file": file,
            }),
            Ok(PatchOutcome::WouldApply { file, kind }) => serde_json::json!({
                "id": id, "status": "would-apply", "file": file, "kind": kind,
            }),
            Err(err) => serde_json::json!({
                "id": id, "status": "failed", "error": err.to_string(),
            }),
        })
        .collect();

    serde_json::json!({
        "script": report.name,
        "source": script_file.display().to_string(),
        "patches": patches,
        "changelog_updated": report.changelog_updated(),
    })
}

fn cmd_run(
    root: Option<PathBuf>,
    scripts: Vec<PathBuf>,
    dry_run: bool,
    show_diff: bool,
    json: bool,
) -> Result<()> {
    // 1. Resolve the working root
    let root = resolve_root(root)?;

    // 2. Determine script files to load
    let script_files = if scripts.is_empty() {
        discover_scripts(&root)?
    } else {
        scripts
    };

    let workspace = Workspace::open(&root)?;

    if !json {
        println!("Working root: {}", root.display());
        println!();
    }

    // 3. Load and run each script
    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_failed = 0;
    let mut json_reports = Vec::new();

    for script_file in script_files {
        let script = load_from_path(&script_file)?;

        if !json {
            println!(
                "Running {} ({})...",
                script.display_name().bold(),
                script_file.display()
            );
            if dry_run {
                println!("{}", "  [DRY RUN - nothing will be written]".cyan());
            }
        }

        // Capture target contents before the run (for diff output). Only the
        // files the script declares, to avoid reading unrelated trees.
        let mut before: HashMap<String, String> = HashMap::new();
        if show_diff {
            for decl in &script.patches {
                if let Ok(content) = workspace.read(&decl.file) {
                    before.insert(decl.file.clone(), content);
                }
            }
        }

        let report = if dry_run {
            check_script(&workspace, &script)
        } else {
            run_script(&workspace, &script)
        };

        // 4. Report per-patch outcomes
        for (patch_id, outcome) in &report.outcomes {
            match outcome {
                Ok(result @ PatchOutcome::Applied { .. }) => {
                    if !json {
                        println!("{} {}: {}", "✓".green(), patch_id, result);
                    }
                    total_applied += 1;
                }
                Ok(result @ PatchOutcome::WouldApply { .. }) => {
                    if !json {
                        println!("{} {}: {}", "⊘".cyan(), patch_id, result);
                    }
                    total_applied += 1;
                }
                Ok(result @ PatchOutcome::AlreadyApplied { .. }) => {
                    if !json {
                        println!("{} {}: {}", "⊙".yellow(), patch_id, result);
                    }
                    total_already_applied += 1;
                }
                Err(err) => {
                    if !json {
                        eprintln!("{} {}: Failed - {}", "✗".red(), patch_id, err);
                    }
                    total_failed += 1;
                }
            }
        }

        if show_diff && !json {
            for (file, after) in &report.rewrites {
                let original = before.get(file).map(String::as_str).unwrap_or("");
                if original != after {
                    display_diff(file, original, after);
                }
            }
        }

        match &report.changelog {
            Some(Ok(())) => {
                if !json {
                    println!(
                        "  {}",
                        format!("Recorded in {}", script.changelog.file).dimmed()
                    );
                }
            }
            Some(Err(err)) => {
                if !json {
                    eprintln!("{} Changelog not updated - {}", "✗".red(), err);
                }
            }
            None => {}
        }

        if json {
            json_reports.push(report_json(&script_file, &report));
        } else {
            println!();
        }
    }

    if json {
        let doc = serde_json::json!({ "dry_run": dry_run, "scripts": json_reports });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    // 5. Summary. Per-patch failures are part of a normal run, so the exit
    // code stays zero; the operator reads the summary to decide on a rerun.
    let applied_label = if dry_run { "would apply" } else { "applied" };
    println!("{}", "Summary:".bold());
    println!("  {} {}", format!("{}", total_applied).green(), applied_label);
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} failed", format!("{}", total_failed).red());

    Ok(())
}

fn cmd_status(root: Option<PathBuf>, json: bool) -> Result<()> {
    // 1. Resolve the working root
    let root = resolve_root(root)?;

    // 2. Discover script files
    let script_files = discover_scripts(&root)?;

    let workspace = Workspace::open(&root)?;

    if !json {
        println!("{}", "Script Status Report".bold());
        println!("Working root: {}", root.display());
        println!();
    }

    let mut applied = Vec::new();
    let mut not_applied = Vec::new();
    let mut failed = Vec::new();
    let mut json_reports = Vec::new();

    // 3. Check status of all scripts (read-only; nothing is written)
    for script_file in script_files {
        let script = load_from_path(&script_file)?;
        let report = check_script(&workspace, &script);

        for (patch_id, outcome) in &report.outcomes {
            match outcome {
                Ok(PatchOutcome::AlreadyApplied { .. }) => {
                    applied.push(patch_id.clone());
                }
                Ok(result) => {
                    not_applied.push((patch_id.clone(), result.to_string()));
                }
                Err(err) => {
                    failed.push((patch_id.clone(), err.to_string()));
                }
            }
        }

        if json {
            json_reports.push(report_json(&script_file, &report));
        }
    }

    if json {
        let doc = serde_json::json!({ "scripts": json_reports });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    // 4. Report grouped by status
    if !applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for id in &applied {
            println!("  - {}", id);
        }
        println!();
    }

    if !not_applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊙".yellow(),
            "NOT APPLIED".yellow().bold(),
            not_applied.len()
        );
        for (id, reason) in &not_applied {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    if !failed.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✗".red(),
            "FAILED".red().bold(),
            failed.len()
        );
        for (id, reason) in &failed {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_list(root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let script_files = discover_scripts(&root)?;

    println!("{}", "Available scripts:".bold());

    // A script that fails to load is still listed, with the reason; list is
    // how an operator debugs a broken scripts/ directory.
    for script_file in script_files {
        match load_from_path(&script_file) {
            Ok(script) => {
                println!();
                println!(
                    "{} {}",
                    script.display_name().bold(),
                    format!("({})", script_file.display()).dimmed()
                );
                if let Some(description) = &script.meta.description {
                    println!("  {}", description);
                }
                for decl in &script.patches {
                    println!("  - {}: {} {}", decl.id, decl.operation.kind(), decl.file);
                }
            }
            Err(err) => {
                println!();
                println!(
                    "{} {}",
                    script_file.display().to_string().bold(),
                    "(invalid)".red()
                );
                println!("  {}", format!("{err}").dimmed());
            }
        }
    }

    Ok(())
}
