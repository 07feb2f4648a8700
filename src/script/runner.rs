//! Script runner - applies declared patches with idempotency checks
//!
//! High-level orchestration that:
//! - Groups patches by target file so each file is read and written once
//! - Skips patches whose applied-marker is already present
//! - Resolves anchors against the snapshot and rejects overlapping patches
//! - Records the run in the changelog after all patches
//! - Reports a per-patch outcome; one failure never aborts the script

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use xxhash_rust::xxh3::xxh3_64;

use crate::anchor::Anchor;
use crate::changelog::{self, ChangelogEntry, ChangelogError};
use crate::patch::{self, Patch, PatchError};
use crate::script::schema::{OperationDecl, PatchDecl, Script};
use crate::workspace::{Workspace, WorkspaceError};

/// Result of processing a single declared patch
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOutcome should be checked for success/failure"]
pub enum PatchOutcome {
    /// File rewritten with the patch applied
    Applied { file: String, kind: &'static str },
    /// Applied-marker present, patched state already in place, or the target
    /// already exists; nothing written
    AlreadyApplied { file: String },
    /// Read-only mode: a real run would rewrite the file
    WouldApply { file: String, kind: &'static str },
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOutcome::Applied { file, kind } => {
                write!(f, "Applied {kind} to {file}")
            }
            PatchOutcome::AlreadyApplied { file } => {
                write!(f, "Already applied to {file}")
            }
            PatchOutcome::WouldApply { file, kind } => {
                write!(f, "Would apply {kind} to {file}")
            }
        }
    }
}

/// Errors while processing a declared patch
#[derive(Debug)]
pub enum ApplyError {
    /// The anchor the patch requires is absent from the target
    AnchorNotFound {
        file: String,
        wanted: String,
        closest: Option<String>,
    },
    /// Two patches against the same file resolved to overlapping extents
    Overlapping {
        file: String,
        first: String,
        second: String,
    },
    /// File left unwritten because other patches against it overlap
    Withheld {
        file: String,
        first: String,
        second: String,
    },
    /// Target changed between snapshot and write
    SnapshotChanged { file: String },
    /// Path, encoding or I/O failure
    Workspace(WorkspaceError),
    /// Splice no longer fits the snapshot it was planned from
    Patch(PatchError),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::AnchorNotFound {
                file,
                wanted,
                closest,
            } => {
                write!(f, "anchor not found in {file}: wanted {wanted}")?;
                if let Some(line) = closest {
                    write!(f, " (closest line: {line:?})")?;
                }
                Ok(())
            }
            ApplyError::Overlapping {
                file,
                first,
                second,
            } => {
                write!(f, "overlapping patches on {file}: '{first}' and '{second}'")
            }
            ApplyError::Withheld {
                file,
                first,
                second,
            } => {
                write!(
                    f,
                    "{file} not written: patches '{first}' and '{second}' overlap"
                )
            }
            ApplyError::SnapshotChanged { file } => {
                write!(f, "{file} changed while the script was running; write withheld")
            }
            ApplyError::Workspace(err) => write!(f, "{err}"),
            ApplyError::Patch(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplyError::Workspace(err) => Some(err),
            ApplyError::Patch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WorkspaceError> for ApplyError {
    fn from(err: WorkspaceError) -> Self {
        ApplyError::Workspace(err)
    }
}

impl From<PatchError> for ApplyError {
    fn from(err: PatchError) -> Self {
        ApplyError::Patch(err)
    }
}

/// Everything one run produced.
#[derive(Debug)]
#[must_use = "ScriptReport carries per-patch failures"]
pub struct ScriptReport {
    /// Script display name
    pub name: String,
    /// Per-patch outcomes, in declaration order
    pub outcomes: Vec<(String, Result<PatchOutcome, ApplyError>)>,
    /// New content per file the run rewrote, or a check would rewrite
    pub rewrites: Vec<(String, String)>,
    /// Distinct target files the run touched or tried to
    pub files_attempted: usize,
    /// `None` when recording was skipped (read-only modes)
    pub changelog: Option<Result<(), ChangelogError>>,
}

impl ScriptReport {
    pub fn applied(&self) -> usize {
        self.count(|outcome| matches!(outcome, PatchOutcome::Applied { .. }))
    }

    pub fn already_applied(&self) -> usize {
        self.count(|outcome| matches!(outcome, PatchOutcome::AlreadyApplied { .. }))
    }

    /// Patches a read-only evaluation found still unapplied.
    pub fn pending(&self) -> usize {
        self.count(|outcome| matches!(outcome, PatchOutcome::WouldApply { .. }))
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, result)| result.is_err())
            .count()
    }

    pub fn changelog_updated(&self) -> bool {
        matches!(self.changelog, Some(Ok(())))
    }

    fn count(&self, matcher: impl Fn(&PatchOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, result)| matches!(result, Ok(outcome) if matcher(outcome)))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Apply,
    Check,
}

/// Apply every patch a script declares, then record the run.
///
/// Per-patch failures never abort the script: all patches are attempted and
/// the report carries each outcome. The changelog entry is appended after
/// the patches, whatever their outcomes; a recording failure is reported
/// but does not roll back file edits.
pub fn run_script(workspace: &Workspace, script: &Script) -> ScriptReport {
    let mut report = run_batched(workspace, script, Mode::Apply);
    report.changelog = Some(record_run(workspace, script));
    report
}

/// Evaluate a script without mutating the workspace.
///
/// Outcome semantics mirror `run_script`, with `WouldApply` marking patches
/// a real run would write. No file or changelog write happens.
pub fn check_script(workspace: &Workspace, script: &Script) -> ScriptReport {
    run_batched(workspace, script, Mode::Check)
}

fn record_run(workspace: &Workspace, script: &Script) -> Result<(), ChangelogError> {
    let entry = ChangelogEntry::now(script.changelog_description());
    changelog::record(
        workspace,
        &script.changelog.file,
        &script.changelog.section,
        &entry,
    )
}

fn run_batched(workspace: &Workspace, script: &Script, mode: Mode) -> ScriptReport {
    // Group patches by target file so each file is read and written once
    let mut by_file: HashMap<&str, Vec<&PatchDecl>> = HashMap::new();
    for decl in &script.patches {
        by_file.entry(decl.file.as_str()).or_default().push(decl);
    }
    let files_attempted = by_file.len();

    let mut outcomes = Vec::new();
    let mut rewrites = Vec::new();
    for (file, decls) in by_file {
        process_file(workspace, file, &decls, mode, &mut outcomes, &mut rewrites);
    }

    // Restore declaration order; HashMap iteration is unordered.
    let declared: HashMap<&str, usize> = script
        .patches
        .iter()
        .enumerate()
        .map(|(index, decl)| (decl.id.as_str(), index))
        .collect();
    outcomes.sort_by_key(|(id, _)| declared.get(id.as_str()).copied().unwrap_or(usize::MAX));

    ScriptReport {
        name: script.display_name().to_string(),
        outcomes,
        rewrites,
        files_attempted,
        changelog: None,
    }
}

fn process_file(
    workspace: &Workspace,
    file: &str,
    decls: &[&PatchDecl],
    mode: Mode,
    outcomes: &mut Vec<(String, Result<PatchOutcome, ApplyError>)>,
    rewrites: &mut Vec<(String, String)>,
) {
    let snapshot = match workspace.read(file) {
        Ok(content) => Some(content),
        Err(WorkspaceError::NotFound { .. }) => None,
        Err(err) => {
            for decl in decls {
                outcomes.push((decl.id.clone(), Err(clone_workspace_error(&err).into())));
            }
            return;
        }
    };
    let snapshot_hash = snapshot.as_ref().map(|text| xxh3_64(text.as_bytes()));

    let mut planned: Vec<(&PatchDecl, Patch)> = Vec::new();

    for decl in decls {
        let content: &str = match &snapshot {
            Some(text) => text,
            None if matches!(decl.operation, OperationDecl::CreateIfMissing { .. }) => "",
            None => {
                outcomes.push((
                    decl.id.clone(),
                    Err(WorkspaceError::NotFound {
                        path: PathBuf::from(file),
                    }
                    .into()),
                ));
                continue;
            }
        };

        if let Some(marker) = &decl.applied_marker {
            if patch::plan_noop_guard(content, marker).is_some() {
                outcomes.push((
                    decl.id.clone(),
                    Ok(PatchOutcome::AlreadyApplied {
                        file: file.to_string(),
                    }),
                ));
                continue;
            }
        }

        match plan_decl(file, content, decl) {
            Ok(planned_patch) if planned_patch.is_noop() => {
                outcomes.push((
                    decl.id.clone(),
                    Ok(PatchOutcome::AlreadyApplied {
                        file: file.to_string(),
                    }),
                ));
            }
            Ok(planned_patch) => planned.push((decl, planned_patch)),
            Err(err) => outcomes.push((decl.id.clone(), Err(err))),
        }
    }

    if planned.is_empty() {
        return;
    }

    let patches: Vec<Patch> = planned.iter().map(|(_, p)| p.clone()).collect();

    // Overlap rejection happens before any write; the whole file is withheld
    if let Some((a, b)) = patch::find_overlap(&patches) {
        let first = planned[a].0.id.clone();
        let second = planned[b].0.id.clone();
        for (index, (decl, _)) in planned.iter().enumerate() {
            let err = if index == a || index == b {
                ApplyError::Overlapping {
                    file: file.to_string(),
                    first: first.clone(),
                    second: second.clone(),
                }
            } else {
                ApplyError::Withheld {
                    file: file.to_string(),
                    first: first.clone(),
                    second: second.clone(),
                }
            };
            outcomes.push((decl.id.clone(), Err(err)));
        }
        return;
    }

    let content = snapshot.as_deref().unwrap_or("");
    let new_content = match patch::apply_all(content, &patches) {
        Ok(text) => text,
        Err(err) => {
            for (decl, _) in &planned {
                outcomes.push((decl.id.clone(), Err(ApplyError::Patch(err.clone()))));
            }
            return;
        }
    };

    if new_content == content {
        // Patched state already in place without the marker
        for (decl, _) in &planned {
            outcomes.push((
                decl.id.clone(),
                Ok(PatchOutcome::AlreadyApplied {
                    file: file.to_string(),
                }),
            ));
        }
        return;
    }

    if mode == Mode::Check {
        rewrites.push((file.to_string(), new_content));
        for (decl, _) in &planned {
            outcomes.push((
                decl.id.clone(),
                Ok(PatchOutcome::WouldApply {
                    file: file.to_string(),
                    kind: decl.operation.kind(),
                }),
            ));
        }
        return;
    }

    // The snapshot must still be on disk before the batch lands; splices
    // planned against stale content would corrupt the file.
    let unchanged = match snapshot_hash {
        Some(hash) => workspace
            .read(file)
            .map(|current| xxh3_64(current.as_bytes()) == hash)
            .unwrap_or(false),
        None => !workspace.exists(file),
    };
    if !unchanged {
        for (decl, _) in &planned {
            outcomes.push((
                decl.id.clone(),
                Err(ApplyError::SnapshotChanged {
                    file: file.to_string(),
                }),
            ));
        }
        return;
    }

    if let Err(err) = workspace.write(file, &new_content) {
        for (decl, _) in &planned {
            outcomes.push((decl.id.clone(), Err(clone_workspace_error(&err).into())));
        }
        return;
    }
    rewrites.push((file.to_string(), new_content));

    for (decl, _) in &planned {
        outcomes.push((
            decl.id.clone(),
            Ok(PatchOutcome::Applied {
                file: file.to_string(),
                kind: decl.operation.kind(),
            }),
        ));
    }
}

fn plan_decl(file: &str, content: &str, decl: &PatchDecl) -> Result<Patch, ApplyError> {
    match &decl.operation {
        OperationDecl::InsertAfter { text } => {
            let anchor = locate_required(file, content, decl)?;
            Ok(patch::plan_insert_after(content, anchor, text))
        }
        OperationDecl::ReplaceRegion { text } => {
            let anchor = locate_required(file, content, decl)?;
            Ok(patch::plan_replace_region(content, anchor, text))
        }
        OperationDecl::Overwrite { text } => Ok(patch::plan_overwrite(text)),
        OperationDecl::CreateIfMissing { text } => Ok(patch::plan_create_if_missing(content, text)),
    }
}

fn locate_required(file: &str, content: &str, decl: &PatchDecl) -> Result<Anchor, ApplyError> {
    // Validation rejects anchorless insert/replace declarations at load
    // time; hand-built scripts still get a tagged error here.
    let spec = decl
        .anchor
        .as_ref()
        .ok_or_else(|| ApplyError::AnchorNotFound {
            file: file.to_string(),
            wanted: "an anchor declaration".to_string(),
            closest: None,
        })?;

    spec.locate(content).ok_or_else(|| ApplyError::AnchorNotFound {
        file: file.to_string(),
        wanted: spec.describe(),
        closest: spec
            .suggestion_needle()
            .and_then(|needle| closest_line(content, needle)),
    })
}

/// Closest non-blank line to the missed needle, for the error message.
fn closest_line(content: &str, needle: &str) -> Option<String> {
    let mut best: Option<(f64, &str)> = None;
    for line in content.lines() {
        let candidate = line.trim();
        if candidate.is_empty() {
            continue;
        }
        let score = strsim::normalized_levenshtein(candidate, needle);
        if best.map_or(true, |(previous, _)| score > previous) {
            best = Some((score, candidate));
        }
    }
    best.filter(|(score, _)| *score >= 0.5)
        .map(|(_, line)| line.to_string())
}

/// WorkspaceError holds `std::io::Error`, which is not Clone; reconstruct
/// one per patch from the original's kind and text.
fn clone_workspace_error(err: &WorkspaceError) -> WorkspaceError {
    match err {
        WorkspaceError::NotFound { path } => WorkspaceError::NotFound { path: path.clone() },
        WorkspaceError::NotUtf8 { path, source } => WorkspaceError::NotUtf8 {
            path: path.clone(),
            source: *source,
        },
        WorkspaceError::IsDirectory { path } => WorkspaceError::IsDirectory { path: path.clone() },
        WorkspaceError::OutsideRoot { path, root } => WorkspaceError::OutsideRoot {
            path: path.clone(),
            root: root.clone(),
        },
        WorkspaceError::Forbidden { path, forbidden } => WorkspaceError::Forbidden {
            path: path.clone(),
            forbidden: forbidden.clone(),
        },
        WorkspaceError::Io { path, source } => WorkspaceError::Io {
            path: path.clone(),
            source: std::io::Error::new(source.kind(), source.to_string()),
        },
    }
}
