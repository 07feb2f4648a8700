//! Integration tests for script loading and application
//!
//! Tests TOML parsing, validation failures, idempotent reruns, and full
//! patch runs against a throwaway working tree.

use patchup::{
    check_script, load_from_path, load_from_str, run_script, ApplyError, PatchOutcome, Workspace,
};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to create a working tree with the files the recipes expect
fn setup_test_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();

    fs::create_dir_all(dir.path().join("backend/src")).unwrap();
    fs::write(
        dir.path().join("backend/src/app.ts"),
        "import express from 'express';\nconst app = express();\napp.listen(3000);\n",
    )
    .unwrap();

    fs::write(
        dir.path().join("CHANGELOG.md"),
        "# Changelog\n\n## [Unreleased]\n\n### Added\n- initial scaffold\n",
    )
    .unwrap();

    dir
}

#[test]
fn test_load_script_basic() {
    let toml = r#"
[meta]
name = "add-health-check"
description = "Expose a /health endpoint"

[[patches]]
id = "register-health"
file = "backend/src/app.ts"
applied_marker = "app.get('/health'"

[patches.anchor]
type = "line"
contains = "const app = express();"

[patches.operation]
type = "insert-after"
text = "app.get('/health', (_req, res) => res.send('ok'));\n"
"#;

    let script = load_from_str(toml).expect("Failed to parse script");

    assert_eq!(script.meta.name, "add-health-check");
    assert_eq!(
        script.meta.description.as_deref(),
        Some("Expose a /health endpoint")
    );
    assert_eq!(script.patches.len(), 1);
    assert_eq!(script.patches[0].id, "register-health");
    assert_eq!(script.changelog_description(), "Expose a /health endpoint");
}

#[test]
fn test_load_script_changelog_defaults() {
    let toml = r#"
[meta]
name = "quiet-script"

[[patches]]
id = "touch"
file = "notes.txt"

[patches.operation]
type = "overwrite"
text = "x\n"
"#;

    let script = load_from_str(toml).expect("Failed to parse script");
    assert_eq!(script.changelog.file, "CHANGELOG.md");
    assert_eq!(script.changelog.section, "### Python Scripts Run");
    // Neither changelog text nor description declared; the name stands in
    assert_eq!(script.changelog_description(), "quiet-script");
}

#[test]
fn test_load_script_changelog_override() {
    // The section value starts with "# so the literal needs wider fencing
    let toml = r####"
[meta]
name = "docs-script"

[changelog]
file = "docs/HISTORY.md"
section = "### Maintenance"

[[patches]]
id = "touch"
file = "notes.txt"

[patches.operation]
type = "overwrite"
text = "x\n"
"####;

    let script = load_from_str(toml).expect("Failed to parse script");
    assert_eq!(script.changelog.file, "docs/HISTORY.md");
    assert_eq!(script.changelog.section, "### Maintenance");
}

#[test]
fn test_validation_empty_patches() {
    let toml = r#"
[meta]
name = "empty"
"#;

    let result = load_from_str(toml);
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("script declares no patches"));
}

#[test]
fn test_validation_missing_file() {
    let toml = r#"
[meta]
name = "no-file"

[[patches]]
id = "orphan"

[patches.operation]
type = "overwrite"
text = "x\n"
"#;

    // TOML deserialization fails before validation for a missing required field
    let result = load_from_str(toml);
    assert!(result.is_err());
}

#[test]
fn test_validation_rejects_anchorless_insert() {
    let toml = r#"
[meta]
name = "bad-combo"

[[patches]]
id = "floating-insert"
file = "backend/src/app.ts"

[patches.operation]
type = "insert-after"
text = "app.use(helmet());\n"
"#;

    let result = load_from_str(toml);
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("insert-after requires an anchor"));
}

#[test]
fn test_validation_rejects_anchored_overwrite() {
    let toml = r#"
[meta]
name = "bad-combo"

[[patches]]
id = "anchored-overwrite"
file = "backend/src/app.ts"

[patches.anchor]
type = "line"
contains = "const app"

[patches.operation]
type = "overwrite"
text = "replaced\n"
"#;

    let result = load_from_str(toml);
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("overwrite does not take an anchor"));
}

#[test]
fn test_validation_rejects_broken_regex() {
    let toml = r#"
[meta]
name = "bad-regex"

[[patches]]
id = "unclosed-group"
file = "backend/src/app.ts"

[patches.anchor]
type = "regex"
pattern = "app\\.use\\((unclosed"

[patches.operation]
type = "replace-region"
text = "app.use(cors());\n"
"#;

    let result = load_from_str(toml);
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("regex does not compile"));
}

#[test]
fn test_validation_rejects_empty_marker() {
    let toml = r#"
[meta]
name = "empty-marker"

[[patches]]
id = "guarded"
file = "backend/src/app.ts"
applied_marker = ""

[patches.anchor]
type = "line"
contains = "const app"

[patches.operation]
type = "insert-after"
text = "app.use(cors());\n"
"#;

    let result = load_from_str(toml);
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("missing required field 'applied_marker'"));
}

#[test]
fn test_validation_rejects_duplicate_ids() {
    // Outcomes are reported per id; two patches sharing one would collapse
    let toml = r#"
[meta]
name = "copy-paste"

[[patches]]
id = "register-router"
file = "backend/src/app.ts"

[patches.anchor]
type = "line"
contains = "const app"

[patches.operation]
type = "insert-after"
text = "app.use(a);\n"

[[patches]]
id = "register-router"
file = "backend/src/app.ts"

[patches.anchor]
type = "line"
contains = "app.listen"

[patches.operation]
type = "insert-after"
text = "app.use(b);\n"
"#;

    let result = load_from_str(toml);
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("patch id 'register-router' declared more than once"));
}

#[test]
fn test_run_fresh_apply() {
    let workspace_dir = setup_test_workspace();
    let workspace = Workspace::open(workspace_dir.path()).unwrap();

    let toml = r#"
[meta]
name = "add-game-routes"
description = "Register the /api/games router"
changelog = "Added game API routes"

[[patches]]
id = "register-router"
file = "backend/src/app.ts"
applied_marker = "app.use('/api/games'"

[patches.anchor]
type = "line"
contains = "const app = express();"

[patches.operation]
type = "insert-after"
text = "app.use('/api/games', gameRoutes);\n"
"#;

    let script = load_from_str(toml).expect("Failed to parse script");
    let report = run_script(&workspace, &script);

    assert_eq!(report.applied(), 1);
    assert_eq!(report.failed(), 0);

    let patched = fs::read_to_string(workspace_dir.path().join("backend/src/app.ts")).unwrap();
    assert_eq!(
        patched,
        "import express from 'express';\nconst app = express();\napp.use('/api/games', gameRoutes);\napp.listen(3000);\n"
    );

    let changelog = fs::read_to_string(workspace_dir.path().join("CHANGELOG.md")).unwrap();
    assert!(changelog.contains("### Python Scripts Run"));
    assert!(changelog.contains("- Added game API routes ("));
    // The run section lands under [Unreleased], above the existing subsection
    let section_at = changelog.find("### Python Scripts Run").unwrap();
    let added_at = changelog.find("### Added").unwrap();
    assert!(section_at < added_at);
}

#[test]
fn test_rerun_is_already_applied_and_still_recorded() {
    let workspace_dir = setup_test_workspace();
    let workspace = Workspace::open(workspace_dir.path()).unwrap();

    let toml = r#"
[meta]
name = "add-game-routes"
changelog = "Added game API routes"

[[patches]]
id = "register-router"
file = "backend/src/app.ts"
applied_marker = "app.use('/api/games'"

[patches.anchor]
type = "line"
contains = "const app = express();"

[patches.operation]
type = "insert-after"
text = "app.use('/api/games', gameRoutes);\n"
"#;

    let script = load_from_str(toml).expect("Failed to parse script");
    let first_report = run_script(&workspace, &script);
    assert_eq!(first_report.applied(), 1);
    let first = fs::read_to_string(workspace_dir.path().join("backend/src/app.ts")).unwrap();

    let report = run_script(&workspace, &script);
    assert_eq!(report.applied(), 0);
    assert_eq!(report.already_applied(), 1);

    let second = fs::read_to_string(workspace_dir.path().join("backend/src/app.ts")).unwrap();
    assert_eq!(first, second, "rerun must not change the file");

    // History is append-only: both runs are on record
    let changelog = fs::read_to_string(workspace_dir.path().join("CHANGELOG.md")).unwrap();
    assert_eq!(changelog.matches("- Added game API routes (").count(), 2);
}

#[test]
fn test_missing_file_does_not_stop_other_files() {
    let workspace_dir = setup_test_workspace();
    let workspace = Workspace::open(workspace_dir.path()).unwrap();

    let toml = r#"
[meta]
name = "two-targets"

[[patches]]
id = "into-the-void"
file = "backend/src/missing.ts"

[patches.anchor]
type = "line"
contains = "anything"

[patches.operation]
type = "insert-after"
text = "unreachable();\n"

[[patches]]
id = "lands"
file = "backend/src/app.ts"
applied_marker = "shutdownHooks"

[patches.anchor]
type = "line"
contains = "app.listen"

[patches.operation]
type = "insert-after"
text = "shutdownHooks(app);\n"
"#;

    let script = load_from_str(toml).expect("Failed to parse script");
    let report = run_script(&workspace, &script);

    assert_eq!(report.applied(), 1);
    assert_eq!(report.failed(), 1);

    let (id, result) = &report.outcomes[0];
    assert_eq!(id, "into-the-void");
    assert!(matches!(
        result,
        Err(ApplyError::Workspace(patchup::WorkspaceError::NotFound { .. }))
    ));

    let patched = fs::read_to_string(workspace_dir.path().join("backend/src/app.ts")).unwrap();
    assert!(patched.contains("shutdownHooks(app);"));
}

#[test]
fn test_overlap_withholds_whole_file() {
    let workspace_dir = setup_test_workspace();
    let workspace = Workspace::open(workspace_dir.path()).unwrap();
    let before = fs::read_to_string(workspace_dir.path().join("backend/src/app.ts")).unwrap();

    let toml = r#"
[meta]
name = "collision"

[[patches]]
id = "rewrite-everything"
file = "backend/src/app.ts"

[patches.anchor]
type = "region"
start_contains = "import express"
end_contains = "app.listen"

[patches.operation]
type = "replace-region"
text = "// rewritten\n"

[[patches]]
id = "insert-inside"
file = "backend/src/app.ts"

[patches.anchor]
type = "line"
contains = "const app = express();"

[patches.operation]
type = "insert-after"
text = "app.use(cors());\n"
"#;

    let script = load_from_str(toml).expect("Failed to parse script");
    let report = run_script(&workspace, &script);

    assert_eq!(report.applied(), 0);
    assert_eq!(report.failed(), 2);
    let messages: Vec<String> = report
        .outcomes
        .iter()
        .map(|(_, result)| result.as_ref().unwrap_err().to_string())
        .collect();
    assert!(messages
        .iter()
        .any(|msg| msg.contains("overlapping patches")));
    assert!(messages
        .iter()
        .all(|msg| msg.contains("rewrite-everything") && msg.contains("insert-inside")));

    let after = fs::read_to_string(workspace_dir.path().join("backend/src/app.ts")).unwrap();
    assert_eq!(before, after, "no byte may land from an overlapping batch");
}

#[test]
fn test_create_if_missing_fills_empty_file() {
    let workspace_dir = setup_test_workspace();
    let workspace = Workspace::open(workspace_dir.path()).unwrap();
    fs::create_dir_all(workspace_dir.path().join("backend/src/routes")).unwrap();
    fs::write(workspace_dir.path().join("backend/src/routes/games.ts"), "").unwrap();

    let toml = r#"
[meta]
name = "create-routes"

[[patches]]
id = "routes-module"
file = "backend/src/routes/games.ts"

[patches.operation]
type = "create-if-missing"
text = "import { Router } from 'express';\nexport default Router();\n"
"#;

    let script = load_from_str(toml).expect("Failed to parse script");
    let report = run_script(&workspace, &script);
    assert_eq!(report.applied(), 1);

    let created =
        fs::read_to_string(workspace_dir.path().join("backend/src/routes/games.ts")).unwrap();
    assert_eq!(
        created,
        "import { Router } from 'express';\nexport default Router();\n"
    );

    // A populated file is left alone
    let report = run_script(&workspace, &script);
    assert_eq!(report.applied(), 0);
    assert_eq!(report.already_applied(), 1);
}

#[test]
fn test_check_leaves_tree_untouched() {
    let workspace_dir = setup_test_workspace();
    let workspace = Workspace::open(workspace_dir.path()).unwrap();
    let before = fs::read_to_string(workspace_dir.path().join("backend/src/app.ts")).unwrap();
    let changelog_before = fs::read_to_string(workspace_dir.path().join("CHANGELOG.md")).unwrap();

    let toml = r#"
[meta]
name = "add-game-routes"

[[patches]]
id = "register-router"
file = "backend/src/app.ts"
applied_marker = "app.use('/api/games'"

[patches.anchor]
type = "line"
contains = "const app = express();"

[patches.operation]
type = "insert-after"
text = "app.use('/api/games', gameRoutes);\n"
"#;

    let script = load_from_str(toml).expect("Failed to parse script");
    let report = check_script(&workspace, &script);

    assert_eq!(report.pending(), 1);
    assert!(matches!(
        report.outcomes[0].1,
        Ok(PatchOutcome::WouldApply { .. })
    ));
    assert!(report.changelog.is_none());

    assert_eq!(
        fs::read_to_string(workspace_dir.path().join("backend/src/app.ts")).unwrap(),
        before
    );
    assert_eq!(
        fs::read_to_string(workspace_dir.path().join("CHANGELOG.md")).unwrap(),
        changelog_before
    );
}

#[test]
fn test_changelog_bootstrap_on_bare_tree() {
    let workspace_dir = TempDir::new().unwrap();
    fs::create_dir_all(workspace_dir.path().join("backend/src")).unwrap();
    fs::write(
        workspace_dir.path().join("backend/src/app.ts"),
        "const app = express();\n",
    )
    .unwrap();
    let workspace = Workspace::open(workspace_dir.path()).unwrap();

    let toml = r#"
[meta]
name = "first-run"
changelog = "First maintenance pass"

[[patches]]
id = "note"
file = "backend/src/app.ts"
applied_marker = "// maintained"

[patches.anchor]
type = "line"
contains = "const app"

[patches.operation]
type = "insert-after"
text = "// maintained\n"
"#;

    let script = load_from_str(toml).expect("Failed to parse script");
    let report = run_script(&workspace, &script);
    assert!(report.changelog_updated());

    let changelog = fs::read_to_string(workspace_dir.path().join("CHANGELOG.md")).unwrap();
    assert!(changelog.starts_with("## [Unreleased]\n\n### Python Scripts Run\n\n- First maintenance pass ("));
}

#[test]
fn test_shipped_recipes_load() {
    let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    for relative in ["scripts/add-game-routes.toml", "scripts/fix-vite-proxy.toml"] {
        let script = load_from_path(&repo_root.join(relative)).expect("recipe must load");
        assert!(!script.patches.is_empty(), "{relative}");
    }
}

#[test]
fn test_shipped_recipes_are_rerun_safe() {
    // Every shipped patch whose operation writes its own marker stays a
    // no-op on rerun; a payload that does not contain its marker would
    // reapply forever.
    let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    for relative in ["scripts/add-game-routes.toml", "scripts/fix-vite-proxy.toml"] {
        let script = load_from_path(&repo_root.join(relative)).expect("recipe must load");
        for patch in &script.patches {
            let Some(marker) = &patch.applied_marker else {
                continue;
            };
            let text = match &patch.operation {
                patchup::script::OperationDecl::InsertAfter { text }
                | patchup::script::OperationDecl::ReplaceRegion { text }
                | patchup::script::OperationDecl::Overwrite { text }
                | patchup::script::OperationDecl::CreateIfMissing { text } => text,
            };
            assert!(
                text.contains(marker),
                "{relative}: patch '{}' payload does not contain its applied_marker",
                patch.id
            );
        }
    }
}
