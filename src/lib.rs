//! Patchup: declarative maintenance patches for web project trees
//!
//! A file-patching engine driven by TOML scripts. Each script declares a set
//! of patches (insert after an anchor, replace a region, overwrite or create
//! a file); the runner applies them idempotently and records the run in the
//! project's changelog.
//!
//! # Architecture
//!
//! All operations compile down to a single primitive: [`Splice`], a byte-span
//! replacement planned against a file snapshot. Intelligence lives in anchor
//! resolution and planning; application is a pure string operation.
//!
//! # Safety
//!
//! - Working-root boundary enforcement with forbidden directories
//! - Atomic file writes (tempfile + fsync + rename)
//! - UTF-8 validation
//! - Overlapping patches rejected before any write
//! - Idempotent runs under applied-markers
//!
//! # Example
//!
//! ```no_run
//! use patchup::{load_from_path, run_script, Workspace};
//! use std::path::Path;
//!
//! let workspace = Workspace::open(".").expect("working root exists");
//! let script = load_from_path(Path::new("scripts/add-game-routes.toml"))
//!     .expect("script parses");
//!
//! let report = run_script(&workspace, &script);
//! for (id, outcome) in &report.outcomes {
//!     match outcome {
//!         Ok(result) => println!("{id}: {result}"),
//!         Err(err) => eprintln!("{id}: {err}"),
//!     }
//! }
//! ```

pub mod anchor;
pub mod changelog;
pub mod patch;
pub mod script;
pub mod workspace;

// Re-exports
pub use anchor::{Anchor, Span};
pub use changelog::{ChangelogEntry, ChangelogError};
pub use patch::{Patch, PatchError, Splice};
pub use script::{
    check_script, load_from_path, load_from_str, run_script, ApplyError, PatchOutcome, Script,
    ScriptError, ScriptReport,
};
pub use workspace::{Workspace, WorkspaceError};
