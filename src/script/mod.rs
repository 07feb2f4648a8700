pub mod loader;
pub mod runner;
pub mod schema;

pub use loader::{load_from_path, load_from_str, ScriptError};
pub use runner::{check_script, run_script, ApplyError, PatchOutcome, ScriptReport};
pub use schema::{
    AnchorSpec, ChangelogSpec, Metadata, OperationDecl, PatchDecl, Script, ValidationError,
    ValidationIssue,
};
