use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

use crate::anchor::{self, Anchor};
use crate::changelog;

/// One declarative maintenance recipe: metadata, the patches to apply, and
/// where the run is recorded.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Script {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDecl>,
    #[serde(default)]
    pub changelog: ChangelogSpec,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Changelog entry text; falls back to description, then name
    #[serde(default)]
    pub changelog: Option<String>,
}

/// Where and under which heading the run is recorded.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChangelogSpec {
    pub file: String,
    pub section: String,
}

impl Default for ChangelogSpec {
    fn default() -> Self {
        Self {
            file: changelog::DEFAULT_FILE.to_string(),
            section: changelog::DEFAULT_SECTION.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDecl {
    pub id: String,
    pub file: String,
    /// Literal substring identifying the already-patched state
    #[serde(default)]
    pub applied_marker: Option<String>,
    #[serde(default)]
    pub anchor: Option<AnchorSpec>,
    pub operation: OperationDecl,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AnchorSpec {
    /// First line containing the literal substring; multi-line needles
    /// report the starting line
    Line { contains: String },
    Region {
        start_contains: String,
        end_contains: String,
    },
    BalancedBlock {
        start_contains: String,
        #[serde(default = "default_open")]
        open: char,
        #[serde(default = "default_close")]
        close: char,
    },
    Regex { pattern: String },
}

fn default_open() -> char {
    '{'
}

fn default_close() -> char {
    '}'
}

impl AnchorSpec {
    /// Locate this anchor in `content`. Pure; absence is `None`.
    pub fn locate(&self, content: &str) -> Option<Anchor> {
        match self {
            AnchorSpec::Line { contains } => anchor::find_line(content, contains),
            AnchorSpec::Region {
                start_contains,
                end_contains,
            } => anchor::find_region(
                content,
                |line| line.contains(start_contains.as_str()),
                |line| line.contains(end_contains.as_str()),
            ),
            AnchorSpec::BalancedBlock {
                start_contains,
                open,
                close,
            } => anchor::find_balanced_block(
                content,
                |line| line.contains(start_contains.as_str()),
                *open,
                *close,
            ),
            AnchorSpec::Regex { pattern } => {
                // Compilation was checked at load time
                let compiled = Regex::new(pattern).ok()?;
                anchor::find_regex(content, &compiled)
            }
        }
    }

    /// Human-readable description for status lines.
    pub fn describe(&self) -> String {
        match self {
            AnchorSpec::Line { contains } => format!("line containing {contains:?}"),
            AnchorSpec::Region {
                start_contains,
                end_contains,
            } => format!("region from {start_contains:?} to {end_contains:?}"),
            AnchorSpec::BalancedBlock { start_contains, .. } => {
                format!("balanced block starting at {start_contains:?}")
            }
            AnchorSpec::Regex { pattern } => format!("match of /{pattern}/"),
        }
    }

    /// The needle a line-level fuzzy suggestion should be compared against.
    pub fn suggestion_needle(&self) -> Option<&str> {
        match self {
            AnchorSpec::Line { contains } => Some(contains),
            AnchorSpec::Region { start_contains, .. }
            | AnchorSpec::BalancedBlock { start_contains, .. } => Some(start_contains),
            AnchorSpec::Regex { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OperationDecl {
    InsertAfter { text: String },
    ReplaceRegion { text: String },
    Overwrite { text: String },
    CreateIfMissing { text: String },
}

impl OperationDecl {
    /// Short name of the declared kind, for status lines.
    pub fn kind(&self) -> &'static str {
        match self {
            OperationDecl::InsertAfter { .. } => "insert-after",
            OperationDecl::ReplaceRegion { .. } => "replace-region",
            OperationDecl::Overwrite { .. } => "overwrite",
            OperationDecl::CreateIfMissing { .. } => "create-if-missing",
        }
    }

    pub fn requires_anchor(&self) -> bool {
        matches!(
            self,
            OperationDecl::InsertAfter { .. } | OperationDecl::ReplaceRegion { .. }
        )
    }
}

impl Script {
    /// Text recorded in the changelog for this script's run.
    pub fn changelog_description(&self) -> &str {
        self.meta
            .changelog
            .as_deref()
            .or(self.meta.description.as_deref())
            .unwrap_or(&self.meta.name)
    }

    pub fn display_name(&self) -> &str {
        if self.meta.name.trim().is_empty() {
            "unnamed script"
        } else {
            &self.meta.name
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        if self.changelog_description().trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                patch_id: None,
                field: "meta.name",
            });
        }

        // Outcome reporting is keyed by patch id
        let mut seen = HashSet::new();
        for patch in &self.patches {
            if !seen.insert(patch.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId {
                    patch_id: patch.id.clone(),
                });
            }
        }

        for patch in &self.patches {
            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            }
            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "file",
                });
            }
            // An empty marker occurs in every file and would skip the patch
            // unconditionally
            if patch.applied_marker.as_deref() == Some("") {
                issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "applied_marker",
                });
            }

            match &patch.anchor {
                Some(AnchorSpec::Line { contains }) => {
                    if contains.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "anchor.contains",
                        });
                    }
                }
                Some(AnchorSpec::Region {
                    start_contains,
                    end_contains,
                }) => {
                    if start_contains.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "anchor.start_contains",
                        });
                    }
                    if end_contains.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "anchor.end_contains",
                        });
                    }
                }
                Some(AnchorSpec::BalancedBlock {
                    start_contains,
                    open,
                    close,
                }) => {
                    if start_contains.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "anchor.start_contains",
                        });
                    }
                    if open == close {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: "open and close characters must differ".to_string(),
                        });
                    }
                }
                Some(AnchorSpec::Regex { pattern }) => {
                    if let Err(err) = Regex::new(pattern) {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: format!("regex does not compile: {err}"),
                        });
                    }
                }
                None => {}
            }

            match &patch.operation {
                OperationDecl::InsertAfter { text } | OperationDecl::ReplaceRegion { text } => {
                    if text.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: Some(patch.id.clone()),
                            field: "operation.text",
                        });
                    }
                    if patch.anchor.is_none() {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: format!("{} requires an anchor", patch.operation.kind()),
                        });
                    }
                }
                OperationDecl::Overwrite { .. } | OperationDecl::CreateIfMissing { .. } => {
                    if patch.anchor.is_some() {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: Some(patch.id.clone()),
                            message: format!("{} does not take an anchor", patch.operation.kind()),
                        });
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    DuplicateId {
        patch_id: String,
    },
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "script declares no patches"),
            ValidationIssue::DuplicateId { patch_id } => {
                write!(f, "patch id '{patch_id}' declared more than once")
            }
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "script missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid declaration: {message}"),
                None => write!(f, "invalid script declaration: {message}"),
            },
        }
    }
}
