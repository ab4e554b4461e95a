//! Non-fatal problems collected while building an archive.
//!
//! The report is created by the dependency set builder, handed through the
//! planner untouched and extended by the assembler, then returned to the
//! caller with the finished archive.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::artifact::{ArtifactKind, ContentId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum Warning {
    /// Referenced by the dump but absent on this host.
    Missing { path: PathBuf, kind: ArtifactKind },
    DanglingSymlink { path: PathBuf, kind: ArtifactKind },
    /// A binary whose debug info is neither embedded nor installed.
    NoDebugInfo {
        path: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_id: Option<ContentId>,
    },
    DebugLookupFailed { path: PathBuf, reason: String },
    /// Same path recorded twice with different metadata; the first one won.
    ConflictingDuplicate {
        path: PathBuf,
        kept: String,
        ignored: String,
    },
    CopyFailed { path: PathBuf, reason: String },
}

impl Warning {
    pub fn path(&self) -> &Path {
        match self {
            Warning::Missing { path, .. }
            | Warning::DanglingSymlink { path, .. }
            | Warning::NoDebugInfo { path, .. }
            | Warning::DebugLookupFailed { path, .. }
            | Warning::ConflictingDuplicate { path, .. }
            | Warning::CopyFailed { path, .. } => path,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Missing { path, kind } => {
                write!(f, "could not find {kind}: {}", path.display())
            }
            Warning::DanglingSymlink { path, kind } => {
                write!(f, "{kind} is a dangling symlink: {}", path.display())
            }
            Warning::NoDebugInfo {
                path,
                content_id: Some(id),
            } => write!(
                f,
                "could not find debug info of: {} (build id {id})",
                path.display()
            ),
            Warning::NoDebugInfo {
                path,
                content_id: None,
            } => write!(
                f,
                "could not find debug info of: {} (no build id)",
                path.display()
            ),
            Warning::DebugLookupFailed { path, reason } => write!(
                f,
                "debug info lookup failed for {}: {reason}",
                path.display()
            ),
            Warning::ConflictingDuplicate {
                path,
                kept,
                ignored,
            } => write!(
                f,
                "{} recorded twice with conflicting metadata; kept {kept}, ignored {ignored}",
                path.display()
            ),
            Warning::CopyFailed { path, reason } => {
                write!(f, "could not bundle {}: {reason}", path.display())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    warnings: Vec<Warning>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and echo it to the log.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    /// Paths that could not be placed in the archive.
    pub fn unbundled_paths(&self) -> Vec<&Path> {
        self.warnings
            .iter()
            .filter(|w| {
                matches!(
                    w,
                    Warning::Missing { .. }
                        | Warning::DanglingSymlink { .. }
                        | Warning::CopyFailed { .. }
                )
            })
            .map(Warning::path)
            .collect()
    }
}
