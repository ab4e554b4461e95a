//! Fatal errors.
//!
//! Anything that aborts a run lives here. Per-artifact problems never become
//! an [`Error`]; they are collected as [`crate::report::Warning`]s instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed inspector input: {0}")]
    MalformedInput(String),

    #[error("invalid content identifier '{0}': expected at least two hex characters")]
    InvalidContentId(String),

    #[error("cannot read dump '{}': {err}", .path.display())]
    UnreadableDump { path: PathBuf, err: io::Error },

    #[error("dump inspection failed: {0}")]
    Inspector(String),

    #[error(
        "archive plan collision: '{}' and '{}' both need '{}'",
        .first.display(),
        .second.display(),
        .relative.display()
    )]
    PlanCollision {
        first: PathBuf,
        second: PathBuf,
        relative: PathBuf,
    },

    #[error("output '{}' is locked by another savedump run", .path.display())]
    OutputLocked { path: PathBuf },

    #[error("staging '{}' failed: {reason}", .path.display())]
    Staging { path: PathBuf, reason: String },

    #[error("writing archive '{}' failed: {reason}", .path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn staging(path: impl Into<PathBuf>, err: &anyhow::Error) -> Self {
        Error::Staging {
            path: path.into(),
            reason: format!("{err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_collision_display() {
        let err = Error::PlanCollision {
            first: PathBuf::from("/lib/a.so"),
            second: PathBuf::from("/lib/a.so/x"),
            relative: PathBuf::from("lib/a.so"),
        };
        assert_eq!(
            err.to_string(),
            "archive plan collision: '/lib/a.so' and '/lib/a.so/x' both need 'lib/a.so'"
        );
    }

    #[test]
    fn test_staging_keeps_context_chain() {
        let inner = anyhow::anyhow!("permission denied").context("creating staging root");
        let err = Error::staging("/out/.archive-core.staging", &inner);
        let msg = err.to_string();
        assert!(msg.contains("creating staging root"));
        assert!(msg.contains("permission denied"));
    }
}
