//! Build-id debug-info lookup.
//!
//! Debug files are found purely by convention:
//! `<debug-root>/.build-id/<first two hex chars>/<rest>.debug`.
//! Nothing else is searched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::artifact::ContentId;

/// Standard system debug-info root.
pub const DEFAULT_DEBUG_ROOT: &str = "/usr/lib/debug";

/// Name of the hashed directory under the debug root.
pub const BUILD_ID_DIR: &str = ".build-id";

/// Path of a debug file relative to any debug root.
pub fn build_id_relative_path(id: &ContentId) -> PathBuf {
    PathBuf::from(BUILD_ID_DIR)
        .join(id.prefix())
        .join(format!("{}.debug", id.suffix()))
}

#[derive(Debug, Clone)]
pub struct DebugInfoLocator {
    debug_root: PathBuf,
}

impl Default for DebugInfoLocator {
    fn default() -> Self {
        Self::new(DEFAULT_DEBUG_ROOT)
    }
}

impl DebugInfoLocator {
    pub fn new(debug_root: impl Into<PathBuf>) -> Self {
        Self {
            debug_root: debug_root.into(),
        }
    }

    pub fn debug_root(&self) -> &Path {
        &self.debug_root
    }

    pub fn candidate_path(&self, id: &ContentId) -> PathBuf {
        self.debug_root.join(build_id_relative_path(id))
    }

    /// Look up the debug file for `id`.
    ///
    /// Returns `Ok(None)` when nothing is installed for the identifier. Only
    /// errors other than "not found" (permissions, I/O) are returned as `Err`.
    pub fn locate(&self, id: &ContentId) -> io::Result<Option<PathBuf>> {
        let candidate = self.candidate_path(id);
        match fs::metadata(&candidate) {
            Ok(md) if md.is_file() => Ok(Some(candidate)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ZTEST_ID: &str = "1bfce25bba922713a61e1929bbaae1beacdb64b7";

    #[test]
    fn test_relative_path_convention() {
        let id = ContentId::parse(ZTEST_ID).unwrap();
        assert_eq!(
            build_id_relative_path(&id),
            PathBuf::from(".build-id/1b/fce25bba922713a61e1929bbaae1beacdb64b7.debug")
        );
    }

    #[test]
    fn test_locate_hit() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".build-id/1b");
        fs::create_dir_all(&dir).unwrap();
        let debug = dir.join("fce25bba922713a61e1929bbaae1beacdb64b7.debug");
        fs::write(&debug, b"dwarf").unwrap();

        let locator = DebugInfoLocator::new(temp.path());
        let id = ContentId::parse(ZTEST_ID).unwrap();
        assert_eq!(locator.locate(&id).unwrap(), Some(debug));
    }

    #[test]
    fn test_locate_miss_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        let locator = DebugInfoLocator::new(temp.path());
        let id = ContentId::parse(ZTEST_ID).unwrap();
        assert_eq!(locator.locate(&id).unwrap(), None);
    }

    #[test]
    fn test_locate_missing_root_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let locator = DebugInfoLocator::new(temp.path().join("does-not-exist"));
        let id = ContentId::parse("abcdef").unwrap();
        assert_eq!(locator.locate(&id).unwrap(), None);
    }

    #[test]
    fn test_locate_ignores_directories() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".build-id/ab/cdef.debug")).unwrap();
        let locator = DebugInfoLocator::new(temp.path());
        let id = ContentId::parse("abcdef").unwrap();
        assert_eq!(locator.locate(&id).unwrap(), None);
    }
}
