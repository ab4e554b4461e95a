//! Archive layout planning.
//!
//! Every descriptor lands at its absolute path with the leading `/` removed,
//! so the extracted archive can be handed to a debugger as its sysroot. The
//! dump itself is the one exception and sits directly under the archive root.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::artifact::ArtifactKind;
use crate::debuginfo::DEFAULT_DEBUG_ROOT;
use crate::dependency::paths::{collapse, resolve_against};
use crate::dependency::DependencySet;
use crate::error::{Error, Result};

pub const RUN_GDB: &str = "run-gdb.sh";
pub const RUN_SDB: &str = "run-sdb.sh";
pub const RUN_PYCRASH: &str = "run-pycrash.sh";
pub const MANIFEST_NAME: &str = "manifest.json";

/// Names at the archive root owned by generated files.
pub const RESERVED_NAMES: &[&str] = &[RUN_GDB, RUN_SDB, RUN_PYCRASH, MANIFEST_NAME];

/// Name of the archive (and of its single top-level directory).
///
/// `archive-<dump>`, or `<node>.archive-<dump>` when the host name that
/// produced a kernel dump is known.
pub fn archive_name(dump_name: &OsStr, node_name: Option<&str>) -> Result<String> {
    let dump_name = dump_name.to_str().ok_or_else(|| {
        Error::MalformedInput(format!("dump name {dump_name:?} is not valid UTF-8"))
    })?;
    match node_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(node) if node.contains('/') => Err(Error::MalformedInput(format!(
            "node name '{node}' contains a path separator"
        ))),
        Some(node) => Ok(format!("{node}.archive-{dump_name}")),
        None => Ok(format!("archive-{dump_name}")),
    }
}

/// Where one descriptor goes inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub kind: ArtifactKind,
    pub original_path: PathBuf,
    pub relative_path: PathBuf,
    /// Recorded alternate spellings, relative to the archive root.
    pub alias_paths: Vec<PathBuf>,
}

/// Immutable mapping from original paths to archive-relative paths.
///
/// Entries are indexed exactly like the [`DependencySet`] they came from.
#[derive(Debug, Clone)]
pub struct ArchivePlan {
    root_name: String,
    entries: Vec<PlannedEntry>,
    by_original: BTreeMap<PathBuf, usize>,
}

impl ArchivePlan {
    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    pub fn entries(&self) -> &[PlannedEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&PlannedEntry> {
        self.entries.get(index)
    }

    pub fn dump(&self) -> &PlannedEntry {
        &self.entries[0]
    }

    pub fn relative_path(&self, original: &Path) -> Option<&Path> {
        self.by_original
            .get(original)
            .map(|&i| self.entries[i].relative_path.as_path())
    }
}

#[derive(Debug, Clone)]
pub struct LayoutPlanner {
    debug_root: PathBuf,
    node_name: Option<String>,
}

impl Default for LayoutPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_DEBUG_ROOT)
    }
}

impl LayoutPlanner {
    /// `debug_root` must be the root the dependency set was resolved with;
    /// debug files under it are rebased onto `usr/lib/debug`.
    pub fn new(debug_root: impl Into<PathBuf>) -> Self {
        Self {
            debug_root: debug_root.into(),
            node_name: None,
        }
    }

    pub fn with_node_name(mut self, node_name: Option<String>) -> Self {
        self.node_name = node_name;
        self
    }

    pub fn plan(&self, set: &DependencySet, dump_path: &Path) -> Result<ArchivePlan> {
        let dump = set
            .dump()
            .ok_or_else(|| Error::MalformedInput("dependency set has no dump file".into()))?;
        let dump_name = dump_path
            .file_name()
            .or_else(|| dump.original_path.file_name())
            .ok_or_else(|| {
                Error::MalformedInput(format!("dump path '{}' has no file name", dump_path.display()))
            })?;
        let root_name = archive_name(dump_name, self.node_name.as_deref())?;
        let debug_root = absolute_root(&self.debug_root, std::env::current_dir)?;
        let bundled_debug_root = strip_root(Path::new(DEFAULT_DEBUG_ROOT))?;

        let mut claims = Claims::default();
        let mut entries = Vec::with_capacity(set.len());
        let mut by_original = BTreeMap::new();

        for (index, descriptor) in set.iter().enumerate() {
            let relative_path = if index == 0 {
                PathBuf::from(dump_name)
            } else if descriptor.kind == ArtifactKind::DebugInfo {
                match descriptor.original_path.strip_prefix(&debug_root) {
                    Ok(rest) => bundled_debug_root.join(rest),
                    Err(_) => strip_root(&descriptor.original_path)?,
                }
            } else {
                strip_root(&descriptor.original_path)?
            };
            claims.claim(&relative_path, &descriptor.original_path)?;

            let mut alias_paths = Vec::with_capacity(descriptor.aliases.len());
            for alias in &descriptor.aliases {
                let relative = strip_root(alias)?;
                claims.claim(&relative, alias)?;
                alias_paths.push(relative);
            }

            debug!(
                original = %descriptor.original_path.display(),
                relative = %relative_path.display(),
                "planned"
            );
            by_original.insert(descriptor.original_path.clone(), index);
            entries.push(PlannedEntry {
                kind: descriptor.kind,
                original_path: descriptor.original_path.clone(),
                relative_path,
                alias_paths,
            });
        }
        claims.check_nesting()?;

        Ok(ArchivePlan {
            root_name,
            entries,
            by_original,
        })
    }
}

/// Every archive path claimed so far, with the path that claimed it.
struct Claims(BTreeMap<PathBuf, PathBuf>);

impl Default for Claims {
    fn default() -> Self {
        let reserved = RESERVED_NAMES
            .iter()
            .map(|name| (PathBuf::from(name), PathBuf::from(name)))
            .collect();
        Self(reserved)
    }
}

impl Claims {
    fn claim(&mut self, relative: &Path, owner: &Path) -> Result<()> {
        if let Some(first) = self.0.get(relative) {
            return Err(Error::PlanCollision {
                first: first.clone(),
                second: owner.to_path_buf(),
                relative: relative.to_path_buf(),
            });
        }
        self.0.insert(relative.to_path_buf(), owner.to_path_buf());
        Ok(())
    }

    /// A claimed file cannot also be a directory of another claim.
    fn check_nesting(&self) -> Result<()> {
        for (relative, owner) in &self.0 {
            for ancestor in relative.ancestors().skip(1) {
                if ancestor.as_os_str().is_empty() {
                    break;
                }
                if let Some(first) = self.0.get(ancestor) {
                    return Err(Error::PlanCollision {
                        first: first.clone(),
                        second: owner.clone(),
                        relative: ancestor.to_path_buf(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// `cwd` is only asked for when `root` is relative.
fn absolute_root(root: &Path, cwd: impl FnOnce() -> io::Result<PathBuf>) -> io::Result<PathBuf> {
    if root.is_relative() {
        Ok(collapse(&resolve_against(&cwd()?, root)))
    } else {
        Ok(collapse(root))
    }
}

fn strip_root(path: &Path) -> Result<PathBuf> {
    let relative = path.strip_prefix("/").map_err(|_| {
        Error::MalformedInput(format!("'{}' is not an absolute path", path.display()))
    })?;
    let clean = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !clean || relative.as_os_str().is_empty() {
        return Err(Error::MalformedInput(format!(
            "'{}' cannot be placed in the archive",
            path.display()
        )));
    }
    Ok(relative.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ContentId;
    use crate::debuginfo::{build_id_relative_path, DebugInfoLocator};
    use crate::dependency::{DependencySetBuilder, RawEntry};
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        debug_root: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        let debug_root = root.join("debug");
        for (path, bytes) in [
            ("sbin/ztest", &b"ztest"[..]),
            ("lib/libnvpair.so.1", b"nvpair"),
            ("lib64/ld-linux-x86-64.so.2", b"ld"),
            ("crash/core.ztest", b"core"),
        ] {
            let full = root.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, bytes).unwrap();
        }
        Fixture {
            _temp: temp,
            root,
            debug_root,
        }
    }

    fn build(f: &Fixture, dump: &Path, entries: &[RawEntry]) -> DependencySet {
        DependencySetBuilder::new(DebugInfoLocator::new(&f.debug_root))
            .with_working_dir(&f.root)
            .build(dump, entries)
            .unwrap()
            .0
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name(OsStr::new("core.1"), None).unwrap(),
            "archive-core.1"
        );
        assert_eq!(
            archive_name(OsStr::new("dump.202001"), Some("host1")).unwrap(),
            "host1.archive-dump.202001"
        );
        assert_eq!(
            archive_name(OsStr::new("core"), Some("  ")).unwrap(),
            "archive-core"
        );
        assert!(archive_name(OsStr::new("core"), Some("a/b")).is_err());
    }

    #[test]
    fn test_paths_are_preserved_and_dump_is_at_root() {
        let f = fixture();
        let entries = vec![
            RawEntry::new(f.root.join("sbin/ztest"), ArtifactKind::Executable),
            RawEntry::new(f.root.join("lib/libnvpair.so.1"), ArtifactKind::SharedObject),
            RawEntry::new(f.root.join("lib64/ld-linux-x86-64.so.2"), ArtifactKind::DynamicLinker),
        ];
        let set = build(&f, Path::new("crash/core.ztest"), &entries);
        let plan = LayoutPlanner::new(&f.debug_root)
            .plan(&set, Path::new("crash/core.ztest"))
            .unwrap();

        assert_eq!(plan.root_name(), "archive-core.ztest");
        assert_eq!(plan.dump().relative_path, PathBuf::from("core.ztest"));
        for entry in &plan.entries()[1..] {
            assert_eq!(
                entry.relative_path,
                entry.original_path.strip_prefix("/").unwrap()
            );
        }
        let unique: HashSet<_> = plan.entries().iter().map(|e| &e.relative_path).collect();
        assert_eq!(unique.len(), plan.entries().len());
    }

    #[test]
    fn test_debug_info_is_rebased_onto_standard_root() {
        let f = fixture();
        let id = ContentId::parse("1bfce25bba922713a61e1929bbaae1beacdb64b7").unwrap();
        let debug_file = f.debug_root.join(build_id_relative_path(&id));
        fs::create_dir_all(debug_file.parent().unwrap()).unwrap();
        fs::write(&debug_file, b"dwarf").unwrap();

        let entries =
            vec![RawEntry::new(f.root.join("sbin/ztest"), ArtifactKind::Executable).with_content_id(id)];
        let dump = f.root.join("crash/core.ztest");
        let set = build(&f, &dump, &entries);
        let plan = LayoutPlanner::new(&f.debug_root).plan(&set, &dump).unwrap();

        assert_eq!(
            plan.relative_path(&debug_file).unwrap(),
            Path::new("usr/lib/debug/.build-id/1b/fce25bba922713a61e1929bbaae1beacdb64b7.debug")
        );
    }

    #[test]
    fn test_aliases_are_planned() {
        let f = fixture();
        std::os::unix::fs::symlink("lib", f.root.join("lib-alias")).unwrap();
        let entries = vec![RawEntry::new(
            f.root.join("lib-alias/libnvpair.so.1"),
            ArtifactKind::SharedObject,
        )];
        let dump = f.root.join("crash/core.ztest");
        let set = build(&f, &dump, &entries);
        let plan = LayoutPlanner::new(&f.debug_root).plan(&set, &dump).unwrap();

        let entry = &plan.entries()[1];
        assert_eq!(
            entry.alias_paths,
            vec![f.root.join("lib-alias/libnvpair.so.1").strip_prefix("/").unwrap().to_path_buf()]
        );
    }

    #[test]
    fn test_reserved_name_collision_fails() {
        let f = fixture();
        let dump = f.root.join("crash/run-gdb.sh");
        fs::write(&dump, b"core").unwrap();
        let set = build(&f, &dump, &[]);

        let err = LayoutPlanner::new(&f.debug_root).plan(&set, &dump).unwrap_err();
        assert!(matches!(err, Error::PlanCollision { .. }));
    }

    #[test]
    fn test_dump_shadowing_a_directory_fails() {
        let f = fixture();
        // Name the dump after the first component of every other planned path.
        let top = f.root.components().nth(1).unwrap().as_os_str().to_owned();
        let dump = f.root.join("crash").join(&top);
        fs::write(&dump, b"core").unwrap();
        let entries = vec![RawEntry::new(f.root.join("sbin/ztest"), ArtifactKind::Executable)];
        let set = build(&f, &dump, &entries);

        let err = LayoutPlanner::new(&f.debug_root).plan(&set, &dump).unwrap_err();
        assert!(matches!(err, Error::PlanCollision { .. }));
    }

    #[test]
    fn test_absolute_debug_root_ignores_cwd() {
        let gone = || -> io::Result<PathBuf> {
            Err(io::Error::new(io::ErrorKind::NotFound, "cwd removed"))
        };
        assert_eq!(
            absolute_root(Path::new("/usr/lib/./debug"), gone).unwrap(),
            PathBuf::from("/usr/lib/debug")
        );
        assert!(absolute_root(Path::new("debug"), gone).is_err());
        assert_eq!(
            absolute_root(Path::new("debug"), || Ok(PathBuf::from("/work"))).unwrap(),
            PathBuf::from("/work/debug")
        );
    }

    #[test]
    fn test_strip_root() {
        assert_eq!(
            strip_root(Path::new("/lib/x.so")).unwrap(),
            PathBuf::from("lib/x.so")
        );
        assert!(strip_root(Path::new("lib/x.so")).is_err());
        assert!(strip_root(Path::new("/")).is_err());
    }
}
