//! Dependency set construction.
//!
//! Turns the raw `(path, content id, kind)` list produced by a dump inspector
//! into a [`DependencySet`]: paths normalized, duplicates collapsed, and every
//! build id run through the [`DebugInfoLocator`]. Per-artifact trouble
//! (missing files, absent debug info, conflicting duplicates) is recorded in
//! the returned [`Report`]; only a malformed entry list is an error.

pub(crate) mod paths;

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::artifact::{ArtifactDescriptor, ArtifactKind, ContentId, DebugInfoStatus, Presence};
use crate::debuginfo::DebugInfoLocator;
use crate::error::{Error, Result};
use crate::report::{Report, Warning};

use paths::{normalize, normalize_lexical, NormalizedPath};

/// One file reference as reported by the inspector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEntry {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    #[serde(default)]
    pub content_id: Option<ContentId>,
    /// The binary still has its DWARF sections, no separate file needed.
    #[serde(default)]
    pub embedded_debug_info: bool,
}

impl RawEntry {
    pub fn new(path: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            kind,
            content_id: None,
            embedded_debug_info: false,
        }
    }

    pub fn with_content_id(mut self, content_id: ContentId) -> Self {
        self.content_id = Some(content_id);
        self
    }

    pub fn with_embedded_debug_info(mut self) -> Self {
        self.embedded_debug_info = true;
        self
    }
}

/// Deduplicated descriptors in discovery order. The dump is always first.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    entries: Vec<ArtifactDescriptor>,
    by_path: HashMap<PathBuf, usize>,
}

impl DependencySet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactDescriptor> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ArtifactDescriptor> {
        self.entries.get(index)
    }

    pub fn position(&self, path: &Path) -> Option<usize> {
        self.by_path.get(path).copied()
    }

    pub fn find(&self, path: &Path) -> Option<&ArtifactDescriptor> {
        self.position(path).map(|i| &self.entries[i])
    }

    pub fn dump(&self) -> Option<&ArtifactDescriptor> {
        self.entries
            .first()
            .filter(|d| d.kind == ArtifactKind::DumpFile)
    }

    /// The program the dump belongs to (vmlinux for kernel dumps).
    pub fn executable(&self) -> Option<&ArtifactDescriptor> {
        self.entries
            .iter()
            .find(|d| d.kind == ArtifactKind::Executable)
    }

    pub fn debug_info_of(&self, descriptor: &ArtifactDescriptor) -> Option<&ArtifactDescriptor> {
        match descriptor.debug_info {
            DebugInfoStatus::Found(index) => self.entries.get(index),
            _ => None,
        }
    }

    fn push(&mut self, descriptor: ArtifactDescriptor) -> usize {
        let index = self.entries.len();
        self.by_path
            .insert(descriptor.original_path.clone(), index);
        self.entries.push(descriptor);
        index
    }
}

/// Builds a [`DependencySet`] from inspector output.
#[derive(Debug, Clone, Default)]
pub struct DependencySetBuilder {
    locator: DebugInfoLocator,
    working_dir: Option<PathBuf>,
}

impl DependencySetBuilder {
    pub fn new(locator: DebugInfoLocator) -> Self {
        Self {
            locator,
            working_dir: None,
        }
    }

    /// Resolve relative paths against `dir` instead of the process cwd.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn build(&self, dump_path: &Path, entries: &[RawEntry]) -> Result<(DependencySet, Report)> {
        if dump_path.as_os_str().is_empty() {
            return Err(Error::MalformedInput("empty dump path".into()));
        }
        let cwd = match &self.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        let mut set = DependencySet::default();
        let mut report = Report::new();
        let mut embedded = Vec::new();

        let dump = normalize(&cwd, dump_path);
        ensure_dump_readable(dump_path, &dump)?;
        set.push(ArtifactDescriptor::new(
            dump.path.clone(),
            ArtifactKind::DumpFile,
            Presence::Present,
        ));
        embedded.push(false);

        for entry in entries {
            if entry.path.as_os_str().is_empty() {
                return Err(Error::MalformedInput(format!(
                    "{} entry with an empty path",
                    entry.kind
                )));
            }
            let normalized = normalize(&cwd, &entry.path);

            if entry.kind == ArtifactKind::DumpFile && normalized.path != dump.path {
                return Err(Error::MalformedInput(format!(
                    "second dump file '{}' (dump is '{}')",
                    entry.path.display(),
                    dump_path.display()
                )));
            }

            match set.position(&normalized.path) {
                Some(index) => merge_duplicate(&mut set, index, entry, &normalized, &mut report),
                None => {
                    set.push(new_descriptor(entry, &normalized, &mut report));
                    embedded.push(entry.embedded_debug_info);
                }
            }
        }

        self.resolve_debug_info(&cwd, &mut set, &embedded, &mut report);

        Ok((set, report))
    }

    fn resolve_debug_info(
        &self,
        cwd: &Path,
        set: &mut DependencySet,
        embedded: &[bool],
        report: &mut Report,
    ) {
        // Debug descriptors appended below never need a lookup themselves.
        let discovered = set.len();
        for index in 0..discovered {
            let descriptor = &set.entries[index];
            if !descriptor.kind.is_binary() {
                continue;
            }
            let path = descriptor.original_path.clone();
            let present = descriptor.is_present();
            let content_id = descriptor.content_id.clone();

            let status = if embedded[index] {
                debug!(path = %path.display(), "debug info embedded in binary");
                DebugInfoStatus::Embedded
            } else if let Some(content_id) = content_id {
                match self.locator.locate(&content_id) {
                    Ok(Some(debug_path)) => {
                        self.link_debug_file(cwd, set, &path, &debug_path, report)
                    }
                    Ok(None) => {
                        report.warn(Warning::NoDebugInfo {
                            path: path.clone(),
                            content_id: Some(content_id),
                        });
                        DebugInfoStatus::NotFound
                    }
                    Err(err) => {
                        report.warn(Warning::DebugLookupFailed {
                            path: path.clone(),
                            reason: err.to_string(),
                        });
                        DebugInfoStatus::LookupFailed(err.to_string())
                    }
                }
            } else if present {
                // Without a build id there is nothing to look up.
                report.warn(Warning::NoDebugInfo {
                    path: path.clone(),
                    content_id: None,
                });
                DebugInfoStatus::NotFound
            } else {
                continue;
            };
            set.entries[index].debug_info = status;
        }
    }

    fn link_debug_file(
        &self,
        cwd: &Path,
        set: &mut DependencySet,
        binary: &Path,
        debug_path: &Path,
        report: &mut Report,
    ) -> DebugInfoStatus {
        let normalized = match normalize_lexical(cwd, debug_path) {
            Ok(n) => n,
            Err(err) => {
                report.warn(Warning::DebugLookupFailed {
                    path: binary.to_path_buf(),
                    reason: format!("{}: {err}", debug_path.display()),
                });
                return DebugInfoStatus::LookupFailed(err.to_string());
            }
        };

        let index = match set.position(&normalized.path) {
            Some(index) => index,
            None => {
                info!(
                    binary = %binary.display(),
                    debug = %normalized.path.display(),
                    "debug info found"
                );
                set.push(ArtifactDescriptor::new(
                    normalized.path,
                    ArtifactKind::DebugInfo,
                    Presence::Present,
                ))
            }
        };
        DebugInfoStatus::Found(index)
    }
}

fn ensure_dump_readable(recorded: &Path, dump: &NormalizedPath) -> Result<()> {
    if dump.presence != Presence::Present {
        return Err(Error::UnreadableDump {
            path: recorded.to_path_buf(),
            err: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        });
    }
    let file = File::open(&dump.path).map_err(|err| Error::UnreadableDump {
        path: recorded.to_path_buf(),
        err,
    })?;
    let md = file.metadata().map_err(|err| Error::UnreadableDump {
        path: recorded.to_path_buf(),
        err,
    })?;
    if !md.is_file() {
        return Err(Error::MalformedInput(format!(
            "dump '{}' is not a regular file",
            recorded.display()
        )));
    }
    Ok(())
}

fn new_descriptor(
    entry: &RawEntry,
    normalized: &NormalizedPath,
    report: &mut Report,
) -> ArtifactDescriptor {
    // Only binaries are looked up by build id.
    let content_id = entry
        .content_id
        .clone()
        .filter(|_| entry.kind.is_binary());
    let mut descriptor =
        ArtifactDescriptor::new(normalized.path.clone(), entry.kind, normalized.presence)
            .with_content_id(content_id);
    add_alias(&mut descriptor, &normalized.lexical);

    match normalized.presence {
        Presence::Present => info!(kind = %entry.kind, path = %normalized.path.display(), "found"),
        Presence::Missing => report.warn(Warning::Missing {
            path: normalized.path.clone(),
            kind: entry.kind,
        }),
        Presence::DanglingSymlink => report.warn(Warning::DanglingSymlink {
            path: normalized.path.clone(),
            kind: entry.kind,
        }),
    }
    descriptor
}

fn merge_duplicate(
    set: &mut DependencySet,
    index: usize,
    entry: &RawEntry,
    normalized: &NormalizedPath,
    report: &mut Report,
) {
    let existing = &mut set.entries[index];
    if existing.kind == ArtifactKind::DumpFile && entry.kind == ArtifactKind::DumpFile {
        return;
    }

    let incoming_id = entry.content_id.clone().filter(|_| entry.kind.is_binary());
    if existing.kind != entry.kind || existing.content_id != incoming_id {
        report.warn(Warning::ConflictingDuplicate {
            path: existing.original_path.clone(),
            kept: describe(existing.kind, existing.content_id.as_ref()),
            ignored: describe(entry.kind, incoming_id.as_ref()),
        });
    } else {
        debug!(path = %existing.original_path.display(), "duplicate entry collapsed");
    }
    if existing.kind != ArtifactKind::DumpFile {
        add_alias(existing, &normalized.lexical);
    }
}

fn add_alias(descriptor: &mut ArtifactDescriptor, recorded: &Path) {
    if descriptor.kind == ArtifactKind::DumpFile || recorded == descriptor.original_path {
        return;
    }
    if !descriptor.aliases.iter().any(|a| a == recorded) {
        debug!(
            alias = %recorded.display(),
            path = %descriptor.original_path.display(),
            "recorded path resolves elsewhere"
        );
        descriptor.aliases.push(recorded.to_path_buf());
    }
}

fn describe(kind: ArtifactKind, content_id: Option<&ContentId>) -> String {
    match content_id {
        Some(id) => format!("{kind} with build id {id}"),
        None => format!("{kind} without build id"),
    }
}
