//! Artifact descriptors: one file a dump depends on.
//!
//! A descriptor carries the normalized absolute path of the file, any other
//! spellings the dump recorded for it, an optional build identifier, and the
//! outcome of the debug-info lookup. Descriptors only ever live inside a
//! [`crate::dependency::DependencySet`], which is why the debug-info relation
//! is an index rather than a reference.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// What role a file plays for the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Executable,
    SharedObject,
    DynamicLinker,
    DebugInfo,
    DumpFile,
}

impl ArtifactKind {
    /// Whether a debug-info lookup makes sense for this kind.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            ArtifactKind::Executable | ArtifactKind::SharedObject | ArtifactKind::DynamicLinker
        )
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::Executable => "executable",
            ArtifactKind::SharedObject => "shared object",
            ArtifactKind::DynamicLinker => "dynamic linker",
            ArtifactKind::DebugInfo => "debug info",
            ArtifactKind::DumpFile => "dump file",
        };
        f.write_str(s)
    }
}

/// A build identifier: lowercase hex, at least two characters.
///
/// The first two characters pick the `.build-id` subdirectory and the rest
/// name the file inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if trimmed.len() < 2 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidContentId(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    pub fn suffix(&self) -> &str {
        &self.0[2..]
    }
}

impl FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the file is available on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Missing,
    DanglingSymlink,
}

/// Outcome of the debug-info lookup for one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugInfoStatus {
    /// Not a binary, or a missing binary with no content id.
    NotApplicable,
    /// Index of the DebugInfo descriptor in the same set.
    Found(usize),
    NotFound,
    /// The binary carries its own DWARF sections.
    Embedded,
    LookupFailed(String),
}

#[derive(Debug, Clone)]
pub struct ArtifactDescriptor {
    pub original_path: PathBuf,
    /// Other absolute spellings recorded by the dump that resolve here.
    pub aliases: Vec<PathBuf>,
    pub content_id: Option<ContentId>,
    pub kind: ArtifactKind,
    pub debug_info: DebugInfoStatus,
    pub presence: Presence,
}

impl ArtifactDescriptor {
    pub fn new(original_path: PathBuf, kind: ArtifactKind, presence: Presence) -> Self {
        Self {
            original_path,
            aliases: Vec::new(),
            content_id: None,
            kind,
            debug_info: DebugInfoStatus::NotApplicable,
            presence,
        }
    }

    pub fn with_content_id(mut self, content_id: Option<ContentId>) -> Self {
        self.content_id = content_id;
        self
    }

    pub fn is_present(&self) -> bool {
        self.presence == Presence::Present
    }
}
