//! `manifest.json`: what went into the archive and where it came from.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::artifact::{ArtifactKind, ContentId, Presence};
use crate::inspect::DumpKind;
use crate::report::Warning;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Manifest<'a> {
    pub(crate) archive: &'a str,
    pub(crate) dump_kind: DumpKind,
    pub(crate) files: Vec<ManifestEntry>,
    pub(crate) warnings: &'a [Warning],
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ManifestEntry {
    pub(crate) original_path: PathBuf,
    pub(crate) archive_path: PathBuf,
    pub(crate) kind: ArtifactKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) content_id: Option<ContentId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) aliases: Vec<PathBuf>,
    pub(crate) presence: Presence,
    /// Absent when the file was not bundled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) sha256: Option<String>,
}

pub(crate) fn write_manifest(path: &Path, manifest: &Manifest<'_>) -> Result<()> {
    let mut json = serde_json::to_string_pretty(manifest).context("Failed to encode manifest")?;
    json.push('\n');
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
