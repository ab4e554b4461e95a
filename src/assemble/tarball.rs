//! Deterministic tarball writer.
//!
//! Entries are sorted by archive path and carry mtime 0 and uid/gid 0, so the
//! same staging tree always produces the same bytes. The gzip header mtime is
//! zeroed as well.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use flate2::GzBuilder;
use serde::{Deserialize, Serialize};
use tar::Builder as TarBuilder;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Gzip => "tar.gz",
            Compression::Zstd => "tar.zst",
        }
    }

    pub fn default_level(self) -> i32 {
        match self {
            Compression::Gzip => 6,
            Compression::Zstd => 3,
        }
    }

    pub fn valid_levels(self) -> std::ops::RangeInclusive<i32> {
        match self {
            Compression::Gzip => 0..=9,
            Compression::Zstd => 1..=22,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Gzip => f.write_str("gzip"),
            Compression::Zstd => f.write_str("zstd"),
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(format!("unknown compression '{other}' (expected gzip or zstd)")),
        }
    }
}

/// Pack `staging_parent/<root_name>` into `out_path`.
///
/// The archive is written next to `out_path` first and renamed into place
/// once complete; a failed run leaves no partial archive behind.
pub(crate) fn write_archive(
    staging_parent: &Path,
    root_name: &str,
    out_path: &Path,
    compression: Compression,
    level: i32,
) -> Result<()> {
    let tmp = partial_path(out_path);
    let written = write_compressed(staging_parent, root_name, &tmp, compression, level);
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    atomic_rename(&tmp, out_path)
}

fn write_compressed(
    staging_parent: &Path,
    root_name: &str,
    tmp: &Path,
    compression: Compression,
    level: i32,
) -> Result<()> {
    let out = File::create(tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    match compression {
        Compression::Gzip => {
            let level = flate2::Compression::new(level.clamp(0, 9) as u32);
            let encoder = GzBuilder::new().mtime(0).write(out, level);
            let encoder = append_tree(TarBuilder::new(encoder), staging_parent, root_name)?;
            encoder
                .finish()
                .with_context(|| format!("Failed to finish gzip stream {}", tmp.display()))?
                .sync_all()?;
        }
        Compression::Zstd => {
            let encoder = zstd::stream::Encoder::new(out, level)?;
            let encoder = append_tree(TarBuilder::new(encoder), staging_parent, root_name)?;
            encoder
                .finish()
                .with_context(|| format!("Failed to finish zstd stream {}", tmp.display()))?
                .sync_all()?;
        }
    }
    Ok(())
}

fn append_tree<W: Write>(
    mut builder: TarBuilder<W>,
    staging_parent: &Path,
    root_name: &str,
) -> Result<W> {
    let src_dir = staging_parent.join(root_name);

    // Collect paths deterministically.
    let mut entries: Vec<PathBuf> = vec![];
    for ent in WalkDir::new(&src_dir).follow_links(false) {
        let ent = ent.with_context(|| format!("Failed to walk {}", src_dir.display()))?;
        entries.push(ent.into_path());
    }
    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(staging_parent).unwrap_or(a);
        let rb = b.strip_prefix(staging_parent).unwrap_or(b);
        ra.cmp(rb)
    });

    for p in entries {
        let rel = p.strip_prefix(staging_parent).unwrap_or(&p).to_path_buf();
        let md = fs::symlink_metadata(&p)?;

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, &rel, io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&p)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder.append_link(&mut header, &rel, &target)?;
        } else if md.is_file() {
            let mut f = File::open(&p).with_context(|| format!("Failed to open {}", p.display()))?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_mode(file_mode(&md));
            header.set_cksum();
            builder
                .append_data(&mut header, &rel, &mut f)
                .with_context(|| format!("Failed to append {}", rel.display()))?;
        }
    }

    builder
        .into_inner()
        .with_context(|| "Failed to finalize tar builder")
}

#[cfg(unix)]
fn file_mode(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_md: &fs::Metadata) -> u32 {
    0o644
}

fn partial_path(out_path: &Path) -> PathBuf {
    let mut name = out_path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    out_path.with_file_name(name)
}

fn atomic_rename(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    // Same directory, so a plain rename is atomic.
    fs::rename(src, dst).with_context(|| {
        format!("Failed to move {} to {}", src.display(), dst.display())
    })?;
    Ok(())
}
