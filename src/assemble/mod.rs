//! Archive assembly: stage, describe, compress.
//!
//! The assembler owns one staging tree per output name, guarded by an
//! exclusive lock file next to the output. Files are copied into the tree as
//! laid out by the [`ArchivePlan`], launchers and `manifest.json` are added at
//! the root, and the tree is packed into a deterministic tarball.
//!
//! Only problems with the dump itself, the staging tree or the final archive
//! abort the run. An artifact that cannot be copied becomes a
//! [`Warning::CopyFailed`] and the archive is still produced.

mod launcher;
mod manifest;
mod tarball;

pub use tarball::Compression;

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};
use fs2::FileExt;
use tracing::{debug, info};

use crate::artifact::ArtifactKind;
use crate::dependency::DependencySet;
use crate::error::{Error, Result};
use crate::inspect::DumpKind;
use crate::layout::{ArchivePlan, MANIFEST_NAME};
use crate::report::{Report, Warning};

use manifest::{Manifest, ManifestEntry};

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub compression: Compression,
    /// Codec level; `None` picks the codec default.
    pub level: Option<i32>,
    /// Parallel copy workers. 1 copies sequentially.
    pub copy_jobs: usize,
    /// Leave the staging tree in place for inspection.
    pub keep_staging: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Gzip,
            level: None,
            copy_jobs: 1,
            keep_staging: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveResult {
    pub archive_path: PathBuf,
    pub sha256: String,
    /// Original paths of everything that made it into the archive.
    pub archived: Vec<PathBuf>,
    pub report: Report,
}

#[derive(Debug, Clone, Default)]
pub struct Assembler {
    options: AssembleOptions,
}

struct CopyJob<'a> {
    index: usize,
    src: &'a Path,
    dst: PathBuf,
}

impl Assembler {
    pub fn new(options: AssembleOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AssembleOptions {
        &self.options
    }

    pub fn archive_path(&self, plan: &ArchivePlan, output_dir: &Path) -> PathBuf {
        output_dir.join(format!(
            "{}.{}",
            plan.root_name(),
            self.options.compression.extension()
        ))
    }

    pub fn assemble(
        &self,
        plan: &ArchivePlan,
        set: &DependencySet,
        dump_kind: DumpKind,
        output_dir: &Path,
        mut report: Report,
    ) -> Result<ArchiveResult> {
        let root_name = plan.root_name();
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output dir {}", output_dir.display()))
            .map_err(|err| Error::staging(output_dir, &err))?;

        let _lock = OutputLock::acquire(&output_dir.join(format!(".{root_name}.lock")))?;
        let staging = StagingDir::create(
            output_dir.join(format!(".{root_name}.staging")),
            self.options.keep_staging,
        )?;
        let root = staging.path().join(root_name);
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create staging root {}", root.display()))
            .map_err(|err| Error::staging(&root, &err))?;

        let jobs: Vec<CopyJob<'_>> = set
            .iter()
            .zip(plan.entries())
            .enumerate()
            .filter(|(_, (descriptor, _))| descriptor.is_present())
            .map(|(index, (descriptor, planned))| CopyJob {
                index,
                src: descriptor.original_path.as_path(),
                dst: root.join(&planned.relative_path),
            })
            .collect();
        info!(files = jobs.len(), jobs = self.options.copy_jobs, "staging");

        let mut bundled = vec![false; set.len()];
        for (index, outcome) in run_copies(&jobs, self.options.copy_jobs) {
            let Some(descriptor) = set.get(index) else {
                continue;
            };
            match outcome {
                Ok(()) => bundled[index] = true,
                Err(err) if index == 0 => {
                    return Err(Error::staging(&descriptor.original_path, &err));
                }
                Err(err) => report.warn(Warning::CopyFailed {
                    path: descriptor.original_path.clone(),
                    reason: format!("{err:#}"),
                }),
            }
        }

        for (planned, _) in plan.entries().iter().zip(&bundled).filter(|(_, b)| **b) {
            for alias in &planned.alias_paths {
                if let Err(err) = link_alias(&root, alias, &planned.relative_path) {
                    report.warn(Warning::CopyFailed {
                        path: Path::new("/").join(alias),
                        reason: format!("{err:#}"),
                    });
                }
            }
        }

        let program = plan
            .entries()
            .iter()
            .zip(&bundled)
            .find(|(p, b)| **b && p.kind == ArtifactKind::Executable)
            .map(|(p, _)| p.relative_path.as_path());
        for script in launcher::launchers(dump_kind, &plan.dump().relative_path, program) {
            launcher::write_launcher(&root, &script)
                .map_err(|err| Error::staging(root.join(script.name), &err))?;
        }

        let files = manifest_entries(plan, set, &bundled, &root)
            .map_err(|err| Error::staging(&root, &err))?;
        let manifest_path = root.join(MANIFEST_NAME);
        manifest::write_manifest(
            &manifest_path,
            &Manifest {
                archive: root_name,
                dump_kind,
                files,
                warnings: report.warnings(),
            },
        )
        .map_err(|err| Error::staging(&manifest_path, &err))?;

        let archive_path = self.archive_path(plan, output_dir);
        let level = self
            .options
            .level
            .unwrap_or_else(|| self.options.compression.default_level());
        info!(archive = %archive_path.display(), compression = %self.options.compression, "compressing");
        tarball::write_archive(
            staging.path(),
            root_name,
            &archive_path,
            self.options.compression,
            level,
        )
        .map_err(|err| Error::Archive {
            path: archive_path.clone(),
            reason: format!("{err:#}"),
        })?;
        let sha256 = manifest::sha256_file(&archive_path).map_err(|err| Error::Archive {
            path: archive_path.clone(),
            reason: format!("{err:#}"),
        })?;

        let archived = set
            .iter()
            .zip(&bundled)
            .filter(|(_, b)| **b)
            .map(|(d, _)| d.original_path.clone())
            .collect();

        Ok(ArchiveResult {
            archive_path,
            sha256,
            archived,
            report,
        })
    }
}

/// Copy every job, returning outcomes in job (plan) order.
fn run_copies(jobs: &[CopyJob<'_>], workers: usize) -> Vec<(usize, anyhow::Result<()>)> {
    let workers = workers.max(1).min(jobs.len().max(1));
    if workers == 1 {
        return jobs
            .iter()
            .map(|job| (job.index, copy_file(job.src, &job.dst)))
            .collect();
    }

    let chunk = jobs.len().div_ceil(workers);
    let mut outcomes: Vec<(usize, anyhow::Result<()>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .chunks(chunk)
            .map(|batch| {
                scope.spawn(move || {
                    batch
                        .iter()
                        .map(|job| (job.index, copy_file(job.src, &job.dst)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes
}

fn copy_file(src: &Path, dst: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let copied = copy_contents(src, dst);
    if copied.is_err() {
        let _ = fs::remove_file(dst);
    }
    copied
}

fn copy_contents(src: &Path, dst: &Path) -> anyhow::Result<()> {
    let mut input = File::open(src).with_context(|| format!("Failed to open {}", src.display()))?;
    let md = input.metadata()?;
    if !md.is_file() {
        bail!("{} is not a regular file", src.display());
    }
    let mut output =
        File::create(dst).with_context(|| format!("Failed to create {}", dst.display()))?;
    io::copy(&mut input, &mut output)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    fs::set_permissions(dst, md.permissions())
        .with_context(|| format!("Failed to set permissions on {}", dst.display()))?;
    debug!(src = %src.display(), dst = %dst.display(), "copied");
    Ok(())
}

/// Symlink `alias` to `target`, both relative to `root`, with a relative
/// link so the archive stays relocatable.
fn link_alias(root: &Path, alias: &Path, target: &Path) -> anyhow::Result<()> {
    let link = root.join(alias);
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let relative = relative_link_target(alias, target);
    #[cfg(unix)]
    std::os::unix::fs::symlink(&relative, &link).with_context(|| {
        format!(
            "Failed to link {} -> {}",
            link.display(),
            relative.display()
        )
    })?;
    #[cfg(not(unix))]
    fs::copy(root.join(target), &link)
        .with_context(|| format!("Failed to copy alias {}", link.display()))?;
    Ok(())
}

fn relative_link_target(alias: &Path, target: &Path) -> PathBuf {
    let depth = alias
        .parent()
        .map(|p| p.components().filter(|c| matches!(c, Component::Normal(_))).count())
        .unwrap_or(0);
    let mut relative: PathBuf = std::iter::repeat("..").take(depth).collect();
    relative.push(target);
    relative
}

fn manifest_entries(
    plan: &ArchivePlan,
    set: &DependencySet,
    bundled: &[bool],
    root: &Path,
) -> anyhow::Result<Vec<ManifestEntry>> {
    set.iter()
        .zip(plan.entries())
        .zip(bundled)
        .map(|((descriptor, planned), &bundled)| {
            let sha256 = if bundled {
                Some(manifest::sha256_file(&root.join(&planned.relative_path))?)
            } else {
                None
            };
            Ok(ManifestEntry {
                original_path: descriptor.original_path.clone(),
                archive_path: planned.relative_path.clone(),
                kind: descriptor.kind,
                content_id: descriptor.content_id.clone(),
                aliases: planned.alias_paths.clone(),
                presence: descriptor.presence,
                sha256,
            })
        })
        .collect()
}

/// RAII guard: the lock is released when the file closes on drop.
///
/// The lock file is never removed; every run must lock the same inode.
#[derive(Debug)]
struct OutputLock {
    _file: File,
}

impl OutputLock {
    fn acquire(path: &Path) -> Result<Self> {
        // Never unlink a lock file someone else may hold; open and try instead.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(Error::OutputLocked {
                path: path.to_path_buf(),
            });
        }
        Ok(Self { _file: file })
    }
}

/// RAII guard: removes the staging tree on drop unless asked to keep it.
#[derive(Debug)]
struct StagingDir {
    path: PathBuf,
    keep: bool,
}

impl StagingDir {
    fn create(path: PathBuf, keep: bool) -> Result<Self> {
        if path.exists() {
            debug!(path = %path.display(), "removing stale staging tree");
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove stale {}", path.display()))
                .map_err(|err| Error::staging(&path, &err))?;
        }
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))
            .map_err(|err| Error::staging(&path, &err))?;
        Ok(Self { path, keep })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.keep {
            info!(path = %self.path.display(), "staging tree kept");
        } else {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}
