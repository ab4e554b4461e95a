use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::artifact::Presence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NormalizedPath {
    /// Canonical path when resolvable, otherwise the lexical form.
    pub(crate) path: PathBuf,
    /// The recorded path made absolute with `.`/`..` collapsed.
    pub(crate) lexical: PathBuf,
    pub(crate) presence: Presence,
}

pub(crate) fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Collapse `.` and `..` without touching the filesystem.
///
/// `..` at the root stays at the root, matching what the kernel does.
pub(crate) fn collapse(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.parent().is_some() {
                    out.pop();
                }
            }
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                out.push(component.as_os_str());
            }
        }
    }
    out
}

pub(crate) fn normalize(cwd: &Path, recorded: &Path) -> NormalizedPath {
    let absolute = resolve_against(cwd, recorded);
    let lexical = collapse(&absolute);

    match fs::canonicalize(&absolute) {
        Ok(path) => NormalizedPath {
            path,
            lexical,
            presence: Presence::Present,
        },
        Err(_) => {
            let presence = match fs::symlink_metadata(&lexical) {
                Ok(md) if md.file_type().is_symlink() => Presence::DanglingSymlink,
                Ok(_) => Presence::Present,
                Err(_) => Presence::Missing,
            };
            NormalizedPath {
                path: lexical.clone(),
                lexical,
                presence,
            }
        }
    }
}

/// Like [`normalize`] but without resolving symlinks.
///
/// Debug files are addressed by their `.build-id` location, which is usually
/// a symlink into the debug tree; the location itself is what gets bundled.
pub(crate) fn normalize_lexical(cwd: &Path, recorded: &Path) -> io::Result<NormalizedPath> {
    let lexical = collapse(&resolve_against(cwd, recorded));
    fs::metadata(&lexical)?;
    Ok(NormalizedPath {
        path: lexical.clone(),
        lexical,
        presence: Presence::Present,
    })
}
