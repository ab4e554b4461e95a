//! Debugger launcher scripts placed at the archive root.
//!
//! Every script resolves its own directory at run time, so the extracted
//! archive can live anywhere.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::inspect::DumpKind;
use crate::layout::{RUN_GDB, RUN_PYCRASH, RUN_SDB};

/// Kernel module debug info, relative to the archive root.
const MODULE_DEBUG_DIR: &str = "usr/lib/debug/lib/modules";

const PREAMBLE: &str = "#!/bin/sh\nscript_dir=$(dirname \"$(readlink -f \"$0\")\")\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Launcher {
    pub(crate) name: &'static str,
    pub(crate) contents: String,
}

/// Scripts for a dump of `kind`. `program` is the executable (or kernel
/// image) relative to the archive root, when one was bundled.
pub(crate) fn launchers(kind: DumpKind, dump: &Path, program: Option<&Path>) -> Vec<Launcher> {
    let dump = in_script_dir(dump);
    let program = program.map(in_script_dir);
    match kind {
        DumpKind::Userland => vec![Launcher {
            name: RUN_GDB,
            contents: gdb_script(&dump, program.as_deref()),
        }],
        DumpKind::Kernel => vec![
            Launcher {
                name: RUN_SDB,
                contents: kernel_script("sdb -s", &dump, program.as_deref()),
            },
            Launcher {
                name: RUN_PYCRASH,
                contents: kernel_script("crash.sh -m", &dump, program.as_deref()),
            },
        ],
    }
}

fn gdb_script(dump: &str, program: Option<&str>) -> String {
    let mut args = vec![
        "-iex \"set print thread-events off\"".to_string(),
        "-iex \"set sysroot $script_dir\"".to_string(),
        "-iex \"set debug-file-directory $script_dir/usr/lib/debug\"".to_string(),
    ];
    if let Some(program) = program {
        args.push(format!("-iex \"file {program}\""));
    }
    args.push(format!("-iex \"core-file {dump}\""));
    format!("{PREAMBLE}exec gdb {} \"$@\"\n", args.join(" "))
}

fn kernel_script(tool: &str, dump: &str, program: Option<&str>) -> String {
    let modules = format!("\"$script_dir/{MODULE_DEBUG_DIR}\"");
    let mut line = format!("exec {tool} {modules}");
    if let Some(program) = program {
        line.push_str(&format!(" \"{program}\""));
    }
    line.push_str(&format!(" \"{dump}\" \"$@\"\n"));
    format!("{PREAMBLE}{line}")
}

/// `$script_dir/<relative>` escaped for use inside double quotes.
fn in_script_dir(relative: &Path) -> String {
    let mut escaped = String::from("$script_dir/");
    for c in relative.to_string_lossy().chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub(crate) fn write_launcher(root: &Path, launcher: &Launcher) -> Result<()> {
    let path = root.join(launcher.name);
    fs::write(&path, &launcher.contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    make_executable(&path)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_userland_gdb_script() {
        let scripts = launchers(
            DumpKind::Userland,
            Path::new("core.ztest"),
            Some(Path::new("sbin/ztest")),
        );
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].name, RUN_GDB);
        let body = &scripts[0].contents;
        assert!(body.starts_with("#!/bin/sh\n"));
        assert!(body.contains("readlink -f \"$0\""));
        assert!(body.contains("-iex \"set sysroot $script_dir\""));
        assert!(body.contains("-iex \"set debug-file-directory $script_dir/usr/lib/debug\""));
        assert!(body.contains("-iex \"file $script_dir/sbin/ztest\""));
        assert!(body.contains("-iex \"core-file $script_dir/core.ztest\""));
    }

    #[test]
    fn test_userland_without_program_still_loads_core() {
        let scripts = launchers(DumpKind::Userland, Path::new("core.1"), None);
        let body = &scripts[0].contents;
        assert!(!body.contains("-iex \"file "));
        assert!(body.contains("core-file $script_dir/core.1"));
    }

    #[test]
    fn test_kernel_scripts() {
        let scripts = launchers(
            DumpKind::Kernel,
            Path::new("dump.202001"),
            Some(Path::new("usr/lib/debug/boot/vmlinux-5.4.0")),
        );
        let names: Vec<_> = scripts.iter().map(|l| l.name).collect();
        assert_eq!(names, vec![RUN_SDB, RUN_PYCRASH]);
        assert!(scripts[0].contents.contains(
            "exec sdb -s \"$script_dir/usr/lib/debug/lib/modules\" \
             \"$script_dir/usr/lib/debug/boot/vmlinux-5.4.0\" \"$script_dir/dump.202001\""
        ));
        assert!(scripts[1].contents.contains("exec crash.sh -m "));
    }

    #[test]
    fn test_paths_are_escaped() {
        assert_eq!(
            in_script_dir(Path::new("we\"ird$name")),
            "$script_dir/we\\\"ird\\$name"
        );
    }

    #[test]
    fn test_written_launcher_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let script = &launchers(DumpKind::Userland, Path::new("core.1"), None)[0];
        write_launcher(temp.path(), script).unwrap();
        let mode = fs::metadata(temp.path().join(RUN_GDB))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
