//! Inspector that asks the host's binutils for the answers.
//!
//! Userland cores only. `file(1)` identifies the dump and the program that
//! produced it, `gdb(1)` lists the shared objects mapped at crash time (with
//! `ldd(1)` as a fallback that misses anything loaded via `dlopen`), and
//! `readelf(1)` supplies build ids.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context};
use tracing::{debug, warn};

use super::{DumpInspector, DumpKind, InspectorOutput};
use crate::artifact::{ArtifactKind, ContentId};
use crate::dependency::RawEntry;
use crate::error::{Error, Result};

const KERNEL_DUMP_MARKER: &str = "Kdump compressed dump";
const USERLAND_CORE_MARKER: &str = "core file";
const GDB_LIBRARY_HEADER: &str = "Shared Object Library";

#[derive(Debug, Clone, Default)]
pub struct HostToolInspector;

impl HostToolInspector {
    pub fn new() -> Self {
        Self
    }

    fn shared_objects(&self, dump: &Path, program: &Path) -> Result<Vec<PathBuf>> {
        let gdb = run_tool(
            "gdb",
            &[
                OsStr::new("--batch"),
                OsStr::new("--nx"),
                OsStr::new("--eval-command=info sharedlibrary"),
                OsStr::new("-c"),
                dump.as_os_str(),
                program.as_os_str(),
            ],
        );
        match gdb {
            Ok(output) => return Ok(parse_gdb_shared_libraries(&output)),
            Err(err) => warn!("gdb could not list shared objects, trying ldd: {err:#}"),
        }

        match run_tool("ldd", &[program.as_os_str()]) {
            Ok(output) => Ok(parse_ldd(&output)),
            Err(err) => Err(Error::Inspector(format!(
                "both gdb(1) and ldd(1) failed to list shared objects: {err:#}"
            ))),
        }
    }
}

impl DumpInspector for HostToolInspector {
    fn inspect(&self, dump: &Path) -> Result<InspectorOutput> {
        let description =
            run_tool("file", &[dump.as_os_str()]).map_err(|err| Error::Inspector(format!("{err:#}")))?;
        match classify_dump(&description) {
            Some(DumpKind::Userland) => {}
            Some(DumpKind::Kernel) => {
                return Err(Error::Inspector(format!(
                    "{} is a kernel crash dump; describe it with an inventory file (--inventory)",
                    dump.display()
                )))
            }
            None => {
                return Err(Error::Inspector(format!(
                    "{} is not a recognized dump: {}",
                    dump.display(),
                    description.trim()
                )))
            }
        }

        let program = parse_execfn(&description).ok_or_else(|| {
            Error::Inspector(format!(
                "could not tell which program produced {}",
                dump.display()
            ))
        })?;
        debug!(program = %program.display(), "program identified");

        let mut entries = vec![binary_entry(&program, ArtifactKind::Executable)];
        for library in self.shared_objects(dump, &program)? {
            let kind = if is_dynamic_linker(&library) {
                ArtifactKind::DynamicLinker
            } else {
                ArtifactKind::SharedObject
            };
            entries.push(binary_entry(&library, kind));
        }

        Ok(InspectorOutput {
            dump_kind: DumpKind::Userland,
            dump_path: dump.to_path_buf(),
            node_name: None,
            entries,
        })
    }
}

/// Build id and DWARF presence for one binary, as far as readelf can tell.
///
/// A binary that is gone (or that readelf chokes on) is still listed; the
/// dependency set builder reports it.
fn binary_entry(path: &Path, kind: ArtifactKind) -> RawEntry {
    let mut entry = RawEntry::new(path, kind);
    if !path.exists() {
        return entry;
    }
    match run_tool("readelf", &[OsStr::new("-n"), path.as_os_str()]) {
        Ok(notes) => {
            if let Some(id) = parse_build_id(&notes) {
                entry = entry.with_content_id(id);
            }
        }
        Err(err) => debug!(path = %path.display(), "no build id: {err:#}"),
    }
    if let Ok(sections) = run_tool("readelf", &[OsStr::new("-S"), path.as_os_str()]) {
        if has_embedded_debug_info(&sections) {
            entry = entry.with_embedded_debug_info();
        }
    }
    entry
}

fn run_tool(tool: &str, args: &[&OsStr]) -> anyhow::Result<String> {
    let binary = which::which(tool).with_context(|| format!("{tool} not found in PATH"))?;
    let output = Command::new(&binary)
        .args(args)
        .output()
        .with_context(|| format!("running {}", binary.display()))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    bail!("{tool} failed ({}): {}\n{}", output.status, stdout.trim(), stderr.trim())
}

pub fn classify_dump(file_output: &str) -> Option<DumpKind> {
    if file_output.contains(KERNEL_DUMP_MARKER) {
        Some(DumpKind::Kernel)
    } else if file_output.contains(USERLAND_CORE_MARKER) {
        Some(DumpKind::Userland)
    } else {
        None
    }
}

/// Program path from the `execfn: '...'` field of `file(1)` output.
pub fn parse_execfn(file_output: &str) -> Option<PathBuf> {
    const FIELD: &str = "execfn: '";
    let start = file_output.find(FIELD)? + FIELD.len();
    let rest = &file_output[start..];
    let end = rest.find("',")?;
    let path = &rest[..end];
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Library paths from `gdb -ex 'info sharedlibrary'`: everything from the
/// first `/` on, for each row after the table header.
pub fn parse_gdb_shared_libraries(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .skip_while(|line| !line.contains(GDB_LIBRARY_HEADER))
        .skip(1)
        .filter_map(|line| line.find('/').map(|i| PathBuf::from(line[i..].trim_end())))
        .collect()
}

/// Library paths from `ldd(1)`: resolved `=>` targets plus the dynamic
/// linker line.
pub fn parse_ldd(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| {
            if line.contains("=>") {
                extract_library_path(line)
            } else {
                line.split_whitespace()
                    .next()
                    .filter(|first| first.starts_with('/') && is_dynamic_linker(Path::new(first)))
                    .map(PathBuf::from)
            }
        })
        .collect()
}

/// Path after `=>` in an ldd line, when it resolved to an absolute path.
fn extract_library_path(line: &str) -> Option<PathBuf> {
    let arrow_pos = line.find("=>")?;
    let path = line[arrow_pos + 2..].split_whitespace().next()?;
    path.starts_with('/').then(|| PathBuf::from(path))
}

/// The `Build ID:` note from `readelf -n`.
pub fn parse_build_id(output: &str) -> Option<ContentId> {
    output
        .lines()
        .find_map(|line| line.split_once("Build ID:"))
        .and_then(|(_, id)| ContentId::parse(id).ok())
}

/// Whether `readelf -S` lists both `.debug_info` and `.debug_str`.
pub fn has_embedded_debug_info(output: &str) -> bool {
    output.contains(".debug_info") && output.contains(".debug_str")
}

pub fn is_dynamic_linker(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("ld-linux") || n.starts_with("ld-musl") || n.starts_with("ld.so"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE_CORE: &str = "core.ztest.1234: ELF 64-bit LSB core file, x86-64, version 1 (SYSV), \
        SVR4-style, from 'ztest', real uid: 0, effective uid: 0, real gid: 0, effective gid: 0, \
        execfn: '/sbin/ztest', platform: 'x86_64'";

    const GDB_OUTPUT: &str = "\
[New LWP 19109]
[Thread debugging using libthread_db enabled]
Using host libthread_db library \"/lib/x86_64-linux-gnu/libthread_db.so.1\".
Core was generated by `ztest'.
#0  0x00007f2947ddf204 in __waitpid (pid=19122) at ../sysdeps/unix/sysv/linux/waitpid.c:30
From                To                  Syms Read   Shared Object Library
0x00007f29489ba180  0x00007f29489c4cea  Yes         /lib/libnvpair.so.1
0x00007f29471688c0  0x00007f294717aa83  Yes (*)     /lib/x86_64-linux-gnu/libudev.so.1
0x00007f2948bccf10  0x00007f2948bebb20  Yes         /lib64/ld-linux-x86-64.so.2
(*): Shared library is missing debugging information.
";

    const LDD_OUTPUT: &str = "\
\tlinux-vdso.so.1 (0x00007ffeeb9ac000)
\tlibnvpair.so.1 => /lib/libnvpair.so.1 (0x00007f607a568000)
\tlibmissing.so.9 => not found
\tlibc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f607958e000)
\t/lib64/ld-linux-x86-64.so.2 (0x00007f607a9a2000)
";

    const READELF_NOTES: &str = "
Displaying notes found in: .note.gnu.build-id
  Owner                 Data size\tDescription
  GNU                  0x00000014\tNT_GNU_BUILD_ID (unique build ID bitstring)
    Build ID: 1bfce25bba922713a61e1929bbaae1beacdb64b7
";

    #[test]
    fn test_classify_dump() {
        assert_eq!(classify_dump(FILE_CORE), Some(DumpKind::Userland));
        assert_eq!(
            classify_dump("dump.202001: Kdump compressed dump v6, system Linux"),
            Some(DumpKind::Kernel)
        );
        assert_eq!(classify_dump("notes.txt: ASCII text"), None);
    }

    #[test]
    fn test_parse_execfn() {
        assert_eq!(parse_execfn(FILE_CORE), Some(PathBuf::from("/sbin/ztest")));
        assert_eq!(parse_execfn("core: ELF 64-bit LSB core file"), None);
    }

    #[test]
    fn test_parse_gdb_shared_libraries() {
        assert_eq!(
            parse_gdb_shared_libraries(GDB_OUTPUT),
            vec![
                PathBuf::from("/lib/libnvpair.so.1"),
                PathBuf::from("/lib/x86_64-linux-gnu/libudev.so.1"),
                PathBuf::from("/lib64/ld-linux-x86-64.so.2"),
            ]
        );
        assert!(parse_gdb_shared_libraries("No shared libraries loaded at this time.").is_empty());
    }

    #[test]
    fn test_parse_ldd() {
        assert_eq!(
            parse_ldd(LDD_OUTPUT),
            vec![
                PathBuf::from("/lib/libnvpair.so.1"),
                PathBuf::from("/lib/x86_64-linux-gnu/libc.so.6"),
                PathBuf::from("/lib64/ld-linux-x86-64.so.2"),
            ]
        );
    }

    #[test]
    fn test_extract_library_path() {
        assert_eq!(
            extract_library_path("\tlibc.musl-x86_64.so.1 => /lib/ld-musl-x86_64.so.1 (0x7f...)"),
            Some(PathBuf::from("/lib/ld-musl-x86_64.so.1"))
        );
        assert_eq!(extract_library_path("\tlinux-vdso.so.1"), None);
        assert_eq!(extract_library_path(""), None);
    }

    #[test]
    fn test_parse_build_id() {
        assert_eq!(
            parse_build_id(READELF_NOTES).unwrap().as_str(),
            "1bfce25bba922713a61e1929bbaae1beacdb64b7"
        );
        assert_eq!(parse_build_id("Displaying notes found in: .note.ABI-tag"), None);
    }

    #[test]
    fn test_has_embedded_debug_info() {
        assert!(has_embedded_debug_info(
            "  [27] .debug_info PROGBITS\n  [30] .debug_str PROGBITS"
        ));
        assert!(!has_embedded_debug_info("  [27] .debug_info PROGBITS"));
        assert!(!has_embedded_debug_info("  [ 1] .interp PROGBITS"));
    }

    #[test]
    fn test_is_dynamic_linker() {
        assert!(is_dynamic_linker(Path::new("/lib64/ld-linux-x86-64.so.2")));
        assert!(is_dynamic_linker(Path::new("/lib/ld-musl-x86_64.so.1")));
        assert!(!is_dynamic_linker(Path::new("/lib/libnvpair.so.1")));
    }
}
