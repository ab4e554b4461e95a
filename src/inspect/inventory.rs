//! Inspector backed by a JSON inventory file.
//!
//! This is how kernel dumps (and anything inspected by an external tool)
//! get in:
//!
//! ```json
//! {
//!   "dump_kind": "kernel",
//!   "node_name": "db-host-7",
//!   "entries": [
//!     { "path": "/usr/lib/debug/boot/vmlinux-5.4.0-42-generic", "kind": "executable" },
//!     { "path": "/lib/modules/5.4.0-42-generic/kernel/fs/zfs/zfs.ko",
//!       "kind": "shared_object", "content_id": "9a1c..." }
//!   ]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::{DumpInspector, DumpKind, InspectorOutput};
use crate::dependency::RawEntry;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Inventory {
    dump_kind: DumpKind,
    #[serde(default)]
    node_name: Option<String>,
    #[serde(default)]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Clone)]
pub struct InventoryInspector {
    path: PathBuf,
}

impl InventoryInspector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DumpInspector for InventoryInspector {
    fn inspect(&self, dump: &Path) -> Result<InspectorOutput> {
        let content = fs::read_to_string(&self.path).map_err(|err| {
            Error::Inspector(format!("cannot read inventory {}: {err}", self.path.display()))
        })?;
        let inventory: Inventory = serde_json::from_str(&content).map_err(|err| {
            Error::Inspector(format!("invalid inventory {}: {err}", self.path.display()))
        })?;
        debug!(
            inventory = %self.path.display(),
            entries = inventory.entries.len(),
            "inventory loaded"
        );
        Ok(InspectorOutput {
            dump_kind: inventory.dump_kind,
            dump_path: dump.to_path_buf(),
            node_name: inventory.node_name,
            entries: inventory.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use tempfile::TempDir;

    #[test]
    fn test_reads_kernel_inventory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("inventory.json");
        fs::write(
            &path,
            r#"{
                "dump_kind": "kernel",
                "node_name": "db-host-7",
                "entries": [
                    {"path": "/usr/lib/debug/boot/vmlinux-5.4.0", "kind": "executable"},
                    {"path": "/lib/modules/5.4.0/zfs.ko", "kind": "shared_object", "content_id": "9A1C"}
                ]
            }"#,
        )
        .unwrap();

        let out = InventoryInspector::new(&path)
            .inspect(Path::new("/var/crash/dump.202001"))
            .unwrap();
        assert_eq!(out.dump_kind, DumpKind::Kernel);
        assert_eq!(out.node_name.as_deref(), Some("db-host-7"));
        assert_eq!(out.dump_path, PathBuf::from("/var/crash/dump.202001"));
        assert_eq!(out.entries.len(), 2);
        assert_eq!(out.entries[1].kind, ArtifactKind::SharedObject);
        assert_eq!(out.entries[1].content_id.as_ref().unwrap().as_str(), "9a1c");
    }

    #[test]
    fn test_bad_content_id_is_an_inspector_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("inventory.json");
        fs::write(
            &path,
            r#"{"dump_kind": "userland", "entries": [
                {"path": "/sbin/ztest", "kind": "executable", "content_id": "../etc"}
            ]}"#,
        )
        .unwrap();

        let err = InventoryInspector::new(&path)
            .inspect(Path::new("core"))
            .unwrap_err();
        assert!(matches!(err, Error::Inspector(_)));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("inventory.json");
        fs::write(&path, r#"{"dump_kind": "userland", "extra": 1}"#).unwrap();
        assert!(InventoryInspector::new(&path).inspect(Path::new("core")).is_err());
    }

    #[test]
    fn test_missing_inventory() {
        let temp = TempDir::new().unwrap();
        let err = InventoryInspector::new(temp.path().join("nope.json"))
            .inspect(Path::new("core"))
            .unwrap_err();
        assert!(err.to_string().contains("cannot read inventory"));
    }
}
