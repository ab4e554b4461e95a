//! Dump inspectors.
//!
//! An inspector looks at a dump and reports which files it references. How
//! that happens (host tools, a JSON inventory written by something else) is
//! behind [`DumpInspector`]; the rest of the pipeline only sees an
//! [`InspectorOutput`].

pub mod inventory;
pub mod tools;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dependency::RawEntry;
use crate::error::Result;

pub use inventory::InventoryInspector;
pub use tools::HostToolInspector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpKind {
    Kernel,
    Userland,
}

impl fmt::Display for DumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpKind::Kernel => f.write_str("kernel crash dump"),
            DumpKind::Userland => f.write_str("userland core dump"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InspectorOutput {
    pub dump_kind: DumpKind,
    pub dump_path: PathBuf,
    /// Host that produced a kernel dump, when known.
    pub node_name: Option<String>,
    pub entries: Vec<RawEntry>,
}

pub trait DumpInspector {
    fn inspect(&self, dump: &Path) -> Result<InspectorOutput>;
}
