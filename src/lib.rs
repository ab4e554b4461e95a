//! Package a crash dump together with everything needed to debug it elsewhere.
//!
//! A kernel crash dump or userland core is only useful with the exact
//! binaries, shared objects and debug info of the machine that produced it.
//! This crate collects those files into one relocatable archive:
//!
//! ```text
//! DumpInspector ──> DependencySetBuilder ──> LayoutPlanner ──> Assembler
//!  (what does        (normalize, dedup,      (absolute path    (stage, launchers,
//!   the dump use?)    find debug info)        -> archive path)  manifest, tarball)
//! ```
//!
//! Files keep their absolute path (minus the leading `/`) inside the archive,
//! so the extracted directory works as a debugger sysroot. Problems with
//! individual files never stop a run; they are collected in a [`Report`] and
//! returned with the archive.
//!
//! # Example
//!
//! ```rust,no_run
//! use savedump::{Config, HostToolInspector, Pipeline};
//!
//! let pipeline = Pipeline::new(Config::default(), Box::new(HostToolInspector::new()));
//! let result = pipeline.run(std::path::Path::new("core.ztest.1234"))?;
//! println!("{}", result.archive_path.display());
//! for warning in result.report.warnings() {
//!     eprintln!("warning: {warning}");
//! }
//! # Ok::<(), savedump::Error>(())
//! ```

pub mod artifact;
pub mod assemble;
pub mod config;
pub mod debuginfo;
pub mod dependency;
pub mod error;
pub mod inspect;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod preflight;
pub mod report;

pub use artifact::{ArtifactDescriptor, ArtifactKind, ContentId, DebugInfoStatus, Presence};
pub use assemble::{ArchiveResult, AssembleOptions, Assembler, Compression};
pub use config::Config;
pub use debuginfo::DebugInfoLocator;
pub use dependency::{DependencySet, DependencySetBuilder, RawEntry};
pub use error::{Error, Result};
pub use inspect::{DumpInspector, DumpKind, HostToolInspector, InspectorOutput, InventoryInspector};
pub use layout::{ArchivePlan, LayoutPlanner, PlannedEntry};
pub use pipeline::Pipeline;
pub use report::{Report, Warning};
