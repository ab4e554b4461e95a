//! End-to-end run: inspect, resolve, plan, assemble.

use std::path::{Path, PathBuf};

use tracing::{info, info_span};

use crate::assemble::{ArchiveResult, Assembler};
use crate::config::Config;
use crate::debuginfo::DebugInfoLocator;
use crate::dependency::DependencySetBuilder;
use crate::error::Result;
use crate::inspect::{DumpInspector, DumpKind};
use crate::layout::LayoutPlanner;

pub struct Pipeline {
    config: Config,
    inspector: Box<dyn DumpInspector>,
    working_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(config: Config, inspector: Box<dyn DumpInspector>) -> Self {
        Self {
            config,
            inspector,
            working_dir: None,
        }
    }

    /// Resolve relative inspector paths against `dir` instead of the cwd.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&self, dump: &Path) -> Result<ArchiveResult> {
        let _span = info_span!("savedump", dump = %dump.display()).entered();
        self.config.validate()?;

        let inspected = self.inspector.inspect(dump)?;
        info!(
            kind = %inspected.dump_kind,
            entries = inspected.entries.len(),
            "dump inspected"
        );

        // The builder and the planner must agree on where the debug root is.
        let debug_root = match &self.working_dir {
            Some(dir) => dir.join(&self.config.debug_root),
            None => self.config.debug_root.clone(),
        };
        let mut builder = DependencySetBuilder::new(DebugInfoLocator::new(&debug_root));
        if let Some(dir) = &self.working_dir {
            builder = builder.with_working_dir(dir);
        }
        let (set, report) = builder.build(&inspected.dump_path, &inspected.entries)?;

        let node_name = match inspected.dump_kind {
            DumpKind::Kernel => inspected.node_name.clone(),
            DumpKind::Userland => None,
        };
        let plan = LayoutPlanner::new(&debug_root)
            .with_node_name(node_name)
            .plan(&set, &inspected.dump_path)?;
        info!(archive = plan.root_name(), files = plan.entries().len(), "archive planned");

        let result = Assembler::new(self.config.assemble_options()).assemble(
            &plan,
            &set,
            inspected.dump_kind,
            &self.config.output_dir,
            report,
        )?;
        info!(
            archive = %result.archive_path.display(),
            warnings = result.report.len(),
            "archive written"
        );
        Ok(result)
    }
}
