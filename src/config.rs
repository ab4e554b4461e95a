//! Configuration file.
//!
//! ```toml
//! debug_root = "/usr/lib/debug"
//! output_dir = "/var/crash/archives"
//! compression = "zstd"
//! compression_level = 9
//! copy_jobs = 4
//! keep_staging = false
//! ```
//!
//! Every key is optional. Command-line flags override file values.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::assemble::{AssembleOptions, Compression};
use crate::debuginfo::DEFAULT_DEBUG_ROOT;
use crate::error::{Error, Result};

/// Upper bound on parallel copy workers.
pub const MAX_COPY_JOBS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub debug_root: PathBuf,
    /// Where archives are written; the working directory when unset.
    pub output_dir: PathBuf,
    pub compression: Compression,
    pub compression_level: Option<i32>,
    pub copy_jobs: usize,
    pub keep_staging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug_root: PathBuf::from(DEFAULT_DEBUG_ROOT),
            output_dir: PathBuf::from("."),
            compression: Compression::Gzip,
            compression_level: None,
            copy_jobs: 1,
            keep_staging: false,
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/savedump/config.toml` (or the platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("savedump").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("reading '{}': {err}", path.display())))?;
        let config: Config = toml::from_str(&content)
            .map_err(|err| Error::Config(format!("parsing '{}': {err}", path.display())))?;
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load the per-user file when it exists, defaults otherwise.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.debug_root.as_os_str().is_empty() {
            return Err(Error::Config("debug_root must not be empty".into()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Config("output_dir must not be empty".into()));
        }
        if self.copy_jobs == 0 || self.copy_jobs > MAX_COPY_JOBS {
            return Err(Error::Config(format!(
                "copy_jobs must be between 1 and {MAX_COPY_JOBS}, got {}",
                self.copy_jobs
            )));
        }
        if let Some(level) = self.compression_level {
            let valid = self.compression.valid_levels();
            if !valid.contains(&level) {
                return Err(Error::Config(format!(
                    "compression_level {level} is out of range for {} ({}..={})",
                    self.compression,
                    valid.start(),
                    valid.end()
                )));
            }
        }
        Ok(())
    }

    pub fn assemble_options(&self) -> AssembleOptions {
        AssembleOptions {
            compression: self.compression,
            level: self.compression_level,
            copy_jobs: self.copy_jobs,
            keep_staging: self.keep_staging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "compression = \"zstd\"\ncopy_jobs = 4\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.compression, Compression::Zstd);
        assert_eq!(config.copy_jobs, 4);
        assert_eq!(config.debug_root, PathBuf::from(DEFAULT_DEBUG_ROOT));
        assert!(!config.keep_staging);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "debug_dir = \"/tmp\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.copy_jobs = 0;
        assert!(config.validate().is_err());

        config.copy_jobs = 2;
        config.compression_level = Some(15);
        assert!(config.validate().is_err());
        config.compression = Compression::Zstd;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_assemble_options() {
        let config = Config {
            compression_level: Some(1),
            keep_staging: true,
            ..Config::default()
        };
        let options = config.assemble_options();
        assert_eq!(options.level, Some(1));
        assert!(options.keep_staging);
        assert_eq!(options.copy_jobs, 1);
    }
}
