//! Configuration file handling for the cstruct CLI

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name looked up in the working directory when `--config` is not given.
pub const LOCAL_CONFIG_FILE: &str = "cstruct.yaml";

/// Optional YAML configuration. Every key can be overridden on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Native library name or path used for size probes
    #[serde(default)]
    pub library: Option<String>,

    /// Directories searched for imported definition files
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,

    /// YAML size table used when no library is available
    #[serde(default)]
    pub sizes: Option<PathBuf>,

    /// Definition files loaded for every command
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl Config {
    /// Load `explicit`, else `cstruct.yaml` in the working directory, else the
    /// per-user config file; an absent file yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_paths().into_iter().find(|path| path.exists()),
        };

        let Some(path) = path else {
            debug!("no configuration file found, using defaults");
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            serde_yml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))?;
        debug!(path = %path.display(), "loaded configuration");

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config.relative_to(&base))
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cstruct").join("config.yaml"));
        }
        paths
    }

    /* Paths in a config file are relative to the file, not the working directory */
    fn relative_to(mut self, base: &Path) -> Self {
        let rebase = |path: PathBuf| if path.is_relative() { base.join(path) } else { path };
        self.include_dirs = self.include_dirs.into_iter().map(rebase).collect();
        self.files = self.files.into_iter().map(rebase).collect();
        self.sizes = self.sizes.map(rebase);
        self
    }

    /// Command line values win over file values; list flags replace, not extend.
    pub fn merge(mut self, overrides: Overrides) -> Self {
        if overrides.library.is_some() {
            self.library = overrides.library;
        }
        if overrides.sizes.is_some() {
            self.sizes = overrides.sizes;
        }
        if !overrides.include_dirs.is_empty() {
            self.include_dirs = overrides.include_dirs;
        }
        if !overrides.files.is_empty() {
            self.files = overrides.files;
        }
        self
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub library: Option<String>,
    pub include_dirs: Vec<PathBuf>,
    pub sizes: Option<PathBuf>,
    pub files: Vec<PathBuf>,
}
