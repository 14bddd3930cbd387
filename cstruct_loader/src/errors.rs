use cstruct_layout::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{}': {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error("import '{import}' not found relative to '{}' or in include directories", .base.display())]
    ImportNotFound { import: String, base: PathBuf },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("library '{name}' not found in {} search paths", .searched.len())]
    LibraryNotFound { name: String, searched: Vec<PathBuf> },

    #[error("failed to load library '{}': {source}", .path.display())]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}
