//! Binding to the compiled native library
//!
//! The library exports one `size_t <TypeName>_size(void)` accessor per
//! marshalled type. Those accessors are the only thing read from it here.

use cstruct_layout::{size_symbol, SizeProbe};
use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::LoaderError;

type SizeAccessor = unsafe extern "C" fn() -> usize;

/// A loaded native library, opened once at startup and only read afterwards.
pub struct NativeLibrary {
    path: PathBuf,
    library: Library,
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary").field("path", &self.path).finish()
    }
}

impl NativeLibrary {
    /// Open the library at `path`. Loading runs the library's initialisers
    /// in this process, so only trusted libraries should be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let path = path.as_ref().to_path_buf();
        let library = unsafe { Library::new(&path) }.map_err(|source| LoaderError::LibraryLoad {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "loaded native library");
        Ok(Self { path, library })
    }

    /// Locate `name` using platform naming in `search_paths`, the loader path
    /// variable and the working directory, then fall back to the system loader.
    pub fn find(name: &str, search_paths: &[PathBuf]) -> Result<Self, LoaderError> {
        let as_path = Path::new(name);
        if as_path.components().count() > 1 && as_path.exists() {
            return Self::open(as_path);
        }

        let searched = Self::search_paths(search_paths);
        for dir in &searched {
            for file_name in Self::candidate_file_names(name) {
                let candidate = dir.join(&file_name);
                if candidate.exists() {
                    debug!(candidate = %candidate.display(), "found native library");
                    return Self::open(candidate);
                }
            }
        }

        // Let the platform loader try its own search order with the bare file name
        for file_name in Self::candidate_file_names(name) {
            if let Ok(library) = unsafe { Library::new(&file_name) } {
                info!(file_name = %file_name, "loaded native library from system search path");
                return Ok(Self {
                    path: PathBuf::from(file_name),
                    library,
                });
            }
        }

        Err(LoaderError::LibraryNotFound {
            name: name.to_string(),
            searched,
        })
    }

    fn search_paths(extra: &[PathBuf]) -> Vec<PathBuf> {
        let mut paths = extra.to_vec();

        let variable = if cfg!(target_os = "windows") {
            "PATH"
        } else if cfg!(target_os = "macos") {
            "DYLD_LIBRARY_PATH"
        } else {
            "LD_LIBRARY_PATH"
        };
        if let Some(value) = std::env::var_os(variable) {
            paths.extend(std::env::split_paths(&value));
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        paths
    }

    fn candidate_file_names(name: &str) -> Vec<String> {
        let extensions: &[&str] = if cfg!(target_os = "windows") {
            &["dll"]
        } else if cfg!(target_os = "macos") {
            &["dylib", "so"]
        } else {
            &["so"]
        };
        let prefixes: &[&str] = if cfg!(target_os = "windows") { &["", "lib"] } else { &["lib", ""] };

        let mut names = Vec::new();
        for prefix in prefixes {
            for ext in extensions {
                names.push(format!("{}{}.{}", prefix, name, ext));
            }
        }
        names
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SizeProbe for NativeLibrary {
    fn probe_size(&self, type_name: &str) -> Option<u64> {
        let symbol = size_symbol(type_name);
        // An absent accessor is expected for primitive aliases
        let accessor: Symbol<SizeAccessor> = unsafe { self.library.get(symbol.as_bytes()) }.ok()?;
        let size = unsafe { accessor() } as u64;
        debug!(symbol = %symbol, size, "called native size accessor");
        Some(size)
    }
}
