use cstruct_layout::TypeResolver;
use cstruct_types::DefinitionFile;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::LoaderError;

/* Loads definition files and everything they import */
pub struct DefinitionLoader {
    /* Canonical paths already loaded, so shared and circular imports load once */
    loaded_files: HashSet<PathBuf>,

    include_dirs: Vec<PathBuf>,

    /* Loaded files, imports before their importers */
    files: Vec<(PathBuf, DefinitionFile)>,
}

impl DefinitionLoader {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self {
            loaded_files: HashSet::new(),
            include_dirs,
            files: Vec::new(),
        }
    }

    /* Resolve an import relative to the importing file, then the include directories */
    fn resolve_import_path(&self, import_path: &str, base_file: &Path) -> Result<PathBuf, LoaderError> {
        let candidates = base_file
            .parent()
            .map(|parent| parent.join(import_path))
            .into_iter()
            .chain(self.include_dirs.iter().map(|dir| dir.join(import_path)));

        for candidate in candidates {
            if candidate.exists() {
                return canonicalize(&candidate);
            }
        }

        Err(LoaderError::ImportNotFound {
            import: import_path.to_string(),
            base: base_file.to_path_buf(),
        })
    }

    pub fn load_file_with_imports(&mut self, file_path: &Path) -> Result<(), LoaderError> {
        let canonical_path = canonicalize(file_path)?;

        if self.loaded_files.contains(&canonical_path) {
            debug!(path = %file_path.display(), "skipping already loaded definition file");
            return Ok(());
        }

        /* Mark before following imports so cycles terminate */
        self.loaded_files.insert(canonical_path.clone());

        let contents = std::fs::read_to_string(&canonical_path).map_err(|source| LoaderError::Io {
            path: canonical_path.clone(),
            source,
        })?;
        let file = DefinitionFile::from_yaml(&contents).map_err(|source| LoaderError::Yaml {
            path: canonical_path.clone(),
            source,
        })?;

        info!(
            path = %file_path.display(),
            enums = file.enums.len(),
            records = file.records.len(),
            imports = file.imports.len(),
            "loading definition file"
        );

        for import in &file.imports {
            let import_path = self.resolve_import_path(import, &canonical_path)?;
            self.load_file_with_imports(&import_path)?;
        }

        self.files.push((canonical_path, file));
        Ok(())
    }

    pub fn files(&self) -> impl Iterator<Item = (&Path, &DefinitionFile)> {
        self.files.iter().map(|(path, file)| (path.as_path(), file))
    }

    pub fn loaded_file_count(&self) -> usize {
        self.loaded_files.len()
    }

    /* Register every loaded definition with a fresh resolver; resolution is left to the caller */
    pub fn into_resolver(self) -> Result<TypeResolver, LoaderError> {
        let mut resolver = TypeResolver::new();
        for (_, file) in self.files {
            resolver.add_definitions(file)?;
        }
        Ok(resolver)
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, LoaderError> {
    path.canonicalize().map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/* Load several root files into one unresolved type resolver */
pub fn load_definitions(files: &[PathBuf], include_dirs: &[PathBuf]) -> Result<TypeResolver, LoaderError> {
    let mut loader = DefinitionLoader::new(include_dirs.to_vec());
    for file in files {
        loader.load_file_with_imports(file)?;
    }
    loader.into_resolver()
}
