use crate::errors::LoaderError;
use cstruct_layout::SizeTable;
use std::path::Path;
use tracing::debug;

/* Load a `TypeName: size` mapping, usually captured from a build of the native library */
pub fn load_size_table(path: &Path) -> Result<SizeTable, LoaderError> {
    let contents = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: SizeTable = serde_yml::from_str(&contents).map_err(|source| LoaderError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), entries = table.len(), "loaded size table");
    Ok(table)
}
