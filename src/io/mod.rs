//! Input and Ouput data file format modules

pub mod asdf;
pub mod error;

use std::path::{Path, PathBuf};

/// Extension of model files.
pub const ASDF_EXTENSION: &str = "asdf";

/// Whether a path looks like a model file.
pub fn is_asdf_path<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .map_or(false, |extension| extension == ASDF_EXTENSION)
}

/// List the model files in a directory, sorted by name.
///
/// # Errors
///
/// Will return [`error::IOError::FileAccess`] if the directory cannot be read.
pub fn list_asdf_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, error::IOError> {
    let dir = dir.as_ref();
    let access = |io_error| error::IOError::FileAccess {
        io_error,
        filename: dir.display().to_string(),
        source_file: file!(),
        source_line: line!(),
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(access)? {
        let path = entry.map_err(access)?.path();
        if path.is_file() && is_asdf_path(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_list_asdf_files() {
        let tmp_dir = tempdir().unwrap();
        for name in ["b.asdf", "a.asdf", "notes.txt"] {
            File::create(tmp_dir.path().join(name)).unwrap();
        }
        let paths = list_asdf_files(tmp_dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.asdf", "b.asdf"]);
    }

    #[test]
    fn test_list_missing_dir() {
        assert!(list_asdf_files("/nonexistent/refs").is_err());
    }
}
