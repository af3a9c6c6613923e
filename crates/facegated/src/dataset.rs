//! On-disk enrollment samples: one directory per identity, numbered PNG files inside.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("invalid identity name: {0:?}")]
    InvalidName(String),
    #[error("sample directory already exists for {0}")]
    Conflict(String),
    #[error("dataset I/O on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> DatasetError + '_ {
    move |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Trim `name` and reject anything that cannot be a single directory name.
pub fn validate_name(name: &str) -> Result<String, DatasetError> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
        || trimmed.chars().any(char::is_control);
    if invalid {
        return Err(DatasetError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    /// Parsed from the file stem; unnumbered files sort last.
    pub number: Option<u64>,
}

/// Identifies a sample set by file names, sizes, and modification times.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fingerprint(Vec<(String, u64, Option<SystemTime>)>);

pub struct Dataset {
    root: PathBuf,
}

impl Dataset {
    /// Open (creating if needed) the dataset root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DatasetError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.dir(name).is_dir()
    }

    /// Create the sample directory. An existing directory is a conflict.
    pub fn create(&self, name: &str) -> Result<PathBuf, DatasetError> {
        let dir = self.dir(name);
        match std::fs::create_dir(&dir) {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(DatasetError::Conflict(name.to_string()))
            }
            Err(e) => Err(io_err(&dir)(e)),
        }
    }

    /// Write sample `number` as `{number}.png`.
    pub fn save_sample(&self, name: &str, number: u64, png: &[u8]) -> Result<PathBuf, DatasetError> {
        let path = self.dir(name).join(format!("{number}.png"));
        std::fs::write(&path, png).map_err(io_err(&path))?;
        Ok(path)
    }

    /// Names of all identity directories, sorted.
    pub fn identities(&self) -> Result<Vec<String>, DatasetError> {
        let entries = std::fs::read_dir(&self.root).map_err(io_err(&self.root))?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Sample files of `name`, ordered by sample number.
    pub fn samples(&self, name: &str) -> Result<Vec<Sample>, DatasetError> {
        let dir = self.dir(name);
        let entries = std::fs::read_dir(&dir).map_err(io_err(&dir))?;
        let mut samples: Vec<Sample> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .map(|e| {
                let path = e.path();
                let number = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse().ok());
                Sample { path, number }
            })
            .collect();
        samples.sort_by(|a, b| match (a.number, b.number) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.path.cmp(&b.path),
        });
        Ok(samples)
    }

    pub fn fingerprint(&self, name: &str) -> Result<Fingerprint, DatasetError> {
        let mut entries = Vec::new();
        for sample in self.samples(name)? {
            let meta = std::fs::metadata(&sample.path).map_err(io_err(&sample.path))?;
            let file_name = sample
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            entries.push((file_name, meta.len(), meta.modified().ok()));
        }
        entries.sort();
        Ok(Fingerprint(entries))
    }

    /// Delete the sample directory. Returns `false` if it did not exist.
    pub fn remove(&self, name: &str) -> Result<bool, DatasetError> {
        let dir = self.dir(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> (tempfile::TempDir, Dataset) {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::open(dir.path().join("dataset")).unwrap();
        (dir, dataset)
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  alice ").unwrap(), "alice");
        assert_eq!(validate_name("Mary Jane").unwrap(), "Mary Jane");
        for bad in ["", "   ", ".", "..", "a/b", "..\\x", "tab\there"] {
            assert!(
                matches!(validate_name(bad), Err(DatasetError::InvalidName(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_create_conflicts_on_existing_dir() {
        let (_tmp, dataset) = dataset();
        dataset.create("bob").unwrap();
        assert!(dataset.exists("bob"));
        assert!(matches!(dataset.create("bob"), Err(DatasetError::Conflict(n)) if n == "bob"));
    }

    #[test]
    fn test_samples_sorted_numerically() {
        let (_tmp, dataset) = dataset();
        dataset.create("bob").unwrap();
        for n in [10, 2, 1] {
            dataset.save_sample("bob", n, b"x").unwrap();
        }
        std::fs::write(dataset.dir("bob").join("notes.png"), b"y").unwrap();

        let numbers: Vec<Option<u64>> = dataset
            .samples("bob")
            .unwrap()
            .into_iter()
            .map(|s| s.number)
            .collect();
        assert_eq!(numbers, vec![Some(1), Some(2), Some(10), None]);
    }

    #[test]
    fn test_identities_lists_directories_only() {
        let (_tmp, dataset) = dataset();
        dataset.create("zed").unwrap();
        dataset.create("amy").unwrap();
        std::fs::write(dataset.root().join("stray.txt"), b"").unwrap();
        assert_eq!(dataset.identities().unwrap(), vec!["amy", "zed"]);
    }

    #[test]
    fn test_fingerprint_changes_with_sample_set() {
        let (_tmp, dataset) = dataset();
        dataset.create("bob").unwrap();
        dataset.save_sample("bob", 1, b"abc").unwrap();
        let before = dataset.fingerprint("bob").unwrap();
        assert_eq!(before, dataset.fingerprint("bob").unwrap());

        dataset.save_sample("bob", 2, b"def").unwrap();
        assert_ne!(before, dataset.fingerprint("bob").unwrap());
    }

    #[test]
    fn test_remove() {
        let (_tmp, dataset) = dataset();
        dataset.create("bob").unwrap();
        dataset.save_sample("bob", 1, b"abc").unwrap();
        assert!(dataset.remove("bob").unwrap());
        assert!(!dataset.exists("bob"));
        assert!(!dataset.remove("bob").unwrap());
    }
}
