//! Input discovery for the inference tool: directory walks and CSV manifests.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, RunnerError};
use crate::types::{Record, SizeBucket};

/// A discovered input file together with the directory it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub root: PathBuf,
}

impl SourceFile {
    /// Path relative to the discovery root, or the full path if it lies outside.
    pub fn relative_path(&self) -> &Path {
        self.path.strip_prefix(&self.root).unwrap_or(&self.path)
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

fn walk(dir: &Path, extensions: &[String], recursive: bool, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| RunnerError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| RunnerError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| RunnerError::io(&path, e))?;
        if file_type.is_dir() {
            if recursive {
                walk(&path, extensions, recursive, found)?;
            }
        } else if has_extension(&path, extensions) {
            found.push(path);
        }
    }
    Ok(())
}

/// List files under `root` matching `extensions`, sorted by path.
pub fn discover_files(root: &Path, extensions: &[String], recursive: bool) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(RunnerError::InputNotFound(root.to_path_buf()));
    }
    let mut found = Vec::new();
    walk(root, extensions, recursive, &mut found)?;
    found.sort();
    Ok(found)
}

/// Turn discovered paths into records, continuing the index sequence at `first_index`.
///
/// The record id is the path relative to `root`; the size bucket comes
/// from the file length.
pub fn file_records(root: &Path, paths: Vec<PathBuf>, first_index: usize) -> Vec<Record<SourceFile>> {
    paths
        .into_iter()
        .enumerate()
        .map(|(offset, path)| {
            let bucket = std::fs::metadata(&path)
                .map(|m| SizeBucket::from_byte_len(m.len()))
                .unwrap_or(SizeBucket::Unknown);
            let source = SourceFile {
                path,
                root: root.to_path_buf(),
            };
            let id = source.relative_path().to_string_lossy().into_owned();
            Record::new(first_index + offset, id, source).with_size_bucket(bucket)
        })
        .collect()
}

/// Discover and wrap every matching file under one directory.
pub fn directory_records(
    root: &Path,
    extensions: &[String],
    recursive: bool,
) -> Result<Vec<Record<SourceFile>>> {
    let paths = discover_files(root, extensions, recursive)?;
    tracing::info!(dir = %root.display(), files = paths.len(), "Discovered input files");
    Ok(file_records(root, paths, 0))
}

#[derive(Debug, Deserialize)]
struct ManifestRow {
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    input_dir: Option<String>,
}

impl ManifestRow {
    fn input_path(&self) -> Option<&str> {
        [self.input.as_deref(), self.input_dir.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

/// Read the input directories listed in a CSV manifest.
///
/// Rows without an `input`/`input_dir` value are skipped with a warning.
pub fn load_manifest(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_file() {
        return Err(RunnerError::InputNotFound(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut dirs = Vec::new();
    for (row_idx, row) in reader.deserialize::<ManifestRow>().enumerate() {
        let row = row?;
        match row.input_path() {
            Some(input) => dirs.push(PathBuf::from(input)),
            None => tracing::warn!(row = row_idx, "Missing input path in manifest row"),
        }
    }
    if dirs.is_empty() {
        return Err(RunnerError::EmptyInput(path.to_path_buf()));
    }
    tracing::info!(manifest = %path.display(), items = dirs.len(), "Loaded manifest");
    Ok(dirs)
}

/// Build one record sequence from every directory in a manifest.
///
/// Directories that do not exist are logged and skipped; indices stay
/// contiguous across the remaining ones.
pub fn manifest_records(
    manifest: &Path,
    extensions: &[String],
    recursive: bool,
) -> Result<Vec<Record<SourceFile>>> {
    let mut records = Vec::new();
    for dir in load_manifest(manifest)? {
        match discover_files(&dir, extensions, recursive) {
            Ok(paths) => {
                tracing::info!(dir = %dir.display(), files = paths.len(), "Discovered input files");
                let next = records.len();
                records.extend(file_records(&dir, paths, next));
            }
            Err(RunnerError::InputNotFound(missing)) => {
                tracing::error!(dir = %missing.display(), "Manifest input directory not found; skipping");
            }
            Err(e) => return Err(e),
        }
    }
    if records.is_empty() {
        return Err(RunnerError::EmptyInput(manifest.to_path_buf()));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path, bytes: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn dcm() -> Vec<String> {
        vec!["dcm".to_string()]
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("p10/b.dcm"), b"b");
        touch(&dir.path().join("p10/a.DCM"), b"a");
        touch(&dir.path().join("notes.txt"), b"x");
        touch(&dir.path().join("c.dcm"), b"c");

        let files = discover_files(dir.path(), &dcm(), true).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["c.dcm", "p10/a.DCM", "p10/b.dcm"]);
    }

    #[test]
    fn test_discover_non_recursive() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("top.dcm"), b"t");
        touch(&dir.path().join("sub/deep.dcm"), b"d");

        let files = discover_files(dir.path(), &dcm(), false).unwrap();
        assert_eq!(files, vec![dir.path().join("top.dcm")]);
    }

    #[test]
    fn test_discover_missing_root() {
        let result = discover_files(Path::new("/no/such/dir"), &dcm(), true);
        assert!(matches!(result, Err(RunnerError::InputNotFound(_))));
    }

    #[test]
    fn test_directory_records_ids_and_indices() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("p10/p1/s9/one.dcm"), b"1");
        touch(&dir.path().join("p10/p1/s9/two.dcm"), b"2");

        let records = directory_records(dir.path(), &dcm(), true).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, 0);
        assert_eq!(records[1].index, 1);
        assert_eq!(records[0].id, "p10/p1/s9/one.dcm");
        assert_eq!(records[0].size_bucket, SizeBucket::Small);
    }

    #[test]
    fn test_manifest_skips_blank_and_missing() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        touch(&a.join("x.dcm"), b"x");
        touch(&b.join("y.dcm"), b"y");
        touch(&b.join("z.dcm"), b"z");

        let manifest = dir.path().join("manifest.csv");
        std::fs::write(
            &manifest,
            format!(
                "input,note\n{},first\n,blank\n{},missing\n{},second\n",
                a.display(),
                dir.path().join("gone").display(),
                b.display()
            ),
        )
        .unwrap();

        let records = manifest_records(&manifest, &dcm(), true).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x.dcm", "y.dcm", "z.dcm"]);
        let indices: Vec<_> = records.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(records[1].data.root, b);
    }

    #[test]
    fn test_manifest_input_dir_column() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("d/x.dcm"), b"x");
        let manifest = dir.path().join("m.csv");
        std::fs::write(&manifest, format!("input_dir\n{}\n", dir.path().join("d").display())).unwrap();

        let dirs = load_manifest(&manifest).unwrap();
        assert_eq!(dirs, vec![dir.path().join("d")]);
    }

    #[test]
    fn test_manifest_without_inputs_is_empty() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("m.csv");
        std::fs::write(&manifest, "input\n\n").unwrap();
        assert!(matches!(
            load_manifest(&manifest),
            Err(RunnerError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_manifest_missing_file() {
        assert!(matches!(
            load_manifest(Path::new("/no/manifest.csv")),
            Err(RunnerError::InputNotFound(_))
        ));
    }
}
