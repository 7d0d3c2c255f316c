//! Source units: the batch boundaries of a load.
//!
//! A unit has a name (which decides the visibility of its records) and a
//! reader yielding parsed JSON. [`scan_directory`] enumerates the `*.json`
//! files of an input directory as [`FileUnit`]s; [`TextUnit`] wraps JSON
//! text that is already in memory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::SourceReadError;

const JSON_EXTENSION: &str = ".json";

/// One input batch.
#[async_trait]
pub trait SourceUnit: Send + Sync {
    /// Unit name, without the `.json` extension.
    fn name(&self) -> &str;

    /// Read and parse the unit's content.
    async fn read(&self) -> Result<Value, SourceReadError>;
}

/// A JSON file on disk.
#[derive(Debug, Clone)]
pub struct FileUnit {
    name: String,
    path: PathBuf,
}

impl FileUnit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            name: unit_name(&file_name).to_string(),
            path,
        }
    }
}

#[async_trait]
impl SourceUnit for FileUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<Value, SourceReadError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceReadError::Io {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|source| SourceReadError::Parse {
            name: self.name.clone(),
            source,
        })
    }
}

/// JSON text held in memory, parsed on read.
#[derive(Debug, Clone)]
pub struct TextUnit {
    name: String,
    text: String,
}

impl TextUnit {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

#[async_trait]
impl SourceUnit for TextUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<Value, SourceReadError> {
        serde_json::from_str(&self.text).map_err(|source| SourceReadError::Parse {
            name: self.name.clone(),
            source,
        })
    }
}

/// Unit name of a file: its file name with one `.json` extension removed.
pub fn unit_name(file_name: &str) -> &str {
    file_name.strip_suffix(JSON_EXTENSION).unwrap_or(file_name)
}

/// List the files directly inside `dir` whose names match `pattern`.
///
/// Hidden files are ignored. Units are sorted by file name so logs are
/// deterministic. Fails if `dir` is missing or not a directory.
pub fn scan_directory(dir: &Path, pattern: &str) -> Result<Vec<FileUnit>> {
    if !dir.exists() {
        bail!("Input directory does not exist: {}", dir.display());
    }
    if !dir.is_dir() {
        bail!("Input path is not a directory: {}", dir.display());
    }

    let matcher = build_matcher(pattern)?;
    let mut paths = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        if file_name.starts_with('.') || !matcher.is_match(&*file_name) {
            continue;
        }

        paths.push(entry.into_path());
    }

    paths.sort();
    Ok(paths.into_iter().map(FileUnit::new).collect())
}

fn build_matcher(pattern: &str) -> Result<GlobMatcher> {
    Ok(Glob::new(pattern)?.compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn unit_names_strip_one_extension() {
        assert_eq!(unit_name("42.json"), "42");
        assert_eq!(unit_name("assets.json"), "assets");
        assert_eq!(unit_name("a.json.json"), "a.json");
        assert_eq!(unit_name("README"), "README");
    }

    #[test]
    fn scan_lists_matching_files_sorted() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("b.json"), "[]").unwrap();
        fs::write(root.join("42.json"), "[]").unwrap();
        fs::write(root.join("notes.txt"), "x").unwrap();
        fs::write(root.join(".hidden.json"), "[]").unwrap();
        fs::create_dir(root.join("nested.json")).unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/7.json"), "[]").unwrap();

        let units = scan_directory(root, "*.json").unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name()).collect();
        assert_eq!(names, ["42", "b"]);
    }

    #[test]
    fn scan_fails_on_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let err = scan_directory(&tmp.path().join("missing"), "*.json").unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        let file = tmp.path().join("file.json");
        fs::write(&file, "{}").unwrap();
        assert!(scan_directory(&file, "*.json").is_err());
    }

    #[tokio::test]
    async fn file_unit_reads_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("42.json");
        fs::write(&path, r#"{"id": "a", "type": "Mesh"}"#).unwrap();

        let unit = FileUnit::new(&path);
        assert_eq!(unit.name(), "42");
        assert_eq!(unit.read().await.unwrap(), json!({"id": "a", "type": "Mesh"}));
    }

    #[tokio::test]
    async fn corrupt_file_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        fs::write(&path, "[{").unwrap();

        let err = FileUnit::new(&path).read().await.unwrap_err();
        assert!(matches!(err, SourceReadError::Parse { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = FileUnit::new(tmp.path().join("gone.json"))
            .read()
            .await
            .unwrap_err();
        assert!(matches!(err, SourceReadError::Io { .. }));
    }

    #[tokio::test]
    async fn text_unit_parses_on_read() {
        let unit = TextUnit::new("assets", "[1, 2]");
        assert_eq!(unit.read().await.unwrap(), json!([1, 2]));
        assert!(TextUnit::new("x", "nope").read().await.is_err());
    }
}
