//! Data libraries: named collections of data sets sharing one storage medium.
//!
//! A library hands out [`DataSet`]s bound to a fresh [`Interface`] for the
//! requested name. `build` refuses to overwrite, `build_replace` always
//! starts from an empty data set, and `get` loads the stored schema.

use crate::config::EngineConfig;
use crate::data_set::DataSet;
use crate::error::{DataStepError, Result};
use crate::interface::{
    BasicInterface, BasicRegistry, CanonicalInterface, CsvOptions, DelimitedTextInterface,
    Interface, ShellInterface,
};
use flate2::Compression;
use std::path::{Path, PathBuf};

pub const DEFAULT_HEADER_EXTENSION: &str = "hgzip";
pub const DEFAULT_DATA_EXTENSION: &str = "rgzip";

pub trait DataLibrary {
    /// A closed interface for `name`; does not touch storage.
    fn interface_for(&self, name: &str) -> Result<Box<dyn Interface>>;

    /// Names of the data sets present, sorted.
    fn list(&self) -> Result<Vec<String>>;

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.interface_for(name)?.data_set_exists())
    }

    /// Create an empty data set, failing if one already exists.
    fn build(&self, name: &str) -> Result<DataSet> {
        let mut interface = self.interface_for(name)?;
        if interface.data_set_exists() {
            return Err(DataStepError::AlreadyExists {
                name: name.to_string(),
            });
        }
        interface.create_empty_data_set()?;
        tracing::debug!(data_set = %name, "Built data set");
        Ok(DataSet::new(name, interface))
    }

    /// Create an empty data set, overwriting any existing one.
    fn build_replace(&self, name: &str) -> Result<DataSet> {
        let mut interface = self.interface_for(name)?;
        interface.create_empty_data_set()?;
        tracing::debug!(data_set = %name, "Rebuilt data set");
        Ok(DataSet::new(name, interface))
    }

    /// Look up an existing data set with its stored schema.
    fn get(&self, name: &str) -> Result<DataSet> {
        let mut interface = self.interface_for(name)?;
        if !interface.data_set_exists() {
            return Err(DataStepError::not_found(name));
        }
        let variables = interface.read_metadata()?;
        Ok(DataSet::with_variables(name, interface, variables))
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.interface_for(name)?.delete()?;
        tracing::debug!(data_set = %name, "Deleted data set");
        Ok(())
    }
}

/// Reject names that are empty or would escape the library root.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DataStepError::invalid_input("data set name is empty"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(DataStepError::invalid_input(format!(
            "data set name '{name}' must not contain path separators"
        )));
    }
    Ok(())
}

/// Names of the files in `root` ending in `.{extension}`, without it. An
/// empty extension selects files that have none.
fn names_with_extension(root: &Path, extension: &str) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matches = match path.extension() {
            Some(ext) => ext.to_str() == Some(extension),
            None => extension.is_empty() && path.is_file(),
        };
        if matches && let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Data sets in the canonical paired header and data format.
#[derive(Debug, Clone)]
pub struct CanonicalLibrary {
    root: PathBuf,
    header_extension: String,
    data_extension: String,
    compression: Compression,
}

impl CanonicalLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            header_extension: DEFAULT_HEADER_EXTENSION.into(),
            data_extension: DEFAULT_DATA_EXTENSION.into(),
            compression: Compression::default(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.library.root)
            .with_extensions(
                &config.canonical.header_extension,
                &config.canonical.data_extension,
            )
            .with_compression_level(config.canonical.compression_level)
    }

    pub fn with_extensions(mut self, header: &str, data: &str) -> Self {
        self.header_extension = header.to_string();
        self.data_extension = data.to_string();
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression = Compression::new(level.min(9));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn header_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{}", self.header_extension))
    }

    pub fn data_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{}", self.data_extension))
    }
}

impl DataLibrary for CanonicalLibrary {
    fn interface_for(&self, name: &str) -> Result<Box<dyn Interface>> {
        validate_name(name)?;
        Ok(Box::new(CanonicalInterface::new(
            name,
            self.header_path(name),
            self.data_path(name),
            self.compression,
        )))
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = names_with_extension(&self.root, &self.header_extension)?;
        names.retain(|name| self.data_path(name).exists());
        Ok(names)
    }
}

/// Data sets stored as delimited text files.
#[derive(Debug, Clone)]
pub struct DelimitedTextLibrary {
    root: PathBuf,
    options: CsvOptions,
}

impl DelimitedTextLibrary {
    pub fn new(root: impl Into<PathBuf>, options: CsvOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    /// File backing `name`. No dot is appended when the extension is empty.
    pub fn path(&self, name: &str) -> PathBuf {
        if self.options.extension.is_empty() {
            self.root.join(name)
        } else {
            self.root.join(format!("{name}.{}", self.options.extension))
        }
    }

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }
}

impl DataLibrary for DelimitedTextLibrary {
    fn interface_for(&self, name: &str) -> Result<Box<dyn Interface>> {
        validate_name(name)?;
        Ok(Box::new(DelimitedTextInterface::new(
            name,
            self.path(name),
            self.options.clone(),
        )))
    }

    fn list(&self) -> Result<Vec<String>> {
        names_with_extension(&self.root, &self.options.extension)
    }
}

/// In-memory stand-in library. Each instance tracks its own data sets.
#[derive(Debug, Clone, Default)]
pub struct BasicLibrary {
    registry: BasicRegistry,
}

impl BasicLibrary {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataLibrary for BasicLibrary {
    fn interface_for(&self, name: &str) -> Result<Box<dyn Interface>> {
        validate_name(name)?;
        Ok(Box::new(BasicInterface::new(name, self.registry.clone())))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.registry.names())
    }
}

/// Library of backing-less data sets. Every name resolves.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellLibrary;

impl DataLibrary for ShellLibrary {
    fn interface_for(&self, name: &str) -> Result<Box<dyn Interface>> {
        validate_name(name)?;
        Ok(Box::new(ShellInterface::new(name)))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn get(&self, name: &str) -> Result<DataSet> {
        Ok(DataSet::new(name, self.interface_for(name)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_refuses_existing() {
        let dir = TempDir::new().unwrap();
        let lib = CanonicalLibrary::new(dir.path());
        lib.build("orders").unwrap();
        assert!(matches!(
            lib.build("orders").unwrap_err(),
            DataStepError::AlreadyExists { .. }
        ));
        lib.build_replace("orders").unwrap();
        assert_eq!(lib.list().unwrap(), vec!["orders".to_string()]);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let lib = CanonicalLibrary::new(dir.path().join("absent"));
        assert!(lib.list().unwrap().is_empty());
        assert!(matches!(
            lib.get("nope").unwrap_err(),
            DataStepError::NotFound { .. }
        ));
    }

    #[test]
    fn test_delete_removes_both_files() {
        let dir = TempDir::new().unwrap();
        let lib = CanonicalLibrary::new(dir.path()).with_extensions("hdr", "dat");
        lib.build("t").unwrap();
        assert!(dir.path().join("t.hdr").exists());
        assert!(dir.path().join("t.dat").exists());
        lib.delete("t").unwrap();
        assert!(!lib.exists("t").unwrap());
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name("sales_2024").is_ok());
        assert!(ShellLibrary.get("a/b").is_err());
    }

    #[test]
    fn test_basic_libraries_are_independent() {
        let first = BasicLibrary::new();
        let second = BasicLibrary::new();
        first.build("x").unwrap();
        assert!(first.exists("x").unwrap());
        assert!(!second.exists("x").unwrap());
        assert_eq!(first.list().unwrap(), vec!["x".to_string()]);
        first.delete("x").unwrap();
        assert!(first.list().unwrap().is_empty());
    }

    #[test]
    fn test_delimited_list_and_get() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("people.csv"), "name,age\nAda,36\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let lib = DelimitedTextLibrary::new(dir.path(), CsvOptions::default());
        assert_eq!(lib.list().unwrap(), vec!["people".to_string()]);
        let ds = lib.get("people").unwrap();
        assert_eq!(ds.variables().keys(), vec!["name", "age"]);
    }

    #[test]
    fn test_delimited_files_without_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("people"), "name\nAda\n").unwrap();
        std::fs::write(dir.path().join("people.csv"), "name\nGrace\n").unwrap();
        let options = CsvOptions {
            extension: String::new(),
            ..CsvOptions::default()
        };
        let lib = DelimitedTextLibrary::new(dir.path(), options);
        assert_eq!(lib.path("people"), dir.path().join("people"));
        assert_eq!(lib.list().unwrap(), vec!["people".to_string()]);
        assert_eq!(lib.get("people").unwrap().variables().keys(), vec!["name"]);
    }

    #[test]
    fn test_shell_get_always_resolves() {
        let ds = ShellLibrary.get("buffer").unwrap();
        assert!(ds.variables().is_empty());
        assert!(!ds.exists());
    }
}
