// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::model::dataset::Dataset;

/// Suffix of a header dump stored next to the data file it describes.
pub const HEADER_SIDECAR_SUFFIX: &str = ".header.json";

/// Default markers of bounds variables, as in `time_bnds` or `lat_bounds`.
pub const DEFAULT_BNDS_COORD_INDICATORS: [&str; 2] = ["bnds", "bounds"];

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read dataset '{0}': {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse the header of dataset '{0}': {1}")]
    Parse(PathBuf, #[source] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Refusing to overwrite the existing file '{0}'")]
    AlreadyExists(PathBuf),
    #[error("Failed to write '{0}' to '{1}': {2}")]
    Io(PathBuf, PathBuf, #[source] io::Error),
}

/// Where the header dump of the data file at `path` is stored, if not in the file itself.
#[must_use]
pub fn header_sidecar_path(path: &Path) -> PathBuf {
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(HEADER_SIDECAR_SUFFIX);
    PathBuf::from(sidecar)
}

/// Opens a data file and reads what validation needs from it.
pub trait DatasetLoader: Send + Sync {
    /// Loads the header of the dataset at `path`.
    ///
    /// # Errors
    ///
    /// If the file can not be read or is not a dataset.
    fn load(&self, path: &Path) -> Result<Dataset, LoadError>;
}

/// Loads datasets from JSON header dumps.
///
/// If `<file>.header.json` exists it describes `<file>`,
/// otherwise `<file>` itself has to be the dump.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonHeaderLoader;

impl JsonHeaderLoader {
    fn header_path(path: &Path) -> PathBuf {
        let sidecar = header_sidecar_path(path);
        if sidecar.is_file() {
            sidecar
        } else {
            path.to_path_buf()
        }
    }
}

impl DatasetLoader for JsonHeaderLoader {
    fn load(&self, path: &Path) -> Result<Dataset, LoadError> {
        let header_path = Self::header_path(path);
        tracing::trace!("Loading dataset header from '{}' ...", header_path.display());
        let content =
            fs::read(&header_path).map_err(|err| LoadError::Io(path.to_path_buf(), err))?;
        serde_json::from_slice(&content).map_err(|err| LoadError::Parse(path.to_path_buf(), err))
    }
}

/// Puts a data file at a new place, e.g. its path in a DRS tree.
pub trait DatasetWriter: Send + Sync {
    /// Writes the dataset at `source` to `target`.
    ///
    /// # Errors
    ///
    /// If `target` already exists, or writing fails.
    fn write(&self, source: &Path, target: &Path) -> Result<(), WriteError>;
}

/// Copies the file as is, together with its header sidecar, if there is one.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyWriter;

impl CopyWriter {
    fn copy_new(source: &Path, target: &Path) -> Result<(), WriteError> {
        let io_err = |err| WriteError::Io(source.to_path_buf(), target.to_path_buf(), err);
        let mut input = fs::File::open(source).map_err(io_err)?;
        let mut output = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)
        {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(WriteError::AlreadyExists(target.to_path_buf()));
            }
            Err(err) => return Err(io_err(err)),
        };
        io::copy(&mut input, &mut output).map_err(io_err)?;
        Ok(())
    }
}

impl DatasetWriter for CopyWriter {
    fn write(&self, source: &Path, target: &Path) -> Result<(), WriteError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| WriteError::Io(source.to_path_buf(), parent.to_path_buf(), err))?;
        }
        tracing::debug!("Copying '{}' to '{}' ...", source.display(), target.display());
        Self::copy_new(source, target)?;
        let sidecar = header_sidecar_path(source);
        if sidecar.is_file() {
            Self::copy_new(&sidecar, &header_sidecar_path(target))?;
        }
        Ok(())
    }
}

/// Tells data variables apart from coordinates and bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableProcessor {
    bnds_coord_indicators: Vec<String>,
}

impl Default for VariableProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_BNDS_COORD_INDICATORS.map(ToOwned::to_owned).to_vec())
    }
}

impl VariableProcessor {
    #[must_use]
    pub const fn new(bnds_coord_indicators: Vec<String>) -> Self {
        Self {
            bnds_coord_indicators,
        }
    }

    #[must_use]
    pub fn bnds_coord_indicators(&self) -> &[String] {
        &self.bnds_coord_indicators
    }

    /// The names of the data variables, sorted.
    ///
    /// Excluded are coordinate variables (named like a dimension),
    /// variables whose name holds a bounds indicator
    /// and variables other variables refer to
    /// as their `bounds`, `climatology` or `coordinates`.
    #[must_use]
    pub fn data_variables<'a>(&self, dataset: &'a Dataset) -> Vec<&'a str> {
        let referenced: BTreeSet<String> = dataset
            .variables
            .values()
            .flat_map(|variable| {
                ["bounds", "climatology", "coordinates"]
                    .into_iter()
                    .filter_map(|key| variable.attribute(key))
            })
            .flat_map(|names| {
                names
                    .split_whitespace()
                    .map(ToOwned::to_owned)
                    .collect::<Vec<_>>()
            })
            .collect();
        dataset
            .variables
            .keys()
            .map(String::as_str)
            .filter(|name| !dataset.dimensions.contains_key(*name))
            .filter(|name| !referenced.contains(*name))
            .filter(|name| {
                !self
                    .bnds_coord_indicators
                    .iter()
                    .any(|indicator| name.contains(indicator.as_str()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        serde_json::from_str(
            r#"{
                "dimensions": {"time": 12, "lat": 2, "bnds": 2},
                "variables": {
                    "tos": {"dimensions": ["time", "lat"], "attributes": {"coordinates": "area"}},
                    "area": {"dimensions": ["lat"]},
                    "time": {"dimensions": ["time"], "attributes": {"bounds": "time_edges"}},
                    "time_edges": {"dimensions": ["time", "bnds"]},
                    "lat": {"dimensions": ["lat"]},
                    "lat_bnds": {"dimensions": ["lat", "bnds"]}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_data_variables() {
        let dataset = dataset();
        assert_eq!(VariableProcessor::default().data_variables(&dataset), vec!["tos"]);
    }

    #[test]
    fn test_custom_indicators() {
        let mut dataset = dataset();
        dataset.variables.remove("tos");
        dataset.variables.get_mut("time").unwrap().attributes.clear();
        let processor = VariableProcessor::new(vec!["bnds".to_owned()]);
        assert_eq!(processor.data_variables(&dataset), vec!["area", "time_edges"]);
    }

    #[test]
    fn test_sidecar_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tos.nc");
        fs::write(&file, "not json").unwrap();
        assert!(matches!(
            JsonHeaderLoader.load(&file),
            Err(LoadError::Parse(..))
        ));
        fs::write(
            dir.path().join("tos.nc.header.json"),
            r#"{"attributes": {"variable_id": "tos"}}"#,
        )
        .unwrap();
        let dataset = JsonHeaderLoader.load(&file).unwrap();
        assert_eq!(dataset.attribute("variable_id").as_deref(), Some("tos"));
    }

    #[test]
    fn test_missing_file() {
        let res = JsonHeaderLoader.load(Path::new("/does/not/exist.nc"));
        assert!(matches!(res, Err(LoadError::Io(..))));
    }

    #[test]
    fn test_copy_writer() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tos.nc");
        fs::write(&source, "payload").unwrap();
        fs::write(header_sidecar_path(&source), "{}").unwrap();
        let target = dir.path().join("drs").join("tos").join("tos_v1.nc");

        CopyWriter.write(&source, &target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "payload");
        assert_eq!(fs::read_to_string(header_sidecar_path(&target)).unwrap(), "{}");

        fs::write(&source, "changed").unwrap();
        assert!(matches!(
            CopyWriter.write(&source, &target),
            Err(WriteError::AlreadyExists(path)) if path == target
        ));
        assert_eq!(fs::read_to_string(&target).unwrap(), "payload");
    }
}
