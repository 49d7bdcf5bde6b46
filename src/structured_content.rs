// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Path is not a file-path or the file has no extension: '{0}'")]
    NoExtension(String),
    #[error("Unsupported file extension '{0}'")]
    UnsupportedExtension(String),
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Serialization formats of tree-structured data we read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationFormat {
    Yaml,
    Json,
}

impl TryFrom<&Path> for SerializationFormat {
    type Error = Error;

    fn try_from(value: &Path) -> Result<Self, Self::Error> {
        let file_ext = value
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .ok_or_else(|| Error::NoExtension(value.display().to_string()))?
            .to_lowercase();
        Ok(match file_ext.as_str() {
            "yml" | "yaml" => Self::Yaml,
            "json" => Self::Json,
            _ => return Err(Error::UnsupportedExtension(file_ext)),
        })
    }
}

impl SerializationFormat {
    /// Parses raw content in this format into `P`.
    ///
    /// # Errors
    ///
    /// If the content is not valid in this format,
    /// or does not fit the structure of `P`.
    pub fn parse<P: DeserializeOwned>(self, content: &[u8]) -> Result<P, Error> {
        Ok(match self {
            Self::Json => serde_json::from_slice(content)?,
            Self::Yaml => serde_yaml::from_slice(content)?,
        })
    }
}

/// Parses the content of a file,
/// choosing the format by the files extension.
///
/// # Errors
///
/// See [`SerializationFormat::parse`],
/// plus if the extension is unknown.
pub fn parse_file_content<P: DeserializeOwned>(
    file_name: impl AsRef<Path>,
    content: &[u8],
) -> Result<P, Error> {
    SerializationFormat::try_from(file_name.as_ref())?.parse(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            SerializationFormat::try_from(Path::new("a/b.JSON")).unwrap(),
            SerializationFormat::Json
        );
        assert_eq!(
            SerializationFormat::try_from(Path::new("b.yml")).unwrap(),
            SerializationFormat::Yaml
        );
        assert!(SerializationFormat::try_from(Path::new("b.toml")).is_err());
        assert!(SerializationFormat::try_from(Path::new("b")).is_err());
    }

    #[test]
    fn test_parse_yaml_and_json_alike() {
        let from_json: BTreeMap<String, Vec<String>> =
            parse_file_content("x.json", br#"{"institution_id": ["CR"]}"#).unwrap();
        let from_yaml: BTreeMap<String, Vec<String>> =
            parse_file_content("x.yaml", b"institution_id:\n  - CR\n").unwrap();
        assert_eq!(from_json, from_yaml);
    }
}
