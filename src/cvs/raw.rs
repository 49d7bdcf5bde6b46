// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The on-disk shape of the CV files,
//! before they get checked and turned into
//! [`super::ControlledVocabularySet`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const ACTIVITY_ID_FILENAME: &str = "input4MIPs_activity_id.json";
pub const DRS_FILENAME: &str = "input4MIPs_DRS.json";
pub const INSTITUTION_ID_FILENAME: &str = "input4MIPs_institution_id.json";
pub const LICENSE_FILENAME: &str = "input4MIPs_license.json";
pub const SOURCE_ID_FILENAME: &str = "input4MIPs_source_id.json";

/// Files without which no CV set can be assembled.
pub const REQUIRED_FILES: [&str; 5] = [
    ACTIVITY_ID_FILENAME,
    DRS_FILENAME,
    INSTITUTION_ID_FILENAME,
    LICENSE_FILENAME,
    SOURCE_ID_FILENAME,
];

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActivityIdFile {
    pub activity_id: BTreeMap<String, ActivityIdValues>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActivityIdValues {
    #[serde(rename = "URL")]
    pub url: String,
    pub long_name: String,
    /// Glob patterns (e.g. `CR-*`) the `source_id`s of this activity have to match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_id_patterns: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InstitutionIdFile {
    pub institution_id: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LicenseFile {
    pub license: BTreeMap<String, LicenseValues>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LicenseValues {
    pub conditions: String,
    pub license_url: String,
    pub long_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SourceIdFile {
    pub source_id: BTreeMap<String, SourceIdValues>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceIdValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    pub contact: String,
    pub further_info_url: String,
    pub institution_id: String,
    pub license_id: String,
    pub mip_era: String,
    pub source_version: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DrsFile {
    #[serde(rename = "DRS")]
    pub drs: DrsValues,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DrsValues {
    pub directory_path_template: String,
    #[serde(default)]
    pub directory_path_example: Option<String>,
    pub filename_template: String,
    #[serde(default)]
    pub filename_example: Option<String>,
}

/// A vocabulary that is nothing but a set of allowed values.
///
/// Both a plain list and a map (value -> description) are accepted.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SimpleVocabulary {
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

impl SimpleVocabulary {
    #[must_use]
    pub fn into_values(self) -> Vec<String> {
        match self {
            Self::List(values) => values,
            Self::Map(map) => map.into_keys().collect(),
        }
    }
}

/// A file holding one [`SimpleVocabulary`] under its category name.
pub type SimpleVocabularyFile = BTreeMap<String, SimpleVocabulary>;
