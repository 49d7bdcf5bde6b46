// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! What validation sees of a data file:
//! its header, never its array payload.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::metadata::Attributes;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Variable {
    /// A string attribute of this variable.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.get(key).and_then(value_to_string)
    }
}

/// The decoded time coordinate of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAxis {
    #[serde(default = "default_time_name")]
    pub name: String,
    pub points: Vec<NaiveDateTime>,
    #[serde(default)]
    pub bounds: Option<Vec<(NaiveDateTime, NaiveDateTime)>>,
    /// Whether the bounds are climatology bounds.
    #[serde(default)]
    pub climatology: bool,
}

fn default_time_name() -> String {
    "time".to_owned()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Global attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, usize>,
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
    #[serde(default)]
    pub time: Option<TimeAxis>,
}

/// Renders an attribute value the way it is compared to the CVs.
///
/// Lists are joined with spaces; `null` has no string form.
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(string) => Some(string.clone()),
        Value::Bool(_) | Value::Number(_) | Value::Object(_) => Some(value.to_string()),
        Value::Array(values) => Some(
            values
                .iter()
                .filter_map(value_to_string)
                .collect::<Vec<_>>()
                .join(" "),
        ),
    }
}

impl Dataset {
    /// The global attributes, all as strings.
    #[must_use]
    pub fn string_attributes(&self) -> Attributes {
        self.attributes
            .iter()
            .filter_map(|(key, value)| value_to_string(value).map(|value| (key.clone(), value)))
            .collect()
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.get(key).and_then(value_to_string)
    }

    #[must_use]
    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Whether the dataset has a time dimension.
    #[must_use]
    pub fn has_time_dimension(&self) -> bool {
        let time_name = self
            .time
            .as_ref()
            .map_or("time", |axis| axis.name.as_str());
        self.dimensions.contains_key(time_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_header() {
        let header = r#"{
            "attributes": {"variable_id": "tos", "external_variables": ["areacello", "sftof"], "n": 3},
            "dimensions": {"time": 2, "lat": 180},
            "variables": {
                "tos": {"dimensions": ["time", "lat"], "attributes": {"units": "K"}},
                "time": {"dimensions": ["time"], "attributes": {"bounds": "time_bnds"}}
            },
            "time": {
                "points": ["2000-01-16T12:00:00", "2000-02-15T00:00:00"],
                "bounds": [["2000-01-01T00:00:00", "2000-02-01T00:00:00"], ["2000-02-01T00:00:00", "2000-03-01T00:00:00"]]
            }
        }"#;
        let dataset: Dataset = serde_json::from_str(header).unwrap();
        let attributes = dataset.string_attributes();
        assert_eq!(attributes["variable_id"], "tos");
        assert_eq!(attributes["external_variables"], "areacello sftof");
        assert_eq!(attributes["n"], "3");
        let time = dataset.time.as_ref().unwrap();
        assert_eq!(time.name, "time");
        assert!(!time.climatology);
        assert_eq!(time.bounds.as_ref().unwrap().len(), 2);
        assert!(dataset.has_time_dimension());
        assert_eq!(
            dataset.variables["time"].attribute("bounds").as_deref(),
            Some("time_bnds")
        );
    }
}
