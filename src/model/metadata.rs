// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{
    cvs::{ControlledVocabularySet, CvVersion},
    model::validation_result::{ValidationResult, ValidationResults},
    validation::rules,
};

/// Global attributes of a dataset, by name.
pub type Attributes = BTreeMap<String, String>;

pub const REQUIRED_ATTRIBUTES: [&str; 15] = [
    "activity_id",
    "contact",
    "dataset_category",
    "frequency",
    "further_info_url",
    "grid_label",
    "institution_id",
    "license",
    "mip_era",
    "nominal_resolution",
    "realm",
    "source_id",
    "source_version",
    "target_mip",
    "variable_id",
];

pub const OPTIONAL_ATTRIBUTES: [&str; 15] = [
    "Conventions",
    "comment",
    "creation_date",
    "external_variables",
    "grid",
    "institution",
    "license_id",
    "product",
    "references",
    "region",
    "source",
    "time_range",
    "title",
    "tracking_id",
    "version",
];

/// `variable_id` of datasets holding more than one variable.
pub const MULTIPLE_VARIABLES: &str = "multiple";

#[must_use]
pub fn is_known_attribute(key: &str) -> bool {
    REQUIRED_ATTRIBUTES.contains(&key) || OPTIONAL_ATTRIBUTES.contains(&key)
}

/// The required attributes that are absent (or empty) in `attributes`.
#[must_use]
pub fn missing_attributes(attributes: &Attributes) -> Vec<&'static str> {
    REQUIRED_ATTRIBUTES
        .iter()
        .copied()
        .filter(|key| attributes.get(*key).is_none_or(|value| value.is_empty()))
        .collect()
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Missing required attribute(s): {}", .0.join(", "))]
    MissingAttributes(Vec<String>),
    #[error("Unknown attribute '{0}'")]
    UnknownAttribute(String),
    #[error("Metadata is inconsistent with the CVs:\n{0}")]
    InconsistentWithCvs(ValidationResults),
}

/// The metadata of one file.
///
/// Only constructible through the checked [`Self::new`],
/// so every instance is consistent with the CVs it references.
/// Changes go through [`Self::evolve`], which returns a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetMetadata {
    attributes: Attributes,
    cv_version: CvVersion,
}

impl DatasetMetadata {
    /// Creates metadata from global attributes,
    /// checking it against the CVs.
    ///
    /// Attributes that are not part of the metadata model are ignored.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::MissingAttributes`] naming each missing required attribute
    /// - [`MetadataError::InconsistentWithCvs`] with all the failed rules
    pub fn new(attributes: Attributes, cv: &ControlledVocabularySet) -> Result<Self, MetadataError> {
        let missing = missing_attributes(&attributes);
        if !missing.is_empty() {
            return Err(MetadataError::MissingAttributes(
                missing.into_iter().map(ToOwned::to_owned).collect(),
            ));
        }
        let attributes: Attributes = attributes
            .into_iter()
            .filter(|(key, value)| is_known_attribute(key) && !value.is_empty())
            .collect();
        let failures: ValidationResults = rules::run_all(&attributes, cv)
            .into_iter()
            .filter(ValidationResult::is_fail)
            .collect();
        if !failures.is_empty() {
            return Err(MetadataError::InconsistentWithCvs(failures));
        }
        Ok(Self {
            attributes,
            cv_version: cv.version().clone(),
        })
    }

    /// Creates metadata from the global attributes as read from a file.
    ///
    /// Surrounding whitespace is stripped from the values.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn from_attributes(
        attributes: &Attributes,
        cv: &ControlledVocabularySet,
    ) -> Result<Self, MetadataError> {
        Self::new(
            attributes
                .iter()
                .map(|(key, value)| (key.clone(), value.trim().to_owned()))
                .collect(),
            cv,
        )
    }

    /// Returns a new instance with `changes` applied and re-checked.
    ///
    /// An empty value removes an (optional) attribute.
    ///
    /// # Errors
    ///
    /// See [`Self::new`], plus if `changes` holds an unknown attribute.
    pub fn evolve(
        &self,
        changes: &Attributes,
        cv: &ControlledVocabularySet,
    ) -> Result<Self, MetadataError> {
        let mut attributes = self.attributes.clone();
        for (key, value) in changes {
            if !is_known_attribute(key) {
                return Err(MetadataError::UnknownAttribute(key.clone()));
            }
            if value.is_empty() {
                attributes.remove(key);
            } else {
                attributes.insert(key.clone(), value.clone());
            }
        }
        Self::new(attributes, cv)
    }

    /// Runs all the consistency rules against a (possibly different) CV snapshot.
    #[must_use]
    pub fn validate(&self, cv: &ControlledVocabularySet) -> ValidationResults {
        rules::run_all(&self.attributes, cv)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    fn required(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// The attributes to write into a file.
    #[must_use]
    pub fn to_attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    /// The values the DRS is derived from.
    #[must_use]
    pub fn drs_fields(&self) -> Attributes {
        self.attributes.clone()
    }

    /// The CVs this metadata was checked against.
    #[must_use]
    pub const fn cv_version(&self) -> &CvVersion {
        &self.cv_version
    }

    #[must_use]
    pub fn activity_id(&self) -> &str {
        self.required("activity_id")
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        self.required("source_id")
    }

    #[must_use]
    pub fn variable_id(&self) -> &str {
        self.required("variable_id")
    }

    #[must_use]
    pub fn frequency(&self) -> &str {
        self.required("frequency")
    }

    #[must_use]
    pub fn institution_id(&self) -> &str {
        self.required("institution_id")
    }

    #[must_use]
    pub fn grid_label(&self) -> &str {
        self.required("grid_label")
    }

    #[must_use]
    pub fn tracking_id(&self) -> Option<&str> {
        self.get("tracking_id")
    }

    #[must_use]
    pub fn time_range(&self) -> Option<&str> {
        self.get("time_range")
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.get("version")
    }

    /// The names listed in the `external_variables` attribute.
    pub fn external_variables(&self) -> impl Iterator<Item = &str> {
        self.get("external_variables")
            .unwrap_or_default()
            .split_whitespace()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::valid_attributes;
    use super::*;
    use crate::{cvs::test_support::test_cvs, model::validation_result::ErrorKind};

    #[test]
    fn test_new_valid() {
        let cvs = test_cvs();
        let metadata = DatasetMetadata::new(valid_attributes(), &cvs).unwrap();
        assert_eq!(metadata.source_id(), "CR-CMIP-0-2-0");
        assert_eq!(metadata.cv_version(), cvs.version());
        assert!(!metadata.validate(&cvs).has_failures());
    }

    #[test]
    fn test_from_attributes_trims() {
        let cvs = test_cvs();
        let mut attributes = valid_attributes();
        attributes.insert("realm".to_owned(), " atmos\n".to_owned());
        let metadata = DatasetMetadata::from_attributes(&attributes, &cvs).unwrap();
        assert_eq!(metadata.get("realm"), Some("atmos"));
        assert_eq!(
            metadata.to_attributes(),
            DatasetMetadata::new(valid_attributes(), &cvs)
                .unwrap()
                .to_attributes()
        );
    }

    #[test]
    fn test_new_ignores_foreign_attributes() {
        let cvs = test_cvs();
        let mut attributes = valid_attributes();
        attributes.insert("history".to_owned(), "created by hand".to_owned());
        let metadata = DatasetMetadata::new(attributes, &cvs).unwrap();
        assert_eq!(metadata.get("history"), None);
    }

    #[test]
    fn test_missing_attributes_are_named() {
        let cvs = test_cvs();
        let mut attributes = valid_attributes();
        attributes.remove("contact");
        attributes.remove("realm");
        match DatasetMetadata::new(attributes, &cvs) {
            Err(MetadataError::MissingAttributes(missing)) => {
                assert_eq!(missing, vec!["contact".to_owned(), "realm".to_owned()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_inconsistent_activity_and_source() {
        let cvs = test_cvs();
        let mut attributes = valid_attributes();
        attributes.insert("activity_id".to_owned(), "GHGConcentrations".to_owned());
        attributes.insert("source_id".to_owned(), "XX-1-0".to_owned());
        let Err(MetadataError::InconsistentWithCvs(failures)) =
            DatasetMetadata::new(attributes, &cvs)
        else {
            panic!("expected a CV inconsistency");
        };
        assert!(failures.iter().any(|res| {
            res.error_kind() == Some(ErrorKind::ValueInconsistentWithCvs)
                && res.message().contains("activity_id=\"GHGConcentrations\"")
                && res.message().contains("source_id=\"XX-1-0\"")
        }));
    }

    #[test]
    fn test_evolve_is_idempotent_and_pure() {
        let cvs = test_cvs();
        let metadata = DatasetMetadata::new(valid_attributes(), &cvs).unwrap();
        let changes: Attributes = [("comment".to_owned(), "A second look".to_owned())]
            .into_iter()
            .collect();
        let once = metadata.evolve(&changes, &cvs).unwrap();
        let twice = once.evolve(&changes, &cvs).unwrap();
        assert_eq!(once, twice);
        assert_ne!(metadata, once);
        assert_eq!(metadata.get("comment"), None);
        assert_eq!(once.get("comment"), Some("A second look"));
    }

    #[test]
    fn test_evolve_rechecks() {
        let cvs = test_cvs();
        let metadata = DatasetMetadata::new(valid_attributes(), &cvs).unwrap();
        let changes: Attributes = [("institution_id".to_owned(), "PCMDI".to_owned())]
            .into_iter()
            .collect();
        assert!(matches!(
            metadata.evolve(&changes, &cvs),
            Err(MetadataError::InconsistentWithCvs(_))
        ));
        let unknown: Attributes = [("history".to_owned(), "x".to_owned())]
            .into_iter()
            .collect();
        assert!(matches!(
            metadata.evolve(&unknown, &cvs),
            Err(MetadataError::UnknownAttribute(_))
        ));
    }
}
