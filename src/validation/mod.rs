// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod dataset;
pub mod file;
pub mod rules;
pub mod tree;

use crate::{
    cvs::ControlledVocabularySet,
    model::{
        metadata::{missing_attributes, Attributes},
        validation_result::{ErrorKind, ValidationResult, ValidationResults},
    },
};

/// Rule id for the presence check of one required attribute.
#[must_use]
pub fn required_attribute_rule_id(key: &str) -> String {
    format!("required_attribute.{key}")
}

/// Validates raw attributes, without first constructing
/// [`crate::model::metadata::DatasetMetadata`].
///
/// Every missing required attribute yields its own fail,
/// then all the consistency rules run.
#[must_use]
pub fn validate_attributes(
    attributes: &Attributes,
    cv: &ControlledVocabularySet,
) -> ValidationResults {
    let mut results: ValidationResults = missing_attributes(attributes)
        .into_iter()
        .map(|key| {
            ValidationResult::fail(
                required_attribute_rule_id(key),
                ErrorKind::MissingAttribute,
                format!("Required attribute '{key}' is missing"),
            )
        })
        .collect();
    results.extend(rules::run_all(attributes, cv));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cvs::test_support::test_cvs, model::metadata::test_support::valid_attributes};

    #[test]
    fn test_missing_attribute_named() {
        let mut attributes = valid_attributes();
        attributes.remove("grid_label");
        let results = validate_attributes(&attributes, &test_cvs());
        let missing: Vec<_> = results
            .failures()
            .filter(|res| res.error_kind() == Some(ErrorKind::MissingAttribute))
            .collect();
        assert!(missing
            .iter()
            .any(|res| res.rule() == "required_attribute.grid_label"
                && res.message().contains("'grid_label'")));
        assert!(!results.iter().any(|res| res.message().contains("KeyError")));
    }

    #[test]
    fn test_valid_attributes_pass() {
        let results = validate_attributes(&valid_attributes(), &test_cvs());
        assert!(!results.has_failures(), "{results}");
    }
}
