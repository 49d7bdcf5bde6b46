// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Checks that the declared metadata agrees with the dataset content.

use crate::{
    inference::{infer_frequency, time_range, Frequency},
    loader::VariableProcessor,
    model::{
        dataset::Dataset,
        metadata::{Attributes, MULTIPLE_VARIABLES},
        validation_result::{ErrorKind, ValidationResult, ValidationResults},
    },
};

pub const RULE_VARIABLE_ID: &str = "dataset.variable_id";
pub const RULE_FREQUENCY: &str = "dataset.frequency";
pub const RULE_TIME_RANGE: &str = "dataset.time_range";
pub const RULE_EXTERNAL_VARIABLES: &str = "dataset.external_variables";
pub const RULE_TIME_DIMENSION: &str = "dataset.time_dimension";

fn missing(rule: &str, key: &str) -> ValidationResult {
    ValidationResult::fail(
        rule,
        ErrorKind::MissingAttribute,
        format!("Attribute '{key}' is missing, so it can not be compared to the data"),
    )
}

fn inconsistent(rule: &str, message: String) -> ValidationResult {
    ValidationResult::fail(rule, ErrorKind::DatasetInconsistency, message)
}

fn check_variable_id(attributes: &Attributes, data_variables: &[&str]) -> ValidationResult {
    let Some(variable_id) = attributes.get("variable_id") else {
        return missing(RULE_VARIABLE_ID, "variable_id");
    };
    if variable_id == MULTIPLE_VARIABLES {
        return if data_variables.len() > 1 {
            ValidationResult::pass(RULE_VARIABLE_ID, "The dataset holds multiple variables")
        } else {
            inconsistent(
                RULE_VARIABLE_ID,
                format!(
                    "variable_id={MULTIPLE_VARIABLES:?}, but the data variables are {data_variables:?}"
                ),
            )
        };
    }
    if data_variables == [variable_id.as_str()] {
        ValidationResult::pass(RULE_VARIABLE_ID, "variable_id matches the data variable")
    } else {
        inconsistent(
            RULE_VARIABLE_ID,
            format!(
                "variable_id={variable_id:?}, but the data variables are {data_variables:?}"
            ),
        )
    }
}

fn check_frequency(attributes: &Attributes, dataset: &Dataset) -> ValidationResult {
    let Some(frequency) = attributes.get("frequency") else {
        return missing(RULE_FREQUENCY, "frequency");
    };
    match infer_frequency(dataset).map(|inferred| inferred.to_string()) {
        Some(inferred) if inferred == *frequency => {
            ValidationResult::pass(RULE_FREQUENCY, "frequency matches the time axis")
        }
        Some(inferred) => inconsistent(
            RULE_FREQUENCY,
            format!("frequency={frequency:?}, but the time axis suggests {inferred:?}"),
        ),
        None => ValidationResult::warning(
            RULE_FREQUENCY,
            ErrorKind::DatasetInconsistency,
            format!("Could not infer a frequency from the time axis to compare frequency={frequency:?} with"),
        ),
    }
}

fn check_time_range(attributes: &Attributes, dataset: &Dataset) -> ValidationResult {
    let declared = attributes.get("time_range");
    let Some(frequency) = attributes.get("frequency") else {
        return missing(RULE_TIME_RANGE, "frequency");
    };
    let Ok(frequency) = frequency.parse::<Frequency>() else {
        return ValidationResult::pass(
            RULE_TIME_RANGE,
            format!("No time range format known for frequency={frequency:?}"),
        );
    };
    let expected = dataset
        .time
        .as_ref()
        .and_then(|time| time_range(time, frequency));
    match (declared, expected) {
        (None, None) => ValidationResult::pass(RULE_TIME_RANGE, "No time range, as expected"),
        (Some(declared), Some(expected)) if *declared == expected => {
            ValidationResult::pass(RULE_TIME_RANGE, "time_range matches the time axis")
        }
        (None, Some(expected)) => ValidationResult::warning(
            RULE_TIME_RANGE,
            ErrorKind::MissingAttribute,
            format!("Attribute 'time_range' is not set; the time axis covers {expected:?}"),
        ),
        (Some(declared), expected) => inconsistent(
            RULE_TIME_RANGE,
            format!("time_range={declared:?}, but the time axis gives {expected:?}"),
        ),
    }
}

fn check_external_variables(attributes: &Attributes, dataset: &Dataset) -> ValidationResult {
    let present: Vec<&str> = attributes
        .get("external_variables")
        .map(String::as_str)
        .unwrap_or_default()
        .split_whitespace()
        .filter(|name| dataset.has_variable(name))
        .collect();
    if present.is_empty() {
        ValidationResult::pass(
            RULE_EXTERNAL_VARIABLES,
            "No external variable is contained in the file",
        )
    } else {
        inconsistent(
            RULE_EXTERNAL_VARIABLES,
            format!("External variables must not be contained in the file, but found {present:?}"),
        )
    }
}

fn check_time_dimension(
    attributes: &Attributes,
    dataset: &Dataset,
    data_variables: &[&str],
) -> ValidationResult {
    let Some(frequency) = attributes.get("frequency") else {
        return missing(RULE_TIME_DIMENSION, "frequency");
    };
    let fixed = *frequency == Frequency::Fixed.to_string();
    let time_name = dataset
        .time
        .as_ref()
        .map_or("time", |time| time.name.as_str());
    let wrong: Vec<&str> = data_variables
        .iter()
        .copied()
        .filter(|name| {
            let has_time = dataset.variables[*name]
                .dimensions
                .iter()
                .any(|dim| dim == time_name);
            has_time == fixed
        })
        .collect();
    if wrong.is_empty() {
        ValidationResult::pass(RULE_TIME_DIMENSION, "Time dimension matches the frequency")
    } else if fixed {
        inconsistent(
            RULE_TIME_DIMENSION,
            format!("frequency={frequency:?}, but {wrong:?} have a '{time_name}' dimension"),
        )
    } else {
        inconsistent(
            RULE_TIME_DIMENSION,
            format!("frequency={frequency:?}, but {wrong:?} lack a '{time_name}' dimension"),
        )
    }
}

/// Cross-checks the declared `attributes` with the content of `dataset`.
///
/// All checks run; one result each.
#[must_use]
pub fn validate_dataset_consistency(
    dataset: &Dataset,
    attributes: &Attributes,
    variable_processor: &VariableProcessor,
) -> ValidationResults {
    let data_variables = variable_processor.data_variables(dataset);
    [
        check_variable_id(attributes, &data_variables),
        check_frequency(attributes, dataset),
        check_time_range(attributes, dataset),
        check_external_variables(attributes, dataset),
        check_time_dimension(attributes, dataset, &data_variables),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inference::test_support::co2_dataset,
        model::{metadata::test_support::valid_attributes, validation_result::Status},
    };

    fn run(dataset: &Dataset, attributes: &Attributes) -> ValidationResults {
        validate_dataset_consistency(dataset, attributes, &VariableProcessor::default())
    }

    fn status_of(results: &ValidationResults, rule: &str) -> Status {
        results
            .iter()
            .find(|res| res.rule() == rule)
            .map(ValidationResult::status)
            .unwrap()
    }

    #[test]
    fn test_consistent() {
        let results = run(&co2_dataset(12), &valid_attributes());
        assert_eq!(results.len(), 5);
        assert_eq!(results.summary(), Status::Pass, "{results}");
    }

    #[test]
    fn test_wrong_variable_and_frequency() {
        let mut attributes = valid_attributes();
        attributes.insert("variable_id".to_owned(), "tos".to_owned());
        attributes.insert("frequency".to_owned(), "yr".to_owned());
        let results = run(&co2_dataset(12), &attributes);
        assert_eq!(status_of(&results, RULE_VARIABLE_ID), Status::Fail);
        assert_eq!(status_of(&results, RULE_FREQUENCY), Status::Fail);
        // the time range is judged by the declared frequency
        assert_eq!(status_of(&results, RULE_TIME_RANGE), Status::Fail);
    }

    #[test]
    fn test_time_range_mismatch() {
        let mut attributes = valid_attributes();
        attributes.insert("time_range".to_owned(), "200001-200112".to_owned());
        let results = run(&co2_dataset(12), &attributes);
        assert_eq!(status_of(&results, RULE_TIME_RANGE), Status::Fail);
    }

    #[test]
    fn test_external_variables_present() {
        let mut attributes = valid_attributes();
        attributes.insert("external_variables".to_owned(), "lat".to_owned());
        let results = run(&co2_dataset(12), &attributes);
        assert_eq!(status_of(&results, RULE_EXTERNAL_VARIABLES), Status::Fail);
    }

    #[test]
    fn test_fixed_field_with_time() {
        let mut attributes = valid_attributes();
        attributes.insert("frequency".to_owned(), "fx".to_owned());
        attributes.remove("time_range");
        let results = run(&co2_dataset(12), &attributes);
        assert_eq!(status_of(&results, RULE_TIME_DIMENSION), Status::Fail);
        assert_eq!(status_of(&results, RULE_FREQUENCY), Status::Fail);
    }

    #[test]
    fn test_missing_attribute_named() {
        let mut attributes = valid_attributes();
        attributes.remove("frequency");
        let results = run(&co2_dataset(12), &attributes);
        let res = results.iter().find(|res| res.rule() == RULE_FREQUENCY).unwrap();
        assert_eq!(res.error_kind(), Some(ErrorKind::MissingAttribute));
        assert!(res.message().contains("'frequency'"));
    }
}
