// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The static registry of metadata consistency rules.
//!
//! Every rule runs on the global attributes of one dataset
//! and yields exactly one [`ValidationResult`].

use std::{collections::BTreeSet, sync::LazyLock};

use chrono::NaiveDateTime;
use regex::Regex;
use thiserror::Error;

use crate::{
    cvs::{self, Category, ControlledVocabularySet},
    model::{
        metadata::{Attributes, REQUIRED_ATTRIBUTES},
        validation_result::{ErrorKind, ValidationResult, ValidationResults},
    },
    tools::{CREATION_DATE_FORMAT, TRACKING_ID_PREFIX},
};

/// Upper bound for the length of the `comment` attribute.
pub const MAX_COMMENT_LEN: usize = 4096;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s;]+@[^@\s;]+\.[^@\s;]+$").expect("static regex is valid"));
static CREATION_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z$").expect("static regex is valid")
});
static CONVENTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CF-\d+\.\d+$").expect("static regex is valid"));
static VARIABLE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("static regex is valid"));
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").expect("static regex is valid"));

/// Why a rule could not come to a verdict.
#[derive(Error, Debug)]
enum RuleError {
    #[error("Attribute '{0}' is missing")]
    MissingAttribute(String),
    #[error("{0}")]
    Internal(String),
}

/// One metadata consistency rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// The value of a category is one the CVs allow.
    ValueInCvs(Category),
    /// `activity_id` and `source_id` go together.
    ActivitySourceConsistency,
    /// A value the `source_id` entry of the CVs fixes.
    SourceDetermined(Category),
    /// `license` is the text of the license the `source_id` uses.
    LicenseText,
    ContactFormat,
    FurtherInfoUrlFormat,
    TrackingIdFormat,
    CreationDateFormat,
    ConventionsFormat,
    VariableIdCharacters,
    CommentContent,
    ExternalVariables,
}

/// All rules, in the order they run.
pub static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let value_in_cvs = [
        Category::ActivityId,
        Category::SourceId,
        Category::InstitutionId,
        Category::LicenseId,
        Category::MipEra,
        Category::TargetMip,
        Category::DatasetCategory,
        Category::Product,
        Category::Frequency,
        Category::GridLabel,
        Category::Realm,
    ]
    .into_iter()
    .map(Rule::ValueInCvs);
    let source_determined = [
        Category::InstitutionId,
        Category::Contact,
        Category::FurtherInfoUrl,
        Category::LicenseId,
        Category::MipEra,
        Category::SourceVersion,
    ]
    .into_iter()
    .map(Rule::SourceDetermined);
    value_in_cvs
        .chain(std::iter::once(Rule::ActivitySourceConsistency))
        .chain(source_determined)
        .chain([
            Rule::LicenseText,
            Rule::ContactFormat,
            Rule::FurtherInfoUrlFormat,
            Rule::TrackingIdFormat,
            Rule::CreationDateFormat,
            Rule::ConventionsFormat,
            Rule::VariableIdCharacters,
            Rule::CommentContent,
            Rule::ExternalVariables,
        ])
        .collect()
});

/// Runs every registered rule; one failing rule never stops the others.
#[must_use]
pub fn run_all(attributes: &Attributes, cv: &ControlledVocabularySet) -> ValidationResults {
    RULES.iter().map(|rule| rule.run(attributes, cv)).collect()
}

fn is_required(key: &str) -> bool {
    REQUIRED_ATTRIBUTES.contains(&key)
}

/// Fetches an attribute a rule depends on.
fn need<'a>(attributes: &'a Attributes, key: &str) -> Result<&'a str, RuleError> {
    attributes
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| RuleError::MissingAttribute(key.to_owned()))
}

impl Rule {
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::ValueInCvs(category) => cvs::value_rule_id(*category),
            Self::ActivitySourceConsistency => {
                cvs::cross_field_rule_id(Category::ActivityId, Category::SourceId)
            }
            Self::SourceDetermined(category) => {
                cvs::cross_field_rule_id(Category::SourceId, *category)
            }
            Self::LicenseText => "license_text".to_owned(),
            Self::ContactFormat => "contact_format".to_owned(),
            Self::FurtherInfoUrlFormat => "further_info_url_format".to_owned(),
            Self::TrackingIdFormat => "tracking_id_format".to_owned(),
            Self::CreationDateFormat => "creation_date_format".to_owned(),
            Self::ConventionsFormat => "conventions_format".to_owned(),
            Self::VariableIdCharacters => "variable_id_characters".to_owned(),
            Self::CommentContent => "comment_content".to_owned(),
            Self::ExternalVariables => "external_variables".to_owned(),
        }
    }

    /// Applies this rule.
    ///
    /// A rule that can not decide (e.g. because an attribute is missing)
    /// yields a fail-type result, never an error.
    #[must_use]
    pub fn run(&self, attributes: &Attributes, cv: &ControlledVocabularySet) -> ValidationResult {
        match self.check(attributes, cv) {
            Ok(result) => result,
            Err(RuleError::MissingAttribute(key)) => ValidationResult::fail(
                self.id(),
                ErrorKind::MissingAttribute,
                format!("Attribute '{key}' is missing, so this rule could not be checked"),
            ),
            Err(err @ RuleError::Internal(_)) => {
                ValidationResult::fail(self.id(), ErrorKind::RuleError, err.to_string())
            }
        }
    }

    fn check(
        &self,
        attributes: &Attributes,
        cv: &ControlledVocabularySet,
    ) -> Result<ValidationResult, RuleError> {
        let id = self.id();
        let format_fail = |message: String| -> Result<ValidationResult, RuleError> {
            Ok(ValidationResult::fail(id.clone(), ErrorKind::InvalidFormat, message))
        };
        match self {
            Self::ValueInCvs(category) => {
                let key = category.as_str();
                match attributes.get(key) {
                    Some(value) => Ok(cv.validate_value(*category, value)),
                    None if is_required(key) => Err(RuleError::MissingAttribute(key.to_owned())),
                    None => Ok(ValidationResult::pass(id, format!("{key} is not set"))),
                }
            }
            Self::ActivitySourceConsistency => Ok(cv.validate_cross_field(
                (Category::ActivityId, need(attributes, "activity_id")?),
                (Category::SourceId, need(attributes, "source_id")?),
            )),
            Self::SourceDetermined(category) => {
                let key = category.as_str();
                let source_id = need(attributes, "source_id")?;
                match attributes.get(key) {
                    Some(value) => Ok(cv.validate_cross_field(
                        (Category::SourceId, source_id),
                        (*category, value),
                    )),
                    None if is_required(key) => Err(RuleError::MissingAttribute(key.to_owned())),
                    None => Ok(ValidationResult::pass(id, format!("{key} is not set"))),
                }
            }
            Self::LicenseText => {
                let license = need(attributes, "license")?;
                let license_id = match attributes.get("license_id") {
                    Some(license_id) => license_id.as_str(),
                    None => {
                        let source_id = need(attributes, "source_id")?;
                        let Some(entry) = cv.source_id_entry(source_id) else {
                            return Ok(ValidationResult::pass(
                                id,
                                "Unknown source_id, so no license to compare with",
                            ));
                        };
                        entry.license_id()
                    }
                };
                let Some(license_entry) = cv.license_entry(license_id) else {
                    return Ok(ValidationResult::pass(
                        id,
                        format!("license_id={license_id:?} is not in the CVs, so no text to compare with"),
                    ));
                };
                if license == license_entry.conditions {
                    Ok(ValidationResult::pass(id, "license text matches license_id"))
                } else {
                    Ok(ValidationResult::fail(
                        id,
                        ErrorKind::ValueInconsistentWithCvs,
                        format!(
                            "For license_id={license_id:?}, we should have license={:?}. \
                            Received license={license:?}",
                            license_entry.conditions
                        ),
                    ))
                }
            }
            Self::ContactFormat => {
                let contact = need(attributes, "contact")?;
                let invalid: Vec<&str> = contact
                    .split(';')
                    .map(str::trim)
                    .filter(|address| !EMAIL.is_match(address))
                    .collect();
                if invalid.is_empty() {
                    Ok(ValidationResult::pass(id, "contact holds valid email addresses"))
                } else {
                    format_fail(format!(
                        "contact must be one or more ';'-separated email addresses; \
                        invalid: {invalid:?}"
                    ))
                }
            }
            Self::FurtherInfoUrlFormat => {
                let url = need(attributes, "further_info_url")?;
                match url::Url::parse(url) {
                    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                        Ok(ValidationResult::pass(id, "further_info_url is a valid URL"))
                    }
                    Ok(parsed) => format_fail(format!(
                        "further_info_url={url:?} has scheme '{}', expected http(s)",
                        parsed.scheme()
                    )),
                    Err(err) => format_fail(format!("further_info_url={url:?} is not a URL: {err}")),
                }
            }
            Self::TrackingIdFormat => {
                let Some(tracking_id) = attributes.get("tracking_id") else {
                    return Ok(ValidationResult::pass(id, "tracking_id is not set"));
                };
                let uuid = tracking_id
                    .strip_prefix(TRACKING_ID_PREFIX)
                    .and_then(|uuid| uuid::Uuid::parse_str(uuid).ok());
                match uuid {
                    Some(uuid) if uuid.get_version_num() == 4 => {
                        Ok(ValidationResult::pass(id, "tracking_id is well-formed"))
                    }
                    _ => format_fail(format!(
                        "tracking_id={tracking_id:?} must be '{TRACKING_ID_PREFIX}' \
                        followed by a version 4 UUID"
                    )),
                }
            }
            Self::CreationDateFormat => {
                let Some(creation_date) = attributes.get("creation_date") else {
                    return Ok(ValidationResult::pass(id, "creation_date is not set"));
                };
                if CREATION_DATE.is_match(creation_date)
                    && NaiveDateTime::parse_from_str(creation_date, CREATION_DATE_FORMAT).is_ok()
                {
                    Ok(ValidationResult::pass(id, "creation_date is well-formed"))
                } else {
                    format_fail(format!(
                        "creation_date={creation_date:?} must be a valid UTC time \
                        of the form YYYY-MM-DDThh:mm:ssZ"
                    ))
                }
            }
            Self::ConventionsFormat => {
                let Some(conventions) = attributes.get("Conventions") else {
                    return Ok(ValidationResult::pass(id, "Conventions is not set"));
                };
                if CONVENTIONS.is_match(conventions) {
                    Ok(ValidationResult::pass(id, "Conventions is well-formed"))
                } else {
                    format_fail(format!(
                        "Conventions={conventions:?} must be of the form 'CF-<major>.<minor>'"
                    ))
                }
            }
            Self::VariableIdCharacters => {
                let variable_id = need(attributes, "variable_id")?;
                if VARIABLE_ID.is_match(variable_id) {
                    Ok(ValidationResult::pass(id, "variable_id has only valid characters"))
                } else {
                    format_fail(format!(
                        "variable_id={variable_id:?} may only contain [a-zA-Z0-9_]"
                    ))
                }
            }
            Self::CommentContent => {
                let Some(comment) = attributes.get("comment") else {
                    return Ok(ValidationResult::pass(id, "comment is not set"));
                };
                if comment.trim().is_empty() {
                    format_fail("comment is blank".to_owned())
                } else if comment.chars().count() > MAX_COMMENT_LEN {
                    format_fail(format!(
                        "comment is longer than {MAX_COMMENT_LEN} characters"
                    ))
                } else if comment
                    .chars()
                    .any(|chr| chr.is_control() && chr != '\n' && chr != '\t')
                {
                    format_fail("comment contains control characters".to_owned())
                } else {
                    Ok(ValidationResult::pass(id, "comment is fine"))
                }
            }
            Self::ExternalVariables => {
                let Some(external) = attributes.get("external_variables") else {
                    return Ok(ValidationResult::pass(id, "external_variables is not set"));
                };
                let mut seen = BTreeSet::new();
                for name in external.split_whitespace() {
                    if !IDENTIFIER.is_match(name) {
                        return format_fail(format!(
                            "external_variables entry {name:?} is not a valid variable name"
                        ));
                    }
                    if !seen.insert(name) {
                        return Ok(ValidationResult::fail(
                            id,
                            ErrorKind::NotUnique,
                            format!("external_variables lists {name:?} more than once"),
                        ));
                    }
                }
                if let Some(variable_id) = attributes.get("variable_id") {
                    if seen.contains(variable_id.as_str()) {
                        return Ok(ValidationResult::fail(
                            id,
                            ErrorKind::DatasetInconsistency,
                            format!("variable_id={variable_id:?} can not also be an external variable"),
                        ));
                    }
                }
                if seen.is_empty() {
                    return Err(RuleError::Internal(
                        "external_variables is set but lists no names".to_owned(),
                    ));
                }
                Ok(ValidationResult::pass(id, "external_variables are well-formed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cvs::test_support::test_cvs, model::metadata::test_support::valid_attributes,
        model::validation_result::Status,
    };

    fn run_with(rule: Rule, key: &str, value: &str) -> ValidationResult {
        let mut attributes = valid_attributes();
        attributes.insert(key.to_owned(), value.to_owned());
        rule.run(&attributes, &test_cvs())
    }

    #[test]
    fn test_all_pass_on_valid() {
        let results = run_all(&valid_attributes(), &test_cvs());
        assert_eq!(results.len(), RULES.len());
        assert_eq!(results.summary(), Status::Pass, "{results}");
    }

    #[test]
    fn test_rule_ids_are_unique() {
        let ids: BTreeSet<String> = RULES.iter().map(Rule::id).collect();
        assert_eq!(ids.len(), RULES.len());
    }

    #[test]
    fn test_one_failure_does_not_stop_others() {
        let mut attributes = valid_attributes();
        attributes.insert("contact".to_owned(), "not an email".to_owned());
        attributes.insert("tracking_id".to_owned(), "hdl:21.14100/nope".to_owned());
        let results = run_all(&attributes, &test_cvs());
        assert_eq!(results.len(), RULES.len());
        let failed: BTreeSet<&str> = results.failures().map(ValidationResult::rule).collect();
        assert!(failed.contains("contact_format"));
        assert!(failed.contains("tracking_id_format"));
        // the contact also differs from the one the source_id prescribes
        assert!(failed.contains("cross_field.source_id.contact"));
    }

    #[test]
    fn test_missing_attribute_is_named() {
        let mut attributes = valid_attributes();
        attributes.remove("contact");
        let res = Rule::ContactFormat.run(&attributes, &test_cvs());
        assert_eq!(res.status(), Status::Fail);
        assert_eq!(res.error_kind(), Some(ErrorKind::MissingAttribute));
        assert!(res.message().contains("'contact'"));
    }

    #[test]
    fn test_tracking_id() {
        let v1 = "hdl:21.14100/c232cd0c-6f60-11ee-b962-0242ac120002";
        assert_eq!(
            run_with(Rule::TrackingIdFormat, "tracking_id", v1).status(),
            Status::Fail
        );
        assert_eq!(
            run_with(
                Rule::TrackingIdFormat,
                "tracking_id",
                &crate::tools::generate_tracking_id()
            )
            .status(),
            Status::Pass
        );
    }

    #[test]
    fn test_creation_date() {
        for (value, status) in [
            ("2024-08-01T12:00:00Z", Status::Pass),
            ("2024-08-01 12:00:00", Status::Fail),
            ("2024-13-01T12:00:00Z", Status::Fail),
        ] {
            assert_eq!(
                run_with(Rule::CreationDateFormat, "creation_date", value).status(),
                status,
                "{value}"
            );
        }
    }

    #[test]
    fn test_conventions() {
        for (value, status) in [
            ("CF-1.7", Status::Pass),
            ("CF-1.10", Status::Pass),
            ("CF1.7", Status::Fail),
            ("CF-1.7 UGRID-1.0", Status::Fail),
        ] {
            assert_eq!(
                run_with(Rule::ConventionsFormat, "Conventions", value).status(),
                status,
                "{value}"
            );
        }
    }

    #[test]
    fn test_variable_id_characters() {
        assert_eq!(
            run_with(Rule::VariableIdCharacters, "variable_id", "co2-mass").status(),
            Status::Fail
        );
    }

    #[test]
    fn test_comment() {
        assert_eq!(
            run_with(Rule::CommentContent, "comment", "  ").status(),
            Status::Fail
        );
        assert_eq!(
            run_with(Rule::CommentContent, "comment", "ok\u{7}").status(),
            Status::Fail
        );
        assert_eq!(
            run_with(Rule::CommentContent, "comment", "Line one\nLine two").status(),
            Status::Pass
        );
    }

    #[test]
    fn test_external_variables() {
        assert_eq!(
            run_with(Rule::ExternalVariables, "external_variables", "areacella sftlf").status(),
            Status::Pass
        );
        let dup = run_with(Rule::ExternalVariables, "external_variables", "areacella areacella");
        assert_eq!(dup.error_kind(), Some(ErrorKind::NotUnique));
        let own = run_with(
            Rule::ExternalVariables,
            "external_variables",
            "mole_fraction_of_carbon_dioxide_in_air",
        );
        assert_eq!(own.status(), Status::Fail);
        let empty = run_with(Rule::ExternalVariables, "external_variables", " ");
        assert_eq!(empty.error_kind(), Some(ErrorKind::RuleError));
    }

    #[test]
    fn test_license_text() {
        let res = run_with(Rule::LicenseText, "license", "All rights reserved");
        assert_eq!(res.status(), Status::Fail);
        assert_eq!(res.error_kind(), Some(ErrorKind::ValueInconsistentWithCvs));
    }
}
