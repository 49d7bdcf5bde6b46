// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single validation rule.
///
/// The order is by severity,
/// so the summary of many results is their maximum.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Pass,
    Warning,
    Fail,
}

/// Classifies why a rule did not pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// A value is not one of the values the CVs allow.
    NotInCvs,
    /// A value contradicts another value, according to the CVs.
    ValueInconsistentWithCvs,
    /// A required attribute is not present.
    MissingAttribute,
    /// A value does not have the required format.
    InvalidFormat,
    /// Metadata contradicts the content of the data.
    DatasetInconsistency,
    /// Two sources of the same value disagree.
    Discrepancy,
    /// The file is not where the DRS says it should be.
    DrsMismatch,
    /// The file path does not follow the DRS at all.
    DrsParse,
    /// Reported by the CF-checker.
    CfChecker,
    /// A value that has to be unique is not.
    NotUnique,
    /// The recorded hash does not match the file.
    HashMismatch,
    /// The file could not be read.
    Unreadable,
    /// The rule itself failed to run.
    RuleError,
}

/// The outcome of one validation rule applied to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    rule: String,
    target: String,
    status: Status,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
}

impl ValidationResult {
    #[must_use]
    pub fn pass(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            target: String::new(),
            status: Status::Pass,
            message: message.into(),
            error_kind: None,
        }
    }

    #[must_use]
    pub fn warning(rule: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            target: String::new(),
            status: Status::Warning,
            message: message.into(),
            error_kind: Some(kind),
        }
    }

    #[must_use]
    pub fn fail(rule: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            target: String::new(),
            status: Status::Fail,
            message: message.into(),
            error_kind: Some(kind),
        }
    }

    /// Sets what the rule was applied to,
    /// for example a file path.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    #[must_use]
    pub fn rule(&self) -> &str {
        &self.rule
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    #[must_use]
    pub fn is_fail(&self) -> bool {
        self.status == Status::Fail
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status, self.rule)?;
        if let Some(kind) = self.error_kind {
            write!(f, " ({kind})")?;
        }
        if !self.target.is_empty() {
            write!(f, " '{}'", self.target)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// All results gathered for one target.
///
/// Never collapsed into a single status,
/// unless [`Self::summary`] is asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationResults(Vec<ValidationResult>);

impl ValidationResults {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, result: ValidationResult) {
        self.0.push(result);
    }

    /// The most severe status of all results,
    /// or [`Status::Pass`] if there are none.
    #[must_use]
    pub fn summary(&self) -> Status {
        self.0
            .iter()
            .map(ValidationResult::status)
            .max()
            .unwrap_or(Status::Pass)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationResult> {
        self.0.iter()
    }

    pub fn with_status(&self, status: Status) -> impl Iterator<Item = &ValidationResult> {
        self.0.iter().filter(move |res| res.status == status)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.with_status(Status::Fail)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationResult> {
        self.with_status(Status::Warning)
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sets the target on all results that do not have one yet.
    #[must_use]
    pub fn with_target(self, target: &str) -> Self {
        self.0
            .into_iter()
            .map(|res| {
                if res.target.is_empty() {
                    res.with_target(target)
                } else {
                    res
                }
            })
            .collect()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<ValidationResult> {
        self.0
    }
}

impl From<Vec<ValidationResult>> for ValidationResults {
    fn from(value: Vec<ValidationResult>) -> Self {
        Self(value)
    }
}

impl FromIterator<ValidationResult> for ValidationResults {
    fn from_iter<T: IntoIterator<Item = ValidationResult>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<ValidationResult> for ValidationResults {
    fn extend<T: IntoIterator<Item = ValidationResult>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ValidationResults {
    type Item = ValidationResult;
    type IntoIter = std::vec::IntoIter<ValidationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValidationResults {
    type Item = &'a ValidationResult;
    type IntoIter = std::slice::Iter<'a, ValidationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ValidationResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for res in &self.0 {
            writeln!(f, "{res}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_is_most_severe() {
        let mut results = ValidationResults::new();
        assert_eq!(results.summary(), Status::Pass);
        results.push(ValidationResult::pass("a", "ok"));
        results.push(ValidationResult::warning("b", ErrorKind::Discrepancy, "hmm"));
        assert_eq!(results.summary(), Status::Warning);
        results.push(ValidationResult::fail("c", ErrorKind::NotInCvs, "bad"));
        assert_eq!(results.summary(), Status::Fail);
        assert_eq!(results.len(), 3);
        assert_eq!(results.failures().count(), 1);
    }

    #[test]
    fn test_with_target_keeps_existing() {
        let results: ValidationResults = vec![
            ValidationResult::pass("a", "ok"),
            ValidationResult::pass("b", "ok").with_target("other"),
        ]
        .into();
        let results = results.with_target("file.nc");
        let targets: Vec<_> = results.iter().map(ValidationResult::target).collect();
        assert_eq!(targets, vec!["file.nc", "other"]);
    }

    #[test]
    fn test_serialization_is_snake_case() {
        let res = ValidationResult::fail("rule", ErrorKind::MissingAttribute, "msg");
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["error_kind"], "missing_attribute");
    }
}
