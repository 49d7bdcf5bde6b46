// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use typed_builder::TypedBuilder;

use crate::cvs::CvVersion;

use super::{
    metadata::{Attributes, DatasetMetadata},
    validation_result::{Status, ValidationResult, ValidationResults},
};

#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    NotValidated,
    Passed,
    Failed,
}

impl ValidationStatus {
    /// Warnings do not fail an entry.
    #[must_use]
    pub const fn from_status(status: Status) -> Self {
        match status {
            Status::Pass | Status::Warning => Self::Passed,
            Status::Fail => Self::Failed,
        }
    }
}

/// The state of an entry before it got revised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub revision: u32,
    pub timestamp: DateTime<Utc>,
    pub validation_status: ValidationStatus,
    pub sha256: Option<String>,
    #[serde(default)]
    pub cv_version: Option<CvVersion>,
    #[serde(default)]
    pub validation_results: ValidationResults,
}

/// The database record of one file.
///
/// Records are never changed in place;
/// a changed validation status or file hash produces a new revision,
/// see [`Self::revise`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct DatabaseEntry {
    pub filepath: PathBuf,
    #[builder(default)]
    pub sha256: Option<String>,
    #[builder(default)]
    pub master_id: Option<String>,
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    #[builder(default)]
    pub validation_status: ValidationStatus,
    /// Only present if the file holds valid metadata
    #[builder(default)]
    pub metadata: Option<DatasetMetadata>,
    /// The global attributes as found in the file
    #[builder(default)]
    #[serde(default)]
    pub attributes: Attributes,
    #[builder(default)]
    pub cv_version: Option<CvVersion>,
    #[builder(default)]
    #[serde(default)]
    pub validation_results: ValidationResults,
    #[builder(default)]
    #[serde(default)]
    pub history: Vec<HistoryItem>,
    #[builder(default)]
    #[serde(default)]
    pub revision: u32,
    #[builder(default)]
    pub doi: Option<String>,
    #[builder(default)]
    pub comment: Option<String>,
    #[builder(default)]
    pub publication_status: Option<String>,
}

impl DatabaseEntry {
    /// An entry for a file that could not be processed at all.
    #[must_use]
    pub fn failed(filepath: &Path, result: ValidationResult) -> Self {
        Self::builder()
            .filepath(filepath.to_path_buf())
            .validation_status(ValidationStatus::Failed)
            .validation_results(std::iter::once(result).collect())
            .build()
    }

    #[must_use]
    pub fn tracking_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(DatasetMetadata::tracking_id)
            .or_else(|| self.attributes.get("tracking_id").map(String::as_str))
    }

    /// Whether `other` records the same file state,
    /// in which case no new revision is needed.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.validation_status == other.validation_status && self.sha256 == other.sha256
    }

    fn history_item(&self) -> HistoryItem {
        HistoryItem {
            revision: self.revision,
            timestamp: self.timestamp,
            validation_status: self.validation_status,
            sha256: self.sha256.clone(),
            cv_version: self.cv_version.clone(),
            validation_results: self.validation_results.clone(),
        }
    }

    /// Makes `self` the next revision of `previous`.
    ///
    /// The state of `previous` moves to the history;
    /// provenance fields not set on `self` are taken over.
    #[must_use]
    pub fn revise(mut self, previous: &Self) -> Self {
        self.revision = previous.revision + 1;
        self.history = previous.history.clone();
        self.history.push(previous.history_item());
        self.doi = self.doi.or_else(|| previous.doi.clone());
        self.comment = self.comment.or_else(|| previous.comment.clone());
        self.publication_status = self
            .publication_status
            .or_else(|| previous.publication_status.clone());
        self
    }

    /// A copy with a new status and results, stamped now.
    #[must_use]
    pub fn with_validation(&self, results: ValidationResults) -> Self {
        Self {
            validation_status: ValidationStatus::from_status(results.summary()),
            validation_results: results,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::validation_result::ErrorKind;

    fn entry(status: ValidationStatus, sha256: &str) -> DatabaseEntry {
        DatabaseEntry::builder()
            .filepath(PathBuf::from("/data/co2.nc"))
            .sha256(Some(sha256.to_owned()))
            .validation_status(status)
            .build()
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ValidationStatus::NotValidated).unwrap(),
            r#""not_validated""#
        );
        assert_eq!(ValidationStatus::Failed.to_string(), "failed");
        assert_eq!(
            ValidationStatus::from_status(Status::Warning),
            ValidationStatus::Passed
        );
    }

    #[test]
    fn test_revise() {
        let mut first = entry(ValidationStatus::Passed, "aaa");
        first.doi = Some("10.1234/abc".to_owned());
        first.cv_version = Some(CvVersion {
            source: "gh:v6.5.0".to_owned(),
            fingerprint: "0123456789abcdef".to_owned(),
        });
        first.validation_results =
            std::iter::once(ValidationResult::pass("file_readable", "ok")).collect();
        let mut second = entry(ValidationStatus::Failed, "bbb");
        second.validation_results = std::iter::once(ValidationResult::fail(
            "database.sha256_matches",
            ErrorKind::HashMismatch,
            "changed",
        ))
        .collect();
        let second = second.revise(&first);
        assert_eq!(second.revision, 1);
        assert_eq!(second.history.len(), 1);
        let item = &second.history[0];
        assert_eq!(item.revision, 0);
        assert_eq!(item.sha256.as_deref(), Some("aaa"));
        assert_eq!(item.validation_status, ValidationStatus::Passed);
        assert_eq!(item.cv_version, first.cv_version);
        assert_eq!(item.validation_results, first.validation_results);
        assert_ne!(item.validation_results, second.validation_results);
        assert_eq!(second.doi.as_deref(), Some("10.1234/abc"));
        assert!(!second.same_state(&first));
        assert!(first.same_state(&entry(ValidationStatus::Passed, "aaa")));

        let third = entry(ValidationStatus::Passed, "ccc").revise(&second);
        assert_eq!(third.revision, 2);
        assert_eq!(third.history.len(), 2);
        assert_eq!(third.history[1].validation_results, second.validation_results);
    }

    #[test]
    fn test_history_without_results_still_reads() {
        let item: HistoryItem = serde_json::from_str(
            r#"{"revision": 0, "timestamp": "2024-01-01T00:00:00Z", "validation_status": "passed", "sha256": null}"#,
        )
        .unwrap();
        assert!(item.validation_results.is_empty());
        assert!(item.cv_version.is_none());
    }

    #[test]
    fn test_failed_and_with_validation() {
        let failed = DatabaseEntry::failed(
            Path::new("/data/broken.nc"),
            ValidationResult::fail("file_readable", ErrorKind::Unreadable, "nope"),
        );
        assert_eq!(failed.validation_status, ValidationStatus::Failed);
        assert_eq!(failed.tracking_id(), None);

        let passed = failed.with_validation(ValidationResults::new());
        assert_eq!(passed.validation_status, ValidationStatus::Passed);
        assert_eq!(failed.validation_status, ValidationStatus::Failed);
    }
}
