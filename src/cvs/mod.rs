// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The input4MIPs controlled vocabularies (CVs).
//!
//! A [`ControlledVocabularySet`] is immutable once loaded;
//! loading again creates a new instance.

pub mod activity_id;
pub mod loading;
pub mod raw;
pub mod source_id;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::{
    drs::{self, DataReferenceSyntax},
    model::validation_result::{ErrorKind, ValidationResult},
    structured_content,
};
use activity_id::ActivityIdEntry;
use raw::{LicenseValues, SimpleVocabulary};
use source_id::SourceIdEntry;

pub use loading::{CvLoader, CvSource};

/// The name of the activity that is assumed
/// if the CVs do not say otherwise.
pub const DEFAULT_ACTIVITY_ID: &str = "input4MIPs";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("No CV source given; set it in the settings or through the environment")]
    NoSource,
    #[error("Invalid CV source reference '{0}'")]
    InvalidSource(String),
    #[error("CV source '{source_ref}' is unavailable (file '{file}') and nothing is cached: {reason}")]
    SourceUnavailable {
        source_ref: String,
        file: String,
        reason: String,
    },
    #[error("Failed to parse CV file '{file}' from '{source_ref}': {error}")]
    Parse {
        source_ref: String,
        file: String,
        #[source]
        error: structured_content::Error,
    },
    #[error("Invalid DRS template in CVs from '{source_ref}': {error}")]
    DrsTemplate {
        source_ref: String,
        #[source]
        error: drs::TemplateError,
    },
    #[error("Invalid source_id pattern '{pattern}' for activity_id '{activity_id}': {error}")]
    SourceIdPattern {
        activity_id: String,
        pattern: String,
        #[source]
        error: regex::Error,
    },
    #[error("Failed to create the CV cache directory '{0}': {1}")]
    Cache(PathBuf, #[source] std::io::Error),
    #[error("Failed to set up the downloader: {0}")]
    Downloader(#[from] reqwest::Error),
}

/// A category of values that the CVs restrict.
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
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    ActivityId,
    SourceId,
    InstitutionId,
    LicenseId,
    MipEra,
    TargetMip,
    DatasetCategory,
    Product,
    Frequency,
    GridLabel,
    Realm,
    Contact,
    FurtherInfoUrl,
    SourceVersion,
}

impl Category {
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Whether values of this category come from an optional,
    /// list-like CV file of their own.
    #[must_use]
    pub const fn has_simple_vocabulary(self) -> bool {
        matches!(
            self,
            Self::MipEra
                | Self::TargetMip
                | Self::DatasetCategory
                | Self::Product
                | Self::Frequency
                | Self::GridLabel
                | Self::Realm
        )
    }

    /// The name of the optional CV file holding the vocabulary of this category.
    #[must_use]
    pub fn simple_vocabulary_filename(self) -> Option<String> {
        self.has_simple_vocabulary()
            .then(|| format!("input4MIPs_{}.json", self.as_str()))
    }
}

/// Identifies the exact CV content something was validated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CvVersion {
    /// Where the CVs were loaded from.
    pub source: String,
    /// SHA-256 over all the raw CV files.
    pub fingerprint: String,
}

impl fmt::Display for CvVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.fingerprint.get(..12).unwrap_or(&self.fingerprint);
        write!(f, "{}@{short}", self.source)
    }
}

/// The raw content of the CV files, by file name.
pub type RawCvFiles = BTreeMap<String, Vec<u8>>;

/// Rule identifier of the check of a single value against the CVs.
#[must_use]
pub fn value_rule_id(category: Category) -> String {
    format!("value_in_cvs.{category}")
}

/// Rule identifier of the check of two related values against the CVs.
#[must_use]
pub fn cross_field_rule_id(category_a: Category, category_b: Category) -> String {
    format!("cross_field.{category_a}.{category_b}")
}

#[derive(Debug, Clone)]
pub struct ControlledVocabularySet {
    version: CvVersion,
    activity_ids: BTreeMap<String, ActivityIdEntry>,
    institution_ids: BTreeSet<String>,
    licenses: BTreeMap<String, LicenseValues>,
    source_ids: BTreeMap<String, SourceIdEntry>,
    simple: BTreeMap<Category, BTreeSet<String>>,
    drs: DataReferenceSyntax,
    drs_examples: (Option<String>, Option<String>),
}

fn parse<P: serde::de::DeserializeOwned>(
    source_ref: &str,
    file: &str,
    content: &[u8],
) -> Result<P, LoadError> {
    structured_content::parse_file_content(file, content).map_err(|error| LoadError::Parse {
        source_ref: source_ref.to_owned(),
        file: file.to_owned(),
        error,
    })
}

fn fingerprint(files: &RawCvFiles) -> String {
    let mut hasher = Sha256::new();
    for (name, content) in files {
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(content);
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

impl ControlledVocabularySet {
    /// Assembles a CV set from the raw content of the CV files.
    ///
    /// # Errors
    ///
    /// - a required file is missing
    /// - a file does not parse into the expected structure
    /// - the DRS templates or `source_id` patterns are malformed
    pub fn from_raw(source_ref: &str, files: &RawCvFiles) -> Result<Self, LoadError> {
        let required = |file: &str| {
            files
                .get(file)
                .ok_or_else(|| LoadError::SourceUnavailable {
                    source_ref: source_ref.to_owned(),
                    file: file.to_owned(),
                    reason: "file is missing".to_owned(),
                })
        };

        let activity_raw: raw::ActivityIdFile = parse(
            source_ref,
            raw::ACTIVITY_ID_FILENAME,
            required(raw::ACTIVITY_ID_FILENAME)?,
        )?;
        let activity_ids: BTreeMap<String, ActivityIdEntry> = activity_raw
            .activity_id
            .into_iter()
            .map(|(id, values)| ActivityIdEntry::new(id.clone(), values).map(|entry| (id, entry)))
            .collect::<Result<_, LoadError>>()?;

        let institution_raw: raw::InstitutionIdFile = parse(
            source_ref,
            raw::INSTITUTION_ID_FILENAME,
            required(raw::INSTITUTION_ID_FILENAME)?,
        )?;
        let license_raw: raw::LicenseFile = parse(
            source_ref,
            raw::LICENSE_FILENAME,
            required(raw::LICENSE_FILENAME)?,
        )?;
        let source_raw: raw::SourceIdFile = parse(
            source_ref,
            raw::SOURCE_ID_FILENAME,
            required(raw::SOURCE_ID_FILENAME)?,
        )?;
        let source_ids: BTreeMap<String, SourceIdEntry> = source_raw
            .source_id
            .into_iter()
            .map(|(id, values)| (id.clone(), SourceIdEntry::new(id, values)))
            .collect();

        let drs_raw: raw::DrsFile =
            parse(source_ref, raw::DRS_FILENAME, required(raw::DRS_FILENAME)?)?;
        let drs = DataReferenceSyntax::new(
            &drs_raw.drs.directory_path_template,
            &drs_raw.drs.filename_template,
        )
        .map_err(|error| LoadError::DrsTemplate {
            source_ref: source_ref.to_owned(),
            error,
        })?;

        let mut simple = BTreeMap::new();
        for category in Category::iter() {
            let Some(file) = category.simple_vocabulary_filename() else {
                continue;
            };
            let Some(content) = files.get(&file) else {
                tracing::warn!("No CV file '{file}'; '{category}' is unconstrained");
                continue;
            };
            let mut vocab_file: raw::SimpleVocabularyFile = parse(source_ref, &file, content)?;
            let values = vocab_file
                .remove(category.as_str())
                .map(SimpleVocabulary::into_values)
                .unwrap_or_default();
            simple.insert(category, values.into_iter().collect());
        }

        let version = CvVersion {
            source: source_ref.to_owned(),
            fingerprint: fingerprint(files),
        };
        tracing::info!("Loaded CVs {version}");

        Ok(Self {
            version,
            activity_ids,
            institution_ids: institution_raw.institution_id.into_iter().collect(),
            licenses: license_raw.license,
            source_ids,
            simple,
            drs,
            drs_examples: (
                drs_raw.drs.directory_path_example,
                drs_raw.drs.filename_example,
            ),
        })
    }

    #[must_use]
    pub const fn version(&self) -> &CvVersion {
        &self.version
    }

    #[must_use]
    pub const fn drs(&self) -> &DataReferenceSyntax {
        &self.drs
    }

    #[must_use]
    pub fn source_id_entry(&self, source_id: &str) -> Option<&SourceIdEntry> {
        self.source_ids.get(source_id)
    }

    #[must_use]
    pub fn activity_id_entry(&self, activity_id: &str) -> Option<&ActivityIdEntry> {
        self.activity_ids.get(activity_id)
    }

    pub fn activity_id_entries(&self) -> impl Iterator<Item = &ActivityIdEntry> {
        self.activity_ids.values()
    }

    #[must_use]
    pub fn license_entry(&self, license_id: &str) -> Option<&LicenseValues> {
        self.licenses.get(license_id)
    }

    /// The permitted values of a category,
    /// or `None` if the CVs do not restrict it.
    #[must_use]
    pub fn values(&self, category: Category) -> Option<BTreeSet<&str>> {
        let values: BTreeSet<&str> = match category {
            Category::ActivityId => self.activity_ids.keys().map(String::as_str).collect(),
            Category::SourceId => self.source_ids.keys().map(String::as_str).collect(),
            Category::InstitutionId => self.institution_ids.iter().map(String::as_str).collect(),
            Category::LicenseId => self.licenses.keys().map(String::as_str).collect(),
            Category::MipEra
            | Category::TargetMip
            | Category::DatasetCategory
            | Category::Product
            | Category::Frequency
            | Category::GridLabel
            | Category::Realm => self
                .simple
                .get(&category)?
                .iter()
                .map(String::as_str)
                .collect(),
            Category::Contact | Category::FurtherInfoUrl | Category::SourceVersion => {
                return None
            }
        };
        Some(values)
    }

    /// Checks that `value` is one of the permitted values of `category`.
    #[must_use]
    pub fn validate_value(&self, category: Category, value: &str) -> ValidationResult {
        let rule = value_rule_id(category);
        match self.values(category) {
            None => ValidationResult::pass(
                rule,
                format!("{category}={value:?} is not constrained by the CVs"),
            ),
            Some(values) if values.contains(value) => {
                ValidationResult::pass(rule, format!("{category}={value:?} is in the CVs"))
            }
            Some(values) => ValidationResult::fail(
                rule,
                ErrorKind::NotInCvs,
                format!(
                    "Received {category}={value:?}. \
                    This is not in the available CV values: {values:?}. \
                    CVs loaded from: {}",
                    self.version
                ),
            ),
        }
    }

    /// Checks a compound constraint between two values.
    ///
    /// The order of the two pairs does not matter.
    /// Pairs of categories the CVs define no relation for pass.
    #[must_use]
    pub fn validate_cross_field(
        &self,
        (category_a, value_a): (Category, &str),
        (category_b, value_b): (Category, &str),
    ) -> ValidationResult {
        let rule = cross_field_rule_id(category_a, category_b);
        match (category_a, category_b) {
            (Category::ActivityId, Category::SourceId) => {
                self.check_activity_source(rule, value_a, value_b)
            }
            (Category::SourceId, Category::ActivityId) => {
                self.check_activity_source(rule, value_b, value_a)
            }
            (Category::SourceId, other) if SourceIdEntry::determines(other) => {
                self.check_source_determined(rule, value_a, other, value_b)
            }
            (other, Category::SourceId) if SourceIdEntry::determines(other) => {
                self.check_source_determined(rule, value_b, other, value_a)
            }
            _ => ValidationResult::pass(
                rule,
                format!("The CVs define no compound constraint between {category_a} and {category_b}"),
            ),
        }
    }

    fn check_activity_source(
        &self,
        rule: String,
        activity_id: &str,
        source_id: &str,
    ) -> ValidationResult {
        let inconsistent = |reason: String| {
            ValidationResult::fail(
                rule.clone(),
                ErrorKind::ValueInconsistentWithCvs,
                format!(
                    "activity_id={activity_id:?} and source_id={source_id:?} \
                    are inconsistent with the CVs: {reason}"
                ),
            )
        };
        let Some(activity) = self.activity_ids.get(activity_id) else {
            return inconsistent(format!("activity_id={activity_id:?} is not in the CVs"));
        };
        let Some(source) = self.source_ids.get(source_id) else {
            return inconsistent(format!("source_id={source_id:?} is not in the CVs"));
        };
        if let Some(declared) = source.activity_id() {
            if declared != activity_id {
                return inconsistent(format!(
                    "For source_id={source_id:?}, we should have activity_id={declared:?}"
                ));
            }
        }
        if !activity.accepts_source_id(source_id) {
            return inconsistent(format!(
                "activity_id={activity_id:?} requires source_id to match one of {:?}",
                activity.source_id_patterns().collect::<Vec<_>>()
            ));
        }
        ValidationResult::pass(
            rule,
            format!("activity_id={activity_id:?} and source_id={source_id:?} are consistent"),
        )
    }

    fn check_source_determined(
        &self,
        rule: String,
        source_id: &str,
        category: Category,
        value: &str,
    ) -> ValidationResult {
        let Some(source) = self.source_ids.get(source_id) else {
            return ValidationResult::fail(
                rule,
                ErrorKind::ValueInconsistentWithCvs,
                format!(
                    "source_id={source_id:?} is not in the CVs, \
                    so {category}={value:?} can not be consistent with it"
                ),
            );
        };
        match source.determined_value(category) {
            Some(expected) if expected != value => ValidationResult::fail(
                rule,
                ErrorKind::ValueInconsistentWithCvs,
                format!(
                    "For source_id={source_id:?}, we should have {category}={expected:?}. \
                    Received {category}={value:?}"
                ),
            ),
            _ => ValidationResult::pass(
                rule,
                format!("{category}={value:?} is consistent with source_id={source_id:?}"),
            ),
        }
    }

    /// Checks the CVs for internal consistency.
    ///
    /// Returns one message per problem found.
    #[must_use]
    pub fn self_check(&self) -> Vec<String> {
        let mut problems = vec![];
        for activity in self.activity_ids.values() {
            if url::Url::parse(activity.url()).is_err() {
                problems.push(format!(
                    "activity_id {:?} has an invalid URL: {:?}",
                    activity.id(),
                    activity.url()
                ));
            }
        }
        for source in self.source_ids.values() {
            let id = source.id();
            if !self.institution_ids.contains(source.institution_id()) {
                problems.push(format!(
                    "source_id {id:?} has unknown institution_id {:?}",
                    source.institution_id()
                ));
            }
            if !self.licenses.contains_key(source.license_id()) {
                problems.push(format!(
                    "source_id {id:?} has unknown license_id {:?}",
                    source.license_id()
                ));
            }
            if let Some(activity_id) = source.activity_id() {
                if !self.activity_ids.contains_key(activity_id) {
                    problems.push(format!(
                        "source_id {id:?} has unknown activity_id {activity_id:?}"
                    ));
                }
            }
            if let Some(mip_eras) = self.simple.get(&Category::MipEra) {
                if !mip_eras.contains(source.mip_era()) {
                    problems.push(format!(
                        "source_id {id:?} has unknown mip_era {:?}",
                        source.mip_era()
                    ));
                }
            }
        }
        if let (Some(dir), Some(file)) = &self.drs_examples {
            let example = PathBuf::from(dir).join(file);
            if let Err(err) = self.drs.parse_path(&example) {
                problems.push(format!("The DRS example does not fit the DRS templates: {err}"));
            }
        }
        problems
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{raw_test_cvs, test_cvs, SOURCE_ID};
    use super::*;
    use crate::model::validation_result::Status;

    #[test]
    fn test_category_names() {
        assert_eq!(Category::ActivityId.as_str(), "activity_id");
        assert_eq!(
            Category::FurtherInfoUrl.to_string(),
            "further_info_url".to_owned()
        );
        assert_eq!(
            Category::MipEra.simple_vocabulary_filename().as_deref(),
            Some("input4MIPs_mip_era.json")
        );
        assert_eq!(Category::SourceId.simple_vocabulary_filename(), None);
    }

    #[test]
    fn test_validate_value() {
        let cvs = test_cvs();
        assert_eq!(
            cvs.validate_value(Category::SourceId, SOURCE_ID).status(),
            Status::Pass
        );
        let res = cvs.validate_value(Category::InstitutionId, "XX");
        assert_eq!(res.status(), Status::Fail);
        assert_eq!(res.error_kind(), Some(ErrorKind::NotInCvs));
        assert!(res.message().contains("\"XX\""));
        // no realm CV file loaded
        assert_eq!(
            cvs.validate_value(Category::Realm, "anything").status(),
            Status::Pass
        );
        assert_eq!(
            cvs.validate_value(Category::MipEra, "CMIP7").status(),
            Status::Fail
        );
    }

    #[test]
    fn test_all_listed_activity_source_pairs_pass() {
        let cvs = test_cvs();
        let pairs = [
            ("input4MIPs", "CR-CMIP-0-2-0"),
            ("GHGConcentrations", "CR-CMIP-0-2-0"),
            ("input4MIPs", "PCMDI-AMIP-1-1-9"),
        ];
        for (activity_id, source_id) in pairs {
            let res = cvs.validate_cross_field(
                (Category::ActivityId, activity_id),
                (Category::SourceId, source_id),
            );
            assert_eq!(res.status(), Status::Pass, "{res}");
        }
    }

    #[test]
    fn test_activity_pattern_violation_names_both() {
        let cvs = test_cvs();
        for (activity_id, source_id) in [
            ("GHGConcentrations", "XX-1-0"),
            ("GHGConcentrations", "PCMDI-AMIP-1-1-9"),
            ("unknown", "CR-CMIP-0-2-0"),
        ] {
            let res = cvs.validate_cross_field(
                (Category::SourceId, source_id),
                (Category::ActivityId, activity_id),
            );
            assert_eq!(res.status(), Status::Fail);
            assert_eq!(res.error_kind(), Some(ErrorKind::ValueInconsistentWithCvs));
            assert!(res.message().contains(activity_id), "{res}");
            assert!(res.message().contains(source_id), "{res}");
        }
    }

    #[test]
    fn test_source_determined_values() {
        let cvs = test_cvs();
        let ok = cvs.validate_cross_field(
            (Category::SourceId, SOURCE_ID),
            (Category::InstitutionId, "CR"),
        );
        assert_eq!(ok.status(), Status::Pass);
        let bad = cvs.validate_cross_field(
            (Category::InstitutionId, "PCMDI"),
            (Category::SourceId, SOURCE_ID),
        );
        assert_eq!(bad.status(), Status::Fail);
        assert!(bad.message().contains("we should have institution_id=\"CR\""));
        assert!(bad.message().contains("Received institution_id=\"PCMDI\""));
    }

    #[test]
    fn test_unrelated_pair_passes() {
        let cvs = test_cvs();
        let res = cvs.validate_cross_field((Category::Realm, "ocean"), (Category::GridLabel, "gn"));
        assert_eq!(res.status(), Status::Pass);
    }

    #[test]
    fn test_version_depends_on_content() {
        let mut files = raw_test_cvs();
        let first = ControlledVocabularySet::from_raw("a", &files).unwrap();
        let again = ControlledVocabularySet::from_raw("a", &files).unwrap();
        assert_eq!(first.version(), again.version());
        files.insert(
            raw::INSTITUTION_ID_FILENAME.to_owned(),
            br#"{"institution_id": ["CR"]}"#.to_vec(),
        );
        let changed = ControlledVocabularySet::from_raw("a", &files).unwrap();
        assert_ne!(first.version(), changed.version());
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let mut files = raw_test_cvs();
        files.remove(raw::LICENSE_FILENAME);
        assert!(matches!(
            ControlledVocabularySet::from_raw("a", &files),
            Err(LoadError::SourceUnavailable { .. })
        ));
        let mut files = raw_test_cvs();
        files.insert(raw::SOURCE_ID_FILENAME.to_owned(), b"{\"source_id\": [1]}".to_vec());
        assert!(matches!(
            ControlledVocabularySet::from_raw("a", &files),
            Err(LoadError::Parse { .. })
        ));
    }

    #[test]
    fn test_self_check() {
        let cvs = test_cvs();
        // the PCMDI source has an institution that is in the CVs
        assert_eq!(cvs.self_check(), Vec::<String>::new());
    }
}
