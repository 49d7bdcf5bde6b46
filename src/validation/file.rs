// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};

use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    cf_checker::{self, CfCheckOutcome, CfChecker, CfStatus},
    cvs::ControlledVocabularySet,
    drs::{self, BuildError},
    loader::{self, DatasetLoader, DatasetWriter, VariableProcessor, WriteError},
    model::{
        metadata::{Attributes, DatasetMetadata, MetadataError},
        validation_result::{ErrorKind, Status, ValidationResult, ValidationResults},
    },
};

use super::{dataset::validate_dataset_consistency, validate_attributes};

pub const RULE_CF_CHECKER: &str = "cf_checker";

#[derive(Error, Debug)]
pub enum FileError {
    #[error(transparent)]
    Load(#[from] loader::LoadError),
    #[error(transparent)]
    CfCheck(#[from] cf_checker::CheckError),
    #[error("Validating the file panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum WriteInDrsError {
    #[error("'{0}' did not pass validation, so it is not written into the DRS")]
    NotValid(PathBuf),
    #[error("The metadata of '{path}' is invalid: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: MetadataError,
    },
    #[error("Could not derive the DRS path of '{path}': {source}")]
    Build {
        path: PathBuf,
        #[source]
        source: BuildError,
    },
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// How much of a file's path gets compared to the DRS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrsCheck {
    /// Only the file name, for files outside a DRS tree
    #[default]
    Filename,
    /// Directories and file name
    FullPath,
}

/// Everything needed to validate files, shared read-only by all workers.
#[derive(TypedBuilder, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub cv: &'a ControlledVocabularySet,
    pub loader: &'a dyn DatasetLoader,
    pub cf_checker: &'a dyn CfChecker,
    pub variable_processor: &'a VariableProcessor,
    /// Whether CF checker warnings are tolerated
    #[builder(default)]
    pub allow_cf_checker_warnings: bool,
    #[builder(default)]
    pub drs_check: DrsCheck,
}

/// The outcome of validating one file.
#[derive(Debug, Clone)]
pub struct FileValidation {
    pub path: PathBuf,
    /// The global attributes found in the file
    pub attributes: Attributes,
    pub results: ValidationResults,
}

impl FileValidation {
    #[must_use]
    pub fn tracking_id(&self) -> Option<&str> {
        self.attributes.get("tracking_id").map(String::as_str)
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.results.summary()
    }
}

/// Turns the outcome of the CF checker into a result.
///
/// Warnings only fail the file if they are not allowed.
#[must_use]
pub fn cf_check_result(outcome: &CfCheckOutcome, allow_warnings: bool) -> ValidationResult {
    let details = outcome.messages.join("\n");
    match outcome.status {
        CfStatus::Pass => ValidationResult::pass(RULE_CF_CHECKER, "The CF checker found no issues"),
        CfStatus::Warning if allow_warnings => ValidationResult::warning(
            RULE_CF_CHECKER,
            ErrorKind::CfChecker,
            format!("The CF checker issued warnings (allowed):\n{details}"),
        ),
        CfStatus::Warning => ValidationResult::fail(
            RULE_CF_CHECKER,
            ErrorKind::CfChecker,
            format!("The CF checker issued warnings:\n{details}"),
        ),
        CfStatus::Error => ValidationResult::fail(
            RULE_CF_CHECKER,
            ErrorKind::CfChecker,
            format!("The CF checker found errors:\n{details}"),
        ),
    }
}

fn drs_result(path: &Path, attributes: &Attributes, context: &ValidationContext) -> ValidationResult {
    let rule = match context.drs_check {
        DrsCheck::Filename => drs::RULE_FILENAME_ACCORDING_TO_DRS,
        DrsCheck::FullPath => drs::RULE_FILE_WRITTEN_ACCORDING_TO_DRS,
    };
    match DatasetMetadata::from_attributes(attributes, context.cv) {
        Ok(metadata) => match context.drs_check {
            DrsCheck::Filename => context
                .cv
                .drs()
                .validate_filename_according_to_drs(path, &metadata),
            DrsCheck::FullPath => context
                .cv
                .drs()
                .validate_file_written_according_to_drs(path, &metadata),
        },
        Err(err) => ValidationResult::warning(
            rule,
            ErrorKind::DrsMismatch,
            format!("Not checked, as the metadata is invalid: {err}"),
        ),
    }
}

/// Validates a single file:
/// the CF checker, the metadata rules,
/// the consistency of metadata and data, and the path against the DRS.
///
/// Rule failures end up in the results;
/// only problems with reading the file are errors.
///
/// # Errors
///
/// If the file can not be loaded or the CF checker can not be run.
#[tracing::instrument(skip(context))]
pub fn validate_file(path: &Path, context: &ValidationContext) -> Result<FileValidation, FileError> {
    tracing::debug!("Validating '{}' ...", path.display());
    let mut results = ValidationResults::new();

    let cf_outcome = context.cf_checker.check(path)?;
    results.push(cf_check_result(&cf_outcome, context.allow_cf_checker_warnings));

    let dataset = context.loader.load(path)?;
    let attributes = dataset.string_attributes();
    results.extend(validate_attributes(&attributes, context.cv));
    results.extend(validate_dataset_consistency(
        &dataset,
        &attributes,
        context.variable_processor,
    ));
    results.push(drs_result(path, &attributes, context));

    let results = results.with_target(&path.display().to_string());
    tracing::debug!("Validated '{}': {}", path.display(), results.summary());
    Ok(FileValidation {
        path: path.to_path_buf(),
        attributes,
        results,
    })
}

/// Places a file that passed validation at its DRS path below `root`.
///
/// Existing files are never overwritten.
/// Returns where the file was written to.
///
/// # Errors
///
/// If the file failed validation, no DRS path can be derived from its metadata,
/// or `writer` fails.
#[tracing::instrument(skip(validation, cv, writer), fields(path = %validation.path.display()))]
pub fn write_in_drs(
    validation: &FileValidation,
    cv: &ControlledVocabularySet,
    root: &Path,
    writer: &dyn DatasetWriter,
) -> Result<PathBuf, WriteInDrsError> {
    let path = &validation.path;
    if validation.results.has_failures() {
        return Err(WriteInDrsError::NotValid(path.clone()));
    }
    let metadata = DatasetMetadata::from_attributes(&validation.attributes, cv).map_err(|source| {
        WriteInDrsError::Metadata {
            path: path.clone(),
            source,
        }
    })?;
    let target = root.join(
        cv.drs()
            .build_path(&metadata)
            .map_err(|source| WriteInDrsError::Build {
                path: path.clone(),
                source,
            })?
            .path(),
    );
    writer.write(path, &target)?;
    tracing::info!("Wrote '{}' according to the DRS to '{}'", path.display(), target.display());
    Ok(target)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;

    use serde_json::{json, Value};

    use super::*;
    use crate::{
        inference::test_support::co2_dataset, model::metadata::test_support::valid_attributes,
    };

    pub const CO2_FILENAME: &str = "mole-fraction-of-carbon-dioxide-in-air_input4MIPs_GHGConcentrations_CMIP_CR-CMIP-0-2-0_gn_200001-200012.nc";

    /// A header dump of a valid file, with the given attribute changes.
    pub fn header(changes: &[(&str, Option<&str>)]) -> Value {
        let mut dataset = co2_dataset(12);
        let mut attributes = valid_attributes();
        for (key, value) in changes {
            match value {
                Some(value) => attributes.insert((*key).to_owned(), (*value).to_owned()),
                None => attributes.remove(*key),
            };
        }
        dataset.attributes = attributes
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        json!(dataset)
    }

    pub fn write_header(path: &Path, header: &Value) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, serde_json::to_vec_pretty(header).unwrap()).unwrap();
    }
}
