// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

use crate::{
    files_finder::{self, FindError, RGlob},
    model::validation_result::{ErrorKind, Status, ValidationResult, ValidationResults},
    parallel::WorkerPool,
};

use super::file::{validate_file, DrsCheck, FileError, FileValidation, ValidationContext};

pub const RULE_TRACKING_ID_UNIQUE: &str = "tree.tracking_id_unique";
pub const RULE_FILE_READABLE: &str = "file_readable";
pub const DEFAULT_RGLOB_INPUT: &str = "*.nc";

#[derive(Error, Debug)]
pub enum TreeError {
    #[error(transparent)]
    Find(#[from] FindError),
    #[error("Validation of '{path}' failed:\n{results}")]
    FileFailed {
        path: PathBuf,
        results: ValidationResults,
    },
    #[error("Could not validate '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: FileError,
    },
}

/// Where a file is in its validation.
///
/// `discovered -> validating -> {passed, failed, warned}`
#[derive(
    Debug,
    Display,
    EnumString,
    EnumIter,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Discovered,
    Validating,
    Passed,
    Failed,
    Warned,
}

impl FileState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Warned)
    }

    #[must_use]
    pub const fn from_status(status: Status) -> Self {
        match status {
            Status::Pass => Self::Passed,
            Status::Warning => Self::Warned,
            Status::Fail => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    state: FileState,
    results: ValidationResults,
}

impl FileReport {
    const fn discovered() -> Self {
        Self {
            state: FileState::Discovered,
            results: ValidationResults::new(),
        }
    }

    fn start(&mut self) {
        if self.state == FileState::Discovered {
            self.state = FileState::Validating;
        }
    }

    /// Moves to the terminal state the results call for.
    fn finish(&mut self, results: ValidationResults) {
        self.start();
        self.state = FileState::from_status(results.summary());
        self.results = results;
    }

    /// Adds results to a finished report, possibly downgrading its state.
    fn amend(&mut self, result: ValidationResult) {
        self.results.push(result);
        self.state = FileState::from_status(self.results.summary());
    }

    #[must_use]
    pub const fn state(&self) -> FileState {
        self.state
    }

    #[must_use]
    pub const fn results(&self) -> &ValidationResults {
        &self.results
    }
}

/// The outcome of validating a tree of files, keyed by path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeValidationReport {
    files: BTreeMap<PathBuf, FileReport>,
}

impl TreeValidationReport {
    fn discover(paths: &[PathBuf]) -> Self {
        Self {
            files: paths
                .iter()
                .map(|path| (path.clone(), FileReport::discovered()))
                .collect(),
        }
    }

    fn report_mut(&mut self, path: &Path) -> &mut FileReport {
        self.files
            .entry(path.to_path_buf())
            .or_insert_with(FileReport::discovered)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&FileReport> {
        self.files.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &FileReport)> {
        self.files.iter()
    }

    #[must_use]
    pub fn count(&self, state: FileState) -> usize {
        self.files
            .values()
            .filter(|report| report.state == state)
            .count()
    }

    #[must_use]
    pub fn counts(&self) -> BTreeMap<FileState, usize> {
        FileState::iter()
            .map(|state| (state, self.count(state)))
            .collect()
    }

    pub fn paths_in_state(&self, state: FileState) -> impl Iterator<Item = &Path> {
        self.files
            .iter()
            .filter(move |(_, report)| report.state == state)
            .map(|(path, _)| path.as_path())
    }

    /// Fail if any file failed or never finished,
    /// warning if any file warned, pass otherwise.
    #[must_use]
    pub fn summary_status(&self) -> Status {
        self.files
            .values()
            .map(|report| match report.state {
                FileState::Passed => Status::Pass,
                FileState::Warned => Status::Warning,
                FileState::Failed | FileState::Discovered | FileState::Validating => Status::Fail,
            })
            .max()
            .unwrap_or(Status::Pass)
    }
}

impl fmt::Display for TreeValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, report) in &self.files {
            writeln!(f, "{}: {}", report.state, path.display())?;
        }
        let counts = self.counts();
        write!(
            f,
            "{} file(s): {} passed, {} warned, {} failed",
            self.len(),
            counts[&FileState::Passed],
            counts[&FileState::Warned],
            counts[&FileState::Failed]
        )
    }
}

fn is_hard_failure(outcome: &Result<FileValidation, FileError>) -> bool {
    outcome
        .as_ref()
        .map_or(true, |validation| validation.results.has_failures())
}

/// Fails every file that shares its tracking id with another one.
fn check_tracking_ids_unique(validations: &[FileValidation], report: &mut TreeValidationReport) {
    let mut by_tracking_id: BTreeMap<&str, Vec<&Path>> = BTreeMap::new();
    for validation in validations {
        if let Some(tracking_id) = validation.tracking_id() {
            by_tracking_id
                .entry(tracking_id)
                .or_default()
                .push(&validation.path);
        }
    }
    for (tracking_id, paths) in by_tracking_id {
        let unique = paths.len() == 1;
        for path in &paths {
            let result = if unique {
                ValidationResult::pass(RULE_TRACKING_ID_UNIQUE, "tracking_id is unique in the tree")
            } else {
                ValidationResult::fail(
                    RULE_TRACKING_ID_UNIQUE,
                    ErrorKind::NotUnique,
                    format!("tracking_id={tracking_id:?} is shared by {paths:?}"),
                )
            };
            report
                .report_mut(path)
                .amend(result.with_target(path.display().to_string()));
        }
    }
}

/// Validates every file below `root` matching `rglob_input`,
/// using up to `n_workers` threads.
///
/// With `continue_on_error`, every file is attempted
/// and failures end up in the report.
/// Otherwise the first failing file ends the run.
///
/// # Errors
///
/// - the tree can not be walked
/// - without `continue_on_error`: the first file that fails or can not be read
#[tracing::instrument(skip(context))]
pub fn validate_tree(
    root: &Path,
    rglob_input: &RGlob,
    context: &ValidationContext,
    continue_on_error: bool,
    n_workers: usize,
) -> Result<TreeValidationReport, TreeError> {
    let paths = files_finder::find_recursive(root, rglob_input)?;
    tracing::info!(
        "Validating {} file(s) below '{}' matching '{}' ...",
        paths.len(),
        root.display(),
        rglob_input.as_str()
    );
    let mut report = TreeValidationReport::discover(&paths);
    let context = ValidationContext {
        drs_check: DrsCheck::FullPath,
        ..*context
    };

    let completion = WorkerPool::new(n_workers).run(
        paths,
        |path| (path.clone(), validate_file(path, &context)),
        |path, message| (path, Err(FileError::Panicked(message.to_owned()))),
        |(_, outcome)| !continue_on_error && is_hard_failure(outcome),
    );

    let mut validations = vec![];
    for (path, outcome) in completion.results {
        let file_report = report.report_mut(&path);
        file_report.start();
        match outcome {
            Ok(validation) => {
                if !continue_on_error && validation.results.has_failures() {
                    return Err(TreeError::FileFailed {
                        path,
                        results: validation.results,
                    });
                }
                file_report.finish(validation.results.clone());
                validations.push(validation);
            }
            Err(source) if !continue_on_error => return Err(TreeError::File { path, source }),
            Err(err) => {
                tracing::warn!("Could not validate '{}': {err}", path.display());
                file_report.finish(
                    std::iter::once(
                        ValidationResult::fail(RULE_FILE_READABLE, ErrorKind::Unreadable, err.to_string())
                            .with_target(path.display().to_string()),
                    )
                    .collect(),
                );
            }
        }
    }

    check_tracking_ids_unique(&validations, &mut report);
    if !continue_on_error {
        if let Some(path) = report.paths_in_state(FileState::Failed).next() {
            let path = path.to_path_buf();
            let results = report
                .get(&path)
                .map(|file_report| file_report.results.clone())
                .unwrap_or_default();
            return Err(TreeError::FileFailed { path, results });
        }
    }

    tracing::info!("{report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cf_checker::FixedCfChecker,
        cvs::test_support::test_cvs,
        loader::{JsonHeaderLoader, VariableProcessor},
        validation::file::test_support::{header, write_header, CO2_FILENAME},
    };

    const DRS_DIR: &str = "input4MIPs/CMIP6Plus/CMIP/CR/CR-CMIP-0-2-0/atmos/mon/mole_fraction_of_carbon_dioxide_in_air/gn/v20240101";

    fn run(root: &Path, continue_on_error: bool) -> Result<TreeValidationReport, TreeError> {
        let cvs = test_cvs();
        let variable_processor = VariableProcessor::default();
        let checker = FixedCfChecker::passing();
        let context = ValidationContext::builder()
            .cv(&cvs)
            .loader(&JsonHeaderLoader)
            .cf_checker(&checker)
            .variable_processor(&variable_processor)
            .build();
        validate_tree(
            root,
            &RGlob::new(DEFAULT_RGLOB_INPUT).unwrap(),
            &context,
            continue_on_error,
            2,
        )
    }

    #[test]
    fn test_state_machine() {
        let mut report = FileReport::discovered();
        assert!(!report.state().is_terminal());
        report.start();
        assert_eq!(report.state(), FileState::Validating);
        report.finish(ValidationResults::new());
        assert_eq!(report.state(), FileState::Passed);
        report.amend(ValidationResult::warning("x", ErrorKind::Discrepancy, "meh"));
        assert_eq!(report.state(), FileState::Warned);
    }

    #[test]
    fn test_duplicate_tracking_ids() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("a").join(DRS_DIR).join(CO2_FILENAME);
        let two = dir.path().join("b").join(DRS_DIR).join(CO2_FILENAME);
        write_header(&one, &header(&[]));
        write_header(&two, &header(&[]));

        let report = run(dir.path(), true).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.count(FileState::Failed), 2);
        let results = report.get(&one).unwrap().results();
        assert!(results
            .failures()
            .any(|res| res.error_kind() == Some(ErrorKind::NotUnique)));

        assert!(matches!(
            run(dir.path(), false),
            Err(TreeError::FileFailed { .. })
        ));
    }

    #[test]
    fn test_stop_on_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join(DRS_DIR).join(CO2_FILENAME);
        write_header(&good, &header(&[]));
        std::fs::write(dir.path().join("broken.nc"), "no header").unwrap();

        let report = run(dir.path(), true).unwrap();
        assert_eq!(report.count(FileState::Passed), 1);
        assert_eq!(report.count(FileState::Failed), 1);
        assert_eq!(report.summary_status(), Status::Fail);

        let err = run(dir.path(), false).unwrap_err();
        assert!(matches!(err, TreeError::File { ref path, .. } if path.ends_with("broken.nc")));
    }

    #[test]
    fn test_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(dir.path(), false).unwrap();
        assert!(report.is_empty());
        assert_eq!(report.summary_status(), Status::Pass);
    }
}
