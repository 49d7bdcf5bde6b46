// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Building database entries from files on disk.

use std::{
    collections::BTreeMap,
    io,
    ops::ControlFlow,
    path::{Path, PathBuf},
};

use thiserror::Error;

use super::{Database, DatabaseError};
use crate::{
    cvs::ControlledVocabularySet,
    drs::apply_known_replacements,
    inference::infer_frequency,
    loader::{DatasetLoader, LoadError, VariableProcessor},
    model::{
        database_entry::{DatabaseEntry, ValidationStatus},
        metadata::{Attributes, DatasetMetadata},
        validation_result::{ErrorKind, ValidationResult},
    },
    parallel::WorkerPool,
    tools,
    validation::{dataset::validate_dataset_consistency, tree::RULE_FILE_READABLE, validate_attributes},
};

#[derive(Error, Debug)]
pub enum EntryError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("Failed to hash '{path}': {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where to find the frequency in a files attributes,
/// and what to use for files without a time axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyKeys {
    pub frequency_key: String,
    pub no_time_axis_frequency: String,
}

impl Default for FrequencyKeys {
    fn default() -> Self {
        Self {
            frequency_key: "frequency".to_owned(),
            no_time_axis_frequency: "fx".to_owned(),
        }
    }
}

/// Everything [`create_entry`] needs besides the file.
#[derive(Clone, Copy)]
pub struct EntryContext<'a> {
    pub cv: &'a ControlledVocabularySet,
    pub frequency_keys: &'a FrequencyKeys,
    pub variable_processor: &'a VariableProcessor,
    pub loader: &'a dyn DatasetLoader,
}

/// Adds the values the DRS path of `filepath` encodes.
///
/// Values already in `attributes` win; a clash is only logged.
fn merge_drs_values(attributes: &mut Attributes, filepath: &Path, cv: &ControlledVocabularySet) {
    let drs_values = match cv.drs().parse_path(filepath) {
        Ok(values) => values,
        Err(err) => {
            tracing::debug!("Not using the path for metadata: {err}");
            return;
        }
    };
    for (key, value) in drs_values {
        match attributes.get(&key) {
            None => {
                attributes.insert(key, value);
            }
            Some(existing) if *existing == value || apply_known_replacements(existing) == value => {}
            Some(existing) => tracing::warn!(
                "'{}': attribute {key}={existing:?} differs from {value:?} in the DRS path; \
                keeping the attribute",
                filepath.display()
            ),
        }
    }
}

/// Makes sure `frequency` is set,
/// reading it from `frequency_keys.frequency_key` or inferring it.
fn settle_frequency(
    attributes: &mut Attributes,
    dataset: &crate::model::dataset::Dataset,
    frequency_keys: &FrequencyKeys,
) {
    if let Some(value) = attributes.get(&frequency_keys.frequency_key).cloned() {
        if let Some(existing) = attributes.get("frequency") {
            if *existing != value {
                tracing::warn!(
                    "frequency={existing:?} differs from {}={value:?}; keeping frequency",
                    frequency_keys.frequency_key
                );
            }
            return;
        }
        attributes.insert("frequency".to_owned(), value);
        return;
    }
    if attributes.contains_key("frequency") {
        return;
    }
    let inferred = if dataset.time.is_none() {
        Some(frequency_keys.no_time_axis_frequency.clone())
    } else {
        infer_frequency(dataset).map(|frequency| frequency.to_string())
    };
    if let Some(frequency) = inferred {
        tracing::debug!("Inferred frequency={frequency:?}");
        attributes.insert("frequency".to_owned(), frequency);
    }
}

/// Creates the database entry for one file:
/// reads its metadata, completes it from the DRS path and the time axis,
/// validates it, and records hash, master id and status.
///
/// Validation failures end up in the entry, not in the error.
///
/// # Errors
///
/// If the file can not be loaded or hashed.
#[tracing::instrument(skip(context))]
pub fn create_entry(filepath: &Path, context: &EntryContext) -> Result<DatabaseEntry, EntryError> {
    let dataset = context.loader.load(filepath)?;
    let mut attributes: Attributes = dataset
        .string_attributes()
        .into_iter()
        .map(|(key, value)| (key, value.trim().to_owned()))
        .collect();
    merge_drs_values(&mut attributes, filepath, context.cv);
    settle_frequency(&mut attributes, &dataset, context.frequency_keys);

    let mut results = validate_attributes(&attributes, context.cv);
    results.extend(validate_dataset_consistency(
        &dataset,
        &attributes,
        context.variable_processor,
    ));
    let results = results.with_target(&filepath.display().to_string());

    let metadata = match DatasetMetadata::from_attributes(&attributes, context.cv) {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            tracing::debug!("'{}' holds no valid metadata: {err}", filepath.display());
            None
        }
    };
    let master_id = match context.cv.drs().master_id(&attributes) {
        Ok(master_id) => Some(master_id),
        Err(err) => {
            tracing::debug!("No master id for '{}': {err}", filepath.display());
            None
        }
    };
    let sha256 = tools::sha256_file(filepath).map_err(|source| EntryError::Hash {
        path: filepath.to_path_buf(),
        source,
    })?;

    Ok(DatabaseEntry::builder()
        .filepath(filepath.to_path_buf())
        .sha256(Some(sha256))
        .master_id(master_id)
        .validation_status(ValidationStatus::from_status(results.summary()))
        .metadata(metadata)
        .attributes(attributes)
        .cv_version(Some(context.cv.version().clone()))
        .validation_results(results)
        .build())
}

fn unreadable_entry(filepath: &Path, reason: String) -> DatabaseEntry {
    DatabaseEntry::failed(
        filepath,
        ValidationResult::fail(RULE_FILE_READABLE, ErrorKind::Unreadable, reason)
            .with_target(filepath.display().to_string()),
    )
}

fn create_or_fail(filepath: &Path, context: &EntryContext) -> DatabaseEntry {
    create_entry(filepath, context).unwrap_or_else(|err| {
        tracing::warn!("Failed to create an entry for '{}': {err}", filepath.display());
        unreadable_entry(filepath, err.to_string())
    })
}

fn recover_entry(filepath: PathBuf, message: &str) -> DatabaseEntry {
    unreadable_entry(&filepath, format!("Processing the file panicked: {message}"))
}

/// Creates the entries for all `filepaths`, using up to `n_workers` threads.
///
/// A file that can not be processed gets a failed entry;
/// it never stops the others.
/// The entries are sorted by file path.
#[tracing::instrument(skip(filepaths, context), fields(n_files = filepaths.len()))]
pub fn create_entries_parallel(
    filepaths: Vec<PathBuf>,
    context: &EntryContext,
    n_workers: usize,
) -> Vec<DatabaseEntry> {
    tracing::info!(
        "Creating {} database entries with {n_workers} worker(s) ...",
        filepaths.len()
    );
    let completion = WorkerPool::new(n_workers).run(
        filepaths,
        |filepath| create_or_fail(filepath, context),
        recover_entry,
        |_| false,
    );
    let mut entries = completion.results;
    entries.sort_by(|a, b| a.filepath.cmp(&b.filepath));
    entries
}

/// Like [`create_entries_parallel`],
/// but each entry is upserted into `database` as soon as it is created,
/// so an interrupted run keeps everything written up to then.
///
/// Returns how many entries were created, updated and left unchanged.
///
/// # Errors
///
/// If an entry can not be written;
/// no further files are processed after that.
#[tracing::instrument(skip(database, filepaths, context), fields(n_files = filepaths.len()))]
pub fn write_entries_parallel(
    database: &Database,
    filepaths: Vec<PathBuf>,
    context: &EntryContext,
    n_workers: usize,
) -> Result<BTreeMap<&'static str, usize>, DatabaseError> {
    tracing::info!(
        "Writing {} database entries with {n_workers} worker(s) to '{}' ...",
        filepaths.len(),
        database.dir().display()
    );
    let mut counts = BTreeMap::new();
    let mut write_error = None;
    WorkerPool::new(n_workers).run_each(
        filepaths,
        |filepath| create_or_fail(filepath, context),
        recover_entry,
        |entry| {
            if write_error.is_some() {
                return ControlFlow::Break(());
            }
            match database.upsert(entry) {
                Ok(outcome) => {
                    *counts.entry(outcome.key()).or_default() += 1;
                    ControlFlow::Continue(())
                }
                Err(err) => {
                    tracing::error!("{err}");
                    write_error = Some(err);
                    ControlFlow::Break(())
                }
            }
        },
    );
    write_error.map_or(Ok(counts), Err)
}
