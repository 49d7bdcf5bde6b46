// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The on-disk database:
//! a directory holding one JSON record per file.

pub mod creation;

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{
    model::{
        database_entry::DatabaseEntry,
        validation_result::{ErrorKind, ValidationResult, ValidationResults},
    },
    parallel::WorkerPool,
    tools,
};

pub const ENTRY_EXTENSION: &str = "json";
pub const RULE_SHA256_MATCHES: &str = "database.sha256_matches";
pub const RULE_TRACKING_ID_UNIQUE: &str = "database.tracking_id_unique";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("The database directory '{0}' already exists")]
    AlreadyExists(PathBuf),
    #[error("The database directory '{0}' does not exist")]
    NotFound(PathBuf),
    #[error("Failed to access '{0}': {1}")]
    Io(PathBuf, #[source] io::Error),
    #[error("Failed to (de-)serialize the entry '{0}': {1}")]
    Json(PathBuf, #[source] serde_json::Error),
}

/// What [`Database::upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// A new revision was written
    Updated,
    /// The stored entry already records the same state
    Unchanged,
}

impl UpsertOutcome {
    /// The name this outcome is counted under.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    dir: PathBuf,
}

impl Database {
    /// Opens an existing database.
    ///
    /// # Errors
    ///
    /// If `dir` is not an existing directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(DatabaseError::NotFound(dir));
        }
        Ok(Self { dir })
    }

    /// Creates a new, empty database.
    ///
    /// # Errors
    ///
    /// If `dir` already exists or can not be created.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let dir = dir.into();
        if dir.exists() {
            return Err(DatabaseError::AlreadyExists(dir));
        }
        tracing::debug!("Creating database directory '{}' ...", dir.display());
        fs::create_dir_all(&dir).map_err(|err| DatabaseError::Io(dir.clone(), err))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the record of the file at `filepath` is stored.
    #[must_use]
    pub fn entry_path(&self, filepath: &Path) -> PathBuf {
        let key = tools::sha256_hex(filepath.to_string_lossy().as_bytes());
        self.dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    fn read_entry(path: &Path) -> Result<DatabaseEntry, DatabaseError> {
        let content = fs::read(path).map_err(|err| DatabaseError::Io(path.to_path_buf(), err))?;
        serde_json::from_slice(&content).map_err(|err| DatabaseError::Json(path.to_path_buf(), err))
    }

    fn write_entry(&self, entry: &DatabaseEntry) -> Result<(), DatabaseError> {
        let path = self.entry_path(&entry.filepath);
        let content = serde_json::to_vec_pretty(entry)
            .map_err(|err| DatabaseError::Json(path.clone(), err))?;
        tools::write_atomically(&path, content)
            .map_err(|err| DatabaseError::Io(path.clone(), err))?;
        tracing::trace!("Wrote entry '{}'", path.display());
        Ok(())
    }

    /// The stored entry for the file at `filepath`, if any.
    ///
    /// # Errors
    ///
    /// If the record exists but can not be read.
    pub fn get(&self, filepath: &Path) -> Result<Option<DatabaseEntry>, DatabaseError> {
        let path = self.entry_path(filepath);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_entry(&path).map(Some)
    }

    /// All stored entries, sorted by file path.
    ///
    /// Left over temporary files are ignored.
    ///
    /// # Errors
    ///
    /// If the directory or a record can not be read.
    pub fn load_all(&self) -> Result<Vec<DatabaseEntry>, DatabaseError> {
        let dir_entries =
            fs::read_dir(&self.dir).map_err(|err| DatabaseError::Io(self.dir.clone(), err))?;
        let mut entries = vec![];
        for dir_entry in dir_entries {
            let path = dir_entry
                .map_err(|err| DatabaseError::Io(self.dir.clone(), err))?
                .path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                entries.push(Self::read_entry(&path)?);
            }
        }
        entries.sort_by(|a, b| a.filepath.cmp(&b.filepath));
        Ok(entries)
    }

    /// Stores `entry`.
    ///
    /// If an entry for the same file exists
    /// and records the same status and hash, nothing is written.
    /// Otherwise `entry` is stored as its next revision.
    ///
    /// # Errors
    ///
    /// If the existing record can not be read or the new one not written.
    pub fn upsert(&self, entry: DatabaseEntry) -> Result<UpsertOutcome, DatabaseError> {
        match self.get(&entry.filepath)? {
            None => {
                self.write_entry(&entry)?;
                Ok(UpsertOutcome::Created)
            }
            Some(existing) if existing.same_state(&entry) => {
                tracing::debug!(
                    "Entry for '{}' is unchanged, keeping revision {}",
                    entry.filepath.display(),
                    existing.revision
                );
                Ok(UpsertOutcome::Unchanged)
            }
            Some(existing) => {
                let entry = entry.revise(&existing);
                tracing::info!(
                    "Updating entry for '{}' to revision {} ({} -> {})",
                    entry.filepath.display(),
                    entry.revision,
                    existing.validation_status,
                    entry.validation_status
                );
                self.write_entry(&entry)?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    /// Stores all `entries`, counting what happened.
    ///
    /// # Errors
    ///
    /// See [`Self::upsert`].
    pub fn upsert_all(
        &self,
        entries: impl IntoIterator<Item = DatabaseEntry>,
    ) -> Result<BTreeMap<&'static str, usize>, DatabaseError> {
        let mut counts = BTreeMap::new();
        for entry in entries {
            *counts.entry(self.upsert(entry)?.key()).or_default() += 1;
        }
        Ok(counts)
    }

    /// Re-validates all stored entries, see [`validate_entries`].
    ///
    /// # Errors
    ///
    /// If the entries can not be loaded.
    pub fn validate_database(&self, n_workers: usize) -> Result<Vec<DatabaseEntry>, DatabaseError> {
        Ok(validate_entries(&self.load_all()?, n_workers))
    }
}

fn check_sha256(entry: &DatabaseEntry) -> ValidationResult {
    let target = entry.filepath.display().to_string();
    let result = match (&entry.sha256, tools::sha256_file(&entry.filepath)) {
        (_, Err(err)) => ValidationResult::fail(
            RULE_SHA256_MATCHES,
            ErrorKind::Unreadable,
            format!("Could not hash the file: {err}"),
        ),
        (None, Ok(_)) => ValidationResult::fail(
            RULE_SHA256_MATCHES,
            ErrorKind::HashMismatch,
            "The entry records no sha256",
        ),
        (Some(recorded), Ok(actual)) if *recorded == actual => {
            ValidationResult::pass(RULE_SHA256_MATCHES, "sha256 matches the file")
        }
        (Some(recorded), Ok(actual)) => ValidationResult::fail(
            RULE_SHA256_MATCHES,
            ErrorKind::HashMismatch,
            format!("The entry records sha256={recorded}, but the file has {actual}"),
        ),
    };
    result.with_target(target)
}

fn check_tracking_id_unique(
    entry: &DatabaseEntry,
    owners: &BTreeMap<&str, Vec<&Path>>,
) -> ValidationResult {
    let target = entry.filepath.display().to_string();
    let result = match entry.tracking_id() {
        None => ValidationResult::pass(RULE_TRACKING_ID_UNIQUE, "No tracking_id to compare"),
        Some(tracking_id) => match owners.get(tracking_id) {
            Some(paths) if paths.len() > 1 => ValidationResult::fail(
                RULE_TRACKING_ID_UNIQUE,
                ErrorKind::NotUnique,
                format!("tracking_id={tracking_id:?} is shared by {paths:?}"),
            ),
            _ => ValidationResult::pass(
                RULE_TRACKING_ID_UNIQUE,
                "tracking_id is unique in the database",
            ),
        },
    };
    result.with_target(target)
}

fn without_database_checks(entry: &DatabaseEntry) -> ValidationResults {
    entry
        .validation_results
        .iter()
        .filter(|res| res.rule() != RULE_SHA256_MATCHES && res.rule() != RULE_TRACKING_ID_UNIQUE)
        .cloned()
        .collect()
}

/// Checks that tracking ids are unique across `entries`
/// and that each recorded sha256 matches the file on disk,
/// hashing the files with up to `n_workers` threads.
///
/// Returns new entries, with earlier results of these checks replaced;
/// `entries` stay untouched.
#[must_use]
#[tracing::instrument(skip(entries), fields(n_entries = entries.len()))]
pub fn validate_entries(entries: &[DatabaseEntry], n_workers: usize) -> Vec<DatabaseEntry> {
    let mut owners: BTreeMap<&str, Vec<&Path>> = BTreeMap::new();
    for entry in entries {
        if let Some(tracking_id) = entry.tracking_id() {
            owners.entry(tracking_id).or_default().push(&entry.filepath);
        }
    }

    let completion = WorkerPool::new(n_workers).run(
        entries.iter().collect(),
        |entry: &&DatabaseEntry| {
            let mut results = without_database_checks(entry);
            results.push(check_sha256(entry));
            results.push(check_tracking_id_unique(entry, &owners));
            entry.with_validation(results)
        },
        |entry, message| {
            let mut results = without_database_checks(entry);
            results.push(
                ValidationResult::fail(
                    RULE_SHA256_MATCHES,
                    ErrorKind::RuleError,
                    format!("Checking the entry panicked: {message}"),
                )
                .with_target(entry.filepath.display().to_string()),
            );
            entry.with_validation(results)
        },
        |_| false,
    );
    let mut validated = completion.results;
    validated.sort_by(|a, b| a.filepath.cmp(&b.filepath));
    for entry in &validated {
        tracing::debug!("'{}': {}", entry.filepath.display(), entry.validation_status);
    }
    validated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::database_entry::ValidationStatus;

    fn entry_for(path: &Path, tracking_id: &str) -> DatabaseEntry {
        DatabaseEntry::builder()
            .filepath(path.to_path_buf())
            .sha256(Some(tools::sha256_file(path).unwrap()))
            .validation_status(ValidationStatus::Passed)
            .attributes(
                std::iter::once(("tracking_id".to_owned(), tracking_id.to_owned())).collect(),
            )
            .build()
    }

    #[test]
    fn test_create_requires_new_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Database::create(dir.path()),
            Err(DatabaseError::AlreadyExists(_))
        ));
        let db_dir = dir.path().join("db");
        assert!(matches!(Database::open(&db_dir), Err(DatabaseError::NotFound(_))));
        Database::create(&db_dir).unwrap();
        assert!(Database::open(&db_dir).unwrap().load_all().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("co2.nc");
        fs::write(&file, "one").unwrap();
        let db = Database::create(dir.path().join("db")).unwrap();

        let first = entry_for(&file, "hdl:21.14100/a");
        assert_eq!(db.upsert(first.clone()).unwrap(), UpsertOutcome::Created);
        assert_eq!(db.upsert(first.clone()).unwrap(), UpsertOutcome::Unchanged);

        fs::write(&file, "two").unwrap();
        let second = entry_for(&file, "hdl:21.14100/a");
        assert_eq!(db.upsert(second).unwrap(), UpsertOutcome::Updated);

        let stored = db.get(&file).unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.history.len(), 1);
        assert_eq!(stored.history[0].sha256, first.sha256);
        assert_eq!(db.load_all().unwrap().len(), 1);
        assert_eq!(fs::read_dir(db.dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_validate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = ["a.nc", "b.nc", "c.nc"]
            .iter()
            .map(|name| dir.path().join(name))
            .collect();
        for path in &paths {
            fs::write(path, path.to_string_lossy().as_bytes()).unwrap();
        }
        let entries = vec![
            entry_for(&paths[0], "hdl:21.14100/a"),
            entry_for(&paths[1], "hdl:21.14100/b"),
            entry_for(&paths[2], "hdl:21.14100/b"),
        ];
        fs::write(&paths[0], "changed").unwrap();

        let validated = validate_entries(&entries, 2);
        assert_eq!(validated.len(), 3);
        assert!(validated
            .iter()
            .all(|entry| entry.validation_status == ValidationStatus::Failed));
        assert!(validated[0]
            .validation_results
            .failures()
            .any(|res| res.error_kind() == Some(ErrorKind::HashMismatch)));
        assert!(validated[1]
            .validation_results
            .failures()
            .any(|res| res.error_kind() == Some(ErrorKind::NotUnique)));
        // the input is left alone
        assert!(entries
            .iter()
            .all(|entry| entry.validation_status == ValidationStatus::Passed));

        // re-validation replaces the earlier check results
        fs::write(&paths[0], paths[0].to_string_lossy().as_bytes()).unwrap();
        let again = validate_entries(&validated[..1], 1);
        assert_eq!(again[0].validation_status, ValidationStatus::Passed);
        assert_eq!(again[0].validation_results.len(), 2);
    }
}
