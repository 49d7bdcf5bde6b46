// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    path::{Path, PathBuf},
    process::Command,
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

pub const DEFAULT_COMMAND: &str = "cfchecks";

static SUMMARY_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(ERRORS|WARNINGS) detected:\s*(\d+)\s*$").expect("static regex is valid")
});

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Failed to run the CF checker '{command}' on '{path}': {source}")]
    Spawn {
        command: String,
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(
    Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CfStatus {
    Pass,
    Warning,
    Error,
}

/// What a CF-compliance check has to say about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfCheckOutcome {
    pub status: CfStatus,
    pub messages: Vec<String>,
}

impl CfCheckOutcome {
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            status: CfStatus::Pass,
            messages: vec![],
        }
    }
}

/// A CF-convention compliance checker.
pub trait CfChecker: Send + Sync {
    /// Checks the file at `path`.
    ///
    /// # Errors
    ///
    /// If the check itself could not be run;
    /// problems found in the file are part of the outcome.
    fn check(&self, path: &Path) -> Result<CfCheckOutcome, CheckError>;
}

/// Runs an external checker command (by default `cfchecks`)
/// and interprets its report.
#[derive(Debug, Clone)]
pub struct ExternalCfChecker {
    command: String,
}

impl Default for ExternalCfChecker {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

impl ExternalCfChecker {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Derives the outcome from the textual report of the checker.
///
/// The summary counts win; without them,
/// a non-zero exit code counts as an error.
#[must_use]
pub fn parse_report(report: &str, exit_success: bool) -> CfCheckOutcome {
    let mut errors = None;
    let mut warnings = None;
    for caps in SUMMARY_COUNT.captures_iter(report) {
        let count = caps[2].parse::<usize>().unwrap_or(usize::MAX);
        match &caps[1] {
            "ERRORS" => errors = Some(count),
            _ => warnings = Some(count),
        }
    }
    let messages = report
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("ERROR") || line.starts_with("WARN"))
        .filter(|line| !SUMMARY_COUNT.is_match(line))
        .map(ToOwned::to_owned)
        .collect();
    let status = match (errors, warnings) {
        (Some(errors), _) if errors > 0 => CfStatus::Error,
        (_, Some(warnings)) if warnings > 0 => CfStatus::Warning,
        (None, None) if !exit_success => CfStatus::Error,
        _ => CfStatus::Pass,
    };
    CfCheckOutcome { status, messages }
}

impl CfChecker for ExternalCfChecker {
    fn check(&self, path: &Path) -> Result<CfCheckOutcome, CheckError> {
        tracing::debug!("Running '{}' on '{}' ...", self.command, path.display());
        let output = Command::new(&self.command)
            .arg(path)
            .output()
            .map_err(|source| CheckError::Spawn {
                command: self.command.clone(),
                path: path.to_path_buf(),
                source,
            })?;
        let mut report = String::from_utf8_lossy(&output.stdout).into_owned();
        report.push_str(&String::from_utf8_lossy(&output.stderr));
        let outcome = parse_report(&report, output.status.success());
        tracing::debug!("CF check of '{}': {}", path.display(), outcome.status);
        Ok(outcome)
    }
}

/// A checker that does not look at the file.
///
/// Used when CF checking is disabled, and in tests.
#[derive(Debug, Clone)]
pub struct FixedCfChecker {
    outcome: CfCheckOutcome,
}

impl FixedCfChecker {
    #[must_use]
    pub const fn new(outcome: CfCheckOutcome) -> Self {
        Self { outcome }
    }

    #[must_use]
    pub const fn passing() -> Self {
        Self::new(CfCheckOutcome::pass())
    }
}

impl CfChecker for FixedCfChecker {
    fn check(&self, _path: &Path) -> Result<CfCheckOutcome, CheckError> {
        Ok(self.outcome.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT_WARN: &str = "CHECKING NetCDF FILE: /tmp/tos.nc\n\
        =====================\n\
        Using CF Checker Version 4.1.0\n\
        ------------------\n\
        Checking variable: tos\n\
        ------------------\n\
        WARN: (7.1): Boundary Variable time_bnds should not have attributes\n\
        \n\
        ERRORS detected: 0\n\
        WARNINGS detected: 1\n\
        INFORMATION messages: 0\n";

    #[test]
    fn test_parse_warning() {
        let outcome = parse_report(REPORT_WARN, true);
        assert_eq!(outcome.status, CfStatus::Warning);
        assert_eq!(outcome.messages.len(), 1);
        assert!(outcome.messages[0].starts_with("WARN: (7.1)"));
    }

    #[test]
    fn test_parse_error() {
        let report = "ERROR: (3.1): Invalid units: kelvins\nERRORS detected: 1\nWARNINGS detected: 0\n";
        let outcome = parse_report(report, false);
        assert_eq!(outcome.status, CfStatus::Error);
        assert_eq!(outcome.messages, vec!["ERROR: (3.1): Invalid units: kelvins"]);
    }

    #[test]
    fn test_parse_without_summary() {
        assert_eq!(parse_report("", true).status, CfStatus::Pass);
        assert_eq!(parse_report("Traceback ...", false).status, CfStatus::Error);
    }

    #[test]
    fn test_missing_command() {
        let checker = ExternalCfChecker::new("this-cf-checker-does-not-exist");
        assert!(matches!(
            checker.check(Path::new("x.nc")),
            Err(CheckError::Spawn { .. })
        ));
    }
}
