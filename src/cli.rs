// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command, ValueHint};
use input4mips_validation::{
    database::creation::FrequencyKeys, settings::Settings, validation::tree::DEFAULT_RGLOB_INPUT,
};
use std::path::PathBuf;

pub const SC_VALIDATE_FILE: &str = "validate-file";
pub const SC_VALIDATE_TREE: &str = "validate-tree";
pub const SC_DB: &str = "db";
pub const SC_DB_CREATE: &str = "create";
pub const SC_DB_VALIDATE: &str = "validate";

pub const A_L_VERSION: &str = "version";
pub const A_S_VERSION: char = 'V';
pub const A_L_QUIET: &str = "quiet";
pub const A_S_QUIET: char = 'q';
pub const A_L_VERBOSE: &str = "verbose";
pub const A_S_VERBOSE: char = 'v';
pub const A_L_CV_SOURCE: &str = "cv-source";
pub const A_L_FORCE_DOWNLOAD: &str = "force-cv-download";
pub const A_L_N_WORKERS: &str = "n-workers";
pub const A_S_N_WORKERS: char = 'j';
pub const A_L_CF_CHECKER: &str = "cf-checker";
pub const A_L_BNDS_COORD_INDICATOR: &str = "bnds-coord-indicator";
pub const A_L_FILE: &str = "file";
pub const A_L_TREE_ROOT: &str = "tree-root";
pub const A_L_RGLOB_INPUT: &str = "rglob-input";
pub const A_L_ALLOW_CF_CHECKER_WARNINGS: &str = "allow-cf-checker-warnings";
pub const A_L_CONTINUE_ON_ERROR: &str = "continue-on-error";
pub const A_L_DB_DIR: &str = "db-dir";
pub const A_L_FREQUENCY_METADATA_KEY: &str = "frequency-metadata-key";
pub const A_L_NO_TIME_AXIS_FREQUENCY: &str = "no-time-axis-frequency";
pub const A_L_REPORT: &str = "report";
pub const A_L_WRITE_IN_DRS: &str = "write-in-drs";

fn arg_version() -> Arg {
    Arg::new(A_L_VERSION)
        .help(
            "Print version information and exit. \
            May be combined with -q,--quiet, to really only output the version string.",
        )
        .action(ArgAction::SetTrue)
        .short(A_S_VERSION)
        .long(A_L_VERSION)
        .global(true)
}

fn arg_quiet() -> Arg {
    Arg::new(A_L_QUIET)
        .help("Minimize or suppress output to stdout")
        .long_help("Only log warnings and errors.")
        .action(ArgAction::SetTrue)
        .short(A_S_QUIET)
        .long(A_L_QUIET)
        .global(true)
        .conflicts_with(A_L_VERBOSE)
}

fn arg_verbose() -> Arg {
    Arg::new(A_L_VERBOSE)
        .help("More verbose log output")
        .long_help("Log everything down to the trace level.")
        .action(ArgAction::SetTrue)
        .short(A_S_VERBOSE)
        .long(A_L_VERBOSE)
        .global(true)
}

fn arg_cv_source() -> Arg {
    Arg::new(A_L_CV_SOURCE)
        .help("Where to load the CVs from")
        .long_help(
            "Where to load the CVs from: \
            'gh:<git-ref>' for the official input4MIPs CVs repository at that ref, \
            an http(s) URL of a directory holding the CV files, \
            or a local directory. \
            Overrides the setting 'input4mips_cv_source'.",
        )
        .num_args(1)
        .value_name("SOURCE")
        .value_hint(ValueHint::AnyPath)
        .long(A_L_CV_SOURCE)
        .global(true)
}

fn arg_force_download() -> Arg {
    Arg::new(A_L_FORCE_DOWNLOAD)
        .help("Download remote CVs, even if they are cached")
        .action(ArgAction::SetTrue)
        .long(A_L_FORCE_DOWNLOAD)
        .global(true)
}

fn arg_n_workers() -> Arg {
    Arg::new(A_L_N_WORKERS)
        .help("Number of files to process in parallel")
        .num_args(1)
        .value_name("NUM")
        .value_parser(value_parser!(usize))
        .short(A_S_N_WORKERS)
        .long(A_L_N_WORKERS)
        .global(true)
}

fn arg_cf_checker() -> Arg {
    Arg::new(A_L_CF_CHECKER)
        .help("The CF checker command to run on each file")
        .num_args(1)
        .value_name("COMMAND")
        .value_hint(ValueHint::CommandName)
        .long(A_L_CF_CHECKER)
        .global(true)
}

fn arg_bnds_coord_indicator() -> Arg {
    Arg::new(A_L_BNDS_COORD_INDICATOR)
        .help("Variable names containing this are bounds, not data (may be repeated)")
        .num_args(1)
        .value_name("INDICATOR")
        .action(ArgAction::Append)
        .long(A_L_BNDS_COORD_INDICATOR)
        .global(true)
}

fn arg_file() -> Arg {
    Arg::new(A_L_FILE)
        .help("The file to validate")
        .num_args(1)
        .value_name("FILE")
        .value_hint(ValueHint::FilePath)
        .value_parser(value_parser!(PathBuf))
        .required(true)
}

fn arg_tree_root() -> Arg {
    Arg::new(A_L_TREE_ROOT)
        .help("The root of the tree of files")
        .num_args(1)
        .value_name("ROOT")
        .value_hint(ValueHint::DirPath)
        .value_parser(value_parser!(PathBuf))
        .required(true)
}

fn arg_rglob_input() -> Arg {
    Arg::new(A_L_RGLOB_INPUT)
        .help("Glob matched against the file names below the root")
        .num_args(1)
        .value_name("GLOB")
        .default_value(DEFAULT_RGLOB_INPUT)
        .long(A_L_RGLOB_INPUT)
}

fn arg_allow_cf_checker_warnings() -> Arg {
    Arg::new(A_L_ALLOW_CF_CHECKER_WARNINGS)
        .help("Do not fail files for CF checker warnings")
        .action(ArgAction::SetTrue)
        .long(A_L_ALLOW_CF_CHECKER_WARNINGS)
}

fn arg_continue_on_error() -> Arg {
    Arg::new(A_L_CONTINUE_ON_ERROR)
        .help("Validate all files, instead of stopping at the first failure")
        .action(ArgAction::SetTrue)
        .long(A_L_CONTINUE_ON_ERROR)
}

fn arg_report() -> Arg {
    Arg::new(A_L_REPORT)
        .help("Write the full report as JSON to this file")
        .num_args(1)
        .value_name("FILE")
        .value_hint(ValueHint::FilePath)
        .value_parser(value_parser!(PathBuf))
        .long(A_L_REPORT)
}

fn arg_write_in_drs() -> Arg {
    Arg::new(A_L_WRITE_IN_DRS)
        .help("If the file passes validation, also write it into the DRS tree below this root; existing files are never overwritten")
        .num_args(1)
        .value_name("ROOT")
        .value_hint(ValueHint::DirPath)
        .value_parser(value_parser!(PathBuf))
        .long(A_L_WRITE_IN_DRS)
}

fn arg_db_dir() -> Arg {
    Arg::new(A_L_DB_DIR)
        .help("The directory holding the database entries")
        .num_args(1)
        .value_name("DIR")
        .value_hint(ValueHint::DirPath)
        .value_parser(value_parser!(PathBuf))
        .long(A_L_DB_DIR)
        .required(true)
}

fn arg_frequency_metadata_key() -> Arg {
    Arg::new(A_L_FREQUENCY_METADATA_KEY)
        .help("The attribute holding the frequency")
        .num_args(1)
        .value_name("KEY")
        .long(A_L_FREQUENCY_METADATA_KEY)
}

fn arg_no_time_axis_frequency() -> Arg {
    Arg::new(A_L_NO_TIME_AXIS_FREQUENCY)
        .help("The frequency of files without a time axis")
        .num_args(1)
        .value_name("FREQUENCY")
        .long(A_L_NO_TIME_AXIS_FREQUENCY)
}

fn subcommand_validate_file() -> Command {
    Command::new(SC_VALIDATE_FILE)
        .about("Validates a single file")
        .arg(arg_file())
        .arg(arg_allow_cf_checker_warnings())
        .arg(arg_report())
        .arg(arg_write_in_drs())
}

fn subcommand_validate_tree() -> Command {
    Command::new(SC_VALIDATE_TREE)
        .about("Validates all files in a DRS tree")
        .arg(arg_tree_root())
        .arg(arg_rglob_input())
        .arg(arg_allow_cf_checker_warnings())
        .arg(arg_continue_on_error())
        .arg(arg_report())
}

fn subcommand_db() -> Command {
    Command::new(SC_DB)
        .about("Manages the database of validated files")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new(SC_DB_CREATE)
                .about("Creates a new database from a tree of files")
                .arg(arg_tree_root())
                .arg(arg_db_dir())
                .arg(arg_rglob_input())
                .arg(arg_frequency_metadata_key())
                .arg(arg_no_time_axis_frequency()),
        )
        .subcommand(
            Command::new(SC_DB_VALIDATE)
                .about("Re-validates all entries of a database")
                .arg(arg_db_dir()),
        )
}

pub fn args_matcher() -> Command {
    command!()
        .about(
            "Validates input4MIPs forcing data files \
            against the input4MIPs CVs and DRS, \
            and maintains a database of validated files.",
        )
        .bin_name(clap::crate_name!())
        .help_expected(true)
        .disable_version_flag(true)
        .subcommand_required(false)
        .arg(arg_version())
        .arg(arg_quiet())
        .arg(arg_verbose())
        .arg(arg_cv_source())
        .arg(arg_force_download())
        .arg(arg_n_workers())
        .arg(arg_cf_checker())
        .arg(arg_bnds_coord_indicator())
        .subcommand(subcommand_validate_file())
        .subcommand(subcommand_validate_tree())
        .subcommand(subcommand_db())
}

/// Lets the command line win over the configured settings.
pub fn apply_overrides(args: &ArgMatches, settings: &mut Settings) {
    if let Some(cv_source) = args.get_one::<String>(A_L_CV_SOURCE) {
        settings.input4mips_cv_source = Some(cv_source.clone());
    }
    if args.get_flag(A_L_FORCE_DOWNLOAD) {
        settings.input4mips_cv_source_force_download = true;
    }
    if let Some(n_workers) = args.get_one::<usize>(A_L_N_WORKERS) {
        settings.n_workers = (*n_workers).max(1);
    }
    if let Some(command) = args.get_one::<String>(A_L_CF_CHECKER) {
        settings.cf_checker_command.clone_from(command);
    }
    if let Some(indicators) = args.get_many::<String>(A_L_BNDS_COORD_INDICATOR) {
        settings.bnds_coord_indicators = indicators.cloned().collect();
    }
}

pub fn frequency_keys(args: &ArgMatches) -> FrequencyKeys {
    let mut keys = FrequencyKeys::default();
    if let Some(key) = args.get_one::<String>(A_L_FREQUENCY_METADATA_KEY) {
        keys.frequency_key.clone_from(key);
    }
    if let Some(frequency) = args.get_one::<String>(A_L_NO_TIME_AXIS_FREQUENCY) {
        keys.no_time_axis_frequency.clone_from(frequency);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_consistent() {
        args_matcher().debug_assert();
    }

    #[test]
    fn test_overrides() {
        let args = args_matcher().get_matches_from([
            "input4mips-validation",
            "--cv-source",
            "gh:main",
            "-j",
            "3",
            "validate-tree",
            "/data",
            "--continue-on-error",
        ]);
        let mut settings = Settings::builder().build();
        apply_overrides(&args, &mut settings);
        assert_eq!(settings.input4mips_cv_source.as_deref(), Some("gh:main"));
        assert_eq!(settings.n_workers, 3);
        let (name, sub) = args.subcommand().unwrap();
        assert_eq!(name, SC_VALIDATE_TREE);
        assert!(sub.get_flag(A_L_CONTINUE_ON_ERROR));
        assert_eq!(
            sub.get_one::<String>(A_L_RGLOB_INPUT).map(String::as_str),
            Some(DEFAULT_RGLOB_INPUT)
        );
    }

    #[test]
    fn test_db_create_frequency_keys() {
        let args = args_matcher().get_matches_from([
            "input4mips-validation",
            "db",
            "create",
            "/data",
            "--db-dir",
            "/db",
            "--frequency-metadata-key",
            "freq",
        ]);
        let (_, db) = args.subcommand().unwrap();
        let (name, create) = db.subcommand().unwrap();
        assert_eq!(name, SC_DB_CREATE);
        let keys = frequency_keys(create);
        assert_eq!(keys.frequency_key, "freq");
        assert_eq!(keys.no_time_axis_frequency, "fx");
    }

    #[test]
    fn test_validate_file_write_in_drs() {
        let args = args_matcher().get_matches_from([
            "input4mips-validation",
            "validate-file",
            "/incoming/co2.nc",
            "--write-in-drs",
            "/data",
        ]);
        let (name, sub) = args.subcommand().unwrap();
        assert_eq!(name, SC_VALIDATE_FILE);
        assert_eq!(
            sub.get_one::<PathBuf>(A_L_WRITE_IN_DRS),
            Some(&PathBuf::from("/data"))
        );
    }
}
