// SPDX-FileCopyrightText: 2021-2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

mod cli;

use std::path::{Path, PathBuf};

use clap::{crate_name, ArgMatches};
use cli_utils::BoxResult;
use input4mips_validation::{
    cf_checker::ExternalCfChecker,
    cvs::{loading::CvLoader, ControlledVocabularySet, CvSource},
    database::{
        creation::{write_entries_parallel, EntryContext},
        Database,
    },
    files_finder::{self, RGlob},
    loader::{CopyWriter, JsonHeaderLoader, VariableProcessor},
    model::{database_entry::ValidationStatus, validation_result::Status},
    settings::{self, Settings},
    validation::{
        file::{validate_file, write_in_drs, ValidationContext},
        tree::validate_tree,
    },
};

use cli_utils::logging;
use serde::Serialize;
use tracing::instrument;
use tracing_subscriber::filter::LevelFilter;

#[allow(clippy::print_stdout)]
fn print_version_and_exit(quiet: bool) {
    if !quiet {
        print!("{} ", clap::crate_name!());
    }
    println!("{}", input4mips_validation::VERSION);
    std::process::exit(0);
}

async fn load_cvs(settings: &Settings) -> BoxResult<ControlledVocabularySet> {
    let source = CvSource::from_settings(settings)?;
    let loader = CvLoader::from_settings(settings)?;
    let cvs = loader
        .load(&source, settings.input4mips_cv_source_force_download)
        .await?;
    for problem in cvs.self_check() {
        tracing::warn!("CVs '{}': {problem}", cvs.version());
    }
    Ok(cvs)
}

fn write_report(path: Option<&PathBuf>, report: &impl Serialize) -> BoxResult<()> {
    if let Some(path) = path {
        tracing::info!("Writing report to '{}' ...", path.display());
        std::fs::write(path, serde_json::to_vec_pretty(report)?)?;
    }
    Ok(())
}

fn rglob(args: &ArgMatches) -> BoxResult<RGlob> {
    let pattern = args
        .get_one::<String>(cli::A_L_RGLOB_INPUT)
        .map_or(input4mips_validation::validation::tree::DEFAULT_RGLOB_INPUT, String::as_str);
    Ok(RGlob::new(pattern)?)
}

fn required_path<'a>(args: &'a ArgMatches, key: &str) -> BoxResult<&'a Path> {
    args.get_one::<PathBuf>(key)
        .map(PathBuf::as_path)
        .ok_or_else(|| format!("Missing argument '{key}'").into())
}

async fn run_validate_file(settings: &Settings, args: &ArgMatches) -> BoxResult<()> {
    let file = required_path(args, cli::A_L_FILE)?;
    let cvs = load_cvs(settings).await?;
    let cf_checker = ExternalCfChecker::new(&settings.cf_checker_command);
    let variable_processor = VariableProcessor::new(settings.bnds_coord_indicators.clone());
    let context = ValidationContext::builder()
        .cv(&cvs)
        .loader(&JsonHeaderLoader)
        .cf_checker(&cf_checker)
        .variable_processor(&variable_processor)
        .allow_cf_checker_warnings(args.get_flag(cli::A_L_ALLOW_CF_CHECKER_WARNINGS))
        .build();

    let validation = validate_file(file, &context)?;
    write_report(args.get_one::<PathBuf>(cli::A_L_REPORT), &validation.results)?;
    if validation.results.has_failures() {
        return Err(format!("'{}' is invalid:\n{}", file.display(), validation.results).into());
    }
    tracing::info!("'{}' is valid ({})", file.display(), validation.status());
    if let Some(root) = args.get_one::<PathBuf>(cli::A_L_WRITE_IN_DRS) {
        write_in_drs(&validation, &cvs, root, &CopyWriter)?;
    }
    Ok(())
}

async fn run_validate_tree(settings: &Settings, args: &ArgMatches) -> BoxResult<()> {
    let root = required_path(args, cli::A_L_TREE_ROOT)?;
    let rglob_input = rglob(args)?;
    let cvs = load_cvs(settings).await?;
    let cf_checker = ExternalCfChecker::new(&settings.cf_checker_command);
    let variable_processor = VariableProcessor::new(settings.bnds_coord_indicators.clone());
    let context = ValidationContext::builder()
        .cv(&cvs)
        .loader(&JsonHeaderLoader)
        .cf_checker(&cf_checker)
        .variable_processor(&variable_processor)
        .allow_cf_checker_warnings(args.get_flag(cli::A_L_ALLOW_CF_CHECKER_WARNINGS))
        .build();

    let report = validate_tree(
        root,
        &rglob_input,
        &context,
        args.get_flag(cli::A_L_CONTINUE_ON_ERROR),
        settings.n_workers,
    )?;
    write_report(args.get_one::<PathBuf>(cli::A_L_REPORT), &report)?;
    if report.summary_status() == Status::Fail {
        return Err(format!("The tree below '{}' holds invalid files", root.display()).into());
    }
    Ok(())
}

async fn run_db_create(settings: &Settings, args: &ArgMatches) -> BoxResult<()> {
    let root = required_path(args, cli::A_L_TREE_ROOT)?;
    let db_dir = required_path(args, cli::A_L_DB_DIR)?;
    let rglob_input = rglob(args)?;
    let frequency_keys = cli::frequency_keys(args);
    let cvs = load_cvs(settings).await?;
    let variable_processor = VariableProcessor::new(settings.bnds_coord_indicators.clone());

    let database = Database::create(db_dir)?;
    let filepaths = files_finder::find_recursive(root, &rglob_input)?;
    let context = EntryContext {
        cv: &cvs,
        frequency_keys: &frequency_keys,
        variable_processor: &variable_processor,
        loader: &JsonHeaderLoader,
    };
    let counts = write_entries_parallel(&database, filepaths, &context, settings.n_workers)?;
    let n_failed = database
        .load_all()?
        .iter()
        .filter(|entry| entry.validation_status == ValidationStatus::Failed)
        .count();
    tracing::info!(
        "Wrote the database to '{}': {counts:?}, {n_failed} failed",
        database.dir().display()
    );
    Ok(())
}

fn run_db_validate(settings: &Settings, args: &ArgMatches) -> BoxResult<()> {
    let db_dir = required_path(args, cli::A_L_DB_DIR)?;
    let database = Database::open(db_dir)?;
    let entries = database.validate_database(settings.n_workers)?;
    let failed: Vec<_> = entries
        .iter()
        .filter(|entry| entry.validation_status == ValidationStatus::Failed)
        .map(|entry| entry.filepath.display().to_string())
        .collect();
    let counts = database.upsert_all(entries)?;
    tracing::info!("Validated the database '{}': {counts:?}", db_dir.display());
    if !failed.is_empty() {
        return Err(format!("Invalid database entries:\n{}", failed.join("\n")).into());
    }
    Ok(())
}

#[tokio::main]
#[instrument]
async fn main() -> BoxResult<()> {
    let log_reload_handle = logging::setup(crate_name!())?;
    let args = cli::args_matcher().get_matches();

    let quiet = args.get_flag(cli::A_L_QUIET);
    let version = args.get_flag(cli::A_L_VERSION);
    if version {
        print_version_and_exit(quiet);
    }

    let verbose = args.get_flag(cli::A_L_VERBOSE);

    let log_level = if verbose {
        LevelFilter::TRACE
    } else if quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };
    logging::set_log_level_tracing(&log_reload_handle, log_level)?;

    let mut run_settings = settings::load()?;
    cli::apply_overrides(&args, &mut run_settings);

    match args.subcommand() {
        Some((cli::SC_VALIDATE_FILE, sub_args)) => run_validate_file(&run_settings, sub_args).await,
        Some((cli::SC_VALIDATE_TREE, sub_args)) => run_validate_tree(&run_settings, sub_args).await,
        Some((cli::SC_DB, db_args)) => match db_args.subcommand() {
            Some((cli::SC_DB_CREATE, sub_args)) => run_db_create(&run_settings, sub_args).await,
            Some((cli::SC_DB_VALIDATE, sub_args)) => run_db_validate(&run_settings, sub_args),
            _ => Err("Unknown database command; see --help".into()),
        },
        _ => Err("No command given; see --help".into()),
    }
}
