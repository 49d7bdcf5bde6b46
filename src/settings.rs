// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{env, path::PathBuf};

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    cf_checker,
    cvs::loading::{DEFAULT_RETRIES, DEFAULT_TIMEOUT},
    loader::DEFAULT_BNDS_COORD_INDICATORS,
    tools,
};

/// Base name of the optional settings file in the working directory;
/// any extension the `config` crate knows works (`.yml`, `.toml`, `.json`, ...).
pub const SETTINGS_FILE: &str = "input4mips-validation";
pub const ENV_PREFIX: &str = "INPUT4MIPS_VALIDATION";
const CACHE_DIR_NAME: &str = "input4mips-validation";
const FALLBACK_CACHE_DIR: &str = ".input4mips-validation-cache";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load the basic/low-level configuration data: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid value for setting '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// The settings as read, before defaults are filled in.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct IntermediateSettings {
    pub user_agent: Option<String>,
    pub input4mips_cv_source: Option<String>,
    pub input4mips_cv_source_force_download: bool,
    pub cache_dir: Option<PathBuf>,
    pub retries: Option<u32>,
    pub timeout: Option<u64>,
    pub n_workers: Option<usize>,
    pub cf_checker_command: Option<String>,
    pub bnds_coord_indicators: Option<Vec<String>>,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct Settings {
    #[builder(default = tools::DEFAULT_USER_AGENT.to_owned())]
    pub user_agent: String,
    /// See [`crate::cvs::CvSource::parse`]
    #[builder(default)]
    pub input4mips_cv_source: Option<String>,
    #[builder(default)]
    pub input4mips_cv_source_force_download: bool,
    #[builder(default = default_cache_dir())]
    pub cache_dir: PathBuf,
    #[builder(default = DEFAULT_RETRIES)]
    pub retries: u32,
    /// Per request, in milliseconds
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: u64,
    #[builder(default = 1)]
    pub n_workers: usize,
    #[builder(default = cf_checker::DEFAULT_COMMAND.to_owned())]
    pub cf_checker_command: String,
    #[builder(default = DEFAULT_BNDS_COORD_INDICATORS.map(ToOwned::to_owned).to_vec())]
    pub bnds_coord_indicators: Vec<String>,
}

/// `~/.cache/input4mips-validation`,
/// or a hidden directory in the working directory if there is no home.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .map_or_else(
            || PathBuf::from(FALLBACK_CACHE_DIR),
            |cache| cache.join(CACHE_DIR_NAME),
        )
}

impl IntermediateSettings {
    /// Fills in the defaults and checks the values.
    ///
    /// # Errors
    ///
    /// If a value is out of its valid range.
    pub fn finalize(self) -> Result<Settings, SettingsError> {
        let defaults = Settings::builder().build();
        if self.n_workers == Some(0) {
            return Err(SettingsError::InvalidValue {
                key: "n_workers",
                reason: "needs to be at least 1".to_owned(),
            });
        }
        if self
            .cf_checker_command
            .as_deref()
            .is_some_and(|command| command.trim().is_empty())
        {
            return Err(SettingsError::InvalidValue {
                key: "cf_checker_command",
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(Settings {
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            input4mips_cv_source: self
                .input4mips_cv_source
                .filter(|source| !source.trim().is_empty()),
            input4mips_cv_source_force_download: self.input4mips_cv_source_force_download,
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            retries: self.retries.unwrap_or(defaults.retries),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            n_workers: self.n_workers.unwrap_or(defaults.n_workers),
            cf_checker_command: self.cf_checker_command.unwrap_or(defaults.cf_checker_command),
            bnds_coord_indicators: self
                .bnds_coord_indicators
                .unwrap_or(defaults.bnds_coord_indicators),
        })
    }
}

fn from_config(settings_loader: Config) -> Result<Settings, SettingsError> {
    let intermediate_settings = settings_loader.try_deserialize::<IntermediateSettings>()?;

    tracing::debug!("{intermediate_settings:#?}");

    intermediate_settings.finalize()
}

/// # Errors
///
/// - the config loader fails to build
/// - settings failed to load and deserialize into intermediate settings
/// - the intermediate settings fail to finalize into the final settings
pub fn load() -> Result<Settings, SettingsError> {
    let settings_loader = Config::builder()
        // Add in `./input4mips-validation.yml` (or `.toml`, `.json`, ...), if present
        .add_source(config::File::with_name(SETTINGS_FILE).required(false))
        // Add in settings from the environment,
        // e.g. `INPUT4MIPS_VALIDATION_N_WORKERS=4 input4mips-validation ...`
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("bnds_coord_indicators"),
        )
        .build()?;

    from_config(settings_loader)
}
