// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Inference of metadata from data and from the CVs.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::LazyLock,
};

use chrono::{Datelike, NaiveDateTime, TimeDelta};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    cvs::{Category, ControlledVocabularySet, DEFAULT_ACTIVITY_ID},
    drs::apply_known_replacements,
    loader::VariableProcessor,
    model::{
        dataset::{Dataset, TimeAxis},
        metadata::{is_known_attribute, Attributes, DatasetMetadata, MetadataError, MULTIPLE_VARIABLES},
        validation_result::{ErrorKind, ValidationResult, ValidationResults},
    },
    tools,
};

pub const DEFAULT_CONVENTIONS: &str = "CF-1.7";
pub const RULE_METADATA_SOURCES_AGREE: &str = "metadata_sources_agree";

const FROM_FILENAME: &str = "the file name";

const GHG_VARIABLES: [&str; 46] = [
    "mole_fraction_of_carbon_dioxide_in_air",
    "mole_fraction_of_methane_in_air",
    "mole_fraction_of_nitrous_oxide_in_air",
    "mole_fraction_of_pfc116_in_air",
    "mole_fraction_of_pfc218_in_air",
    "mole_fraction_of_pfc3110_in_air",
    "mole_fraction_of_pfc4112_in_air",
    "mole_fraction_of_pfc5114_in_air",
    "mole_fraction_of_pfc6116_in_air",
    "mole_fraction_of_pfc7118_in_air",
    "mole_fraction_of_pfc318_in_air",
    "mole_fraction_of_carbon_tetrachloride_in_air",
    "mole_fraction_of_carbon_tetrafluoride_in_air",
    "mole_fraction_of_cfc11_in_air",
    "mole_fraction_of_cfc113_in_air",
    "mole_fraction_of_cfc114_in_air",
    "mole_fraction_of_cfc115_in_air",
    "mole_fraction_of_cfc12_in_air",
    "mole_fraction_of_dichloromethane_in_air",
    "mole_fraction_of_methyl_bromide_in_air",
    "mole_fraction_of_hcc140a_in_air",
    "mole_fraction_of_methyl_chloride_in_air",
    "mole_fraction_of_chloroform_in_air",
    "mole_fraction_of_halon1211_in_air",
    "mole_fraction_of_halon1301_in_air",
    "mole_fraction_of_halon2402_in_air",
    "mole_fraction_of_hcfc141b_in_air",
    "mole_fraction_of_hcfc142b_in_air",
    "mole_fraction_of_hcfc22_in_air",
    "mole_fraction_of_hfc125_in_air",
    "mole_fraction_of_hfc134a_in_air",
    "mole_fraction_of_hfc143a_in_air",
    "mole_fraction_of_hfc152a_in_air",
    "mole_fraction_of_hfc227ea_in_air",
    "mole_fraction_of_hfc23_in_air",
    "mole_fraction_of_hfc236fa_in_air",
    "mole_fraction_of_hfc245fa_in_air",
    "mole_fraction_of_hfc32_in_air",
    "mole_fraction_of_hfc365mfc_in_air",
    "mole_fraction_of_hfc4310mee_in_air",
    "mole_fraction_of_nitrogen_trifluoride_in_air",
    "mole_fraction_of_sulfur_hexafluoride_in_air",
    "mole_fraction_of_sulfuryl_fluoride_in_air",
    "mole_fraction_of_cfc11_eq_in_air",
    "mole_fraction_of_cfc12_eq_in_air",
    "mole_fraction_of_hfc134a_eq_in_air",
];

/// Variable name (CF standard name) to `dataset_category`.
pub static VARIABLE_DATASET_CATEGORY_MAP: LazyLock<BTreeMap<&'static str, &'static str>> =
    LazyLock::new(|| {
        let mut map: BTreeMap<&str, &str> = GHG_VARIABLES
            .into_iter()
            .map(|variable| (variable, "GHGConcentrations"))
            .collect();
        map.extend([
            ("tos", "SSTsAndSeaIce"),
            ("siconc", "SSTsAndSeaIce"),
            ("sftof", "SSTsAndSeaIce"),
            ("solar_irradiance_per_unit_wavelength", "solar"),
            ("solar_irradiance", "solar"),
        ]);
        map
    });

/// Variable name (CF standard name) to `realm`.
pub static VARIABLE_REALM_MAP: LazyLock<BTreeMap<&'static str, &'static str>> =
    LazyLock::new(|| {
        let mut map: BTreeMap<&str, &str> = GHG_VARIABLES
            .into_iter()
            .map(|variable| (variable, "atmos"))
            .collect();
        map.extend([
            ("tos", "ocean"),
            ("siconc", "seaIce"),
            ("sftof", "ocean"),
            ("areacello", "ocean"),
            ("solar_irradiance_per_unit_wavelength", "atmos"),
            ("solar_irradiance", "atmos"),
            ("areacella", "atmos"),
        ]);
        map
    });

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Could not determine '{field}': {reason}")]
    MissingRequiredField { field: String, reason: String },
    #[error("More than one value is possible for '{field}': {candidates:?}")]
    Ambiguous {
        field: String,
        candidates: Vec<String>,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl InferenceError {
    fn missing(field: &str, reason: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(
    Debug, Display, EnumString, EnumIter, AsRefStr, Clone, Copy, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum Frequency {
    #[strum(serialize = "fx")]
    Fixed,
    #[strum(serialize = "monC")]
    MonthlyClimatology,
    #[strum(serialize = "yr")]
    Yearly,
    #[strum(serialize = "mon")]
    Monthly,
    #[strum(serialize = "day")]
    Daily,
    #[strum(serialize = "3hr")]
    ThreeHourly,
}

impl Frequency {
    /// The `strftime` format of the start and end of a time range.
    #[must_use]
    pub const fn time_range_format(self) -> Option<&'static str> {
        match self {
            Self::Fixed => None,
            Self::Yearly => Some("%Y"),
            Self::Monthly | Self::MonthlyClimatology => Some("%Y%m"),
            Self::Daily => Some("%Y%m%d"),
            Self::ThreeHourly => Some("%Y%m%d%H%M"),
        }
    }
}

fn month_index(time: &NaiveDateTime) -> i64 {
    i64::from(time.year()) * 12 + i64::from(time.month0())
}

fn month_diff((start, end): &(NaiveDateTime, NaiveDateTime)) -> i64 {
    month_index(end) - month_index(start)
}

/// Infers the frequency of a dataset from its time axis.
///
/// Non-climatologies are judged by their time bounds,
/// or by the spacing of the time points if there are no bounds.
/// Returns `None` if no known frequency fits.
#[must_use]
pub fn infer_frequency(dataset: &Dataset) -> Option<Frequency> {
    let Some(time) = &dataset.time else {
        return Some(Frequency::Fixed);
    };
    let point_steps: Vec<(NaiveDateTime, NaiveDateTime)> = time
        .points
        .windows(2)
        .map(|pair| (pair[0], pair[1]))
        .collect();
    if time.climatology {
        return (!point_steps.is_empty() && point_steps.iter().all(|step| month_diff(step) == 1))
            .then_some(Frequency::MonthlyClimatology);
    }
    let steps = time.bounds.clone().unwrap_or(point_steps);
    if steps.is_empty() {
        return None;
    }
    let all = |pred: &dyn Fn(&(NaiveDateTime, NaiveDateTime)) -> bool| steps.iter().all(pred);
    if all(&|step| month_diff(step) == 12) {
        Some(Frequency::Yearly)
    } else if all(&|step| month_diff(step) == 1 && step.1 - step.0 >= TimeDelta::days(28)) {
        Some(Frequency::Monthly)
    } else if all(&|step| step.1 - step.0 == TimeDelta::days(1)) {
        Some(Frequency::Daily)
    } else if all(&|step| step.1 - step.0 == TimeDelta::hours(3)) {
        Some(Frequency::ThreeHourly)
    } else {
        None
    }
}

/// Formats the time range covered by `time`, as used in file names.
///
/// Climatologies span their bounds, with the exclusive end
/// rolled back one day, and get a `-clim` suffix.
#[must_use]
pub fn time_range(time: &TimeAxis, frequency: Frequency) -> Option<String> {
    let format = frequency.time_range_format()?;
    let (start, end) = if frequency == Frequency::MonthlyClimatology {
        let bounds = time.bounds.as_ref()?;
        let start = bounds.iter().map(|bound| bound.0).min()?;
        let mut end = bounds.iter().map(|bound| bound.1).max()?;
        if end.day() == 1 {
            end -= TimeDelta::days(1);
        }
        (start, end)
    } else {
        (*time.points.iter().min()?, *time.points.iter().max()?)
    };
    let mut range = format!("{}-{}", start.format(format), end.format(format));
    if frequency == Frequency::MonthlyClimatology {
        range.push_str("-clim");
    }
    Some(range)
}

/// The least a data producer has to tell about a dataset;
/// the rest gets inferred.
#[derive(Debug, Clone, TypedBuilder)]
pub struct DataProducerMinimum {
    #[builder(setter(into))]
    pub grid_label: String,
    #[builder(setter(into))]
    pub nominal_resolution: String,
    #[builder(setter(into))]
    pub source_id: String,
    #[builder(setter(into))]
    pub target_mip: String,
    /// Any further attributes to set explicitly
    #[builder(default)]
    pub extra: Attributes,
}

impl DataProducerMinimum {
    fn explicit_attributes(&self) -> Attributes {
        let mut attributes = self.extra.clone();
        for (key, value) in [
            ("grid_label", &self.grid_label),
            ("nominal_resolution", &self.nominal_resolution),
            ("source_id", &self.source_id),
            ("target_mip", &self.target_mip),
        ] {
            attributes.insert(key.to_owned(), value.clone());
        }
        attributes
    }
}

/// Inferred metadata, plus the disagreements between its sources.
#[derive(Debug, Clone)]
pub struct InferredMetadata {
    pub metadata: DatasetMetadata,
    /// Warnings about values from lower priority sources that were dropped
    pub discrepancies: ValidationResults,
}

/// Attributes collected from sources of descending priority.
struct Layered {
    values: Attributes,
    origins: BTreeMap<String, &'static str>,
    discrepancies: ValidationResults,
}

impl Layered {
    fn new() -> Self {
        Self {
            values: Attributes::new(),
            origins: BTreeMap::new(),
            discrepancies: ValidationResults::new(),
        }
    }

    /// Adds the values of a source with lower priority than all before.
    fn add_source(&mut self, origin: &'static str, attributes: Attributes) {
        for (key, value) in attributes {
            if !is_known_attribute(&key) || value.is_empty() {
                continue;
            }
            match self.values.get(&key) {
                None => {
                    self.values.insert(key.clone(), value);
                    self.origins.insert(key, origin);
                }
                Some(kept)
                    if kept != &value
                        && apply_known_replacements(kept) != apply_known_replacements(&value) =>
                {
                    let kept_origin = self.origins.get(&key).copied().unwrap_or_default();
                    tracing::warn!(
                        "Using {key}={kept:?} from {kept_origin}, ignoring {key}={value:?} from {origin}"
                    );
                    self.discrepancies.push(
                        ValidationResult::warning(
                            RULE_METADATA_SOURCES_AGREE,
                            ErrorKind::Discrepancy,
                            format!(
                                "Using {key}={kept:?} from {kept_origin}, \
                                ignoring {key}={value:?} from {origin}"
                            ),
                        )
                        .with_target(key.as_str()),
                    );
                }
                Some(_) => {}
            }
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Sets a value only if no source supplied one.
    ///
    /// A value from the file name that only differs
    /// by the file name character replacements gets its raw form back.
    fn infer(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.values.get(key) {
            None => {
                self.values.insert(key.to_owned(), value);
                self.origins.insert(key.to_owned(), "inference");
            }
            Some(existing)
                if self.origins.get(key) == Some(&FROM_FILENAME)
                    && existing != &value
                    && apply_known_replacements(existing) == apply_known_replacements(&value) =>
            {
                self.values.insert(key.to_owned(), value);
            }
            Some(_) => {}
        }
    }
}

fn infer_variable_id(
    dataset: &Dataset,
    variable_processor: &VariableProcessor,
) -> Result<String, InferenceError> {
    let data_variables = variable_processor.data_variables(dataset);
    match data_variables.as_slice() {
        [single] => Ok((*single).to_owned()),
        [] => Err(InferenceError::missing(
            "variable_id",
            "the dataset holds no data variable",
        )),
        many => Err(InferenceError::Ambiguous {
            field: "variable_id".to_owned(),
            candidates: many.iter().map(|name| (*name).to_owned()).collect(),
        }),
    }
}

fn infer_activity_id(
    source_id: &str,
    cv: &ControlledVocabularySet,
) -> Result<String, InferenceError> {
    if let Some(declared) = cv
        .source_id_entry(source_id)
        .and_then(|entry| entry.activity_id())
    {
        return Ok(declared.to_owned());
    }
    let matching: Vec<&str> = cv
        .activity_id_entries()
        .filter(|activity| activity.restricts_source_ids() && activity.accepts_source_id(source_id))
        .map(|activity| activity.id())
        .collect();
    match matching.as_slice() {
        [single] => Ok((*single).to_owned()),
        [] => Ok(DEFAULT_ACTIVITY_ID.to_owned()),
        many => Err(InferenceError::Ambiguous {
            field: "activity_id".to_owned(),
            candidates: many.iter().map(|id| (*id).to_owned()).collect(),
        }),
    }
}

/// Completes the metadata of a dataset.
///
/// Values are taken from, in descending priority:
/// `minimum`, the global attributes of `dataset`,
/// the DRS-parsed `filepath` and finally inference.
/// Disagreeing sources never fail; the lower priority value is dropped
/// and reported as a warning.
///
/// # Errors
///
/// - [`InferenceError::MissingRequiredField`] if a required value is neither given nor inferable
/// - [`InferenceError::Ambiguous`] if more than one value could be inferred
/// - [`InferenceError::Metadata`] if the result is inconsistent with the CVs
#[tracing::instrument(skip_all, fields(source_id = %minimum.source_id))]
pub fn from_data_producer_minimum(
    minimum: &DataProducerMinimum,
    dataset: &Dataset,
    filepath: Option<&Path>,
    cv: &ControlledVocabularySet,
    variable_processor: &VariableProcessor,
) -> Result<InferredMetadata, InferenceError> {
    let mut layered = Layered::new();
    layered.add_source("the explicit arguments", minimum.explicit_attributes());
    layered.add_source("the file content", dataset.string_attributes());
    if let Some(filepath) = filepath {
        let drs = cv.drs();
        match drs
            .parse_path(filepath)
            .or_else(|_| drs.parse_filename(filepath))
        {
            Ok(fields) => layered.add_source(FROM_FILENAME, fields),
            Err(err) => tracing::debug!("Not using the file name for inference: {err}"),
        }
    }

    if layered.origins.get("variable_id").is_none_or(|origin| *origin == FROM_FILENAME) {
        match infer_variable_id(dataset, variable_processor) {
            Ok(variable_id) => layered.infer("variable_id", variable_id),
            Err(err) if layered.get("variable_id").is_none() => return Err(err),
            Err(_) => {}
        }
    }
    let variable_id = layered.get("variable_id").unwrap_or_default().to_owned();
    if variable_id == MULTIPLE_VARIABLES {
        for key in ["dataset_category", "realm"] {
            if layered.get(key).is_none() {
                return Err(InferenceError::missing(
                    key,
                    format!("it has to be given explicitly for variable_id={MULTIPLE_VARIABLES:?}"),
                ));
            }
        }
    }
    for (key, map) in [
        ("dataset_category", &*VARIABLE_DATASET_CATEGORY_MAP),
        ("realm", &*VARIABLE_REALM_MAP),
    ] {
        if layered.get(key).is_none() {
            let value = map.get(variable_id.as_str()).ok_or_else(|| {
                InferenceError::missing(key, format!("no known {key} for variable_id={variable_id:?}"))
            })?;
            layered.infer(key, *value);
        }
    }

    let frequency = match layered.get("frequency") {
        Some(frequency) => frequency.to_owned(),
        None => infer_frequency(dataset)
            .ok_or_else(|| {
                InferenceError::missing("frequency", "the time axis fits no known frequency")
            })?
            .to_string(),
    };
    layered.infer("frequency", frequency.as_str());
    if let (Ok(frequency), Some(time)) = (frequency.parse::<Frequency>(), &dataset.time) {
        if let Some(range) = time_range(time, frequency) {
            layered.infer("time_range", range);
        }
    }

    let source_id = minimum.source_id.clone();
    let activity_id = match layered.get("activity_id") {
        Some(activity_id) => activity_id.to_owned(),
        None => infer_activity_id(&source_id, cv)?,
    };
    layered.infer("activity_id", activity_id);

    let source = cv.source_id_entry(&source_id);
    for category in [
        Category::InstitutionId,
        Category::Contact,
        Category::FurtherInfoUrl,
        Category::LicenseId,
        Category::MipEra,
        Category::SourceVersion,
    ] {
        let key = category.as_str();
        if layered.get(key).is_some() {
            continue;
        }
        let value = source
            .and_then(|entry| entry.determined_value(category))
            .ok_or_else(|| {
                InferenceError::missing(key, format!("source_id={source_id:?} is not in the CVs"))
            })?;
        layered.infer(key, value);
    }
    if layered.get("license").is_none() {
        let license_id = layered.get("license_id").unwrap_or_default().to_owned();
        let license = cv.license_entry(&license_id).ok_or_else(|| {
            InferenceError::missing(
                "license",
                format!("license_id={license_id:?} is not in the CVs"),
            )
        })?;
        layered.infer("license", license.conditions.clone());
    }

    layered.infer("Conventions", DEFAULT_CONVENTIONS);
    layered.infer("creation_date", tools::generate_creation_timestamp());
    layered.infer("tracking_id", tools::generate_tracking_id());
    let version: String = layered
        .get("creation_date")
        .unwrap_or_default()
        .chars()
        .take(10)
        .filter(char::is_ascii_digit)
        .collect();
    layered.infer("version", version);

    let Layered {
        values,
        discrepancies,
        ..
    } = layered;
    let metadata = DatasetMetadata::new(values, cv)?;
    Ok(InferredMetadata {
        metadata,
        discrepancies,
    })
}

impl DatasetMetadata {
    /// See [`from_data_producer_minimum`].
    ///
    /// # Errors
    ///
    /// See [`from_data_producer_minimum`].
    pub fn from_data_producer_minimum(
        minimum: &DataProducerMinimum,
        dataset: &Dataset,
        filepath: Option<&Path>,
        cv: &ControlledVocabularySet,
        variable_processor: &VariableProcessor,
    ) -> Result<InferredMetadata, InferenceError> {
        from_data_producer_minimum(minimum, dataset, filepath, cv, variable_processor)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn ts(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    /// Monthly data over `months` months, starting in January 2000.
    pub fn monthly_axis(months: u32) -> TimeAxis {
        let start = |month: u32| {
            let year = 2000 + month / 12;
            ts(&format!("{year}-{:02}-01T00:00:00", month % 12 + 1))
        };
        let bounds: Vec<_> = (0..months).map(|m| (start(m), start(m + 1))).collect();
        TimeAxis {
            name: "time".to_owned(),
            points: bounds
                .iter()
                .map(|(from, _)| *from + TimeDelta::days(14))
                .collect(),
            bounds: Some(bounds),
            climatology: false,
        }
    }

    /// A single-variable monthly dataset.
    pub fn co2_dataset(months: u32) -> Dataset {
        let mut dataset: Dataset = serde_json::from_str(
            r#"{
                "dimensions": {"lat": 1},
                "variables": {
                    "mole_fraction_of_carbon_dioxide_in_air": {"dimensions": ["time", "lat"]},
                    "lat": {"dimensions": ["lat"]},
                    "time_bnds": {"dimensions": ["time", "bnds"]}
                }
            }"#,
        )
        .unwrap();
        dataset.dimensions.insert("time".to_owned(), months as usize);
        dataset.dimensions.insert("bnds".to_owned(), 2);
        dataset.time = Some(monthly_axis(months));
        dataset
    }

    pub fn minimum() -> DataProducerMinimum {
        DataProducerMinimum::builder()
            .grid_label("gn")
            .nominal_resolution("10000 km")
            .source_id("CR-CMIP-0-2-0")
            .target_mip("CMIP")
            .build()
    }
}
