// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Data Reference Syntax (DRS):
//! how directory and file names derive from metadata.
//!
//! Templates consist of literal text, `<key>` placeholders
//! and `[...]` optional sections, e.g.:
//!
//! ```text
//! <activity_id>/<mip_era>/<target_mip>/<institution_id>/<source_id>/<realm>/<frequency>/<variable_id>/<grid_label>/v<version>
//! <variable_id>_<activity_id>_<dataset_category>_<target_mip>_<source_id>_<grid_label>[_<time_range>].nc
//! ```
//!
//! Directory segments take metadata values unchanged.
//! File names take them with `_` and `.` replaced by `-`,
//! and then allow nothing but `[a-zA-Z0-9-]`.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use thiserror::Error;

use crate::model::{
    metadata::{Attributes, DatasetMetadata},
    validation_result::{ErrorKind, ValidationResult},
};

/// Replacements applied to values before they go into a file name.
pub const KNOWN_REPLACEMENTS: [(char, char); 2] = [('_', '-'), ('.', '-')];

pub const VERSION_KEY: &str = "version";

pub const RULE_FILE_WRITTEN_ACCORDING_TO_DRS: &str = "file_written_according_to_drs";
pub const RULE_FILENAME_ACCORDING_TO_DRS: &str = "filename_according_to_drs";

static VALID_FILENAME_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]+$").expect("static regex is valid"));

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Unclosed placeholder in DRS template '{0}'")]
    UnclosedPlaceholder(String),
    #[error("Unclosed optional section in DRS template '{0}'")]
    UnclosedOptional(String),
    #[error("Nested optional sections are not supported, in DRS template '{0}'")]
    NestedOptional(String),
    #[error("Optional section without a placeholder in DRS template '{0}'")]
    OptionalWithoutKey(String),
    #[error("Empty placeholder in DRS template '{0}'")]
    EmptyKey(String),
    #[error("Optional sections are not supported in directory templates: '{0}'")]
    OptionalInDirectory(String),
    #[error("Failed to compile the regex for DRS template '{template}': {error}")]
    Regex {
        template: String,
        #[source]
        error: regex::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Metadata value for DRS key '{0}' is missing")]
    MissingField(String),
    #[error("Value {value:?} of DRS key '{key}' contains characters not allowed in file names (only [a-zA-Z0-9-])")]
    InvalidFilenameCharacters { key: String, value: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Path '{path}' does not match the DRS pattern '{pattern}'")]
pub struct ParseError {
    pub path: String,
    pub pattern: String,
}

/// Replaces the characters that are not allowed in file names,
/// but commonly appear in metadata values.
///
/// ```
/// # use input4mips_validation::drs::apply_known_replacements;
/// assert_eq!(apply_known_replacements("mole_fraction_of_co2"), "mole-fraction-of-co2");
/// assert_eq!(apply_known_replacements("CR-CMIP-0.2.0"), "CR-CMIP-0-2-0");
/// ```
#[must_use]
pub fn apply_known_replacements(value: &str) -> String {
    value
        .chars()
        .map(|chr| {
            KNOWN_REPLACEMENTS
                .iter()
                .find(|(from, _to)| *from == chr)
                .map_or(chr, |(_from, to)| *to)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Key(String),
    Optional(Vec<Piece>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Directory,
    Filename,
}

/// One parsed template, either a single directory segment or the file name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Template {
    raw: String,
    pieces: Vec<Piece>,
}

impl Template {
    fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut stack: Vec<Vec<Piece>> = vec![vec![]];
        let mut literal = String::new();
        let mut chars = raw.chars();
        let flush = |literal: &mut String, stack: &mut Vec<Vec<Piece>>| {
            if !literal.is_empty() {
                if let Some(top) = stack.last_mut() {
                    top.push(Piece::Literal(std::mem::take(literal)));
                }
            }
        };
        while let Some(chr) = chars.next() {
            match chr {
                '<' => {
                    flush(&mut literal, &mut stack);
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('>') => break,
                            Some(key_chr) => key.push(key_chr),
                            None => return Err(TemplateError::UnclosedPlaceholder(raw.to_owned())),
                        }
                    }
                    if key.is_empty() {
                        return Err(TemplateError::EmptyKey(raw.to_owned()));
                    }
                    if let Some(top) = stack.last_mut() {
                        top.push(Piece::Key(key));
                    }
                }
                '[' => {
                    flush(&mut literal, &mut stack);
                    if stack.len() > 1 {
                        return Err(TemplateError::NestedOptional(raw.to_owned()));
                    }
                    stack.push(vec![]);
                }
                ']' => {
                    flush(&mut literal, &mut stack);
                    if stack.len() < 2 {
                        // a lone closing bracket is just text
                        literal.push(chr);
                        continue;
                    }
                    let section = stack.pop().unwrap_or_default();
                    if !section.iter().any(|piece| matches!(piece, Piece::Key(_))) {
                        return Err(TemplateError::OptionalWithoutKey(raw.to_owned()));
                    }
                    if let Some(top) = stack.last_mut() {
                        top.push(Piece::Optional(section));
                    }
                }
                other => literal.push(other),
            }
        }
        flush(&mut literal, &mut stack);
        if stack.len() != 1 {
            return Err(TemplateError::UnclosedOptional(raw.to_owned()));
        }
        Ok(Self {
            raw: raw.to_owned(),
            pieces: stack.pop().unwrap_or_default(),
        })
    }

    fn keys(&self) -> impl Iterator<Item = &str> {
        fn collect<'a>(pieces: &'a [Piece], keys: &mut Vec<&'a str>) {
            for piece in pieces {
                match piece {
                    Piece::Key(key) => keys.push(key),
                    Piece::Optional(inner) => collect(inner, keys),
                    Piece::Literal(_) => {}
                }
            }
        }
        let mut keys = vec![];
        collect(&self.pieces, &mut keys);
        keys.into_iter()
    }

    fn uses_key(&self, key: &str) -> bool {
        self.keys().any(|used| used == key)
    }

    fn render(&self, fields: &Attributes, part: Part) -> Result<String, BuildError> {
        let mut out = String::new();
        render_pieces(&self.pieces, fields, part, false, &mut out)?;
        Ok(out)
    }

    /// Appends a regex for this template to `regex`,
    /// recording which key each capture group belongs to.
    fn append_regex(&self, part: Part, regex: &mut String, groups: &mut Vec<String>) {
        append_pieces_regex(&self.pieces, part, regex, groups);
    }
}

/// Renders pieces; returns `Ok(false)` from within an optional section
/// if one of its keys has no value.
fn render_pieces(
    pieces: &[Piece],
    fields: &Attributes,
    part: Part,
    optional: bool,
    out: &mut String,
) -> Result<bool, BuildError> {
    for piece in pieces {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Key(key) => {
                let Some(value) = fields.get(key).filter(|value| !value.is_empty()) else {
                    if optional {
                        return Ok(false);
                    }
                    return Err(BuildError::MissingField(key.clone()));
                };
                match part {
                    Part::Directory => out.push_str(value),
                    Part::Filename => {
                        let converted = apply_known_replacements(value);
                        if !VALID_FILENAME_VALUE.is_match(&converted) {
                            return Err(BuildError::InvalidFilenameCharacters {
                                key: key.clone(),
                                value: value.clone(),
                            });
                        }
                        out.push_str(&converted);
                    }
                }
            }
            Piece::Optional(inner) => {
                let mut section = String::new();
                if render_pieces(inner, fields, part, true, &mut section)? {
                    out.push_str(&section);
                }
            }
        }
    }
    Ok(true)
}

fn append_pieces_regex(pieces: &[Piece], part: Part, regex: &mut String, groups: &mut Vec<String>) {
    for piece in pieces {
        match piece {
            Piece::Literal(text) => regex.push_str(&regex::escape(text)),
            Piece::Key(key) => {
                let value_pattern = match part {
                    Part::Directory => "[^/]+",
                    Part::Filename => "[a-zA-Z0-9-]+",
                };
                regex.push_str(&format!("(?P<g{}>{value_pattern})", groups.len()));
                groups.push(key.clone());
            }
            Piece::Optional(inner) => {
                regex.push_str("(?:");
                append_pieces_regex(inner, part, regex, groups);
                regex.push_str(")?");
            }
        }
    }
}

/// Where a file belongs according to the DRS,
/// relative to the root of the DRS tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    pub directory: PathBuf,
    pub filename: String,
}

impl PathSpec {
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }
}

#[derive(Debug, Clone)]
pub struct DataReferenceSyntax {
    directory: Vec<Template>,
    filename: Template,
    regex: Regex,
    /// Key of each capture group, by group index
    groups: Vec<String>,
    /// Number of groups belonging to the directory part
    directory_groups: usize,
    filename_regex: Regex,
    filename_groups: Vec<String>,
}

impl DataReferenceSyntax {
    /// # Errors
    ///
    /// If one of the templates is malformed.
    pub fn new(directory_template: &str, filename_template: &str) -> Result<Self, TemplateError> {
        let directory = directory_template
            .trim_end_matches('/')
            .split('/')
            .map(Template::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if directory
            .iter()
            .flat_map(|segment| segment.pieces.iter())
            .any(|piece| matches!(piece, Piece::Optional(_)))
        {
            return Err(TemplateError::OptionalInDirectory(
                directory_template.to_owned(),
            ));
        }
        let filename = Template::parse(filename_template)?;

        let mut regex_str = String::from("(?:^|/)");
        let mut groups = vec![];
        for (idx, segment) in directory.iter().enumerate() {
            if idx > 0 {
                regex_str.push('/');
            }
            segment.append_regex(Part::Directory, &mut regex_str, &mut groups);
        }
        let directory_groups = groups.len();
        regex_str.push('/');
        filename.append_regex(Part::Filename, &mut regex_str, &mut groups);
        regex_str.push('$');
        let regex = Regex::new(&regex_str).map_err(|error| TemplateError::Regex {
            template: format!("{directory_template}/{filename_template}"),
            error,
        })?;

        let mut filename_regex = String::from("^");
        let mut filename_groups = vec![];
        filename.append_regex(Part::Filename, &mut filename_regex, &mut filename_groups);
        filename_regex.push('$');
        let filename_regex = Regex::new(&filename_regex).map_err(|error| TemplateError::Regex {
            template: filename_template.to_owned(),
            error,
        })?;

        Ok(Self {
            directory,
            filename,
            regex,
            groups,
            directory_groups,
            filename_regex,
            filename_groups,
        })
    }

    #[must_use]
    pub fn directory_template(&self) -> String {
        self.directory
            .iter()
            .map(|segment| segment.raw.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    #[must_use]
    pub fn filename_template(&self) -> &str {
        &self.filename.raw
    }

    /// All metadata keys the DRS uses.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<&str> {
        self.directory
            .iter()
            .chain(std::iter::once(&self.filename))
            .flat_map(Template::keys)
            .collect()
    }

    /// Computes where a file with these metadata values belongs.
    ///
    /// # Errors
    ///
    /// - a (non-optional) key has no value
    /// - a file name value contains characters that are not allowed
    pub fn build_path_from_fields(&self, fields: &Attributes) -> Result<PathSpec, BuildError> {
        let mut directory = PathBuf::new();
        for segment in &self.directory {
            directory.push(segment.render(fields, Part::Directory)?);
        }
        let filename = self.filename.render(fields, Part::Filename)?;
        Ok(PathSpec {
            directory,
            filename,
        })
    }

    /// Computes where a file with this metadata belongs.
    ///
    /// # Errors
    ///
    /// See [`Self::build_path_from_fields`].
    /// Note that the version has to be part of the metadata.
    pub fn build_path(&self, metadata: &DatasetMetadata) -> Result<PathSpec, BuildError> {
        self.build_path_from_fields(&metadata.drs_fields())
    }

    /// Extracts metadata values from a path that follows the DRS.
    ///
    /// Leading directories before the DRS part are ignored.
    /// Where a key appears in both the directory and the file name,
    /// the directory value is kept, as it is unconverted.
    ///
    /// # Errors
    ///
    /// If the path does not match the DRS.
    pub fn parse_path(&self, path: &Path) -> Result<Attributes, ParseError> {
        let path_str = path.to_string_lossy().replace('\\', "/");
        let parse_error = || ParseError {
            path: path.display().to_string(),
            pattern: self.regex.as_str().to_owned(),
        };
        let captures = self.regex.captures(&path_str).ok_or_else(parse_error)?;
        let mut fields = Attributes::new();
        for (idx, key) in self.groups.iter().enumerate() {
            let Some(value) = captures.name(&format!("g{idx}")) else {
                continue;
            };
            if idx >= self.directory_groups {
                if let Some(existing) = fields.get(key) {
                    if apply_known_replacements(existing) != value.as_str() {
                        tracing::debug!(
                            "DRS key '{key}' differs between directory ({existing:?}) \
                            and file name ({:?}) of '{path_str}'; keeping the directory value",
                            value.as_str()
                        );
                    }
                    continue;
                }
            }
            fields.insert(key.clone(), value.as_str().to_owned());
        }
        Ok(fields)
    }

    /// Extracts metadata values from the file name of `path` alone.
    ///
    /// Values come out converted, as they are in the file name.
    ///
    /// # Errors
    ///
    /// If the file name does not match the DRS.
    pub fn parse_filename(&self, path: &Path) -> Result<Attributes, ParseError> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let captures = self
            .filename_regex
            .captures(&filename)
            .ok_or_else(|| ParseError {
                path: path.display().to_string(),
                pattern: self.filename_regex.as_str().to_owned(),
            })?;
        Ok(self
            .filename_groups
            .iter()
            .enumerate()
            .filter_map(|(idx, key)| {
                captures
                    .name(&format!("g{idx}"))
                    .map(|value| (key.clone(), value.as_str().to_owned()))
            })
            .collect())
    }

    /// The DRS derived identifier of the dataset a file belongs to:
    /// the directory segments without the version, joined with `.`.
    ///
    /// # Errors
    ///
    /// If a key used in the directory has no value.
    pub fn master_id(&self, fields: &Attributes) -> Result<String, BuildError> {
        let segments = self
            .directory
            .iter()
            .filter(|segment| !segment.uses_key(VERSION_KEY))
            .map(|segment| segment.render(fields, Part::Directory))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(segments.join("."))
    }

    /// Checks that `path` ends with the path the DRS prescribes for `metadata`.
    #[must_use]
    pub fn validate_file_written_according_to_drs(
        &self,
        path: &Path,
        metadata: &DatasetMetadata,
    ) -> ValidationResult {
        self.validate_path_suffix(RULE_FILE_WRITTEN_ACCORDING_TO_DRS, path, metadata, |spec| {
            spec.path()
        })
    }

    /// Like [`Self::validate_file_written_according_to_drs`],
    /// but only checks the file name,
    /// for files that are not (yet) within a DRS tree.
    #[must_use]
    pub fn validate_filename_according_to_drs(
        &self,
        path: &Path,
        metadata: &DatasetMetadata,
    ) -> ValidationResult {
        self.validate_path_suffix(RULE_FILENAME_ACCORDING_TO_DRS, path, metadata, |spec| {
            PathBuf::from(&spec.filename)
        })
    }

    fn validate_path_suffix(
        &self,
        rule: &str,
        path: &Path,
        metadata: &DatasetMetadata,
        expected: impl Fn(&PathSpec) -> PathBuf,
    ) -> ValidationResult {
        let target = path.display().to_string();
        let spec = match self.build_path(metadata) {
            Ok(spec) => spec,
            Err(BuildError::MissingField(key)) => {
                return ValidationResult::fail(
                    rule,
                    ErrorKind::MissingAttribute,
                    format!("Can not derive the DRS path, attribute '{key}' is missing"),
                )
                .with_target(target)
            }
            Err(err) => {
                return ValidationResult::fail(rule, ErrorKind::DrsMismatch, err.to_string())
                    .with_target(target)
            }
        };
        let expected = expected(&spec);
        if path.ends_with(&expected) {
            ValidationResult::pass(rule, format!("Path ends with '{}'", expected.display()))
                .with_target(target)
        } else {
            ValidationResult::fail(
                rule,
                ErrorKind::DrsMismatch,
                format!(
                    "File is at '{}', but according to its metadata and the DRS \
                    it should end with '{}'",
                    path.display(),
                    expected.display()
                ),
            )
            .with_target(target)
        }
    }
}
