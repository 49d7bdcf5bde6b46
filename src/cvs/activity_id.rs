// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use regex::Regex;

use super::{raw::ActivityIdValues, LoadError};
use crate::files_finder;

/// One `activity_id` of the CVs.
#[derive(Debug, Clone)]
pub struct ActivityIdEntry {
    id: String,
    url: String,
    long_name: String,
    source_id_patterns: Vec<(String, Regex)>,
}

impl ActivityIdEntry {
    /// # Errors
    ///
    /// If one of the `source_id` patterns is not a valid glob.
    pub fn new(id: String, values: ActivityIdValues) -> Result<Self, LoadError> {
        let source_id_patterns = values
            .source_id_patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(&files_finder::glob_to_regex(&pattern))
                    .map(|regex| (pattern.clone(), regex))
                    .map_err(|error| LoadError::SourceIdPattern {
                        activity_id: id.clone(),
                        pattern,
                        error,
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            id,
            url: values.url,
            long_name: values.long_name,
            source_id_patterns,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    pub fn source_id_patterns(&self) -> impl Iterator<Item = &str> {
        self.source_id_patterns
            .iter()
            .map(|(pattern, _regex)| pattern.as_str())
    }

    /// Whether this activity restricts its `source_id`s at all.
    #[must_use]
    pub fn restricts_source_ids(&self) -> bool {
        !self.source_id_patterns.is_empty()
    }

    /// An activity without patterns accepts any `source_id`.
    #[must_use]
    pub fn accepts_source_id(&self, source_id: &str) -> bool {
        !self.restricts_source_ids()
            || self
                .source_id_patterns
                .iter()
                .any(|(_pattern, regex)| regex.is_match(source_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(patterns: &[&str]) -> ActivityIdEntry {
        ActivityIdEntry::new(
            "GHGConcentrations".to_owned(),
            ActivityIdValues {
                url: "https://example.invalid".to_owned(),
                long_name: "GHG".to_owned(),
                source_id_patterns: patterns.iter().map(ToString::to_string).collect(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_accepts_source_id() {
        let ghg = entry(&["CR-*", "UoM-?-0"]);
        assert!(ghg.accepts_source_id("CR-CMIP-0-2-0"));
        assert!(ghg.accepts_source_id("UoM-1-0"));
        assert!(!ghg.accepts_source_id("XX-1-0"));
        assert!(!ghg.accepts_source_id("xCR-1"));
        assert!(entry(&[]).accepts_source_id("XX-1-0"));
    }
}
