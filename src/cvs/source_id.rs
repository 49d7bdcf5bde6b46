// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use super::{raw::SourceIdValues, Category};

/// One `source_id` of the CVs,
/// together with the values it determines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdEntry {
    id: String,
    values: SourceIdValues,
}

impl SourceIdEntry {
    #[must_use]
    pub const fn new(id: String, values: SourceIdValues) -> Self {
        Self { id, values }
    }

    /// Whether a `source_id` fixes the value of `category`.
    #[must_use]
    pub const fn determines(category: Category) -> bool {
        matches!(
            category,
            Category::InstitutionId
                | Category::Contact
                | Category::FurtherInfoUrl
                | Category::LicenseId
                | Category::MipEra
                | Category::SourceVersion
        )
    }

    /// The value this `source_id` prescribes for `category`, if any.
    #[must_use]
    pub fn determined_value(&self, category: Category) -> Option<&str> {
        let value = match category {
            Category::ActivityId => return self.activity_id(),
            Category::InstitutionId => &self.values.institution_id,
            Category::Contact => &self.values.contact,
            Category::FurtherInfoUrl => &self.values.further_info_url,
            Category::LicenseId => &self.values.license_id,
            Category::MipEra => &self.values.mip_era,
            Category::SourceVersion => &self.values.source_version,
            Category::SourceId
            | Category::TargetMip
            | Category::DatasetCategory
            | Category::Product
            | Category::Frequency
            | Category::GridLabel
            | Category::Realm => return None,
        };
        Some(value)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn activity_id(&self) -> Option<&str> {
        self.values.activity_id.as_deref()
    }

    #[must_use]
    pub fn institution_id(&self) -> &str {
        &self.values.institution_id
    }

    #[must_use]
    pub fn license_id(&self) -> &str {
        &self.values.license_id
    }

    #[must_use]
    pub fn mip_era(&self) -> &str {
        &self.values.mip_era
    }

    #[must_use]
    pub fn contact(&self) -> &str {
        &self.values.contact
    }

    #[must_use]
    pub fn further_info_url(&self) -> &str {
        &self.values.further_info_url
    }

    #[must_use]
    pub fn source_version(&self) -> &str {
        &self.values.source_version
    }
}
