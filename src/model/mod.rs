// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod database_entry;
pub mod dataset;
pub mod metadata;
pub mod validation_result;
