// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod apply;
pub mod delete;
pub mod list;
pub mod stats;
pub mod up;
pub mod validate;
