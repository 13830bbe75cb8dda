// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! TUI module for the zerowake dashboard.

mod app;

pub use app::run_dashboard;
