// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the instance runner, driven by a scripted environment provider.

mod evaluate;
mod fixtures;
mod validate;
