// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for benchgate, a harness that runs code patches against test suites in
//! isolated environments.
//!
//! The basic flow is: load a [`dataset`], build a [`runner::RunContext`] around an
//! [`environment::EnvironmentProvider`], then hand tasks to a [`runner::InstanceRunner`]. Each
//! instance goes through the [`pipeline`], its logs are turned into statuses by a
//! [`parser`], and the statuses are judged ([`judge`]) or reconciled ([`stability`]).

pub mod config;
pub mod dataset;
pub mod environment;
pub mod errors;
pub mod judge;
pub mod parser;
pub mod pipeline;
pub mod platform;
pub mod reporter;
pub mod runner;
pub mod stability;
pub mod store;
