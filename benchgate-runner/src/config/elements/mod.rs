// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Individual configuration elements.

mod retry_policy;
mod timeouts;
mod workers;

pub(super) use retry_policy::deserialize_retry_policy;
pub use retry_policy::{BackoffIter, RetryPolicy};
pub use timeouts::*;
pub use workers::*;
