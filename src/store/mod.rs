// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ranked store adapter.
//!
//! - [`RankedStore`]: the capability every component is written against
//! - [`redis::RedisStore`]: production backend
//! - [`memory::MemoryStore`]: in-process backend (tests, single-node use)
//! - [`keys`]: where each structure lives

pub mod keys;
pub mod memory;
pub mod redis;
pub mod traits;

pub use traits::{Aggregate, RangeOrder, RankedStore, StoreError};
