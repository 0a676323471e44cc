// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the maintenance coordinator.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Lifecycle state of the background loops.
///
/// Use [`super::Maintenance::state()`] to check the current state or
/// [`super::Maintenance::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceState {
    /// Built, loops not spawned yet
    Created,
    /// Trimmer, decay and refresher loops are running
    Running,
    /// Shutdown signalled, waiting for loops to finish their iteration
    ShuttingDown,
    /// Every loop has exited
    Stopped,
}

impl std::fmt::Display for MaintenanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("No redis_url configured")]
    MissingRedisUrl,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one manual [`super::Maintenance::run_once`] pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub sessions_trimmed: usize,
    pub popularity_dropped: u64,
    pub refresh: crate::refresher::RefreshStep,
}
