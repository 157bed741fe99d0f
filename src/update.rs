//! Batch updates over installed packages with bounded concurrency.
//!
//! Every package is attempted; a failure is recorded against its name and
//! never stops the rest of the batch.

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use log::{debug, warn};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::settings::DEFAULT_MAX_PARALLEL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { from: String, to: String },
    Unchanged { version: String },
    Failed { error: String },
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Updated { from, to } => write!(f, "updated {} -> {}", from, to),
            UpdateOutcome::Unchanged { version } => write!(f, "up to date ({})", version),
            UpdateOutcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEntry {
    pub name: String,
    pub outcome: UpdateOutcome,
}

/// Outcome of a batch, one entry per package, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub entries: Vec<UpdateEntry>,
}

impl UpdateReport {
    pub fn outcome(&self, name: &str) -> Option<&UpdateOutcome> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.outcome)
    }

    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, UpdateOutcome::Failed { .. }))
            .count()
    }
}

/// The single-package update pipeline a batch runs for each name.
#[allow(async_fn_in_trait)]
pub trait UpdatePackage {
    async fn update_package(&self, name: &str) -> Result<UpdateOutcome>;
}

pub struct UpdateCoordinator {
    max_parallel: usize,
}

impl Default for UpdateCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PARALLEL)
    }
}

impl UpdateCoordinator {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    /// Runs up to `max_parallel` updates at a time over `names`.
    #[tracing::instrument(skip(self, updater, names), fields(count = names.len()))]
    pub async fn run<U: UpdatePackage>(&self, updater: &U, names: Vec<String>) -> UpdateReport {
        let results = Mutex::new(Vec::with_capacity(names.len()));

        stream::iter(names)
            .for_each_concurrent(self.max_parallel, |name| {
                let results = &results;
                async move {
                    debug!("Updating {}...", name);
                    let outcome = match updater.update_package(&name).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!("Failed to update {}: {:#}", name, e);
                            UpdateOutcome::Failed {
                                error: format!("{:#}", e),
                            }
                        }
                    };
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(UpdateEntry { name, outcome });
                }
            })
            .await;

        let mut entries = results
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        UpdateReport { entries }
    }
}
