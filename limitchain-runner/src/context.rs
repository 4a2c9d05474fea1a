//! Collaborators shared by every run mode.

use tracing::info;

use limitchain_core::data::{DataError, DataProvider, RateGovernor, UniverseProvider};
use limitchain_core::domain::Instrument;
use limitchain_core::store::{Storage, StoreError};

use crate::config::TrackerConfig;
use crate::pipeline::IngestPipeline;
use crate::progress::IngestProgress;

#[derive(Debug, thiserror::Error)]
pub enum UniverseError {
    #[error("fetch instrument universe: {0}")]
    Fetch(#[source] DataError),

    #[error("instrument universe is empty")]
    Empty,

    #[error("store instrument universe: {0}")]
    Store(#[from] StoreError),
}

/// Explicit wiring for one invocation: configuration, providers, storage, observer.
pub struct RunContext<'a> {
    pub config: &'a TrackerConfig,
    pub store: &'a dyn Storage,
    pub provider: &'a dyn DataProvider,
    pub universe: &'a dyn UniverseProvider,
    pub progress: &'a dyn IngestProgress,
}

impl<'a> RunContext<'a> {
    /// Fetch the universe, apply the configured limit, and refresh stored metadata.
    pub fn refresh_universe(&self) -> Result<Vec<Instrument>, UniverseError> {
        let mut instruments = self.universe.instruments().map_err(UniverseError::Fetch)?;
        if let Some(limit) = self.config.universe_limit() {
            instruments.truncate(limit);
        }
        if instruments.is_empty() {
            return Err(UniverseError::Empty);
        }
        self.store.replace_instruments(&instruments)?;
        info!(count = instruments.len(), "universe refreshed");
        Ok(instruments)
    }

    pub fn pipeline(&self) -> IngestPipeline<'a> {
        IngestPipeline::new(
            self.provider,
            self.store,
            &self.config.limits,
            self.progress,
            self.config.ingest.batch_size,
        )
    }

    /// A fresh governor; its budget spans every batch of one run.
    pub fn governor(&self) -> RateGovernor {
        RateGovernor::new(self.config.rate_limit.governor())
    }
}
