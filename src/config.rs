//! Aggregate configuration for a reader session.

use serde::{Deserialize, Serialize};

use crate::anchor::AnchorConfig;
use crate::chapter_loader::LoaderConfig;
use crate::error::AnchorError;
use crate::location_index::LocationIndexOptions;
use crate::sync::SyncConfig;
use crate::toc::TocLimits;
use crate::tracker::TrackerConfig;

/// Every component's knobs in one place.
///
/// Missing fields fall back to their defaults, so hosts can ship partial JSON:
///
/// ```rust
/// use epub_anchor::ReaderConfig;
///
/// let config = ReaderConfig::from_json(br#"{"sync": {"debounce_ms": 2000}}"#).unwrap();
/// assert_eq!(config.sync.debounce_ms, 2000);
/// assert_eq!(config.index.chunk_size, 1600);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub index: LocationIndexOptions,
    pub toc: TocLimits,
    pub tracker: TrackerConfig,
    pub anchor: AnchorConfig,
    pub sync: SyncConfig,
    pub loader: LoaderConfig,
}

impl ReaderConfig {
    /// Presets sized for memory-constrained hosts.
    pub fn low_memory() -> Self {
        Self {
            index: LocationIndexOptions::low_memory(),
            toc: TocLimits::low_memory(),
            anchor: AnchorConfig::low_memory(),
            ..Self::default()
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, AnchorError> {
        let config: Self =
            serde_json::from_slice(bytes).map_err(|err| AnchorError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, AnchorError> {
        serde_json::to_string_pretty(self).map_err(|err| AnchorError::Config(err.to_string()))
    }

    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> Result<(), AnchorError> {
        if self.index.chunk_size == 0 || self.index.retry_chunk_size == 0 {
            return Err(AnchorError::Config("chunk sizes must be non-zero".into()));
        }
        if self.anchor.middle_start_percent >= self.anchor.middle_end_percent
            || self.anchor.middle_end_percent > 100
        {
            return Err(AnchorError::Config(format!(
                "middle window {}..{} is not a valid percent range",
                self.anchor.middle_start_percent, self.anchor.middle_end_percent
            )));
        }
        let factor = self.anchor.max_extension_factor;
        if factor.is_nan() || factor < 1.0 {
            return Err(AnchorError::Config(
                "max_extension_factor must be at least 1.0".into(),
            ));
        }
        if self.sync.regression_to_percent > self.sync.regression_from_percent {
            return Err(AnchorError::Config(
                "regression_to_percent exceeds regression_from_percent".into(),
            ));
        }
        if !self.tracker.restore_tolerance_percent.is_finite()
            || self.tracker.restore_tolerance_percent < 0.0
        {
            return Err(AnchorError::Config(
                "restore_tolerance_percent must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}
