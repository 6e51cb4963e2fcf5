use serde::{Deserialize, Serialize};

use crate::error::MeterError;

/// How many hours to keep the coarse history for
pub const HISTORY_HOURS: usize = 48;

/// Length of one averaging interval in minutes.
///
/// This also controls the coarseness of the coarse history: every interval
/// contributes exactly one averaged entry.
pub const HISTORY_MINUTE_INTERVAL: usize = 4;

/// Highest rate at which raw power samples are taken (one read takes ~330 ms)
pub const MAX_SAMPLES_PER_SECOND: usize = 3;

/// Slots of the fine buffer: all raw samples of one interval plus the
/// sentinel slot of the ring buffer.
pub const FINE_SLOTS: usize = MAX_SAMPLES_PER_SECOND * 60 * HISTORY_MINUTE_INTERVAL + 1;

/// Slots of the coarse buffer: one average per interval for
/// [`HISTORY_HOURS`] plus the sentinel slot.
pub const COARSE_SLOTS: usize = HISTORY_HOURS * (60 / HISTORY_MINUTE_INTERVAL) + 1;

const DEFAULT_INTERVAL_MS: u32 = (HISTORY_MINUTE_INTERVAL * 60 * 1000) as u32;

/// Smallest spacing at which one full interval of samples still fits into
/// the fine buffer (334 ms for the default geometry).
const DEFAULT_MIN_SAMPLE_SPACING_MS: u32 =
    DEFAULT_INTERVAL_MS.div_ceil((FINE_SLOTS - 1) as u32);

/// Runtime tunables of the meter driver.
///
/// All durations are in milliseconds so the struct stays trivially
/// serializable with postcard.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MeterConfig {
    /// Length of one averaging interval
    pub interval_ms: u32,
    /// Pause between two successive register reads
    pub read_period_ms: u32,
    /// How long to wait for a response before giving up on a request
    pub response_timeout_ms: u32,
    /// Minimum spacing between two accepted raw power samples
    pub min_sample_spacing_ms: u32,
    /// Failed reset exchanges tolerated before an energy reset is given up
    pub reset_max_attempts: u8,
    /// Accepted deviation of the verified energy from the expected value
    pub reset_tolerance_kwh: f32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            read_period_ms: 50,
            response_timeout_ms: 1_000,
            min_sample_spacing_ms: DEFAULT_MIN_SAMPLE_SPACING_MS,
            reset_max_attempts: 5,
            reset_tolerance_kwh: 0.01,
        }
    }
}

impl MeterConfig {
    /// Check the values for settings the driver cannot work with.
    pub fn validate(&self) -> Result<(), MeterError> {
        if self.interval_ms == 0 {
            return Err(MeterError::InvalidConfig("interval_ms must be positive"));
        }
        if self.response_timeout_ms == 0 {
            return Err(MeterError::InvalidConfig(
                "response_timeout_ms must be positive",
            ));
        }
        if self.min_sample_spacing_ms == 0 {
            return Err(MeterError::InvalidConfig(
                "min_sample_spacing_ms must be positive",
            ));
        }
        if self.min_sample_spacing_ms > self.interval_ms {
            return Err(MeterError::InvalidConfig(
                "min_sample_spacing_ms must not exceed interval_ms",
            ));
        }
        if self.reset_max_attempts == 0 {
            return Err(MeterError::InvalidConfig(
                "reset_max_attempts must be at least 1",
            ));
        }
        // Written this way round so NaN is rejected as well.
        if !(self.reset_tolerance_kwh >= 0.0) {
            return Err(MeterError::InvalidConfig(
                "reset_tolerance_kwh must be a non-negative number",
            ));
        }
        Ok(())
    }

    /// Most samples one interval can accept at the configured spacing.
    pub fn max_samples_per_interval(&self) -> u32 {
        self.interval_ms.div_ceil(self.min_sample_spacing_ms.max(1))
    }

    /// Check that a full interval of samples fits into a fine buffer holding
    /// `fine_capacity` entries, so intervals only ever close on their deadline.
    pub fn validate_for_capacity(&self, fine_capacity: usize) -> Result<(), MeterError> {
        self.validate()?;
        if self.max_samples_per_interval() as usize > fine_capacity {
            return Err(MeterError::InvalidConfig(
                "sample spacing admits more samples per interval than the fine history holds",
            ));
        }
        Ok(())
    }

    /// Load a persisted configuration and validate it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MeterError> {
        let config: Self = postcard::from_bytes(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration into `buf`, returning the used part.
    pub fn to_slice<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], MeterError> {
        Ok(postcard::to_slice(self, buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        assert_eq!(FINE_SLOTS - 1, 720);
        assert_eq!(COARSE_SLOTS, 48 * 15 + 1);
        assert_eq!(MeterConfig::default().interval_ms, 4 * 60 * 1000);
    }

    #[test]
    fn test_default_is_valid() {
        assert!(MeterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_spacing_fits_fine_history() {
        let config = MeterConfig::default();
        assert_eq!(config.min_sample_spacing_ms, 334);
        assert_eq!(config.max_samples_per_interval(), 719);
        assert!(config.validate_for_capacity(FINE_SLOTS - 1).is_ok());

        let too_dense = MeterConfig {
            min_sample_spacing_ms: 333,
            ..config
        };
        assert_eq!(too_dense.max_samples_per_interval(), 721);
        assert!(matches!(
            too_dense.validate_for_capacity(FINE_SLOTS - 1),
            Err(MeterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let zero_interval = MeterConfig {
            interval_ms: 0,
            ..MeterConfig::default()
        };
        assert!(matches!(
            zero_interval.validate(),
            Err(MeterError::InvalidConfig(_))
        ));

        let no_attempts = MeterConfig {
            reset_max_attempts: 0,
            ..MeterConfig::default()
        };
        assert!(no_attempts.validate().is_err());

        let nan_tolerance = MeterConfig {
            reset_tolerance_kwh: f32::NAN,
            ..MeterConfig::default()
        };
        assert!(nan_tolerance.validate().is_err());
    }

    #[test]
    fn test_persisted_config_is_loaded() {
        let config = MeterConfig {
            read_period_ms: 120,
            reset_max_attempts: 2,
            ..MeterConfig::default()
        };
        let mut buf = [0u8; 64];
        let used = config.to_slice(&mut buf).unwrap().len();

        let loaded = MeterConfig::from_bytes(&buf[..used]).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_truncated_config_is_rejected() {
        assert!(matches!(
            MeterConfig::from_bytes(&[0x01]),
            Err(MeterError::Encode(_))
        ));
    }
}
