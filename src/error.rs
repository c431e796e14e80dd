//! Error type for the estimator

/// Faults raised while bringing an estimator up
///
/// Every variant is terminal: the estimator never retries on its own, the
/// caller decides whether to restart or enter a fault-indication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// IMU or magnetometer did not answer its connectivity check or stopped
    /// responding during calibration
    #[error("sensor unavailable")]
    SensorUnavailable,

    /// Motion processor firmware failed to load
    #[error("motion processor init failed (status {status})")]
    MotionProcessorInitFailure {
        /// Vendor status code returned by the firmware loader
        status: u8,
    },

    /// A configuration value is outside its allowed range
    #[error("invalid settings: {0}")]
    InvalidSettings(&'static str),

    /// Fusion was requested before a bias was established
    #[error("estimator not calibrated")]
    NotCalibrated,
}
