//! Core types and configuration for the estimator

use nalgebra::Vector3;

use crate::error::Error;
use crate::math::{DEG_TO_RAD, RAD_TO_DEG};

/// One acquisition cycle of inertial data
///
/// Gyroscope in rad/s, accelerometer in m/s², magnetometer in µT. The
/// magnetometer is optional; boards without one leave it `None`.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use tilt_fusion::MargSample;
///
/// let sample = MargSample::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81));
/// assert!(sample.magnetometer.is_none());
///
/// let sample = sample.with_magnetometer(Vector3::new(20.0, 0.0, -40.0));
/// assert!(sample.magnetometer.is_some());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MargSample {
    /// Angular rate in rad/s
    pub gyroscope: Vector3<f32>,
    /// Specific force in m/s²
    pub accelerometer: Vector3<f32>,
    /// Magnetic field in µT, when a magnetometer is fitted
    pub magnetometer: Option<Vector3<f32>>,
}

impl MargSample {
    /// Gyroscope and accelerometer only
    pub fn new(gyroscope: Vector3<f32>, accelerometer: Vector3<f32>) -> Self {
        Self {
            gyroscope,
            accelerometer,
            magnetometer: None,
        }
    }

    /// Attach a magnetometer reading
    pub fn with_magnetometer(mut self, magnetometer: Vector3<f32>) -> Self {
        self.magnetometer = Some(magnetometer);
        self
    }
}

impl Default for MargSample {
    fn default() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }
}

/// Roll, pitch and yaw in radians
///
/// Roll and pitch come out of `atan2` and stay within ±π/2 for the
/// accelerometer estimate. Yaw is either re-anchored by a heading reference
/// or integrated freely, in which case it is not wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Orientation {
    /// Rotation about the X axis
    pub roll: f32,
    /// Rotation about the Y axis
    pub pitch: f32,
    /// Rotation about the Z axis (heading)
    pub yaw: f32,
}

impl Orientation {
    pub fn new(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self { roll, pitch, yaw }
    }

    pub fn roll_degrees(&self) -> f32 {
        self.roll * RAD_TO_DEG
    }

    pub fn pitch_degrees(&self) -> f32 {
        self.pitch * RAD_TO_DEG
    }

    pub fn yaw_degrees(&self) -> f32 {
        self.yaw * RAD_TO_DEG
    }
}

/// Constant per-axis sensor offsets
///
/// Produced once by the calibrator and subtracted from every raw sample
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bias {
    /// Gyroscope offset in rad/s
    pub gyroscope: Vector3<f32>,
    /// Accelerometer offset in m/s², with gravity already removed from Z
    pub accelerometer: Vector3<f32>,
    /// Magnetometer hard-iron offset in µT
    pub magnetometer: Option<Vector3<f32>>,
}

impl Bias {
    /// Bias that leaves samples unchanged
    pub fn zero() -> Self {
        Self::default()
    }

    /// Subtract the offsets from a raw sample
    ///
    /// # Example
    /// ```
    /// use nalgebra::Vector3;
    /// use tilt_fusion::{Bias, MargSample};
    ///
    /// let bias = Bias {
    ///     gyroscope: Vector3::new(0.01, 0.0, 0.0),
    ///     ..Bias::zero()
    /// };
    /// let raw = MargSample::new(Vector3::new(0.01, 0.0, 0.0), Vector3::new(0.0, 0.0, 9.8));
    /// let corrected = bias.apply(&raw);
    /// assert_eq!(corrected.gyroscope, Vector3::zeros());
    /// ```
    pub fn apply(&self, raw: &MargSample) -> MargSample {
        let magnetometer = match (raw.magnetometer, self.magnetometer) {
            (Some(field), Some(hard_iron)) => Some(field - hard_iron),
            (field, _) => field,
        };

        MargSample {
            gyroscope: raw.gyroscope - self.gyroscope,
            accelerometer: raw.accelerometer - self.accelerometer,
            magnetometer,
        }
    }
}

/// Magnetic declination at the installation site
///
/// Look it up for your location; it is added to the magnetic heading to get
/// true heading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Declination {
    pub degrees: f32,
    pub minutes: f32,
}

impl Declination {
    pub fn new(degrees: f32, minutes: f32) -> Self {
        Self { degrees, minutes }
    }

    /// Declination in radians
    pub fn radians(&self) -> f32 {
        (self.degrees + self.minutes / 60.0) * DEG_TO_RAD
    }
}

/// Acquisition cadence, given either as a period or as a rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePeriod {
    Millis(u32),
    Hertz(u32),
}

impl SamplePeriod {
    /// Period in whole milliseconds, used for scheduling
    ///
    /// A rate that does not divide 1000 Hz is truncated here, which is why
    /// [`EstimatorSettings::validate`] rejects it.
    pub fn as_millis(&self) -> u64 {
        match *self {
            SamplePeriod::Millis(ms) => ms as u64,
            SamplePeriod::Hertz(hz) if hz > 0 => (1000 / hz) as u64,
            SamplePeriod::Hertz(_) => 0,
        }
    }

    /// Period in seconds, used as integration step
    ///
    /// Derived from the scheduled period so integration and timing agree.
    pub fn as_secs(&self) -> f32 {
        self.as_millis() as f32 * 0.001
    }
}

impl Default for SamplePeriod {
    fn default() -> Self {
        SamplePeriod::Millis(10)
    }
}

/// Estimator configuration
///
/// # Example
/// ```
/// use tilt_fusion::{Declination, EstimatorSettings, SamplePeriod};
///
/// let settings = EstimatorSettings {
///     calibration_samples: 100,
///     filter_weight: 0.96,                    // trust the accelerometer a bit more
///     sample_period: SamplePeriod::Hertz(100),
///     declination: Declination::new(5.0, 43.0),
///     ..Default::default()
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorSettings {
    /// Number of at-rest samples averaged into the bias
    pub calibration_samples: u32,
    /// Delay between calibration reads in milliseconds
    pub calibration_delay_ms: u32,
    /// Complementary filter weight τ
    ///
    /// Share given to the gyro-integrated tilt. Higher values follow fast
    /// motion better, lower values pull harder towards the accelerometer.
    pub filter_weight: f32,
    /// Yaw dead-band in rad/s
    ///
    /// Without a heading reference, Z rates at or below this magnitude are
    /// dropped. Slow turns are under-reported as a consequence.
    pub yaw_threshold: f32,
    /// Fixed acquisition cadence; also the integration step
    pub sample_period: SamplePeriod,
    /// Magnetic declination applied to magnetometer heading
    pub declination: Declination,
    /// Minimum spacing between reports in milliseconds
    pub report_period_ms: u32,
}

impl EstimatorSettings {
    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<(), Error> {
        if self.calibration_samples == 0 {
            return Err(Error::InvalidSettings("calibration_samples must be at least 1"));
        }
        if !(self.filter_weight > 0.0 && self.filter_weight < 1.0) {
            return Err(Error::InvalidSettings("filter_weight must lie in (0, 1)"));
        }
        if !(self.yaw_threshold >= 0.0 && self.yaw_threshold.is_finite()) {
            return Err(Error::InvalidSettings("yaw_threshold must be finite and >= 0"));
        }
        if self.sample_period.as_millis() == 0 {
            return Err(Error::InvalidSettings("sample_period must be positive"));
        }
        if let SamplePeriod::Hertz(hz) = self.sample_period {
            if 1000 % hz != 0 {
                return Err(Error::InvalidSettings(
                    "sample_period rate must divide 1000 Hz evenly",
                ));
            }
        }
        if !self.declination.radians().is_finite() {
            return Err(Error::InvalidSettings("declination must be finite"));
        }
        Ok(())
    }

    /// Integration step in seconds
    pub fn dt(&self) -> f32 {
        self.sample_period.as_secs()
    }
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            calibration_samples: 500,
            calibration_delay_ms: 1,
            filter_weight: 0.98,
            yaw_threshold: 0.03,
            sample_period: SamplePeriod::default(),
            declination: Declination::default(),
            report_period_ms: 250,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = EstimatorSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.filter_weight, 0.98);
        assert!((settings.dt() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_settings_rejections() {
        let bad = [
            EstimatorSettings {
                calibration_samples: 0,
                ..Default::default()
            },
            EstimatorSettings {
                filter_weight: 1.0,
                ..Default::default()
            },
            EstimatorSettings {
                filter_weight: 0.0,
                ..Default::default()
            },
            EstimatorSettings {
                yaw_threshold: -0.1,
                ..Default::default()
            },
            EstimatorSettings {
                sample_period: SamplePeriod::Millis(0),
                ..Default::default()
            },
            EstimatorSettings {
                sample_period: SamplePeriod::Hertz(0),
                ..Default::default()
            },
        ];

        for settings in bad {
            assert!(
                matches!(settings.validate(), Err(Error::InvalidSettings(_))),
                "{:?} should be rejected",
                settings
            );
        }
    }

    #[test]
    fn test_sample_period_conversions() {
        assert_eq!(SamplePeriod::Hertz(100).as_millis(), 10);
        assert!((SamplePeriod::Hertz(100).as_secs() - 0.01).abs() < 1e-7);
        assert_eq!(SamplePeriod::Millis(4).as_millis(), 4);
        assert!((SamplePeriod::Millis(4).as_secs() - 0.004).abs() < 1e-7);
        assert_eq!(SamplePeriod::Hertz(250).as_millis(), 4);
        assert!((SamplePeriod::Hertz(250).as_secs() - 0.004).abs() < 1e-7);
    }

    #[test]
    fn test_rates_off_the_millisecond_grid_are_rejected() {
        for hz in [0, 300, 333, 2000] {
            let settings = EstimatorSettings {
                sample_period: SamplePeriod::Hertz(hz),
                ..Default::default()
            };
            assert!(
                matches!(settings.validate(), Err(Error::InvalidSettings(_))),
                "{hz} Hz accepted"
            );
        }

        for hz in [1, 50, 125, 250, 1000] {
            let settings = EstimatorSettings {
                sample_period: SamplePeriod::Hertz(hz),
                ..Default::default()
            };
            assert!(settings.validate().is_ok(), "{hz} Hz rejected");
            assert!((settings.dt() * 1000.0 - settings.sample_period.as_millis() as f32).abs() < 1e-3);
        }
    }

    #[test]
    fn test_declination_radians() {
        let declination = Declination::new(5.0, 30.0);
        assert!((declination.radians() - 5.5f32.to_radians()).abs() < 1e-6);
        assert_eq!(Declination::default().radians(), 0.0);
    }

    #[test]
    fn test_bias_keeps_magnetometer_without_hard_iron() {
        let raw = MargSample::new(Vector3::zeros(), Vector3::zeros())
            .with_magnetometer(Vector3::new(1.0, 2.0, 3.0));
        let corrected = Bias::zero().apply(&raw);
        assert_eq!(corrected.magnetometer, Some(Vector3::new(1.0, 2.0, 3.0)));

        let bias = Bias {
            magnetometer: Some(Vector3::new(1.0, 1.0, 1.0)),
            ..Bias::zero()
        };
        assert_eq!(bias.apply(&raw).magnetometer, Some(Vector3::new(0.0, 1.0, 2.0)));
    }
}
