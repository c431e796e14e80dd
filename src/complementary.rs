//! Complementary filter for roll/pitch with dead-band gated yaw

use nalgebra::ComplexField;

use crate::math::{accelerometer_tilt, magnetic_heading};
use crate::types::{MargSample, Orientation};

/// Default share of the gyro-integrated tilt
pub const DEFAULT_FILTER_WEIGHT: f32 = 0.98;

/// Default yaw dead-band in rad/s
pub const DEFAULT_YAW_THRESHOLD: f32 = 0.03;

/// Software fusion of gyroscope, accelerometer and optional magnetometer
///
/// Roll and pitch blend the gyro-integrated tilt with the accelerometer tilt
/// using a single weight τ. Yaw comes from the magnetometer when one is
/// present. Without one, the Z rate is integrated, and only when it leaves
/// the dead-band; otherwise the yaw drifts freely and nothing corrects it.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use tilt_fusion::{ComplementaryFilter, MargSample};
///
/// let mut filter = ComplementaryFilter::new(0.98, 0.03, 0.0);
///
/// // Board tipped on its side: gravity along +Y
/// let sample = MargSample::new(Vector3::zeros(), Vector3::new(0.0, 9.8, 0.0));
/// for _ in 0..500 {
///     filter.update(&sample, 0.01);
/// }
///
/// let roll = filter.orientation().roll_degrees();
/// assert!((roll - 90.0).abs() < 0.5);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ComplementaryFilter {
    /// Weight τ given to the gyro path
    weight: f32,
    /// Yaw dead-band in rad/s
    yaw_threshold: f32,
    /// Declination in radians
    declination: f32,
    /// Current estimate, also the integration base for the next step
    orientation: Orientation,
}

impl ComplementaryFilter {
    /// Create a filter with weight τ, yaw dead-band (rad/s) and declination (rad)
    pub fn new(weight: f32, yaw_threshold: f32, declination: f32) -> Self {
        Self {
            weight,
            yaw_threshold,
            declination,
            orientation: Orientation::default(),
        }
    }

    /// Advance the estimate by one bias-corrected sample taken `dt` seconds
    /// after the previous one
    pub fn update(&mut self, sample: &MargSample, dt: f32) {
        let gyroscope = sample.gyroscope;
        let previous = self.orientation;

        let (roll_accel, pitch_accel) = accelerometer_tilt(sample.accelerometer);

        let roll_gyro = previous.roll + gyroscope.x * dt;
        let pitch_gyro = previous.pitch + gyroscope.y * dt;

        let tau = self.weight;
        self.orientation.roll = tau * roll_gyro + (1.0 - tau) * roll_accel;
        self.orientation.pitch = tau * pitch_gyro + (1.0 - tau) * pitch_accel;

        match sample.magnetometer {
            Some(field) => {
                self.orientation.yaw = magnetic_heading(field, self.declination);
            }
            None if gyroscope.z.abs() > self.yaw_threshold => {
                self.orientation.yaw += gyroscope.z * dt;
            }
            None => {}
        }
    }

    /// Current estimate in radians
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Overwrite the estimate; the next update integrates from here
    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }

    /// Zero all angles
    pub fn reset(&mut self) {
        self.orientation = Orientation::default();
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn yaw_threshold(&self) -> f32 {
        self.yaw_threshold
    }
}

impl Default for ComplementaryFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_WEIGHT, DEFAULT_YAW_THRESHOLD, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::GRAVITY_STANDARD;
    use core::f32::consts::PI;
    use nalgebra::Vector3;

    const EPSILON: f32 = 1e-6;

    fn level() -> Vector3<f32> {
        Vector3::new(0.0, 0.0, GRAVITY_STANDARD)
    }

    #[test]
    fn test_level_attitude_stays_zero() {
        let mut filter = ComplementaryFilter::default();
        let sample = MargSample::new(Vector3::zeros(), level());

        for _ in 0..100 {
            filter.update(&sample, 0.01);
        }

        let orientation = filter.orientation();
        assert_eq!(orientation.roll, 0.0);
        assert_eq!(orientation.pitch, 0.0);
        assert_eq!(orientation.yaw, 0.0);
    }

    #[test]
    fn test_weight_one_is_pure_gyro() {
        let mut filter = ComplementaryFilter::new(1.0, 0.0, 0.0);
        filter.set_orientation(Orientation::new(0.2, -0.1, 0.0));

        // Accelerometer says something completely different
        let sample = MargSample::new(Vector3::new(0.5, -0.3, 0.0), Vector3::new(3.0, 4.0, 1.0));
        filter.update(&sample, 0.1);

        let orientation = filter.orientation();
        assert!((orientation.roll - (0.2 + 0.05)).abs() < EPSILON);
        assert!((orientation.pitch - (-0.1 - 0.03)).abs() < EPSILON);
    }

    #[test]
    fn test_weight_zero_is_pure_accelerometer() {
        let mut filter = ComplementaryFilter::new(0.0, 0.0, 0.0);
        filter.set_orientation(Orientation::new(1.0, 1.0, 0.0));

        let accel = Vector3::new(3.0, 4.0, 1.0);
        let sample = MargSample::new(Vector3::new(0.5, -0.3, 0.0), accel);
        filter.update(&sample, 0.1);

        let (roll, pitch) = accelerometer_tilt(accel);
        let orientation = filter.orientation();
        assert!((orientation.roll - roll).abs() < EPSILON);
        assert!((orientation.pitch - pitch).abs() < EPSILON);
    }

    #[test]
    fn test_single_step_blend() {
        let mut filter = ComplementaryFilter::new(0.98, 0.03, 0.0);
        let accel = Vector3::new(0.0, GRAVITY_STANDARD, 0.0);
        let sample = MargSample::new(Vector3::new(0.1, 0.0, 0.0), accel);

        filter.update(&sample, 0.01);

        let expected = 0.98 * (0.1 * 0.01) + 0.02 * (PI / 2.0);
        assert!((filter.orientation().roll - expected).abs() < EPSILON);
    }

    #[test]
    fn test_yaw_dead_band_discards_slow_rates() {
        let mut filter = ComplementaryFilter::new(0.98, 0.03, 0.0);
        let sample = MargSample::new(Vector3::new(0.0, 0.0, 0.03), level());

        for _ in 0..1000 {
            filter.update(&sample, 0.01);
        }
        assert_eq!(filter.orientation().yaw, 0.0);

        let sample = MargSample::new(Vector3::new(0.0, 0.0, -0.02), level());
        filter.update(&sample, 0.01);
        assert_eq!(filter.orientation().yaw, 0.0);
    }

    #[test]
    fn test_yaw_integrates_above_dead_band() {
        let mut filter = ComplementaryFilter::new(0.98, 0.03, 0.0);
        let sample = MargSample::new(Vector3::new(0.0, 0.0, 0.5), level());

        let mut previous = filter.orientation().yaw;
        for _ in 0..10 {
            filter.update(&sample, 0.01);
            let yaw = filter.orientation().yaw;
            assert!((yaw - previous - 0.005).abs() < EPSILON);
            previous = yaw;
        }
    }

    #[test]
    fn test_free_yaw_is_not_wrapped() {
        let mut filter = ComplementaryFilter::new(0.98, 0.03, 0.0);
        let sample = MargSample::new(Vector3::new(0.0, 0.0, -1.0), level());

        for _ in 0..100 {
            filter.update(&sample, 0.01);
        }
        assert!((filter.orientation().yaw + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_magnetometer_overrides_integration() {
        let declination = 0.05;
        let mut filter = ComplementaryFilter::new(0.98, 0.03, declination);
        let field = Vector3::new(10.0, 20.0, -30.0);
        let sample = MargSample::new(Vector3::new(0.0, 0.0, 2.0), level()).with_magnetometer(field);

        filter.update(&sample, 0.01);

        let expected = magnetic_heading(field, declination);
        assert!((filter.orientation().yaw - expected).abs() < EPSILON);
        assert!((0.0..2.0 * PI).contains(&filter.orientation().yaw));
    }

    #[test]
    fn test_reset() {
        let mut filter = ComplementaryFilter::default();
        filter.set_orientation(Orientation::new(0.3, 0.2, 0.1));
        filter.reset();
        assert_eq!(filter.orientation(), Orientation::default());
    }
}
