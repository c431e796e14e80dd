//! Quaternion AHRS with gain ramp and sensor rejection
//!
//! A third fusion backend next to the complementary filter and the motion
//! processor. The attitude is a unit quaternion driven by the gyroscope and
//! pulled towards the accelerometer (and magnetometer, when fitted) through
//! proportional feedback. Earth axes are North-West-Up.

use nalgebra::{ComplexField, Quaternion, UnitQuaternion, Vector3};

use crate::error::Error;
use crate::math::{DEG_TO_RAD, QuaternionExt, wrap_half_turn};
use crate::types::{MargSample, Orientation};

/// Feedback gain at power-on, ramped down to the configured gain
const INITIAL_GAIN: f32 = 10.0;
/// Duration of the gain ramp in seconds
const INITIALISATION_PERIOD: f32 = 3.0;
/// Fraction of the gyroscope range treated as saturation
const GYROSCOPE_RANGE_FACTOR: f32 = 0.98;
/// Trigger credit recovered for every accepted reading
const RECOVERY_DECREMENT: u32 = 9;

/// Tuning for [`QuaternionAhrs`]
///
/// # Example
/// ```
/// use tilt_fusion::{AhrsSettings, QuaternionAhrs};
///
/// let settings = AhrsSettings {
///     gain: 0.5,
///     gyroscope_range: 34.9,          // ±2000 deg/s part
///     acceleration_rejection: 10.0,
///     magnetic_rejection: 10.0,
///     recovery_trigger_period: 500,   // 5s at 100Hz
/// };
/// let ahrs = QuaternionAhrs::with_settings(settings).unwrap();
/// assert!(ahrs.flags().initialising);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AhrsSettings {
    /// Feedback gain once the start-up ramp is over (typically 0.5)
    pub gain: f32,
    /// Gyroscope range in rad/s
    ///
    /// A rate beyond this restarts the gain ramp, since the integrated
    /// attitude can no longer be trusted. Set to 0 to disable.
    pub gyroscope_range: f32,
    /// Acceleration rejection threshold in degrees
    ///
    /// Readings further than this from the expected gravity direction are
    /// treated as linear acceleration and skipped. Set to 0 to disable.
    pub acceleration_rejection: f32,
    /// Magnetic rejection threshold in degrees. Set to 0 to disable.
    pub magnetic_rejection: f32,
    /// Consecutive rejected samples after which a sensor is trusted again
    pub recovery_trigger_period: u32,
}

impl AhrsSettings {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.gain >= 0.0 && self.gain.is_finite()) {
            return Err(Error::InvalidSettings("gain must be finite and >= 0"));
        }
        if !(self.gyroscope_range >= 0.0) {
            return Err(Error::InvalidSettings("gyroscope_range must be >= 0"));
        }
        for angle in [self.acceleration_rejection, self.magnetic_rejection] {
            if !(0.0..=90.0).contains(&angle) {
                return Err(Error::InvalidSettings("rejection angles must lie in [0, 90]"));
            }
        }
        Ok(())
    }
}

impl Default for AhrsSettings {
    fn default() -> Self {
        Self {
            gain: 0.5,
            gyroscope_range: 0.0,
            acceleration_rejection: 10.0,
            magnetic_rejection: 10.0,
            recovery_trigger_period: 500,
        }
    }
}

/// Algorithm state flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AhrsFlags {
    /// Gain is still ramping down from its start-up value
    pub initialising: bool,
    /// The ramp was restarted by a saturated gyroscope
    pub angular_rate_recovery: bool,
    /// Last accelerometer reading was skipped
    pub acceleration_rejected: bool,
    /// Last magnetometer reading was skipped
    pub magnetic_rejected: bool,
}

/// Accept/reject bookkeeping for one reference sensor
#[derive(Debug, Clone, Copy)]
struct RejectionGate {
    /// Squared half-sine of the rejection angle
    threshold_squared: f32,
    recovery_period: u32,
    trigger: u32,
    rejected: bool,
}

impl RejectionGate {
    fn new(rejection_degrees: f32, recovery_period: u32) -> Self {
        let threshold_squared = if rejection_degrees > 0.0 {
            let half_sine = 0.5 * (rejection_degrees * DEG_TO_RAD).sin();
            half_sine * half_sine
        } else {
            f32::INFINITY
        };

        Self {
            threshold_squared,
            recovery_period,
            trigger: 0,
            rejected: false,
        }
    }

    /// Whether a reading with the given squared feedback error may be used
    fn admit(&mut self, error_squared: f32, initialising: bool) -> bool {
        if initialising || error_squared <= self.threshold_squared {
            self.trigger = self.trigger.saturating_sub(RECOVERY_DECREMENT);
            self.rejected = false;
            return true;
        }

        self.trigger += 1;
        if self.trigger > self.recovery_period {
            // Rejected for too long, the reference has probably moved for good
            self.trigger = 0;
            self.rejected = false;
            return true;
        }

        self.rejected = true;
        false
    }

    fn reset(&mut self) {
        self.trigger = 0;
        self.rejected = false;
    }
}

/// Gyroscope-driven quaternion with accelerometer/magnetometer feedback
///
/// For the first three seconds the feedback gain ramps down from a high
/// start value so the attitude snaps onto gravity quickly.
/// Without a magnetometer the heading is held at zero during that ramp and
/// then integrates freely. With one, the reported yaw is the magnetic heading
/// plus the configured declination.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use tilt_fusion::{MargSample, QuaternionAhrs};
///
/// let mut ahrs = QuaternionAhrs::new();
///
/// // Board rolled 30° and held still
/// let roll = 30f32.to_radians();
/// let gravity = Vector3::new(0.0, roll.sin(), roll.cos()) * 9.80665;
/// let sample = MargSample::new(Vector3::zeros(), gravity);
///
/// for _ in 0..400 {
///     ahrs.update(&sample, 0.01);
/// }
///
/// assert!(!ahrs.flags().initialising);
/// assert!((ahrs.orientation().roll_degrees() - 30.0).abs() < 0.1);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct QuaternionAhrs {
    settings: AhrsSettings,
    quaternion: UnitQuaternion<f32>,
    initialising: bool,
    ramped_gain: f32,
    angular_rate_recovery: bool,
    acceleration_gate: RejectionGate,
    magnetic_gate: RejectionGate,
    declination: f32,
    // last update carried a magnetometer reading
    magnetic_heading: bool,
}

impl QuaternionAhrs {
    pub fn new() -> Self {
        Self::build(AhrsSettings::default())
    }

    /// Build from validated settings
    pub fn with_settings(settings: AhrsSettings) -> Result<Self, Error> {
        settings.validate()?;
        Ok(Self::build(settings))
    }

    fn build(settings: AhrsSettings) -> Self {
        Self {
            settings,
            quaternion: UnitQuaternion::identity(),
            initialising: true,
            ramped_gain: INITIAL_GAIN,
            angular_rate_recovery: false,
            acceleration_gate: RejectionGate::new(
                settings.acceleration_rejection,
                settings.recovery_trigger_period,
            ),
            magnetic_gate: RejectionGate::new(
                settings.magnetic_rejection,
                settings.recovery_trigger_period,
            ),
            declination: 0.0,
            magnetic_heading: false,
        }
    }

    /// Declination in radians, added to the yaw while a magnetometer is fitted
    pub fn set_declination(&mut self, declination: f32) {
        self.declination = declination;
    }

    pub fn declination(&self) -> f32 {
        self.declination
    }

    /// Return to identity and restart the gain ramp
    pub fn reset(&mut self) {
        self.quaternion = UnitQuaternion::identity();
        self.restart_ramp();
        self.angular_rate_recovery = false;
        self.acceleration_gate.reset();
        self.magnetic_gate.reset();
        self.magnetic_heading = false;
    }

    /// Fold one bias-corrected sample taken `dt` seconds after the previous one
    pub fn update(&mut self, sample: &MargSample, dt: f32) {
        let gyroscope = sample.gyroscope;
        self.magnetic_heading = sample.magnetometer.is_some();

        let range = self.settings.gyroscope_range * GYROSCOPE_RANGE_FACTOR;
        if range > 0.0 && gyroscope.norm() > range {
            log::warn!("gyroscope saturated, restarting AHRS gain ramp");
            self.angular_rate_recovery = true;
            self.restart_ramp();
        }

        if self.initialising {
            let step = (INITIAL_GAIN - self.settings.gain) * dt / INITIALISATION_PERIOD;
            self.ramped_gain -= step;
            if self.ramped_gain <= self.settings.gain {
                self.ramped_gain = self.settings.gain;
                self.initialising = false;
                self.angular_rate_recovery = false;
            }
        }

        let half_gravity = self.quaternion.gravity() * 0.5;

        let mut half_feedback = Vector3::zeros();
        if let Some(direction) = unit(sample.accelerometer) {
            let feedback = feedback(direction, half_gravity);
            if self
                .acceleration_gate
                .admit(feedback.norm_squared(), self.initialising)
            {
                half_feedback += feedback;
            }
        }

        if let Some(field) = sample.magnetometer {
            // West in the sensor frame, as measured and as expected
            let west = unit(half_gravity.cross(&field));
            if let Some(west) = west {
                let feedback = feedback(west, self.half_west());
                if self
                    .magnetic_gate
                    .admit(feedback.norm_squared(), self.initialising)
                {
                    half_feedback += feedback;
                }
            }
        }

        let half_rate = gyroscope * 0.5 + half_feedback * self.ramped_gain;
        self.integrate(half_rate, dt);

        // No heading reference yet: keep yaw pinned until the ramp is done
        if sample.magnetometer.is_none() && self.initialising {
            let (roll, pitch, _) = self.quaternion.euler_angles();
            self.quaternion = UnitQuaternion::from_euler_angles(roll, pitch, 0.0);
        }
    }

    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        self.quaternion
    }

    pub fn set_quaternion(&mut self, quaternion: UnitQuaternion<f32>) {
        self.quaternion = quaternion;
    }

    /// Current estimate in radians, yaw within (-π, π]
    pub fn orientation(&self) -> Orientation {
        let (roll, pitch, yaw) = self.quaternion.euler_angles();
        Orientation::new(roll, pitch, wrap_half_turn(yaw + self.heading_offset()))
    }

    pub fn set_orientation(&mut self, orientation: Orientation) {
        let yaw = wrap_half_turn(orientation.yaw - self.heading_offset());
        self.quaternion = UnitQuaternion::from_euler_angles(orientation.roll, orientation.pitch, yaw);
    }

    pub fn flags(&self) -> AhrsFlags {
        AhrsFlags {
            initialising: self.initialising,
            angular_rate_recovery: self.angular_rate_recovery,
            acceleration_rejected: self.acceleration_gate.rejected,
            magnetic_rejected: self.magnetic_gate.rejected,
        }
    }

    pub fn settings(&self) -> AhrsSettings {
        self.settings
    }

    fn heading_offset(&self) -> f32 {
        if self.magnetic_heading {
            self.declination
        } else {
            0.0
        }
    }

    fn restart_ramp(&mut self) {
        self.initialising = true;
        self.ramped_gain = INITIAL_GAIN;
    }

    /// Earth West axis in the sensor frame, half length
    fn half_west(&self) -> Vector3<f32> {
        let (w, x, y, z) = (self.quaternion.w, self.quaternion.i, self.quaternion.j, self.quaternion.k);

        Vector3::new(x * y + w * z, w * w - 0.5 + y * y, y * z - w * x)
    }

    fn integrate(&mut self, half_rate: Vector3<f32>, dt: f32) {
        let rate = Quaternion::from_parts(0.0, half_rate);
        let derivative = self.quaternion.as_ref() * rate;

        self.quaternion = UnitQuaternion::from_quaternion(self.quaternion.as_ref() + derivative * dt);
    }
}

impl Default for QuaternionAhrs {
    fn default() -> Self {
        Self::new()
    }
}

fn unit(vector: Vector3<f32>) -> Option<Vector3<f32>> {
    vector.try_normalize(0.0)
}

/// Rotation error between a measured direction and a half-length reference
///
/// Opposing vectors get a full-length correction so the filter cannot stall
/// at the antipode.
fn feedback(measured: Vector3<f32>, reference: Vector3<f32>) -> Vector3<f32> {
    let cross = measured.cross(&reference);

    if measured.dot(&reference) < 0.0 {
        unit(cross).unwrap_or_else(Vector3::zeros)
    } else {
        cross
    }
}
