//! Angle helpers and nalgebra extensions used by the fusion engines

use core::f32::consts::PI;

use nalgebra::{ComplexField, RealField, UnitQuaternion, Vector3};

/// Mathematical constants
pub const DEG_TO_RAD: f32 = PI / 180.0;
pub const RAD_TO_DEG: f32 = 180.0 / PI;

/// Standard gravity in m/s²
pub const GRAVITY_STANDARD: f32 = 9.80665;

const TWO_PI: f32 = 2.0 * PI;

/// Bring a heading back into [0, 2π) after adding declination
///
/// Applies a single ±2π correction. Inputs more than one full turn out of
/// range are not fully normalized.
///
/// # Example
/// ```
/// use tilt_fusion::fix_angle;
///
/// let wrapped = fix_angle(-0.1);
/// assert!((wrapped - (2.0 * core::f32::consts::PI - 0.1)).abs() < 1e-6);
/// ```
pub fn fix_angle(angle: f32) -> f32 {
    if angle < 0.0 {
        angle + TWO_PI
    } else if angle > TWO_PI {
        angle - TWO_PI
    } else {
        angle
    }
}

/// Bring a signed angle back into (-π, π] with a single ±2π correction
pub(crate) fn wrap_half_turn(angle: f32) -> f32 {
    if angle > PI {
        angle - TWO_PI
    } else if angle <= -PI {
        angle + TWO_PI
    } else {
        angle
    }
}

/// Roll and pitch implied by the gravity direction in an accelerometer reading
///
/// Returns `(roll, pitch)` in radians, each within ±π/2.
pub fn accelerometer_tilt(accelerometer: Vector3<f32>) -> (f32, f32) {
    let (x, y, z) = (accelerometer.x, accelerometer.y, accelerometer.z);

    let roll = y.atan2((x * x + z * z).sqrt());
    let pitch = -x.atan2((y * y + z * z).sqrt());

    (roll, pitch)
}

/// Heading from a hard-iron corrected magnetometer reading, in [0, 2π)
///
/// No tilt compensation is applied, the board is assumed roughly level.
pub fn magnetic_heading(magnetometer: Vector3<f32>, declination: f32) -> f32 {
    let (x, y, z) = (magnetometer.x, magnetometer.y, magnetometer.z);

    fix_angle(x.atan2((y * y + z * z).sqrt()) + declination)
}

/// Extension trait for UnitQuaternion operations
pub trait QuaternionExt {
    /// Gravity direction in the sensor frame
    fn gravity(&self) -> Vector3<f32>;

    /// Motion-processor style `(yaw, pitch, roll)` in radians
    ///
    /// Pitch is taken from the gravity vector and folded past ±π/2 when the
    /// board is upside down.
    fn yaw_pitch_roll(&self) -> (f32, f32, f32);
}

impl QuaternionExt for UnitQuaternion<f32> {
    fn gravity(&self) -> Vector3<f32> {
        let (w, x, y, z) = (self.w, self.i, self.j, self.k);

        Vector3::new(
            2.0 * (x * z - w * y),
            2.0 * (w * x + y * z),
            w * w - x * x - y * y + z * z,
        )
    }

    fn yaw_pitch_roll(&self) -> (f32, f32, f32) {
        let (w, x, y, z) = (self.w, self.i, self.j, self.k);
        let gravity = self.gravity();

        let yaw = (2.0 * x * y - 2.0 * w * z).atan2(2.0 * w * w + 2.0 * x * x - 1.0);
        let mut pitch = gravity
            .x
            .atan2((gravity.y * gravity.y + gravity.z * gravity.z).sqrt());
        let roll = gravity.y.atan2(gravity.z);

        if gravity.z < 0.0 {
            pitch = if pitch > 0.0 { PI - pitch } else { -PI - pitch };
        }

        (yaw, pitch, roll)
    }
}
