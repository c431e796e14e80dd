#![no_std]

//! Tilt Fusion - attitude estimation for small IMU boards
//!
//! Fuses gyroscope, accelerometer and optional magnetometer samples into
//! roll, pitch and yaw. A one-shot bias calibration runs first, then a fixed
//! cadence acquisition loop feeds one of three interchangeable backends:
//!
//! - [`SoftwareFusion`]: a [`ComplementaryFilter`] running on raw IMU data
//! - [`DmpPassthrough`]: quaternions fused on a vendor motion processor
//! - [`AhrsFusion`]: a [`QuaternionAhrs`] with gain ramp and sensor rejection
//!
//! Sensor drivers, displays and network transports stay outside the crate and
//! plug in through [`RawSampleSource`], [`MotionProcessor`] and [`Clock`].
//! Results leave the crate as degrees from [`OrientationEstimator`] or as flat
//! [`Report`] records.
//!
//! # Features
//!
//! - Complementary filter with a single weight τ
//! - Quaternion AHRS with start-up gain ramp and accelerometer/magnetometer rejection
//! - Dead-band gated yaw integration, or magnetometer heading with declination
//! - Gyroscope/accelerometer bias and magnetometer hard-iron calibration
//! - `#![no_std]` compatible; the `std` feature adds [`StdClock`]
//! - `serde` feature to serialize reports
//!
//! Without a magnetometer or motion processor, yaw is a free-running integral
//! and drifts.
//!
//! # Quick Start
//!
//! ```rust
//! use nalgebra::Vector3;
//! use tilt_fusion::{ComplementaryFilter, MargSample};
//!
//! let mut filter = ComplementaryFilter::default();
//!
//! // Bias-corrected readings
//! let gyroscope = Vector3::new(0.0, 0.0, 0.5);       // rad/s
//! let accelerometer = Vector3::new(0.0, 0.0, 9.81);  // m/s²
//!
//! filter.update(&MargSample::new(gyroscope, accelerometer), 0.01); // 10ms
//!
//! let orientation = filter.orientation();
//! println!(
//!     "roll {:.2} pitch {:.2} yaw {:.2}",
//!     orientation.roll_degrees(),
//!     orientation.pitch_degrees(),
//!     orientation.yaw_degrees()
//! );
//! ```

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

mod ahrs;
pub mod calibration;
mod complementary;
pub mod dmp;
mod engine;
mod error;
mod estimator;
mod math;
mod report;
mod source;
mod types;

// Re-export all public types and functions
pub use ahrs::{AhrsFlags, AhrsSettings, QuaternionAhrs};
pub use calibration::Calibrator;
pub use complementary::{ComplementaryFilter, DEFAULT_FILTER_WEIGHT, DEFAULT_YAW_THRESHOLD};
pub use dmp::{DMP_PACKET_SIZE, DmpPacket, DmpPassthrough, MotionProcessor};
pub use engine::{AhrsFusion, EngineKind, FusionEngine, SoftwareFusion};
pub use error::Error;
pub use estimator::OrientationEstimator;
pub use math::{
    DEG_TO_RAD, GRAVITY_STANDARD, QuaternionExt, RAD_TO_DEG, accelerometer_tilt, fix_angle,
    magnetic_heading,
};
pub use report::{Report, ReportEncoder};
#[cfg(feature = "std")]
pub use source::StdClock;
pub use source::{Clock, RawSampleSource};
pub use types::*;
