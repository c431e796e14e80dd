//! Passthrough for a vendor digital motion processor (DMP)
//!
//! The motion processor fuses on-chip and emits fixed-size FIFO packets
//! carrying a quaternion plus the raw accel/gyro it was computed from. This
//! module decodes those packets and converts the quaternion to the same
//! roll/pitch/yaw convention as the software filter.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::error::Error;
use crate::math::{DEG_TO_RAD, GRAVITY_STANDARD, QuaternionExt, wrap_half_turn};
use crate::source::Clock;
use crate::types::{MargSample, Orientation};

/// Size of one DMP FIFO packet in bytes
pub const DMP_PACKET_SIZE: usize = 28;

/// LSB per unit quaternion (Q14)
const QUATERNION_SCALE: f32 = 16384.0;
/// LSB per g at ±2 g full scale
const ACCEL_LSB_PER_G: f32 = 16384.0;
/// LSB per deg/s at ±2000 deg/s full scale
const GYRO_LSB_PER_DPS: f32 = 16.4;
/// Vendor calibration loops per requested calibration sample
const SAMPLES_PER_CALIBRATION_LOOP: u32 = 100;
/// Interval between FIFO polls while waiting for a packet
const POLL_INTERVAL_MS: u64 = 1;

/// Register-level access to a motion processor with DMP firmware
///
/// Implemented by the chip driver; this crate only sequences the calls.
pub trait MotionProcessor {
    /// Whether the chip answers on the bus
    fn test_connection(&mut self) -> bool;

    /// Load and start the DMP firmware, returning the vendor status on failure
    fn initialize_dmp(&mut self) -> Result<(), u8>;

    /// Run the vendor accelerometer offset routine for `loops` iterations
    fn calibrate_accel(&mut self, loops: u32);

    /// Run the vendor gyroscope offset routine for `loops` iterations
    fn calibrate_gyro(&mut self, loops: u32);

    fn set_dmp_enabled(&mut self, enabled: bool);

    /// Copy the latest complete packet into `packet`, `false` if none is ready
    fn read_fifo_packet(&mut self, packet: &mut [u8; DMP_PACKET_SIZE]) -> bool;
}

/// Decoded content of one DMP packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DmpPacket {
    pub quaternion: UnitQuaternion<f32>,
    /// Accelerometer in m/s²
    pub accelerometer: Vector3<f32>,
    /// Gyroscope in rad/s
    pub gyroscope: Vector3<f32>,
}

impl DmpPacket {
    /// Decode a raw FIFO packet
    ///
    /// Layout: quaternion w/x/y/z as the high words of four 32-bit fields at
    /// offsets 0, 4, 8 and 12, then accel X/Y/Z at 16, 18, 20 and gyro X/Y/Z
    /// at 22, 24, 26. All values are big-endian `i16`.
    pub fn decode(packet: &[u8; DMP_PACKET_SIZE]) -> Self {
        let word = |offset: usize| i16::from_be_bytes([packet[offset], packet[offset + 1]]) as f32;

        let quaternion = UnitQuaternion::from_quaternion(Quaternion::new(
            word(0) / QUATERNION_SCALE,
            word(4) / QUATERNION_SCALE,
            word(8) / QUATERNION_SCALE,
            word(12) / QUATERNION_SCALE,
        ));

        let accelerometer =
            Vector3::new(word(16), word(18), word(20)) * (GRAVITY_STANDARD / ACCEL_LSB_PER_G);
        let gyroscope =
            Vector3::new(word(22), word(24), word(26)) * (DEG_TO_RAD / GYRO_LSB_PER_DPS);

        Self {
            quaternion,
            accelerometer,
            gyroscope,
        }
    }
}

/// Fusion backend that defers to the motion processor
///
/// Yaw from this path is relative to the power-on heading, there is no
/// magnetic reference. The chip's own attitude cannot be overwritten, so
/// [`set_orientation`](Self::set_orientation) stores a per-axis offset
/// against the chip's angles instead.
pub struct DmpPassthrough<P> {
    processor: P,
    packet: [u8; DMP_PACKET_SIZE],
    quaternion: UnitQuaternion<f32>,
    // angles straight from the chip, before the reference offset
    raw: Orientation,
    offset: Orientation,
    orientation: Orientation,
}

impl<P: MotionProcessor> DmpPassthrough<P> {
    pub fn new(processor: P) -> Self {
        Self {
            processor,
            packet: [0; DMP_PACKET_SIZE],
            quaternion: UnitQuaternion::identity(),
            raw: Orientation::default(),
            offset: Orientation::default(),
            orientation: Orientation::default(),
        }
    }

    /// Check the connection and load the DMP firmware
    pub fn initialize(&mut self) -> Result<(), Error> {
        if !self.processor.test_connection() {
            log::error!("motion processor not responding");
            return Err(Error::SensorUnavailable);
        }

        self.processor.initialize_dmp().map_err(|status| {
            log::error!("DMP firmware load failed with status {}", status);
            Error::MotionProcessorInitFailure { status }
        })
    }

    /// Run the on-chip offset routines and enable the DMP
    ///
    /// Offsets are stored in the chip, so no host-side bias is needed.
    pub fn calibrate(&mut self, sample_count: u32) {
        let loops = sample_count / SAMPLES_PER_CALIBRATION_LOOP;

        log::info!("calibrating motion processor ({} loops)", loops);
        self.processor.calibrate_accel(loops);
        self.processor.calibrate_gyro(loops);
        self.processor.set_dmp_enabled(true);
    }

    /// Poll the FIFO until a complete packet is available
    ///
    /// Blocks for as long as the chip produces nothing.
    pub fn wait_for_sample<C: Clock + ?Sized>(&mut self, clock: &mut C) {
        while !self.processor.read_fifo_packet(&mut self.packet) {
            clock.sleep_ms(POLL_INTERVAL_MS);
        }
    }

    /// Decode the last packet, keep its quaternion and return its raw data
    pub fn read_event(&mut self) -> MargSample {
        let packet = DmpPacket::decode(&self.packet);
        self.quaternion = packet.quaternion;

        MargSample::new(packet.gyroscope, packet.accelerometer)
    }

    /// Derive roll/pitch/yaw from the stored quaternion
    ///
    /// Pitch is negated so that nose-up reads the same sign as in
    /// [`ComplementaryFilter`](crate::ComplementaryFilter).
    pub fn update(&mut self) {
        let (yaw, pitch, roll) = self.quaternion.yaw_pitch_roll();
        self.raw = Orientation::new(roll, -pitch, yaw);

        self.orientation = Orientation::new(
            wrap_half_turn(self.raw.roll - self.offset.roll),
            wrap_half_turn(self.raw.pitch - self.offset.pitch),
            wrap_half_turn(self.raw.yaw - self.offset.yaw),
        );
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Re-reference the reported angles so the chip's current attitude
    /// reads as `orientation` from now on
    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.offset = Orientation::new(
            self.raw.roll - orientation.roll,
            self.raw.pitch - orientation.pitch,
            self.raw.yaw - orientation.yaw,
        );
        self.orientation = orientation;
    }

    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        self.quaternion
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }
}
