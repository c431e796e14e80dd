//! At-rest bias calibration

use nalgebra::Vector3;

use crate::error::Error;
use crate::math::GRAVITY_STANDARD;
use crate::source::{Clock, RawSampleSource};
use crate::types::{Bias, MargSample};

/// Averages a window of at-rest samples into a [`Bias`]
///
/// The board must be level and still while this runs: the Z accelerometer
/// axis is assumed to carry exactly one standard gravity.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use tilt_fusion::{Calibrator, Clock, MargSample, RawSampleSource};
///
/// struct AtRest;
/// impl RawSampleSource for AtRest {
///     fn read(&mut self) -> Option<MargSample> {
///         Some(MargSample::new(Vector3::new(0.01, 0.0, 0.0), Vector3::new(0.0, 0.0, 9.80665)))
///     }
/// }
///
/// struct NoWait;
/// impl Clock for NoWait {
///     fn now_ms(&self) -> u64 { 0 }
///     fn sleep_ms(&mut self, _ms: u64) {}
/// }
///
/// let bias = Calibrator::new(100).calibrate(&mut AtRest, &mut NoWait).unwrap();
/// assert!((bias.gyroscope.x - 0.01).abs() < 1e-6);
/// assert!(bias.accelerometer.z.abs() < 1e-5);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Calibrator {
    sample_count: u32,
    delay_ms: u32,
}

impl Calibrator {
    /// Calibrator reading `sample_count` samples, 1 ms apart
    pub fn new(sample_count: u32) -> Self {
        Self {
            sample_count,
            delay_ms: 1,
        }
    }

    /// Override the delay between reads
    pub fn with_delay_ms(mut self, delay_ms: u32) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Block for `sample_count` reads and derive the bias
    ///
    /// Gyroscope and accelerometer offsets are per-axis means, with standard
    /// gravity removed from accelerometer Z. The magnetometer offset is the
    /// midpoint of the observed range on each axis, and is only produced when
    /// every sample carried a magnetometer reading.
    ///
    /// Fails with [`Error::SensorUnavailable`] as soon as one read goes
    /// unanswered; no partial bias is returned.
    pub fn calibrate<S, C>(&self, source: &mut S, clock: &mut C) -> Result<Bias, Error>
    where
        S: RawSampleSource + ?Sized,
        C: Clock + ?Sized,
    {
        if self.sample_count == 0 {
            return Err(Error::InvalidSettings("calibration_samples must be at least 1"));
        }

        log::info!("calibrating over {} samples", self.sample_count);

        let mut gyroscope_sum = Vector3::<f64>::zeros();
        let mut accelerometer_sum = Vector3::<f64>::zeros();
        let mut magnetic_range = MagneticRange::default();
        let mut magnetometer_seen = 0u32;

        for index in 0..self.sample_count {
            let Some(sample) = source.read() else {
                log::error!("sensor stopped responding at calibration sample {}", index);
                return Err(Error::SensorUnavailable);
            };

            gyroscope_sum += sample.gyroscope.cast::<f64>();
            accelerometer_sum += sample.accelerometer.cast::<f64>();
            if let Some(field) = sample.magnetometer {
                magnetic_range.include(field);
                magnetometer_seen += 1;
            }

            clock.sleep_ms(self.delay_ms as u64);
        }

        let count = self.sample_count as f64;
        let gyroscope = (gyroscope_sum / count).map(|axis| axis as f32);
        let mut accelerometer = (accelerometer_sum / count).map(|axis| axis as f32);
        accelerometer.z -= GRAVITY_STANDARD;

        let magnetometer = if magnetometer_seen == self.sample_count {
            magnetic_range.midpoint()
        } else {
            None
        };

        let bias = Bias {
            gyroscope,
            accelerometer,
            magnetometer,
        };

        log::debug!("bias {:?}", bias);
        log::info!("calibration complete");
        Ok(bias)
    }

    /// Calibrate from an in-memory window, without timing
    ///
    /// Averages the first `sample_count` samples of the window. A window
    /// shorter than that is rejected rather than averaged over fewer samples.
    pub fn calibrate_from(&self, samples: &[MargSample]) -> Result<Bias, Error> {
        if samples.len() < self.sample_count as usize {
            return Err(Error::InvalidSettings(
                "calibration window shorter than sample_count",
            ));
        }

        let mut window = samples.iter().copied();
        let mut source = WindowSource(&mut window);
        let calibrator = Calibrator {
            sample_count: self.sample_count,
            delay_ms: 0,
        };

        calibrator.calibrate(&mut source, &mut NoDelay)
    }
}

/// Per-axis min/max of magnetometer readings
#[derive(Debug, Clone, Copy, Default)]
struct MagneticRange {
    bounds: Option<(Vector3<f32>, Vector3<f32>)>,
}

impl MagneticRange {
    fn include(&mut self, field: Vector3<f32>) {
        self.bounds = Some(match self.bounds {
            Some((min, max)) => (min.inf(&field), max.sup(&field)),
            None => (field, field),
        });
    }

    fn midpoint(&self) -> Option<Vector3<f32>> {
        self.bounds.map(|(min, max)| (min + max) / 2.0)
    }
}

struct WindowSource<'a, I: Iterator<Item = MargSample>>(&'a mut I);

impl<I: Iterator<Item = MargSample>> RawSampleSource for WindowSource<'_, I> {
    fn read(&mut self) -> Option<MargSample> {
        self.0.next()
    }
}

struct NoDelay;

impl Clock for NoDelay {
    fn now_ms(&self) -> u64 {
        0
    }

    fn sleep_ms(&mut self, _ms: u64) {}
}
