//! Fixed-period acquisition and the public orientation facade

use crate::engine::FusionEngine;
use crate::error::Error;
use crate::report::{Report, ReportEncoder};
use crate::source::Clock;
use crate::types::{Bias, EstimatorSettings, MargSample, Orientation};

/// Owns a fusion backend and drives it at a fixed cadence
///
/// Lifecycle: [`start`](Self::start) brings the backend up and calibrates,
/// then each [`run_cycle`](Self::run_cycle) waits out the sample period and
/// folds in one sample. Calibration happens exactly once; there is no
/// recalibration path.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use tilt_fusion::{
///     EstimatorSettings, MargSample, OrientationEstimator, RawSampleSource, SoftwareFusion,
///     StdClock,
/// };
///
/// struct Level;
/// impl RawSampleSource for Level {
///     fn read(&mut self) -> Option<MargSample> {
///         Some(MargSample::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 9.80665)))
///     }
/// }
///
/// let settings = EstimatorSettings {
///     calibration_samples: 10,
///     calibration_delay_ms: 0,
///     ..Default::default()
/// };
/// let engine = SoftwareFusion::new(Level);
/// let mut estimator = OrientationEstimator::new(engine, StdClock::new(), settings).unwrap();
///
/// estimator.start().unwrap();
/// estimator.run_cycle().unwrap();
/// assert_eq!(estimator.roll(), 0.0);
/// ```
pub struct OrientationEstimator<E, C> {
    engine: E,
    clock: C,
    settings: EstimatorSettings,
    /// Set once by `start`; fusion refuses to run without it
    bias: Option<Bias>,
    orientation: Orientation,
    last_sample: MargSample,
    last_cycle_ms: Option<u64>,
    last_report_ms: Option<u64>,
}

impl<E: FusionEngine, C: Clock> OrientationEstimator<E, C> {
    /// Validate `settings` and take ownership of the backend and clock
    ///
    /// The backend is configured from `settings`, so its filter parameters
    /// are always the validated ones.
    pub fn new(mut engine: E, clock: C, settings: EstimatorSettings) -> Result<Self, Error> {
        settings.validate()?;
        engine.configure(&settings);

        Ok(Self {
            engine,
            clock,
            settings,
            bias: None,
            orientation: Orientation::default(),
            last_sample: MargSample::default(),
            last_cycle_ms: None,
            last_report_ms: None,
        })
    }

    /// Initialize the backend and calibrate
    ///
    /// Blocks for the whole calibration window. Any failure is fatal; the
    /// estimator stays uncalibrated and `tick` keeps refusing to run.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.bias.is_some() {
            log::warn!("estimator already calibrated, ignoring start");
            return Ok(());
        }

        self.engine.initialize()?;
        let bias = self
            .engine
            .calibrate(&mut self.clock, self.settings.calibration_samples)?;

        self.bias = Some(bias);
        self.last_cycle_ms = Some(self.clock.now_ms());
        Ok(())
    }

    /// Sleep until one sample period has passed since the previous cycle,
    /// then until the backend has data
    pub fn wait(&mut self) {
        let period = self.settings.sample_period.as_millis();

        if let Some(last) = self.last_cycle_ms {
            loop {
                let elapsed = self.clock.now_ms().saturating_sub(last);
                if elapsed >= period {
                    break;
                }
                self.clock.sleep_ms(period - elapsed);
            }
        }

        self.engine.wait_for_sample(&mut self.clock);
        self.last_cycle_ms = Some(self.clock.now_ms());
    }

    /// Read, correct and fuse one sample
    ///
    /// A read that goes unanswered reuses the previous sample.
    pub fn tick(&mut self) -> Result<(), Error> {
        let bias = self.bias.ok_or(Error::NotCalibrated)?;

        let sample = match self.engine.read_event() {
            Some(raw) => bias.apply(&raw),
            None => {
                log::warn!("no sample from sensor, reusing previous");
                self.last_sample
            }
        };

        self.engine.update(&sample, self.settings.dt());
        self.last_sample = sample;
        self.orientation = self.engine.orientation();
        Ok(())
    }

    /// `wait` followed by `tick`
    pub fn run_cycle(&mut self) -> Result<(), Error> {
        self.wait();
        self.tick()
    }

    /// Roll in degrees
    pub fn roll(&self) -> f32 {
        self.orientation.roll_degrees()
    }

    /// Pitch in degrees
    pub fn pitch(&self) -> f32 {
        self.orientation.pitch_degrees()
    }

    /// Yaw in degrees
    pub fn yaw(&self) -> f32 {
        self.orientation.yaw_degrees()
    }

    /// Current estimate in radians
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn bias(&self) -> Option<Bias> {
        self.bias
    }

    pub fn is_calibrated(&self) -> bool {
        self.bias.is_some()
    }

    /// Last bias-corrected sample fed to the backend
    pub fn last_sample(&self) -> MargSample {
        self.last_sample
    }

    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Zero all angles
    pub fn reset(&mut self) {
        self.set_orientation(Orientation::default());
    }

    pub fn reset_roll(&mut self) {
        self.set_orientation(Orientation {
            roll: 0.0,
            ..self.orientation
        });
    }

    pub fn reset_pitch(&mut self) {
        self.set_orientation(Orientation {
            pitch: 0.0,
            ..self.orientation
        });
    }

    pub fn reset_yaw(&mut self) {
        self.set_orientation(Orientation {
            yaw: 0.0,
            ..self.orientation
        });
    }

    fn set_orientation(&mut self, orientation: Orientation) {
        self.engine.set_orientation(orientation);
        self.orientation = orientation;
    }

    /// Encode the current state
    pub fn report(&self) -> Report {
        let quaternion = self.engine.quaternion();
        ReportEncoder::encode(&self.last_sample, &self.orientation, quaternion.as_ref())
    }

    /// Encode the current state if the report period has elapsed
    pub fn poll_report(&mut self) -> Option<Report> {
        let now = self.clock.now_ms();
        let due = match self.last_report_ms {
            Some(last) => now.saturating_sub(last) >= self.settings.report_period_ms as u64,
            None => true,
        };

        if !due {
            return None;
        }

        self.last_report_ms = Some(now);
        Some(self.report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SoftwareFusion;
    use crate::math::GRAVITY_STANDARD;
    use crate::source::RawSampleSource;
    use core::cell::Cell;
    use nalgebra::Vector3;
    use std::rc::Rc;

    /// Clock that only moves when slept on
    #[derive(Clone, Default)]
    struct ManualClock {
        now: Rc<Cell<u64>>,
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now.get()
        }

        fn sleep_ms(&mut self, ms: u64) {
            self.now.set(self.now.get() + ms);
        }
    }

    struct Scripted {
        rest: MargSample,
        calibration_left: u32,
        live: Option<MargSample>,
    }

    impl RawSampleSource for Scripted {
        fn read(&mut self) -> Option<MargSample> {
            if self.calibration_left > 0 {
                self.calibration_left -= 1;
                return Some(self.rest);
            }
            self.live
        }
    }

    fn settings() -> EstimatorSettings {
        EstimatorSettings {
            calibration_samples: 100,
            sample_period: crate::types::SamplePeriod::Millis(10),
            report_period_ms: 250,
            ..Default::default()
        }
    }

    fn estimator(
        live: Option<MargSample>,
    ) -> (OrientationEstimator<SoftwareFusion<Scripted>, ManualClock>, ManualClock) {
        let rest = MargSample::new(
            Vector3::new(0.002, -0.001, 0.003),
            Vector3::new(0.0, 0.0, GRAVITY_STANDARD),
        );
        let source = Scripted {
            rest,
            calibration_left: 100,
            live,
        };
        let clock = ManualClock::default();
        let engine = SoftwareFusion::new(source);
        let estimator = OrientationEstimator::new(engine, clock.clone(), settings()).unwrap();
        (estimator, clock)
    }

    #[test]
    fn test_tick_before_start_is_refused() {
        let (mut estimator, _) = estimator(None);
        assert_eq!(estimator.tick(), Err(Error::NotCalibrated));
        assert!(!estimator.is_calibrated());
    }

    #[test]
    fn test_invalid_settings_rejected_at_construction() {
        let source = Scripted {
            rest: MargSample::default(),
            calibration_left: 0,
            live: None,
        };
        let bad = EstimatorSettings {
            filter_weight: 1.5,
            ..Default::default()
        };
        let engine = SoftwareFusion::new(source);
        let result = OrientationEstimator::new(engine, ManualClock::default(), bad);
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn test_engine_takes_estimator_settings() {
        let source = Scripted {
            rest: MargSample::default(),
            calibration_left: 0,
            live: None,
        };
        let tuned = EstimatorSettings {
            filter_weight: 0.5,
            yaw_threshold: 0.1,
            ..settings()
        };
        let estimator =
            OrientationEstimator::new(SoftwareFusion::new(source), ManualClock::default(), tuned)
                .unwrap();

        let filter = estimator.engine().filter();
        assert_eq!(filter.weight(), 0.5);
        assert_eq!(filter.yaw_threshold(), 0.1);
    }

    #[test]
    fn test_calibration_delay_from_settings() {
        let source = Scripted {
            rest: MargSample::new(Vector3::zeros(), Vector3::new(0.0, 0.0, GRAVITY_STANDARD)),
            calibration_left: 100,
            live: None,
        };
        let clock = ManualClock::default();
        let slow = EstimatorSettings {
            calibration_delay_ms: 3,
            ..settings()
        };
        let mut estimator =
            OrientationEstimator::new(SoftwareFusion::new(source), clock.clone(), slow).unwrap();

        estimator.start().unwrap();
        assert_eq!(clock.now_ms(), 300);
    }

    #[test]
    fn test_start_calibrates_and_advances_clock() {
        let (mut estimator, clock) = estimator(None);
        estimator.start().unwrap();

        let bias = estimator.bias().unwrap();
        assert!((bias.gyroscope - Vector3::new(0.002, -0.001, 0.003)).norm() < 1e-6);
        assert!(bias.accelerometer.norm() < 1e-5);
        // 1 ms between calibration reads
        assert_eq!(clock.now_ms(), 100);
    }

    #[test]
    fn test_wait_holds_fixed_period() {
        let (mut estimator, clock) = estimator(None);
        estimator.start().unwrap();
        let start = clock.now_ms();

        estimator.wait();
        assert_eq!(clock.now_ms(), start + 10);

        // Work done inside the cycle counts against the period
        clock.now.set(clock.now_ms() + 4);
        estimator.wait();
        assert_eq!(clock.now_ms(), start + 20);

        // Overrun cycles do not sleep at all
        clock.now.set(clock.now_ms() + 25);
        let before = clock.now_ms();
        estimator.wait();
        assert_eq!(clock.now_ms(), before);
    }

    #[test]
    fn test_tick_subtracts_bias() {
        let live = MargSample::new(
            Vector3::new(0.002, -0.001, 0.003),
            Vector3::new(0.0, 0.0, GRAVITY_STANDARD),
        );
        let (mut estimator, _) = estimator(Some(live));
        estimator.start().unwrap();
        estimator.run_cycle().unwrap();

        let sample = estimator.last_sample();
        assert!(sample.gyroscope.norm() < 1e-6);
        assert!((sample.accelerometer.z - GRAVITY_STANDARD).abs() < 1e-5);
        assert!(estimator.roll().abs() < 1e-3);
        assert!(estimator.pitch().abs() < 1e-3);
        assert_eq!(estimator.yaw(), 0.0);
    }

    #[test]
    fn test_unanswered_read_reuses_previous_sample() {
        let live = MargSample::new(
            Vector3::new(0.002, -0.001, 0.503),
            Vector3::new(0.0, 0.0, GRAVITY_STANDARD),
        );
        let (mut estimator, _) = estimator(Some(live));
        estimator.start().unwrap();
        estimator.tick().unwrap();
        let first_yaw = estimator.orientation().yaw;

        estimator.engine.source_mut().live = None;
        estimator.tick().unwrap();

        // Same corrected Z rate applied again
        assert!((estimator.orientation().yaw - 2.0 * first_yaw).abs() < 1e-6);
    }

    #[test]
    fn test_resets() {
        let live = MargSample::new(
            Vector3::new(0.502, -0.001, 0.503),
            Vector3::new(0.0, 0.0, GRAVITY_STANDARD),
        );
        let (mut estimator, _) = estimator(Some(live));
        estimator.start().unwrap();
        for _ in 0..10 {
            estimator.run_cycle().unwrap();
        }
        assert!(estimator.yaw() > 0.0);
        assert!(estimator.roll() != 0.0);

        let roll = estimator.roll();
        estimator.reset_yaw();
        assert_eq!(estimator.yaw(), 0.0);
        assert_eq!(estimator.roll(), roll);
        assert_eq!(estimator.engine().orientation().yaw, 0.0);

        estimator.reset_roll();
        assert_eq!(estimator.roll(), 0.0);

        estimator.reset();
        assert_eq!(estimator.orientation(), Orientation::default());
        assert_eq!(estimator.engine().orientation(), Orientation::default());
    }

    #[test]
    fn test_poll_report_cadence() {
        let live = MargSample::new(Vector3::zeros(), Vector3::new(0.0, 0.0, GRAVITY_STANDARD));
        let (mut estimator, _) = estimator(Some(live));
        estimator.start().unwrap();

        let mut reports = 0;
        // 100 cycles at 10 ms = 1 s
        for _ in 0..100 {
            estimator.run_cycle().unwrap();
            if estimator.poll_report().is_some() {
                reports += 1;
            }
        }

        // First poll fires immediately, then every 250 ms
        assert_eq!(reports, 4);
    }

    #[test]
    fn test_second_start_keeps_bias() {
        let (mut estimator, clock) = estimator(None);
        estimator.start().unwrap();
        let bias = estimator.bias();
        let after_calibration = clock.now_ms();

        estimator.start().unwrap();
        assert_eq!(estimator.bias(), bias);
        assert_eq!(clock.now_ms(), after_calibration);
    }
}
