//! Uniform interface over the fusion backends
//!
//! An [`OrientationEstimator`](crate::OrientationEstimator) drives any
//! [`FusionEngine`]; which one is decided once, when the estimator is built.

use nalgebra::UnitQuaternion;

use crate::ahrs::QuaternionAhrs;
use crate::calibration::Calibrator;
use crate::complementary::ComplementaryFilter;
use crate::dmp::{DmpPassthrough, MotionProcessor};
use crate::error::Error;
use crate::source::{Clock, RawSampleSource};
use crate::types::{Bias, EstimatorSettings, MargSample, Orientation};

/// Which backend an engine is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Host-side complementary filter on raw IMU data
    Complementary,
    /// Fusion done on the motion processor
    Dmp,
    /// Host-side quaternion AHRS on raw IMU data
    Ahrs,
}

/// Lifecycle and per-cycle operations shared by all backends
///
/// The call order is fixed: `configure`, `initialize`, `calibrate` once,
/// then per cycle `wait_for_sample`, `read_event`, `update`.
pub trait FusionEngine {
    fn kind(&self) -> EngineKind;

    /// Take filter parameters from already validated settings
    ///
    /// Called by the estimator when it takes ownership of the engine.
    fn configure(&mut self, _settings: &EstimatorSettings) {}

    /// Connectivity/self-test and firmware bring-up
    fn initialize(&mut self) -> Result<(), Error>;

    /// Establish the bias from `sample_count` at-rest samples
    fn calibrate(&mut self, clock: &mut dyn Clock, sample_count: u32) -> Result<Bias, Error>;

    /// Block until the backend has a fresh sample
    ///
    /// Backends paced purely by the estimator's period return immediately.
    fn wait_for_sample(&mut self, clock: &mut dyn Clock);

    /// Raw sample for this cycle, `None` if the sensor did not answer
    fn read_event(&mut self) -> Option<MargSample>;

    /// Fold one bias-corrected sample into the estimate
    fn update(&mut self, sample: &MargSample, dt: f32);

    /// Current estimate in radians
    fn orientation(&self) -> Orientation;

    fn set_orientation(&mut self, orientation: Orientation);

    /// Attitude quaternion, for backends that produce one
    fn quaternion(&self) -> Option<UnitQuaternion<f32>> {
        None
    }
}

/// Complementary filter fed from a raw sample source
pub struct SoftwareFusion<S> {
    source: S,
    filter: ComplementaryFilter,
    calibration_delay_ms: u32,
}

impl<S: RawSampleSource> SoftwareFusion<S> {
    /// Wrap a sample source
    ///
    /// The filter starts with default parameters and is rebuilt from the
    /// estimator's settings once an
    /// [`OrientationEstimator`](crate::OrientationEstimator) owns it.
    pub fn new(source: S) -> Self {
        let settings = EstimatorSettings::default();

        Self {
            source,
            filter: ComplementaryFilter::default(),
            calibration_delay_ms: settings.calibration_delay_ms,
        }
    }

    pub fn filter(&self) -> &ComplementaryFilter {
        &self.filter
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: RawSampleSource> FusionEngine for SoftwareFusion<S> {
    fn kind(&self) -> EngineKind {
        EngineKind::Complementary
    }

    fn configure(&mut self, settings: &EstimatorSettings) {
        let mut filter = ComplementaryFilter::new(
            settings.filter_weight,
            settings.yaw_threshold,
            settings.declination.radians(),
        );
        filter.set_orientation(self.filter.orientation());

        self.filter = filter;
        self.calibration_delay_ms = settings.calibration_delay_ms;
    }

    fn initialize(&mut self) -> Result<(), Error> {
        if self.source.probe() {
            Ok(())
        } else {
            log::error!("IMU not found");
            Err(Error::SensorUnavailable)
        }
    }

    fn calibrate(&mut self, clock: &mut dyn Clock, sample_count: u32) -> Result<Bias, Error> {
        Calibrator::new(sample_count)
            .with_delay_ms(self.calibration_delay_ms)
            .calibrate(&mut self.source, clock)
    }

    fn wait_for_sample(&mut self, _clock: &mut dyn Clock) {}

    fn read_event(&mut self) -> Option<MargSample> {
        self.source.read()
    }

    fn update(&mut self, sample: &MargSample, dt: f32) {
        self.filter.update(sample, dt);
    }

    fn orientation(&self) -> Orientation {
        self.filter.orientation()
    }

    fn set_orientation(&mut self, orientation: Orientation) {
        self.filter.set_orientation(orientation);
    }
}

/// Quaternion AHRS fed from a raw sample source
pub struct AhrsFusion<S> {
    source: S,
    ahrs: QuaternionAhrs,
    calibration_delay_ms: u32,
}

impl<S: RawSampleSource> AhrsFusion<S> {
    /// Wrap a sample source with default AHRS tuning
    ///
    /// Declination and calibration delay come from the estimator's settings;
    /// the AHRS gains are set through [`with_ahrs`](Self::with_ahrs).
    pub fn new(source: S) -> Self {
        Self {
            source,
            ahrs: QuaternionAhrs::new(),
            calibration_delay_ms: EstimatorSettings::default().calibration_delay_ms,
        }
    }

    pub fn with_ahrs(mut self, ahrs: QuaternionAhrs) -> Self {
        self.ahrs = ahrs;
        self
    }

    pub fn ahrs(&self) -> &QuaternionAhrs {
        &self.ahrs
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: RawSampleSource> FusionEngine for AhrsFusion<S> {
    fn kind(&self) -> EngineKind {
        EngineKind::Ahrs
    }

    fn configure(&mut self, settings: &EstimatorSettings) {
        self.ahrs.set_declination(settings.declination.radians());
        self.calibration_delay_ms = settings.calibration_delay_ms;
    }

    fn initialize(&mut self) -> Result<(), Error> {
        if self.source.probe() {
            Ok(())
        } else {
            log::error!("IMU not found");
            Err(Error::SensorUnavailable)
        }
    }

    fn calibrate(&mut self, clock: &mut dyn Clock, sample_count: u32) -> Result<Bias, Error> {
        Calibrator::new(sample_count)
            .with_delay_ms(self.calibration_delay_ms)
            .calibrate(&mut self.source, clock)
    }

    fn wait_for_sample(&mut self, _clock: &mut dyn Clock) {}

    fn read_event(&mut self) -> Option<MargSample> {
        self.source.read()
    }

    fn update(&mut self, sample: &MargSample, dt: f32) {
        self.ahrs.update(sample, dt);
    }

    fn orientation(&self) -> Orientation {
        self.ahrs.orientation()
    }

    fn set_orientation(&mut self, orientation: Orientation) {
        self.ahrs.set_orientation(orientation);
    }

    fn quaternion(&self) -> Option<UnitQuaternion<f32>> {
        Some(self.ahrs.quaternion())
    }
}

impl<P: MotionProcessor> FusionEngine for DmpPassthrough<P> {
    fn kind(&self) -> EngineKind {
        EngineKind::Dmp
    }

    fn initialize(&mut self) -> Result<(), Error> {
        DmpPassthrough::initialize(self)
    }

    fn calibrate(&mut self, _clock: &mut dyn Clock, sample_count: u32) -> Result<Bias, Error> {
        DmpPassthrough::calibrate(self, sample_count);
        Ok(Bias::zero())
    }

    fn wait_for_sample(&mut self, clock: &mut dyn Clock) {
        DmpPassthrough::wait_for_sample(self, clock);
    }

    fn read_event(&mut self) -> Option<MargSample> {
        Some(DmpPassthrough::read_event(self))
    }

    fn update(&mut self, _sample: &MargSample, _dt: f32) {
        DmpPassthrough::update(self);
    }

    fn orientation(&self) -> Orientation {
        DmpPassthrough::orientation(self)
    }

    fn set_orientation(&mut self, orientation: Orientation) {
        DmpPassthrough::set_orientation(self, orientation);
    }

    fn quaternion(&self) -> Option<UnitQuaternion<f32>> {
        Some(DmpPassthrough::quaternion(self))
    }
}
