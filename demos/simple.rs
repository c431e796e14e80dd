use nalgebra::Vector3;
use tilt_fusion::{
    EstimatorSettings, MargSample, OrientationEstimator, RawSampleSource, SamplePeriod,
    SoftwareFusion, StdClock,
};

/// Stand-in for an IMU driver: a board at rest that starts turning
/// about Z once calibration is done
struct SyntheticImu {
    reads: u32,
    calibration_samples: u32,
}

impl RawSampleSource for SyntheticImu {
    fn read(&mut self) -> Option<MargSample> {
        self.reads += 1;

        // replace this with gyroscope data in rad/s and accelerometer data in m/s²
        let turn_rate = if self.reads > self.calibration_samples {
            0.5
        } else {
            0.0
        };
        let gyroscope = Vector3::new(0.001, -0.002, 0.0015 + turn_rate);
        let accelerometer = Vector3::new(0.0, 0.4, 9.8);

        Some(MargSample::new(gyroscope, accelerometer))
    }
}

fn main() -> Result<(), tilt_fusion::Error> {
    let settings = EstimatorSettings {
        calibration_samples: 50,
        sample_period: SamplePeriod::Hertz(50),
        ..Default::default()
    };

    let imu = SyntheticImu {
        reads: 0,
        calibration_samples: settings.calibration_samples,
    };
    let engine = SoftwareFusion::new(imu);
    let mut estimator = OrientationEstimator::new(engine, StdClock::new(), settings)?;

    estimator.start()?;

    for _ in 0..50 {
        estimator.run_cycle()?;

        if let Some(report) = estimator.poll_report() {
            println!(
                "Roll: {:.2}, Pitch: {:.2}, Yaw: {:.2}, tiltY: {}",
                estimator.roll(),
                estimator.pitch(),
                estimator.yaw(),
                report.get("tiltY").unwrap_or("-")
            );
        }
    }

    Ok(())
}
