//! Collaborator traits: raw sample acquisition and timekeeping

use crate::types::MargSample;

/// Anything that can hand out one raw IMU sample per call
///
/// Implemented by the board support code on top of the actual sensor
/// drivers. Units are rad/s, m/s² and µT.
pub trait RawSampleSource {
    /// Connectivity/self-test check run once at startup
    fn probe(&mut self) -> bool {
        true
    }

    /// Read one sample, `None` if the sensor did not respond
    fn read(&mut self) -> Option<MargSample>;
}

impl<S: RawSampleSource + ?Sized> RawSampleSource for &mut S {
    fn probe(&mut self) -> bool {
        (**self).probe()
    }

    fn read(&mut self) -> Option<MargSample> {
        (**self).read()
    }
}

/// Monotonic millisecond clock with a yielding sleep
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin, never decreasing
    fn now_ms(&self) -> u64;

    /// Give up the processor for about `ms` milliseconds
    fn sleep_ms(&mut self, ms: u64);
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn sleep_ms(&mut self, ms: u64) {
        (**self).sleep_ms(ms)
    }
}

/// Clock backed by `std::time::Instant` and `std::thread::sleep`
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_ms(&mut self, ms: u64) {
        if ms == 0 {
            std::thread::yield_now();
        } else {
            std::thread::sleep(std::time::Duration::from_millis(ms));
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_std_clock_is_monotonic() {
        let mut clock = StdClock::new();
        let start = clock.now_ms();
        clock.sleep_ms(5);
        let end = clock.now_ms();
        assert!(end >= start + 5, "start {} end {}", start, end);
    }
}
