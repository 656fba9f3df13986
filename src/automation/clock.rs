/// Time source for spawn checks and module timers
///
/// Times are seconds as `f64`. `SystemClock` counts from the Unix epoch;
/// `ManualClock` starts at zero and only moves when told to.

use std::sync::{Arc, Mutex};

use crate::core::lock;

/// Source of the current time in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// Settable clock for simulations and tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, secs: f64) {
        *lock(&self.now) = secs;
    }

    pub fn advance(&self, secs: f64) {
        *lock(&self.now) += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *lock(&self.now)
    }
}
