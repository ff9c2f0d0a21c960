use crate::astro_math;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current time, injected so the coordinate pipeline and the
/// periodic sub-ticks are deterministic under test.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;

    fn now_mjd(&self) -> f64 {
        astro_math::mjd_from_datetime(self.now())
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, d: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + d;
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap() = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
