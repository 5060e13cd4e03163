/// Test helper functions
use mk5ctl::Clock;
use std::cell::Cell;
use std::time::{Duration, Instant};

/// Clock that only moves when slept on
pub struct ManualClock {
    base: Instant,
    offset: Cell<Duration>,
    sleeps: Cell<u32>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Cell::new(Duration::ZERO),
            sleeps: Cell::new(0),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.set(self.sleeps.get() + 1);
        self.offset.set(self.offset.get() + duration);
    }
}

/// Short poll and a generous deadline, so a switch needing a handful of
/// polls never times out
#[allow(dead_code)]
pub fn patient_policy() -> mk5ctl::device::SwitchPolicy {
    mk5ctl::device::SwitchPolicy {
        poll_interval: Duration::from_millis(100),
        deadline: Duration::from_secs(60),
    }
}
