//! Conditioning progress sampling
//!
//! While the device conditions a pack, `tstat=` is polled and the record
//! pointer read at the sampling cadence. The pointer counts down through the
//! read sub-pass, jumps back up when the device starts writing, and counts
//! down again.

use super::ProgressSample;
use crate::clock::Clock;
use crate::device::{directory, DeviceFamily};
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::acceptance;
use crate::protocol::{Client, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Transfer mode reported by `tstat=` once conditioning has finished
const NO_TRANSFER: &str = "no_transfer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pass {
    Read,
    Write,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Read => write!(f, "Read"),
            Pass::Write => write!(f, "Write"),
        }
    }
}

/// Running minimum and maximum of the observed data rate
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThroughputTracker {
    min: Option<f64>,
    max: Option<f64>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rate: f64) {
        self.min = Some(self.min.map_or(rate, |min| min.min(rate)));
        self.max = Some(self.max.map_or(rate, |max| max.max(rate)));
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }
}

/// Turns successive (offset, time) readings into progress samples.
///
/// The first increase of the offset marks the switch from the read to the
/// write sub-pass; that sample yields no rate. Every other sample rates the
/// absolute offset change over the time between readings.
#[derive(Debug, Clone)]
pub struct SampleTracker {
    pass: Pass,
    previous: Option<(u64, Instant)>,
}

impl Default for SampleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleTracker {
    pub fn new() -> Self {
        Self {
            pass: Pass::Read,
            previous: None,
        }
    }

    pub fn pass(&self) -> Pass {
        self.pass
    }

    pub fn observe(&mut self, offset: u64, at: Instant) -> ProgressSample {
        let sample = match self.previous {
            None => ProgressSample {
                previous_offset: offset,
                current_offset: offset,
                elapsed: 0.0,
                pass: self.pass,
                data_rate: None,
            },
            Some((previous, then)) => {
                let elapsed = at.saturating_duration_since(then).as_secs_f64();

                let transition = offset > previous && self.pass == Pass::Read;
                if transition {
                    tracing::info!(offset, "Read pass complete, device is writing");
                    self.pass = Pass::Write;
                }

                let data_rate = if transition || elapsed <= 0.0 {
                    None
                } else {
                    Some(offset.abs_diff(previous) as f64 / elapsed)
                };

                ProgressSample {
                    previous_offset: previous,
                    current_offset: offset,
                    elapsed,
                    pass: self.pass,
                    data_rate,
                }
            }
        };

        self.previous = Some((offset, at));
        sample
    }
}

/// Samples a running conditioning pass until the device reports it done
pub struct ConditionMonitor<'a, C: Clock> {
    clock: &'a C,
    family: DeviceFamily,
    interval: Duration,
    interrupt: Option<&'a AtomicBool>,
}

impl<'a, C: Clock> ConditionMonitor<'a, C> {
    pub fn new(clock: &'a C, family: DeviceFamily, interval: Duration) -> Self {
        Self {
            clock,
            family,
            interval,
            interrupt: None,
        }
    }

    /// Stop at the next sample once `flag` is set
    pub fn with_interrupt(mut self, flag: &'a AtomicBool) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Poll until `tstat=` reports no transfer.
    ///
    /// On any failure `reset=abort` is sent before returning, and the
    /// original error is returned as is. Only when the abort fails too does
    /// it come back wrapped in [`DeviceError::Abort`], with the abort's
    /// failure attached.
    pub fn run<T: Transport>(
        &self,
        client: &mut Client<T>,
        progress: &mut dyn FnMut(&ProgressSample),
    ) -> DeviceResult<ThroughputTracker> {
        self.sample(client, progress).map_err(|error| {
            tracing::error!("Conditioning failed, aborting transfer: {}", error);
            match client.query_with("reset=abort", acceptance::ABORT) {
                Ok(_) => error,
                Err(abort_error) => {
                    tracing::error!("Abort failed: {}", abort_error);
                    DeviceError::Abort {
                        source: Box::new(error),
                        abort_failure: Some(Box::new(abort_error)),
                    }
                }
            }
        })
    }

    fn sample<T: Transport>(
        &self,
        client: &mut Client<T>,
        progress: &mut dyn FnMut(&ProgressSample),
    ) -> DeviceResult<ThroughputTracker> {
        let mut throughput = ThroughputTracker::new();
        let mut tracker = SampleTracker::new();

        loop {
            if self.interrupted() {
                return Err(DeviceError::Interrupted);
            }

            let started = self.clock.now();
            let transfer = client.query("tstat=")?;
            if transfer.field(3) == Some(NO_TRANSFER) {
                tracing::info!("Conditioning complete");
                return Ok(throughput);
            }

            let offset = directory::record_pointer(client, self.family)?;
            let sample = tracker.observe(offset, self.clock.now());
            if let Some(rate) = sample.data_rate {
                throughput.record(rate);
            }
            tracing::debug!(
                pass = %sample.pass,
                offset,
                rate = sample.data_rate.unwrap_or(0.0),
                "Conditioning progress"
            );
            progress(&sample);

            // the next sample is due one interval after this one started
            let spent = self.clock.now().saturating_duration_since(started);
            self.clock.sleep(self.interval.saturating_sub(spent));
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .map_or(false, |flag| flag.load(Ordering::SeqCst))
    }
}
