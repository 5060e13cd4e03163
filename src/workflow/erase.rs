//! Erase against a real device
//!
//! Phase order and failure handling:
//! 1. bank select, 2. quick erase, 3. statistics setup: fail without
//!    corrective action, nothing destructive has run yet
//! 4. conditioning: abort the transfer, then fail
//! 5. statistics collection: fail as is
//! 6. integrity check: a failed label restore is logged, the run still
//!    succeeds

use super::condition::{ConditionMonitor, ThroughputTracker};
use super::stats::{self, stat_thresholds};
use super::{EraseMode, EraseOptions, EraseResult, EraseStrategy, Phase, ProgressSample};
use crate::clock::{Clock, SystemClock};
use crate::device::{directory, BankManager, DeviceCapabilities, SwitchPolicy};
use crate::error::DeviceResult;
use crate::protocol::acceptance::{self, AcceptanceSet};
use crate::protocol::reply;
use crate::protocol::{Client, Transport};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub struct DeviceEraser<C: Clock = SystemClock> {
    clock: C,
    switch_policy: SwitchPolicy,
    interrupt: Option<Arc<AtomicBool>>,
}

impl DeviceEraser<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for DeviceEraser<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> DeviceEraser<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            switch_policy: SwitchPolicy::default(),
            interrupt: None,
        }
    }

    pub fn with_switch_policy(mut self, policy: SwitchPolicy) -> Self {
        self.switch_policy = policy;
        self
    }

    /// Flag checked before every conditioning sample
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn enter(&self, phase: Phase) {
        tracing::info!(phase = %phase, "Entering phase");
    }
}

impl<T: Transport, C: Clock> EraseStrategy<T> for DeviceEraser<C> {
    fn erase(
        &mut self,
        client: &mut Client<T>,
        capabilities: &DeviceCapabilities,
        options: &EraseOptions,
        progress: &mut dyn FnMut(&ProgressSample),
    ) -> DeviceResult<EraseResult> {
        let started = self.clock.now();

        if let Some(bank) = options.bank {
            self.enter(Phase::BankSelect);
            BankManager::with_clock(capabilities, &self.clock)
                .with_policy(self.switch_policy)
                .select_bank(client, bank)?;
        }

        let original_vsn = match options.mode {
            EraseMode::ReadWriteBenchmark => Some(directory::volume_label(client)?),
            _ => None,
        };

        self.enter(Phase::QuickErase);
        unprotected(client, capabilities, "reset=erase", acceptance::DEFAULT)?;

        let mut result = EraseResult::default();

        if options.mode.conditions() {
            self.enter(Phase::StatsSetup);
            let thresholds = stat_thresholds();
            client.query(&stats::start_stats_command(&thresholds))?;
            result.stat_thresholds = Some(thresholds);

            self.enter(Phase::Conditioning);
            let reset = reply::command("reset", &[options.mode.reset_argument()]);
            unprotected(client, capabilities, &reset, acceptance::DEFAULT)?;

            let interval = options.effective_sample_interval();
            let monitor = ConditionMonitor::new(&self.clock, capabilities.family, interval);
            let monitor = match &self.interrupt {
                Some(flag) => monitor.with_interrupt(flag.as_ref()),
                None => monitor,
            };
            let throughput: ThroughputTracker = monitor.run(client, progress)?;
            result.min_data_rate = throughput.min();
            result.max_data_rate = throughput.max();
        }

        self.enter(Phase::StatsCollection);
        result.drive_stats = stats::collect_stats(client)?;

        if let Some(original) = original_vsn {
            self.enter(Phase::IntegrityCheck);
            let current = directory::volume_label(client)?;
            if current != original {
                tracing::warn!(
                    original = %original,
                    current = %current,
                    "Volume label changed during conditioning, restoring"
                );
                let restore = reply::command("vsn", &[original.as_str()]);
                if let Err(e) = unprotected(client, capabilities, &restore, acceptance::DEFAULT) {
                    tracing::warn!(original = %original, "Could not restore volume label: {}", e);
                }
            }
        }

        result.duration = self.clock.now().saturating_duration_since(started);
        tracing::info!(
            duration = %humantime::format_duration(result.duration),
            drives = result.drive_stats.len(),
            "Erase complete"
        );
        Ok(result)
    }
}

/// Send `command` right after `protect=off`. The device only honours a
/// destructive command that immediately follows the protect override, so
/// both go in one batch where the firmware allows it.
fn unprotected<T: Transport>(
    client: &mut Client<T>,
    capabilities: &DeviceCapabilities,
    command: &str,
    accept: AcceptanceSet,
) -> DeviceResult<()> {
    if capabilities.batch_queries {
        client.query_batch(&[("protect=off", acceptance::PROTECT_OFF), (command, accept)])?;
    } else {
        client.query_with("protect=off", acceptance::PROTECT_OFF)?;
        client.query_with(command, accept)?;
    }
    Ok(())
}
