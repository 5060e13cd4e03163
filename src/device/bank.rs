//! Bank inventory and switching
//!
//! A device in bank mode has two media slots, `A` and `B`, of which one is
//! active. Devices outside bank mode (non-bank recording, or firmware that
//! has no bank concept) report that in one of several ways; the
//! [`NoBankRecognizer`] table maps all of them onto [`BankId::NoBankMode`].

use super::capabilities::DeviceCapabilities;
use crate::clock::{Clock, SystemClock};
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::acceptance::{self, status};
use crate::protocol::reply::{self, Reply};
use crate::protocol::{Client, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const BANK_QUERY: &str = "bank_set?";

/// Active bank field when nothing is mounted in the slot
const NOTHING_MOUNTED: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BankId {
    A,
    B,
    /// The device is not in bank mode; there is nothing to select
    NoBankMode,
}

impl BankId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BankId::A => "A",
            BankId::B => "B",
            BankId::NoBankMode => "nb",
        }
    }
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BankId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(BankId::A),
            "B" | "b" => Ok(BankId::B),
            "nb" => Ok(BankId::NoBankMode),
            other => Err(format!("unknown bank '{}', expected A or B", other)),
        }
    }
}

/// One mounted bank and the volume label of its pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub id: BankId,
    pub vsn: Option<String>,
}

impl Bank {
    fn new(id: BankId, vsn: Option<&str>) -> Self {
        Self {
            id,
            vsn: vsn.filter(|v| !v.is_empty()).map(str::to_string),
        }
    }
}

/// Both slots as reported by `bank_set?`. A slot with nothing mounted is
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BankStatus {
    pub active: Option<Bank>,
    pub inactive: Option<Bank>,
}

impl BankStatus {
    pub fn banks(&self) -> impl Iterator<Item = &Bank> {
        self.active.iter().chain(self.inactive.iter())
    }
}

/// One way a device says "no bank mode": a status code and, optionally, the
/// active-bank field it comes with. `None` matches any payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoBankRule {
    pub status: String,
    pub active: Option<String>,
}

impl NoBankRule {
    pub fn new(status: &str, active: Option<&str>) -> Self {
        Self {
            status: status.to_string(),
            active: active.map(str::to_string),
        }
    }

    fn matches(&self, reply: &Reply) -> bool {
        reply.status() == Some(self.status.as_str())
            && self
                .active
                .as_deref()
                .map_or(true, |expected| reply.field(2) == Some(expected))
    }
}

/// Table of [`NoBankRule`]s consulted on every `bank_set?` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoBankRecognizer {
    rules: Vec<NoBankRule>,
}

impl NoBankRecognizer {
    pub fn new(rules: Vec<NoBankRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: NoBankRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[NoBankRule] {
        &self.rules
    }

    pub fn matches(&self, reply: &Reply) -> bool {
        self.rules.iter().any(|rule| rule.matches(reply))
    }
}

impl Default for NoBankRecognizer {
    fn default() -> Self {
        Self::new(vec![
            // "not in bank mode"
            NoBankRule::new(status::NOT_APPLICABLE, None),
            // firmware without bank support at all
            NoBankRule::new(status::EXECUTION_ERROR, None),
            // non-bank recording: "0 : nb : <vsn> : nb : <companion>"
            NoBankRule::new(status::OK, Some("nb")),
        ])
    }
}

/// Whether `bank_set?` describes a device in bank mode
pub fn detect_bank_mode<T: Transport>(
    client: &mut Client<T>,
    recognizer: &NoBankRecognizer,
) -> DeviceResult<bool> {
    let reply = client.query_with(BANK_QUERY, acceptance::BANK_QUERY)?;
    Ok(!recognizer.matches(&reply))
}

/// Timing of the switch poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchPolicy {
    pub poll_interval: Duration,
    pub deadline: Duration,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            deadline: Duration::from_secs(5),
        }
    }
}

/// Progress of the most recent switch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    SwitchRequested,
    Polling,
    Complete,
    TimedOut,
    Rejected,
}

pub struct BankManager<C: Clock = SystemClock> {
    bank_mode: bool,
    policy: SwitchPolicy,
    recognizer: NoBankRecognizer,
    clock: C,
    state: SwitchState,
}

impl BankManager<SystemClock> {
    pub fn new(capabilities: &DeviceCapabilities) -> Self {
        Self::with_clock(capabilities, SystemClock)
    }
}

impl<C: Clock> BankManager<C> {
    pub fn with_clock(capabilities: &DeviceCapabilities, clock: C) -> Self {
        Self {
            bank_mode: capabilities.bank_mode,
            policy: SwitchPolicy::default(),
            recognizer: NoBankRecognizer::default(),
            clock,
            state: SwitchState::Idle,
        }
    }

    pub fn with_policy(mut self, policy: SwitchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_recognizer(mut self, recognizer: NoBankRecognizer) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    /// Both slots with their mounted packs
    pub fn bank_status<T: Transport>(&self, client: &mut Client<T>) -> DeviceResult<BankStatus> {
        let reply = client.query_with(BANK_QUERY, acceptance::BANK_QUERY)?;
        self.interpret(&reply)
    }

    /// The active bank, `None` when nothing is mounted
    pub fn current_bank<T: Transport>(&self, client: &mut Client<T>) -> DeviceResult<Option<Bank>> {
        Ok(self.bank_status(client)?.active)
    }

    /// Make `target` the active bank.
    ///
    /// A no-op outside bank mode and when `target` is already active.
    /// Otherwise the switch is requested and `bank_set?` polled until the
    /// device reports completion or the deadline passes.
    pub fn select_bank<T: Transport>(
        &mut self,
        client: &mut Client<T>,
        target: BankId,
    ) -> DeviceResult<()> {
        self.state = SwitchState::Idle;

        if !self.bank_mode || target == BankId::NoBankMode {
            tracing::debug!(bank = %target, "Device not in bank mode, nothing to select");
            return Ok(());
        }

        if let Some(active) = self.current_bank(client)? {
            if active.id == target {
                tracing::debug!(bank = %target, "Bank already active");
                return Ok(());
            }
        }

        tracing::info!(bank = %target, "Switching bank");
        self.state = SwitchState::SwitchRequested;
        client.query(&reply::command("bank_set", &[target.as_str()]))?;

        self.state = SwitchState::Polling;
        let done = self.poll_until_done(client, target)?;

        let active = done.field(2).unwrap_or_default().to_string();
        if active != target.as_str() {
            self.state = SwitchState::Rejected;
            let detail = error_detail(client).unwrap_or_else(|e| {
                tracing::warn!("Could not retrieve error detail: {}", e);
                done.raw().to_string()
            });
            return Err(DeviceError::BankSwitchRejected {
                target: target.to_string(),
                active,
                detail,
            });
        }

        self.state = SwitchState::Complete;
        tracing::info!(bank = %target, vsn = done.field(3).unwrap_or_default(), "Bank active");
        Ok(())
    }

    /// Run `operation` with `target` active, then reactivate the bank that
    /// was active before. A failure to switch back is reported only when
    /// `operation` itself succeeded.
    pub fn with_bank<T, R, F>(
        &mut self,
        client: &mut Client<T>,
        target: BankId,
        operation: F,
    ) -> DeviceResult<R>
    where
        T: Transport,
        F: FnOnce(&mut Client<T>) -> DeviceResult<R>,
    {
        let previous = if self.bank_mode {
            self.current_bank(client)?.map(|bank| bank.id)
        } else {
            None
        };

        self.select_bank(client, target)?;
        let result = operation(client);

        match previous {
            Some(previous) if previous != target => {
                match (self.select_bank(client, previous), result) {
                    (Ok(()), result) => result,
                    (Err(restore), Ok(_)) => Err(restore),
                    (Err(restore), Err(original)) => {
                        tracing::warn!(bank = %previous, "Could not restore bank: {}", restore);
                        Err(original)
                    }
                }
            }
            _ => result,
        }
    }

    fn poll_until_done<T: Transport>(
        &mut self,
        client: &mut Client<T>,
        target: BankId,
    ) -> DeviceResult<Reply> {
        let started = self.clock.now();
        loop {
            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed >= self.policy.deadline {
                self.state = SwitchState::TimedOut;
                return Err(DeviceError::BankSwitchTimeout {
                    target: target.to_string(),
                    elapsed,
                });
            }

            let reply = client.query_with(BANK_QUERY, acceptance::BANK_POLL)?;
            if reply.status() == Some(status::OK) {
                return Ok(reply);
            }
            tracing::trace!(status = reply.status().unwrap_or_default(), "Bank switch in progress");
            self.clock.sleep(self.policy.poll_interval);
        }
    }

    fn interpret(&self, reply: &Reply) -> DeviceResult<BankStatus> {
        if self.recognizer.matches(reply) {
            let vsn = if reply.status() == Some(status::OK) {
                reply.field(3)
            } else {
                None
            };
            return Ok(BankStatus {
                active: Some(Bank::new(BankId::NoBankMode, vsn)),
                inactive: None,
            });
        }

        if reply.status() != Some(status::OK) {
            return Err(DeviceError::rejected(
                BANK_QUERY,
                reply.raw(),
                reply.status().unwrap_or_default(),
            ));
        }

        Ok(BankStatus {
            active: slot(reply, 2)?,
            inactive: slot(reply, 4)?,
        })
    }
}

/// Bank at fields `index` (identifier) and `index + 1` (VSN)
fn slot(reply: &Reply, index: usize) -> DeviceResult<Option<Bank>> {
    match reply.field(index) {
        None | Some(NOTHING_MOUNTED) | Some("") => Ok(None),
        Some(id) => {
            let id = id
                .parse::<BankId>()
                .map_err(|reason| DeviceError::malformed(BANK_QUERY, reply.raw(), reason))?;
            Ok(Some(Bank::new(id, reply.field(index + 1))))
        }
    }
}

/// The device's last error as `<number> : <message>`
fn error_detail<T: Transport>(client: &mut Client<T>) -> DeviceResult<String> {
    let reply = client.query_with("error?", acceptance::ONLY_OK)?;
    Ok(reply
        .payload()
        .iter()
        .take(2)
        .filter(|field| !field.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" : "))
}
