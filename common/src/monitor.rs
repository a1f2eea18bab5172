use core::fmt;

use crate::{
    config::MonitorConfig,
    thresholds::{ThresholdSet, Violation},
    types::{Reading, StorageConditionPayload},
    uplink::UplinkError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    SampleForCheck,
    SampleForSend,
    /// Start the buzzer at `MonitorConfig::alarm_frequency_hz`.
    AlarmOn,
    AlarmOff,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    InvalidReading,
    AwaitingThresholds,
    WithinBounds,
    Violated(Vec<Violation>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub checks: u64,
    pub violations: u64,
    pub alarms: u64,
    pub invalid_reads: u64,
    pub sends_ok: u64,
    pub sends_failed: u64,
    pub last_error: Option<String>,
}

impl fmt::Display for MonitorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checks={} violations={} alarms={} invalid_reads={} sends_ok={} sends_failed={}",
            self.checks,
            self.violations,
            self.alarms,
            self.invalid_reads,
            self.sends_ok,
            self.sends_failed
        )?;
        if let Some(err) = &self.last_error {
            write!(f, " last_error=\"{err}\"")?;
        }
        Ok(())
    }
}

/// Owns the check and send timers, the threshold set and the alarm deadline
/// for one node. The runtime calls [`MonitorEngine::tick`] on every loop pass
/// and executes the returned actions.
#[derive(Debug, Clone)]
pub struct MonitorEngine {
    pub config: MonitorConfig,
    device_id: i32,

    thresholds: Option<ThresholdSet>,

    last_check_ms: u64,
    last_send_ms: u64,
    alarm_until_ms: Option<u64>,

    stats: MonitorStats,
}

impl MonitorEngine {
    pub fn new(mut config: MonitorConfig, device_id: i32) -> Self {
        config.sanitize();
        Self {
            config,
            device_id,
            thresholds: None,
            last_check_ms: 0,
            last_send_ms: 0,
            alarm_until_ms: None,
            stats: MonitorStats::default(),
        }
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    pub fn thresholds(&self) -> Option<&ThresholdSet> {
        self.thresholds.as_ref()
    }

    pub fn apply_thresholds(&mut self, thresholds: ThresholdSet) {
        self.thresholds = Some(thresholds);
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn is_alarm_active(&self, now_ms: u64) -> bool {
        self.alarm_until_ms.is_some_and(|until| now_ms < until)
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<MonitorAction> {
        let mut actions = Vec::new();

        self.expire_alarm_if_needed(now_ms, &mut actions);

        if now_ms.saturating_sub(self.last_check_ms) >= self.config.check_interval_ms {
            self.last_check_ms = now_ms;
            actions.push(MonitorAction::SampleForCheck);
        }

        if now_ms.saturating_sub(self.last_send_ms) >= self.config.send_interval_ms {
            self.last_send_ms = now_ms;
            actions.push(MonitorAction::SampleForSend);
        }

        actions
    }

    /// Evaluates a reading taken for the check action. A violation arms the
    /// alarm until `now_ms + alarm_duration_ms`; [`MonitorEngine::tick`]
    /// silences it once that deadline passes.
    pub fn check_reading(
        &mut self,
        reading: Reading,
        now_ms: u64,
    ) -> (CheckOutcome, Vec<MonitorAction>) {
        if !reading.is_valid() {
            self.stats.invalid_reads = self.stats.invalid_reads.saturating_add(1);
            return (CheckOutcome::InvalidReading, Vec::new());
        }

        let thresholds = match self.thresholds {
            Some(thresholds) => thresholds,
            None if self.config.evaluate_before_thresholds => ThresholdSet::default(),
            None => return (CheckOutcome::AwaitingThresholds, Vec::new()),
        };

        self.stats.checks = self.stats.checks.saturating_add(1);

        let violations = thresholds.violations(&reading);
        if violations.is_empty() {
            return (CheckOutcome::WithinBounds, Vec::new());
        }

        self.stats.violations = self.stats.violations.saturating_add(1);
        self.stats.alarms = self.stats.alarms.saturating_add(1);
        self.alarm_until_ms = Some(now_ms.saturating_add(self.config.alarm_duration_ms));

        (
            CheckOutcome::Violated(violations),
            vec![MonitorAction::AlarmOn],
        )
    }

    /// Builds the upload payload for a reading taken for the send action, or
    /// `None` when the reading must not leave the device.
    pub fn prepare_report(&mut self, reading: Reading) -> Option<StorageConditionPayload> {
        if !reading.is_valid() {
            self.stats.invalid_reads = self.stats.invalid_reads.saturating_add(1);
            return None;
        }

        Some(StorageConditionPayload {
            temperature: reading.temperature,
            humidity: reading.humidity,
            device_id: self.device_id,
        })
    }

    pub fn report_body(&self, payload: &StorageConditionPayload) -> String {
        payload.to_json(usize::from(self.config.report_precision))
    }

    pub fn record_send_result(&mut self, result: &Result<(), UplinkError>) {
        match result {
            Ok(()) => {
                self.stats.sends_ok = self.stats.sends_ok.saturating_add(1);
            }
            Err(err) => {
                self.stats.sends_failed = self.stats.sends_failed.saturating_add(1);
                self.stats.last_error = Some(err.to_string());
            }
        }
    }

    /// Silences the alarm immediately, e.g. on shutdown.
    pub fn silence(&mut self) -> Vec<MonitorAction> {
        match self.alarm_until_ms.take() {
            Some(_) => vec![MonitorAction::AlarmOff],
            None => Vec::new(),
        }
    }

    fn expire_alarm_if_needed(&mut self, now_ms: u64, actions: &mut Vec<MonitorAction>) {
        if let Some(until) = self.alarm_until_ms {
            if now_ms >= until {
                self.alarm_until_ms = None;
                actions.push(MonitorAction::AlarmOff);
            }
        }
    }
}
