//! Run telemetry recorded by the feedback controller.
//!
//! Every controller run leaves a trail of typed events in a fixed-size ring
//! buffer: when it started, each measurement it took, the retry decisions it
//! made and how it ended. Event kinds encode to compact numeric codes so the
//! trail can be mirrored over diagnostics channels without pulling in a
//! serializer.

use core::{convert::TryFrom, fmt};

use heapless::HistoryBuf;

use crate::options::ActionKind;

/// Monotonic identifier assigned to each recorded event.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated telemetry events emitted by the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    RunStarted(ActionKind),
    MeasurementTaken,
    VoltageEscalated,
    ThresholdMet,
    RetryBudgetExhausted,
    SweepStep(ActionKind),
    RunComplete(ActionKind),
    RunAborted(ActionKind),
    Calibrated,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::RunStarted(kind) => write!(f, "run-started {kind}"),
            TelemetryEventKind::MeasurementTaken => f.write_str("measurement-taken"),
            TelemetryEventKind::VoltageEscalated => f.write_str("voltage-escalated"),
            TelemetryEventKind::ThresholdMet => f.write_str("threshold-met"),
            TelemetryEventKind::RetryBudgetExhausted => f.write_str("retry-budget-exhausted"),
            TelemetryEventKind::SweepStep(kind) => write!(f, "sweep-step {kind}"),
            TelemetryEventKind::RunComplete(kind) => write!(f, "run-complete {kind}"),
            TelemetryEventKind::RunAborted(kind) => write!(f, "run-aborted {kind}"),
            TelemetryEventKind::Calibrated => f.write_str("calibrated"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const RUN_STARTED_BASE: u16 = 0x0000;
    const SWEEP_STEP_BASE: u16 = 0x0004;
    const RUN_COMPLETE_BASE: u16 = 0x0008;
    const RUN_ABORTED_BASE: u16 = 0x000C;
    const MEASUREMENT_TAKEN_CODE: u16 = 0x0010;
    const VOLTAGE_ESCALATED_CODE: u16 = 0x0011;
    const THRESHOLD_MET_CODE: u16 = 0x0012;
    const RETRY_BUDGET_EXHAUSTED_CODE: u16 = 0x0013;
    const CALIBRATED_CODE: u16 = 0x0014;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::RunStarted(kind) => Self::RUN_STARTED_BASE + action_index(kind),
            TelemetryEventKind::SweepStep(kind) => Self::SWEEP_STEP_BASE + action_index(kind),
            TelemetryEventKind::RunComplete(kind) => Self::RUN_COMPLETE_BASE + action_index(kind),
            TelemetryEventKind::RunAborted(kind) => Self::RUN_ABORTED_BASE + action_index(kind),
            TelemetryEventKind::MeasurementTaken => Self::MEASUREMENT_TAKEN_CODE,
            TelemetryEventKind::VoltageEscalated => Self::VOLTAGE_ESCALATED_CODE,
            TelemetryEventKind::ThresholdMet => Self::THRESHOLD_MET_CODE,
            TelemetryEventKind::RetryBudgetExhausted => Self::RETRY_BUDGET_EXHAUSTED_CODE,
            TelemetryEventKind::Calibrated => Self::CALIBRATED_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        let based = |base: u16, wrap: fn(ActionKind) -> Self| {
            action_from_index(code - base).map_or(TelemetryEventKind::Custom(code), wrap)
        };

        match code {
            Self::MEASUREMENT_TAKEN_CODE => TelemetryEventKind::MeasurementTaken,
            Self::VOLTAGE_ESCALATED_CODE => TelemetryEventKind::VoltageEscalated,
            Self::THRESHOLD_MET_CODE => TelemetryEventKind::ThresholdMet,
            Self::RETRY_BUDGET_EXHAUSTED_CODE => TelemetryEventKind::RetryBudgetExhausted,
            Self::CALIBRATED_CODE => TelemetryEventKind::Calibrated,
            value if (Self::RUN_STARTED_BASE..Self::SWEEP_STEP_BASE).contains(&value) => {
                based(Self::RUN_STARTED_BASE, TelemetryEventKind::RunStarted)
            }
            value if (Self::SWEEP_STEP_BASE..Self::RUN_COMPLETE_BASE).contains(&value) => {
                based(Self::SWEEP_STEP_BASE, TelemetryEventKind::SweepStep)
            }
            value if (Self::RUN_COMPLETE_BASE..Self::RUN_ABORTED_BASE).contains(&value) => {
                based(Self::RUN_COMPLETE_BASE, TelemetryEventKind::RunComplete)
            }
            value if (Self::RUN_ABORTED_BASE..Self::MEASUREMENT_TAKEN_CODE).contains(&value) => {
                based(Self::RUN_ABORTED_BASE, TelemetryEventKind::RunAborted)
            }
            other => TelemetryEventKind::Custom(other),
        }
    }

    /// Returns `true` for the events that close a run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TelemetryEventKind::RunComplete(_) | TelemetryEventKind::RunAborted(_)
        )
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryPayload {
    None,
    /// One measurement, or a decision made about it.
    Measurement(MeasurementTelemetry),
    /// Summary attached to the event that closes a run.
    Run(RunTelemetry),
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Measurement payload.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeasurementTelemetry {
    /// Zero-based position of the measurement within its run.
    pub index: u16,
    /// Voltage or frequency the measurement was taken at.
    pub setpoint: f64,
    /// Capacitance per area (F/mm²), when it was derived.
    pub capacitance_per_area: Option<f64>,
}

impl MeasurementTelemetry {
    #[must_use]
    pub const fn new(index: u16, setpoint: f64, capacitance_per_area: Option<f64>) -> Self {
        Self {
            index,
            setpoint,
            capacitance_per_area,
        }
    }
}

/// Run summary payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RunTelemetry {
    /// Measurements completed when the run ended.
    pub measurements: u16,
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(&mut self, event: TelemetryEventKind, payload: TelemetryPayload) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            event,
            details: payload,
        });

        id
    }

    pub fn record_run_started(&mut self, kind: ActionKind) -> EventId {
        self.record(TelemetryEventKind::RunStarted(kind), TelemetryPayload::none())
    }

    /// Records a completed board measurement.
    pub fn record_measurement(
        &mut self,
        index: usize,
        setpoint: f64,
        capacitance_per_area: Option<f64>,
    ) -> EventId {
        self.record(
            TelemetryEventKind::MeasurementTaken,
            measurement(index, setpoint, capacitance_per_area),
        )
    }

    /// Records a retry that raises the applied voltage to `voltage`.
    pub fn record_escalation(&mut self, repeat: usize, voltage: f64) -> EventId {
        self.record(
            TelemetryEventKind::VoltageEscalated,
            measurement(repeat, voltage, None),
        )
    }

    pub fn record_threshold_met(
        &mut self,
        index: usize,
        voltage: f64,
        capacitance_per_area: f64,
    ) -> EventId {
        self.record(
            TelemetryEventKind::ThresholdMet,
            measurement(index, voltage, Some(capacitance_per_area)),
        )
    }

    pub fn record_budget_exhausted(
        &mut self,
        index: usize,
        voltage: f64,
        capacitance_per_area: f64,
    ) -> EventId {
        self.record(
            TelemetryEventKind::RetryBudgetExhausted,
            measurement(index, voltage, Some(capacitance_per_area)),
        )
    }

    pub fn record_sweep_step(&mut self, kind: ActionKind, index: usize, setpoint: f64) -> EventId {
        self.record(
            TelemetryEventKind::SweepStep(kind),
            measurement(index, setpoint, None),
        )
    }

    pub fn record_run_complete(&mut self, kind: ActionKind, measurements: usize) -> EventId {
        self.record(
            TelemetryEventKind::RunComplete(kind),
            TelemetryPayload::Run(RunTelemetry {
                measurements: truncate_count(measurements),
            }),
        )
    }

    pub fn record_run_aborted(&mut self, kind: ActionKind, measurements: usize) -> EventId {
        self.record(
            TelemetryEventKind::RunAborted(kind),
            TelemetryPayload::Run(RunTelemetry {
                measurements: truncate_count(measurements),
            }),
        )
    }

    /// Records a new calibration baseline measured at `voltage`.
    pub fn record_calibrated(&mut self, voltage: f64, threshold: f64) -> EventId {
        self.record(
            TelemetryEventKind::Calibrated,
            measurement(0, voltage, Some(threshold)),
        )
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

fn measurement(index: usize, setpoint: f64, capacitance_per_area: Option<f64>) -> TelemetryPayload {
    TelemetryPayload::Measurement(MeasurementTelemetry::new(
        truncate_count(index),
        setpoint,
        capacitance_per_area,
    ))
}

fn truncate_count(count: usize) -> u16 {
    match u16::try_from(count) {
        Ok(value) => value,
        Err(_) => u16::MAX,
    }
}

const fn action_index(kind: ActionKind) -> u16 {
    match kind {
        ActionKind::Retry => 0,
        ActionKind::SweepFrequency => 1,
        ActionKind::SweepVoltage => 2,
    }
}

fn action_from_index(index: u16) -> Option<ActionKind> {
    match index {
        0 => Some(ActionKind::Retry),
        1 => Some(ActionKind::SweepFrequency),
        2 => Some(ActionKind::SweepVoltage),
        _ => None,
    }
}
