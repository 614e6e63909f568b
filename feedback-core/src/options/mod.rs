//! Per-step feedback configuration.
//!
//! Every protocol step owns one [`FeedbackOptions`] value. Operators edit it in
//! place; the controller reads it when the step runs. Construction never
//! checks ranges, matching how the values are edited field by field.
//! [`FeedbackOptions::validate`] performs the explicit checks right before a
//! run.

use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Default sampling window per reading, in milliseconds.
pub const DEFAULT_SAMPLING_TIME_MS: u32 = 10;
/// Default number of readings per measurement.
pub const DEFAULT_N_SAMPLES: u32 = 10;
/// Default idle time between readings, in milliseconds.
pub const DEFAULT_DELAY_BETWEEN_SAMPLES_MS: u32 = 0;

/// Default voltage step applied on each retry.
pub const DEFAULT_INCREASE_VOLTAGE: f64 = 0.0;
/// Default number of retries after the first measurement.
pub const DEFAULT_MAX_REPEATS: u32 = 3;

/// Default frequency sweep bounds (Hz) and step count.
pub const DEFAULT_START_FREQUENCY: f64 = 1e2;
pub const DEFAULT_END_FREQUENCY: f64 = 30e3;
pub const DEFAULT_FREQUENCY_STEPS: u32 = 30;

/// Default voltage sweep bounds (V) and step count.
pub const DEFAULT_START_VOLTAGE: f64 = 5.0;
pub const DEFAULT_END_VOLTAGE: f64 = 100.0;
pub const DEFAULT_VOLTAGE_STEPS: u32 = 20;

/// Repeat the measurement with escalating voltage until the capacitance per
/// area reaches a threshold.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryAction {
    /// Capacitance per area (F/mm²). `None` defers to the calibrated baseline.
    pub capacitance_threshold: Option<f64>,
    /// Volts added to the applied voltage on each retry.
    pub increase_voltage: f64,
    /// Retries allowed after the first measurement.
    pub max_repeats: u32,
}

impl RetryAction {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            capacitance_threshold: None,
            increase_voltage: DEFAULT_INCREASE_VOLTAGE,
            max_repeats: DEFAULT_MAX_REPEATS,
        }
    }

    /// Resolves the threshold in effect for a run, falling back to `baseline`
    /// and then to zero (no threshold).
    #[must_use]
    pub fn effective_threshold(&self, baseline: Option<f64>) -> f64 {
        self.capacitance_threshold.or(baseline).unwrap_or(0.0)
    }

    /// Applied voltage for the `repeat`-th measurement (0 is the first one).
    #[must_use]
    pub fn voltage_for_repeat(&self, base_voltage: f64, repeat: u32) -> f64 {
        base_voltage + f64::from(repeat) * self.increase_voltage
    }
}

impl Default for RetryAction {
    fn default() -> Self {
        Self::new()
    }
}

/// Step through waveform frequencies, one measurement per frequency.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepFrequencyAction {
    pub start_frequency: f64,
    pub end_frequency: f64,
    pub n_frequency_steps: u32,
}

impl SweepFrequencyAction {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start_frequency: DEFAULT_START_FREQUENCY,
            end_frequency: DEFAULT_END_FREQUENCY,
            n_frequency_steps: DEFAULT_FREQUENCY_STEPS,
        }
    }

    /// Frequencies visited by the sweep, in order.
    #[must_use]
    pub fn frequencies(&self) -> Vec<f64> {
        linspace(
            self.start_frequency,
            self.end_frequency,
            self.n_frequency_steps,
        )
    }
}

impl Default for SweepFrequencyAction {
    fn default() -> Self {
        Self::new()
    }
}

/// Step through actuation voltages, one measurement per voltage.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepVoltageAction {
    pub start_voltage: f64,
    pub end_voltage: f64,
    pub n_voltage_steps: u32,
}

impl SweepVoltageAction {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start_voltage: DEFAULT_START_VOLTAGE,
            end_voltage: DEFAULT_END_VOLTAGE,
            n_voltage_steps: DEFAULT_VOLTAGE_STEPS,
        }
    }

    /// Voltages visited by the sweep, in order.
    #[must_use]
    pub fn voltages(&self) -> Vec<f64> {
        linspace(self.start_voltage, self.end_voltage, self.n_voltage_steps)
    }
}

impl Default for SweepVoltageAction {
    fn default() -> Self {
        Self::new()
    }
}

/// Strategy that governs how many measurements a step performs.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Retry(RetryAction),
    SweepFrequency(SweepFrequencyAction),
    SweepVoltage(SweepVoltageAction),
}

impl Action {
    /// Returns the discriminant of the active variant.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Action::Retry(_) => ActionKind::Retry,
            Action::SweepFrequency(_) => ActionKind::SweepFrequency,
            Action::SweepVoltage(_) => ActionKind::SweepVoltage,
        }
    }

    /// Builds the given variant with its default parameters.
    #[must_use]
    pub const fn with_defaults(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Retry => Action::Retry(RetryAction::new()),
            ActionKind::SweepFrequency => Action::SweepFrequency(SweepFrequencyAction::new()),
            ActionKind::SweepVoltage => Action::SweepVoltage(SweepVoltageAction::new()),
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Action::Retry(retry) => {
                if let Some(threshold) = retry.capacitance_threshold {
                    if !threshold.is_finite() || threshold < 0.0 {
                        return Err(ConfigurationError::InvalidThreshold(threshold));
                    }
                }
                if !retry.increase_voltage.is_finite() || retry.increase_voltage < 0.0 {
                    return Err(ConfigurationError::InvalidVoltageIncrease(
                        retry.increase_voltage,
                    ));
                }
                Ok(())
            }
            Action::SweepFrequency(sweep) => validate_sweep(
                "frequency",
                sweep.start_frequency,
                sweep.end_frequency,
                sweep.n_frequency_steps,
            ),
            Action::SweepVoltage(sweep) => validate_sweep(
                "voltage",
                sweep.start_voltage,
                sweep.end_voltage,
                sweep.n_voltage_steps,
            ),
        }
    }
}

impl Default for Action {
    fn default() -> Self {
        Action::Retry(RetryAction::new())
    }
}

/// Discriminant for [`Action`] used when switching strategies.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Retry,
    SweepFrequency,
    SweepVoltage,
}

impl ActionKind {
    /// Short label used in transcripts and telemetry.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ActionKind::Retry => "retry",
            ActionKind::SweepFrequency => "sweep-frequency",
            ActionKind::SweepVoltage => "sweep-voltage",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Feedback options for a single protocol step.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackOptions {
    pub feedback_enabled: bool,
    pub sampling_time_ms: u32,
    pub n_samples: u32,
    pub delay_between_samples_ms: u32,
    pub action: Action,
}

impl FeedbackOptions {
    /// Creates options populated with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            feedback_enabled: false,
            sampling_time_ms: DEFAULT_SAMPLING_TIME_MS,
            n_samples: DEFAULT_N_SAMPLES,
            delay_between_samples_ms: DEFAULT_DELAY_BETWEEN_SAMPLES_MS,
            action: Action::Retry(RetryAction::new()),
        }
    }

    #[must_use]
    pub const fn with_feedback_enabled(mut self, enabled: bool) -> Self {
        self.feedback_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_sampling_time_ms(mut self, sampling_time_ms: u32) -> Self {
        self.sampling_time_ms = sampling_time_ms;
        self
    }

    #[must_use]
    pub const fn with_n_samples(mut self, n_samples: u32) -> Self {
        self.n_samples = n_samples;
        self
    }

    #[must_use]
    pub const fn with_delay_between_samples_ms(mut self, delay_ms: u32) -> Self {
        self.delay_between_samples_ms = delay_ms;
        self
    }

    #[must_use]
    pub const fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Switches the active strategy. Moving to a different variant discards the
    /// previous parameters and starts from the new variant's defaults;
    /// re-selecting the active variant keeps its parameters.
    pub fn select_action(&mut self, kind: ActionKind) -> &mut Action {
        if self.action.kind() != kind {
            self.action = Action::with_defaults(kind);
        }
        &mut self.action
    }

    /// Interval between the starts of consecutive readings, in milliseconds.
    #[must_use]
    pub const fn sample_period_ms(&self) -> u64 {
        self.sampling_time_ms as u64 + self.delay_between_samples_ms as u64
    }

    /// Checks every numeric field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sampling_time_ms == 0 {
            return Err(ConfigurationError::ZeroSamplingTime);
        }
        if self.n_samples == 0 {
            return Err(ConfigurationError::ZeroSamples);
        }
        self.action.validate()
    }
}

impl Default for FeedbackOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Options used for the single-shot calibration measurement.
#[must_use]
pub const fn calibration_options() -> FeedbackOptions {
    FeedbackOptions::new()
        .with_feedback_enabled(true)
        .with_sampling_time_ms(DEFAULT_SAMPLING_TIME_MS)
        .with_n_samples(1)
        .with_delay_between_samples_ms(0)
        .with_action(Action::Retry(RetryAction::new()))
}

/// `steps` evenly spaced values covering `[start, end]`, both ends included.
/// A single step yields only `start`.
#[must_use]
pub fn linspace(start: f64, end: f64, steps: u32) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => alloc::vec![start],
        _ => {
            let last = steps - 1;
            let span = end - start;
            (0..steps)
                .map(|index| {
                    if index == last {
                        end
                    } else {
                        start + span * f64::from(index) / f64::from(last)
                    }
                })
                .collect()
        }
    }
}

fn validate_sweep(
    parameter: &'static str,
    start: f64,
    end: f64,
    steps: u32,
) -> Result<(), ConfigurationError> {
    for value in [start, end] {
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigurationError::InvalidSweepBound { parameter, value });
        }
    }
    if start > end {
        return Err(ConfigurationError::DescendingSweep {
            parameter,
            start,
            end,
        });
    }
    if steps == 0 {
        return Err(ConfigurationError::ZeroSweepSteps { parameter });
    }
    Ok(())
}
