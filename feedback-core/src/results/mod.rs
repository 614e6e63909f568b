//! Results assembled by the controller and the quantities derived from them.
//!
//! Every result owns its samples outright and holds plain data only, so the
//! whole aggregate can be serialized for logging or playback. Device impedance
//! is derived eagerly when samples are added; a zero feedback voltage is
//! rejected at that point instead of surfacing later as infinity.

use alloc::vec::Vec;
use core::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::DerivationError;
use crate::options::{ActionKind, FeedbackOptions};
use crate::sample::{self, ImpedanceSample};

/// Impedance results for a single (possibly retried) measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResult {
    options: FeedbackOptions,
    area: f64,
    v_total: f64,
    frequency: f64,
    v_fb: Vec<f64>,
    z_fb: Vec<f64>,
    z_device: Vec<f64>,
}

impl FeedbackResult {
    /// Derives device impedance for `sample` measured at `v_total` volts and
    /// `frequency` Hz on an electrode of `area` mm².
    pub fn new(
        options: FeedbackOptions,
        sample: &ImpedanceSample,
        area: f64,
        v_total: f64,
        frequency: f64,
    ) -> Result<Self, DerivationError> {
        let (v_fb, z_fb) = sample.split();
        let z_device = sample::device_impedance(&v_fb, &z_fb, v_total)?;
        Ok(Self {
            options,
            area,
            v_total,
            frequency,
            v_fb,
            z_fb,
            z_device,
        })
    }

    #[must_use]
    pub const fn options(&self) -> &FeedbackOptions {
        &self.options
    }

    /// Electrode area in mm².
    #[must_use]
    pub const fn area(&self) -> f64 {
        self.area
    }

    /// Applied voltage the sample was taken at.
    #[must_use]
    pub const fn v_total(&self) -> f64 {
        self.v_total
    }

    /// Waveform frequency the sample was taken at.
    #[must_use]
    pub const fn frequency(&self) -> f64 {
        self.frequency
    }

    #[must_use]
    pub fn v_fb(&self) -> &[f64] {
        &self.v_fb
    }

    #[must_use]
    pub fn z_fb(&self) -> &[f64] {
        &self.z_fb
    }

    #[must_use]
    pub fn z_device(&self) -> &[f64] {
        &self.z_device
    }

    /// Start time of each reading in milliseconds:
    /// `i * (sampling_time_ms + delay_between_samples_ms)`.
    #[must_use]
    pub fn time(&self) -> Vec<u64> {
        let period = self.options.sample_period_ms();
        (0..u64::from(self.options.n_samples))
            .map(|index| index * period)
            .collect()
    }

    pub fn min_impedance(&self) -> Result<f64, DerivationError> {
        sample::minimum(&self.z_device)
    }

    /// `1 / (2π f Z_min)`, the capacitance implied by the lowest device
    /// impedance.
    pub fn max_capacitance(&self, frequency: f64) -> Result<f64, DerivationError> {
        capacitance(frequency, self.min_impedance()?)
    }

    /// Maximum capacitance normalized by electrode area (F/mm²).
    pub fn capacitance_per_area(&self, frequency: f64) -> Result<f64, DerivationError> {
        Ok(self.max_capacitance(frequency)? / self.area)
    }
}

/// One setpoint of a frequency or voltage sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepStep {
    /// Frequency (Hz) or voltage (V), depending on the sweep.
    pub setpoint: f64,
    pub v_fb: Vec<f64>,
    pub z_fb: Vec<f64>,
    pub z_device: Vec<f64>,
}

impl SweepStep {
    fn derive(setpoint: f64, sample: &ImpedanceSample, v_total: f64) -> Result<Self, DerivationError> {
        let (v_fb, z_fb) = sample.split();
        let z_device = sample::device_impedance(&v_fb, &z_fb, v_total)?;
        Ok(Self {
            setpoint,
            v_fb,
            z_fb,
            z_device,
        })
    }

    pub fn min_impedance(&self) -> Result<f64, DerivationError> {
        sample::minimum(&self.z_device)
    }
}

/// Results of a frequency sweep at a fixed applied voltage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepFrequencyResult {
    options: FeedbackOptions,
    area: f64,
    v_total: f64,
    steps: Vec<SweepStep>,
}

impl SweepFrequencyResult {
    #[must_use]
    pub const fn new(options: FeedbackOptions, area: f64, v_total: f64) -> Self {
        Self {
            options,
            area,
            v_total,
            steps: Vec::new(),
        }
    }

    /// Appends the sample measured at `frequency`.
    pub fn add_frequency_step(
        &mut self,
        frequency: f64,
        sample: &ImpedanceSample,
    ) -> Result<(), DerivationError> {
        let step = SweepStep::derive(frequency, sample, self.v_total)?;
        self.steps.push(step);
        Ok(())
    }

    #[must_use]
    pub const fn options(&self) -> &FeedbackOptions {
        &self.options
    }

    #[must_use]
    pub const fn area(&self) -> f64 {
        self.area
    }

    #[must_use]
    pub const fn v_total(&self) -> f64 {
        self.v_total
    }

    #[must_use]
    pub fn steps(&self) -> &[SweepStep] {
        &self.steps
    }

    #[must_use]
    pub fn frequencies(&self) -> Vec<f64> {
        self.steps.iter().map(|step| step.setpoint).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Lowest device impedance at each frequency, for impedance-vs-frequency
    /// views.
    pub fn min_impedance_per_step(&self) -> Result<Vec<f64>, DerivationError> {
        self.steps.iter().map(SweepStep::min_impedance).collect()
    }
}

/// Results of a voltage sweep. Each step derives its device impedance from
/// its own voltage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepVoltageResult {
    options: FeedbackOptions,
    area: f64,
    steps: Vec<SweepStep>,
}

impl SweepVoltageResult {
    #[must_use]
    pub const fn new(options: FeedbackOptions, area: f64) -> Self {
        Self {
            options,
            area,
            steps: Vec::new(),
        }
    }

    /// Appends the sample measured at `voltage`.
    pub fn add_voltage_step(
        &mut self,
        voltage: f64,
        sample: &ImpedanceSample,
    ) -> Result<(), DerivationError> {
        let step = SweepStep::derive(voltage, sample, voltage)?;
        self.steps.push(step);
        Ok(())
    }

    #[must_use]
    pub const fn options(&self) -> &FeedbackOptions {
        &self.options
    }

    #[must_use]
    pub const fn area(&self) -> f64 {
        self.area
    }

    #[must_use]
    pub fn steps(&self) -> &[SweepStep] {
        &self.steps
    }

    #[must_use]
    pub fn voltages(&self) -> Vec<f64> {
        self.steps.iter().map(|step| step.setpoint).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Lowest device impedance at each voltage.
    pub fn min_impedance_per_step(&self) -> Result<Vec<f64>, DerivationError> {
        self.steps.iter().map(SweepStep::min_impedance).collect()
    }
}

/// Finished result of one controller run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementResult {
    Feedback(FeedbackResult),
    SweepFrequency(SweepFrequencyResult),
    SweepVoltage(SweepVoltageResult),
}

impl MeasurementResult {
    /// Action that produced this result.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            MeasurementResult::Feedback(_) => ActionKind::Retry,
            MeasurementResult::SweepFrequency(_) => ActionKind::SweepFrequency,
            MeasurementResult::SweepVoltage(_) => ActionKind::SweepVoltage,
        }
    }

    #[must_use]
    pub const fn options(&self) -> &FeedbackOptions {
        match self {
            MeasurementResult::Feedback(result) => result.options(),
            MeasurementResult::SweepFrequency(result) => result.options(),
            MeasurementResult::SweepVoltage(result) => result.options(),
        }
    }

    #[must_use]
    pub const fn as_feedback(&self) -> Option<&FeedbackResult> {
        match self {
            MeasurementResult::Feedback(result) => Some(result),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_sweep_frequency(&self) -> Option<&SweepFrequencyResult> {
        match self {
            MeasurementResult::SweepFrequency(result) => Some(result),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_sweep_voltage(&self) -> Option<&SweepVoltageResult> {
        match self {
            MeasurementResult::SweepVoltage(result) => Some(result),
            _ => None,
        }
    }
}

/// `1 / (2π f Z)`, refusing non-positive inputs instead of returning infinity
/// or a negative capacitance.
pub fn capacitance(frequency: f64, impedance: f64) -> Result<f64, DerivationError> {
    if !(frequency.is_finite() && frequency > 0.0) {
        return Err(DerivationError::NonPositiveFrequency(frequency));
    }
    if !(impedance.is_finite() && impedance > 0.0) {
        return Err(DerivationError::NonPositiveImpedance(impedance));
    }
    Ok(1.0 / (2.0 * PI * frequency * impedance))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn near(actual: f64, expected: f64) -> bool {
        let delta = actual - expected;
        let scale = if expected < 0.0 { -expected } else { expected };
        delta <= scale * 1e-12 && -delta <= scale * 1e-12
    }

    fn options(n_samples: u32) -> FeedbackOptions {
        FeedbackOptions::new()
            .with_feedback_enabled(true)
            .with_n_samples(n_samples)
            .with_sampling_time_ms(10)
            .with_delay_between_samples_ms(5)
    }

    #[test]
    fn time_axis_spans_sampling_and_delay() {
        let sample = ImpedanceSample::from_pairs([(1.0, 100.0), (1.0, 100.0), (1.0, 100.0)]);
        let result = FeedbackResult::new(options(3), &sample, 1.0, 10.0, 1e3).expect("derives");
        assert_eq!(result.time(), [0, 15, 30]);
    }

    #[test]
    fn derived_quantities_follow_minimum_impedance() {
        let sample = ImpedanceSample::from_pairs([(1.0, 1_000.0), (2.0, 1_000.0)]);
        let result = FeedbackResult::new(options(2), &sample, 2.0, 10.0, 1e3).expect("derives");

        assert_eq!(result.z_device(), [9_000.0, 4_000.0]);
        assert_eq!(result.min_impedance(), Ok(4_000.0));

        let expected = 1.0 / (2.0 * PI * 1e3 * 4_000.0);
        let capacitance = result.max_capacitance(1e3).expect("positive impedance");
        assert!(near(capacitance, expected));

        let per_area = result.capacitance_per_area(1e3).expect("positive impedance");
        assert!(near(per_area, expected / 2.0));
    }

    #[test]
    fn zero_minimum_impedance_is_an_error() {
        let sample = ImpedanceSample::from_pairs([(10.0, 1_000.0)]);
        let result = FeedbackResult::new(options(1), &sample, 1.0, 10.0, 1e3).expect("derives");
        assert_eq!(result.min_impedance(), Ok(0.0));
        assert_eq!(
            result.max_capacitance(1e3),
            Err(DerivationError::NonPositiveImpedance(0.0))
        );
    }

    #[test]
    fn voltage_sweep_derives_from_step_voltage() {
        let sample = ImpedanceSample::from_pairs([(1.0, 100.0)]);
        let mut result = SweepVoltageResult::new(options(1), 1.0);
        result.add_voltage_step(5.0, &sample).expect("derives");
        result.add_voltage_step(11.0, &sample).expect("derives");

        assert_eq!(result.voltages(), [5.0, 11.0]);
        assert_eq!(result.steps()[0].z_device, [400.0]);
        assert_eq!(result.steps()[1].z_device, [1_000.0]);
    }

    #[test]
    fn frequency_sweep_derives_from_fixed_voltage() {
        let sample = ImpedanceSample::from_pairs([(2.0, 100.0)]);
        let mut result = SweepFrequencyResult::new(options(1), 1.0, 10.0);
        result.add_frequency_step(100.0, &sample).expect("derives");
        result.add_frequency_step(200.0, &sample).expect("derives");

        assert_eq!(result.frequencies(), [100.0, 200.0]);
        assert_eq!(result.min_impedance_per_step(), Ok(alloc::vec![400.0, 400.0]));
    }

    #[test]
    fn rejected_step_leaves_sweep_unchanged() {
        let mut result = SweepFrequencyResult::new(options(1), 1.0, 10.0);
        let bad = ImpedanceSample::from_pairs([(0.0, 100.0)]);
        assert!(result.add_frequency_step(100.0, &bad).is_err());
        assert!(result.is_empty());
    }
}
