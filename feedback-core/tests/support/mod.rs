#![allow(dead_code)]

use feedback_core::controller::FeedbackBoard;
use feedback_core::options::FeedbackOptions;
use feedback_core::sample::{ChannelState, ImpedanceSample};

/// Board calls in the order the controller issued them.
#[derive(Clone, Debug, PartialEq)]
pub enum BoardCall {
    SetFrequency(f64),
    SetVoltage(f64),
    Measure { channels: Vec<usize>, n_samples: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkDown;

/// Board that replays a script of readings and records every call.
///
/// Measurement `n` (zero-based) answers with `readings[n]`, or the last
/// reading once the script runs out, repeated `n_samples` times.
pub struct ScriptedBoard {
    pub channels: usize,
    pub calls: Vec<BoardCall>,
    readings: Vec<(f64, f64)>,
    fail_on_measurement: Option<usize>,
    voltage_limit: Option<f64>,
    measurements: usize,
}

impl ScriptedBoard {
    pub fn new(readings: &[(f64, f64)]) -> Self {
        Self {
            channels: 8,
            calls: Vec::new(),
            readings: readings.to_vec(),
            fail_on_measurement: None,
            voltage_limit: None,
            measurements: 0,
        }
    }

    /// Fails the `nth` measurement (1-based) with [`LinkDown`].
    pub fn failing_on(mut self, nth: usize) -> Self {
        self.fail_on_measurement = Some(nth);
        self
    }

    /// Rejects `set_voltage` above `limit` with [`LinkDown`].
    pub fn limited_to(mut self, limit: f64) -> Self {
        self.voltage_limit = Some(limit);
        self
    }

    pub fn measurement_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, BoardCall::Measure { .. }))
            .count()
    }

    pub fn voltages(&self) -> Vec<f64> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                BoardCall::SetVoltage(volts) => Some(*volts),
                _ => None,
            })
            .collect()
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                BoardCall::SetFrequency(hz) => Some(*hz),
                _ => None,
            })
            .collect()
    }
}

impl FeedbackBoard for ScriptedBoard {
    type Error = LinkDown;

    fn channel_count(&self) -> usize {
        self.channels
    }

    fn set_frequency(&mut self, hz: f64) -> Result<(), LinkDown> {
        self.calls.push(BoardCall::SetFrequency(hz));
        Ok(())
    }

    fn set_voltage(&mut self, volts: f64) -> Result<(), LinkDown> {
        self.calls.push(BoardCall::SetVoltage(volts));
        if self.voltage_limit.is_some_and(|limit| volts > limit) {
            return Err(LinkDown);
        }
        Ok(())
    }

    fn measure_impedance(
        &mut self,
        channels: &ChannelState,
        options: &FeedbackOptions,
    ) -> Result<ImpedanceSample, LinkDown> {
        self.calls.push(BoardCall::Measure {
            channels: channels.actuated().collect(),
            n_samples: options.n_samples,
        });

        let index = self.measurements;
        self.measurements += 1;
        if self.fail_on_measurement == Some(self.measurements) {
            return Err(LinkDown);
        }

        let reading = self
            .readings
            .get(index)
            .or_else(|| self.readings.last())
            .copied()
            .unwrap_or((1.0, 1.0));
        let count = usize::try_from(options.n_samples).unwrap_or(0);
        Ok(ImpedanceSample::from_pairs(std::iter::repeat_n(
            reading, count,
        )))
    }
}

/// Capacitance per area the controller derives from one reading.
pub fn capacitance_per_area(reading: (f64, f64), v_total: f64, frequency: f64, area: f64) -> f64 {
    let (v_fb, z_fb) = reading;
    let z_device = z_fb * (v_total / v_fb - 1.0);
    1.0 / (2.0 * std::f64::consts::PI * frequency * z_device) / area
}

pub fn assert_close(actual: f64, expected: f64) {
    let tolerance = expected.abs() * 1e-9;
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected}, got {actual}"
    );
}
