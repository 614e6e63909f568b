//! Status surface for the `status` command.
//!
//! [`StatusSnapshot`] captures the current step configuration and calibration
//! state; [`StatusFormatter`] renders it into the same lines across
//! front-ends.

use alloc::vec::Vec;
use core::fmt;

use crate::options::{Action, FeedbackOptions};
use crate::telemetry::TelemetryEventKind;

/// Point-in-time view of the session and controller.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub options: FeedbackOptions,
    pub channels: Vec<usize>,
    pub area: Option<f64>,
    pub voltage: f64,
    pub frequency: f64,
    pub baseline: Option<f64>,
    pub board_channels: usize,
    pub last_event: Option<TelemetryEventKind>,
}

/// Renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the feedback line (e.g. `feedback on time=10ms samples=10 delay=0ms`).
    pub fn write_feedback_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let options = &self.snapshot.options;
        write!(
            writer,
            "feedback {} time={}ms samples={} delay={}ms",
            if options.feedback_enabled { "on" } else { "off" },
            options.sampling_time_ms,
            options.n_samples,
            options.delay_between_samples_ms,
        )
    }

    /// Writes the action line (e.g. `action retry threshold=auto increase=0V repeats=3`).
    pub fn write_action_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(writer, "action {}", self.snapshot.options.action.kind())?;
        match self.snapshot.options.action {
            Action::Retry(retry) => {
                writer.write_str(" threshold=")?;
                match retry.capacitance_threshold {
                    Some(threshold) => write!(writer, "{threshold:e}")?,
                    None => writer.write_str("auto")?,
                }
                write!(
                    writer,
                    " increase={}V repeats={}",
                    retry.increase_voltage, retry.max_repeats
                )
            }
            Action::SweepFrequency(sweep) => write!(
                writer,
                " start={}Hz end={}Hz steps={}",
                sweep.start_frequency, sweep.end_frequency, sweep.n_frequency_steps
            ),
            Action::SweepVoltage(sweep) => write!(
                writer,
                " start={}V end={}V steps={}",
                sweep.start_voltage, sweep.end_voltage, sweep.n_voltage_steps
            ),
        }
    }

    /// Writes the electrode line (e.g. `electrode channels=3,4 area=2.5mm2 board=120`).
    pub fn write_electrode_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("electrode channels=")?;
        if self.snapshot.channels.is_empty() {
            writer.write_str("none")?;
        }
        for (index, channel) in self.snapshot.channels.iter().enumerate() {
            if index > 0 {
                writer.write_char(',')?;
            }
            write!(writer, "{channel}")?;
        }

        writer.write_str(" area=")?;
        match self.snapshot.area {
            Some(area) => write!(writer, "{area}mm2")?,
            None => writer.write_str("unset")?,
        }

        write!(writer, " board={}", self.snapshot.board_channels)
    }

    /// Writes the waveform line (e.g. `waveform voltage=100V frequency=10000Hz baseline=n/a`).
    pub fn write_waveform_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "waveform voltage={}V frequency={}Hz baseline=",
            self.snapshot.voltage, self.snapshot.frequency
        )?;
        match self.snapshot.baseline {
            Some(baseline) => write!(writer, "{baseline:e}")?,
            None => writer.write_str("n/a")?,
        }

        if let Some(event) = self.snapshot.last_event {
            write!(writer, " last={event}")?;
        }
        Ok(())
    }
}
