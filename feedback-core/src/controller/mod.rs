//! Feedback policy engine.
//!
//! [`FeedbackController`] turns one step's [`FeedbackOptions`] into a series of
//! board measurements and assembles the matching result. The board is reached
//! through [`FeedbackBoard`] so the same policy drives the emulator and a real
//! serial link. The Retry action runs as an explicit state machine; sweeps are
//! bounded loops over a linearly spaced setpoint list. Any board failure
//! aborts the run and discards whatever was collected so far.

use core::fmt;

use tracing::{debug, info, warn};

use crate::calibration::{CalibrationStore, InMemoryCalibrationStore, baseline_from_reference};
use crate::error::{ConfigurationError, FeedbackError};
use crate::options::{
    Action, ActionKind, FeedbackOptions, RetryAction, SweepFrequencyAction, SweepVoltageAction,
    calibration_options,
};
use crate::results::{FeedbackResult, MeasurementResult, SweepFrequencyResult, SweepVoltageResult};
use crate::sample::{ChannelState, ImpedanceSample};
use crate::telemetry::TelemetryRecorder;

/// Measurement transport consumed by the controller.
///
/// Calls are synchronous and blocking; exactly one is outstanding at a time.
/// Any `Err` is treated as a connection failure.
pub trait FeedbackBoard {
    type Error: fmt::Debug;

    /// Number of electrode channels the board exposes.
    fn channel_count(&self) -> usize;

    /// Sets the actuation waveform frequency in Hz.
    fn set_frequency(&mut self, hz: f64) -> Result<(), Self::Error>;

    /// Sets the actuation waveform amplitude in volts.
    fn set_voltage(&mut self, volts: f64) -> Result<(), Self::Error>;

    /// Actuates `channels` and collects `options.n_samples` feedback readings.
    fn measure_impedance(
        &mut self,
        channels: &ChannelState,
        options: &FeedbackOptions,
    ) -> Result<ImpedanceSample, Self::Error>;
}

impl<B: FeedbackBoard + ?Sized> FeedbackBoard for &mut B {
    type Error = B::Error;

    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn set_frequency(&mut self, hz: f64) -> Result<(), Self::Error> {
        (**self).set_frequency(hz)
    }

    fn set_voltage(&mut self, volts: f64) -> Result<(), Self::Error> {
        (**self).set_voltage(volts)
    }

    fn measure_impedance(
        &mut self,
        channels: &ChannelState,
        options: &FeedbackOptions,
    ) -> Result<ImpedanceSample, Self::Error> {
        (**self).measure_impedance(channels, options)
    }
}

/// Electrode selection and waveform a run is performed with.
#[derive(Clone, Debug, PartialEq)]
pub struct RunRequest {
    /// Total actuated electrode area in mm².
    pub area: f64,
    pub channels: ChannelState,
    /// Applied voltage (`V_total`).
    pub voltage: f64,
    /// Waveform frequency in Hz.
    pub frequency: f64,
}

impl RunRequest {
    #[must_use]
    pub const fn new(area: f64, channels: ChannelState, voltage: f64, frequency: f64) -> Self {
        Self {
            area,
            channels,
            voltage,
            frequency,
        }
    }

    /// Checks the electrode and waveform parameters.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !is_positive(self.area) {
            return Err(ConfigurationError::InvalidArea(self.area));
        }
        if !is_positive(self.voltage) {
            return Err(ConfigurationError::InvalidVoltage(self.voltage));
        }
        if !is_positive(self.frequency) {
            return Err(ConfigurationError::InvalidFrequency(self.frequency));
        }
        if self.channels.actuated().next().is_none() {
            return Err(ConfigurationError::NoActuatedChannels);
        }
        Ok(())
    }
}

/// Calibration takes the same electrode and waveform description as a run.
pub type CalibrationRequest = RunRequest;

/// Controller-wide policy switches.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ControllerConfig {
    /// Fail Retry runs that fall back to a baseline that was never calibrated,
    /// instead of treating the missing baseline as "no threshold".
    pub require_calibration: bool,
}

/// Phases of a Retry run.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryState {
    Measuring { repeat: u32 },
    Evaluating { repeat: u32, result: FeedbackResult },
    Escalating { repeat: u32 },
    Done(FeedbackResult),
}

impl RetryState {
    /// Returns `true` once the run has produced its final result.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Done(_))
    }
}

/// Drives a [`FeedbackBoard`] according to the active [`Action`].
pub struct FeedbackController<B, C = InMemoryCalibrationStore> {
    board: B,
    calibration: C,
    config: ControllerConfig,
    telemetry: TelemetryRecorder,
}

impl<B> FeedbackController<B, InMemoryCalibrationStore>
where
    B: FeedbackBoard,
{
    /// Controller with an empty in-memory calibration store.
    pub const fn with_board(board: B) -> Self {
        Self::new(board, InMemoryCalibrationStore::new())
    }
}

impl<B, C> FeedbackController<B, C>
where
    B: FeedbackBoard,
    C: CalibrationStore,
{
    pub const fn new(board: B, calibration: C) -> Self {
        Self {
            board,
            calibration,
            config: ControllerConfig {
                require_calibration: false,
            },
            telemetry: TelemetryRecorder::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub const fn config(&self) -> ControllerConfig {
        self.config
    }

    pub const fn board(&self) -> &B {
        &self.board
    }

    pub const fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub const fn calibration(&self) -> &C {
        &self.calibration
    }

    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    /// Runs the step's feedback action.
    ///
    /// Returns `Ok(None)` without touching the board when feedback is
    /// disabled. On failure nothing collected during the run is returned.
    pub fn run(
        &mut self,
        options: &FeedbackOptions,
        request: &RunRequest,
    ) -> Result<Option<MeasurementResult>, FeedbackError<B::Error>> {
        if !options.feedback_enabled {
            debug!("feedback disabled; skipping measurement");
            return Ok(None);
        }

        options.validate()?;
        request.validate()?;
        self.check_channels(&request.channels)?;

        let kind = options.action.kind();
        self.telemetry.record_run_started(kind);
        debug!(action = %kind, voltage = request.voltage, frequency = request.frequency, "run started");

        let mut progress = RunProgress::default();
        let outcome = match options.action {
            Action::Retry(retry) => self
                .run_retry(options, &retry, request, &mut progress)
                .map(MeasurementResult::Feedback),
            Action::SweepFrequency(sweep) => self
                .sweep_frequency(options, &sweep, request, &mut progress)
                .map(MeasurementResult::SweepFrequency),
            Action::SweepVoltage(sweep) => self
                .sweep_voltage(options, &sweep, request, &mut progress)
                .map(MeasurementResult::SweepVoltage),
        };
        let outcome = match (outcome, self.restore_setpoints(request, &progress)) {
            (Ok(result), Ok(())) => Ok(result),
            (Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restore)) => {
                warn!(error = ?restore, "could not restore setpoints after abort");
                Err(err)
            }
        };

        let completed = progress.completed;
        match outcome {
            Ok(result) => {
                self.telemetry.record_run_complete(kind, completed);
                info!(action = %kind, measurements = completed, "run complete");
                Ok(Some(result))
            }
            Err(err) => {
                self.telemetry.record_run_aborted(kind, completed);
                warn!(action = %kind, measurements = completed, error = ?err, "run aborted");
                Err(err)
            }
        }
    }

    /// Measures the electrode once with the single-shot calibration options
    /// and stores 95 % of its capacitance per area as the new baseline.
    pub fn calibrate(
        &mut self,
        request: &CalibrationRequest,
    ) -> Result<f64, FeedbackError<B::Error>> {
        request.validate()?;
        self.check_channels(&request.channels)?;

        let options = calibration_options();
        let mut completed = 0;
        self.board
            .set_voltage(request.voltage)
            .map_err(|cause| FeedbackError::connection(cause, completed))?;
        let sample = self.measure(&request.channels, &options, &mut completed)?;
        let result = FeedbackResult::new(
            options,
            &sample,
            request.area,
            request.voltage,
            request.frequency,
        )?;

        let threshold = baseline_from_reference(result.capacitance_per_area(request.frequency)?);
        self.calibration.set_baseline(threshold);
        self.telemetry.record_calibrated(request.voltage, threshold);
        info!(threshold, area = request.area, "calibrated capacitance baseline");

        Ok(threshold)
    }

    fn check_channels(&self, channels: &ChannelState) -> Result<(), FeedbackError<B::Error>> {
        let required = channels.required_channels();
        let available = self.board.channel_count();
        if required > available {
            return Err(FeedbackError::InsufficientChannels {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Puts back whichever waveform setpoints the run moved off the request.
    fn restore_setpoints(
        &mut self,
        request: &RunRequest,
        progress: &RunProgress,
    ) -> Result<(), FeedbackError<B::Error>> {
        if progress.voltage_moved {
            self.board
                .set_voltage(request.voltage)
                .map_err(|cause| FeedbackError::connection(cause, progress.completed))?;
        }
        if progress.frequency_moved {
            self.board
                .set_frequency(request.frequency)
                .map_err(|cause| FeedbackError::connection(cause, progress.completed))?;
        }
        Ok(())
    }

    fn resolve_threshold(&self, retry: &RetryAction) -> Result<f64, FeedbackError<B::Error>> {
        let baseline = self.calibration.baseline();
        if retry.capacitance_threshold.is_none()
            && baseline.is_none()
            && self.config.require_calibration
        {
            return Err(FeedbackError::CalibrationRequired);
        }
        Ok(retry.effective_threshold(baseline))
    }

    fn measure(
        &mut self,
        channels: &ChannelState,
        options: &FeedbackOptions,
        completed: &mut usize,
    ) -> Result<ImpedanceSample, FeedbackError<B::Error>> {
        let sample = self
            .board
            .measure_impedance(channels, options)
            .map_err(|cause| FeedbackError::connection(cause, *completed))?;
        *completed += 1;
        Ok(sample)
    }

    fn run_retry(
        &mut self,
        options: &FeedbackOptions,
        retry: &RetryAction,
        request: &RunRequest,
        progress: &mut RunProgress,
    ) -> Result<FeedbackResult, FeedbackError<B::Error>> {
        let threshold = self.resolve_threshold(retry)?;
        let mut state = RetryState::Measuring { repeat: 0 };

        loop {
            state = match state {
                RetryState::Measuring { repeat } => {
                    let voltage = retry.voltage_for_repeat(request.voltage, repeat);
                    self.board
                        .set_voltage(voltage)
                        .map_err(|cause| FeedbackError::connection(cause, progress.completed))?;
                    let sample = self.measure(&request.channels, options, &mut progress.completed)?;
                    let result = FeedbackResult::new(
                        *options,
                        &sample,
                        request.area,
                        voltage,
                        request.frequency,
                    )?;
                    RetryState::Evaluating { repeat, result }
                }
                RetryState::Evaluating { repeat, result } => {
                    let per_area = result.capacitance_per_area(request.frequency)?;
                    let index = repeat_index(repeat);
                    let voltage = result.v_total();
                    self.telemetry
                        .record_measurement(index, voltage, Some(per_area));

                    if per_area >= threshold {
                        self.telemetry
                            .record_threshold_met(index, voltage, per_area);
                        RetryState::Done(result)
                    } else if repeat >= retry.max_repeats {
                        self.telemetry
                            .record_budget_exhausted(index, voltage, per_area);
                        debug!(repeat, per_area, threshold, "retry budget exhausted");
                        RetryState::Done(result)
                    } else {
                        RetryState::Escalating { repeat }
                    }
                }
                RetryState::Escalating { repeat } => {
                    let next = repeat + 1;
                    let voltage = retry.voltage_for_repeat(request.voltage, next);
                    self.telemetry.record_escalation(repeat_index(next), voltage);
                    debug!(repeat = next, voltage, "threshold unmet; escalating voltage");
                    progress.voltage_moved = true;
                    RetryState::Measuring { repeat: next }
                }
                RetryState::Done(result) => return Ok(result),
            };
        }
    }

    fn sweep_frequency(
        &mut self,
        options: &FeedbackOptions,
        sweep: &SweepFrequencyAction,
        request: &RunRequest,
        progress: &mut RunProgress,
    ) -> Result<SweepFrequencyResult, FeedbackError<B::Error>> {
        let mut result = SweepFrequencyResult::new(*options, request.area, request.voltage);

        progress.frequency_moved = true;
        for (index, frequency) in sweep.frequencies().into_iter().enumerate() {
            self.board
                .set_frequency(frequency)
                .map_err(|cause| FeedbackError::connection(cause, progress.completed))?;
            let sample = self.measure(&request.channels, options, &mut progress.completed)?;
            result.add_frequency_step(frequency, &sample)?;
            self.telemetry
                .record_sweep_step(ActionKind::SweepFrequency, index, frequency);
        }

        Ok(result)
    }

    fn sweep_voltage(
        &mut self,
        options: &FeedbackOptions,
        sweep: &SweepVoltageAction,
        request: &RunRequest,
        progress: &mut RunProgress,
    ) -> Result<SweepVoltageResult, FeedbackError<B::Error>> {
        let mut result = SweepVoltageResult::new(*options, request.area);

        progress.voltage_moved = true;
        for (index, voltage) in sweep.voltages().into_iter().enumerate() {
            self.board
                .set_voltage(voltage)
                .map_err(|cause| FeedbackError::connection(cause, progress.completed))?;
            let sample = self.measure(&request.channels, options, &mut progress.completed)?;
            result.add_voltage_step(voltage, &sample)?;
            self.telemetry
                .record_sweep_step(ActionKind::SweepVoltage, index, voltage);
        }

        Ok(result)
    }
}

/// Measurements taken so far and the setpoints moved off the request.
#[derive(Copy, Clone, Debug, Default)]
struct RunProgress {
    completed: usize,
    voltage_moved: bool,
    frequency_moved: bool,
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn repeat_index(repeat: u32) -> usize {
    usize::try_from(repeat).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::telemetry::TelemetryEventKind;

    /// Board that answers every measurement with the same reading.
    struct FixedBoard {
        channels: usize,
        reading: (f64, f64),
        measurements: usize,
    }

    impl FixedBoard {
        fn new(reading: (f64, f64)) -> Self {
            Self {
                channels: 4,
                reading,
                measurements: 0,
            }
        }
    }

    impl FeedbackBoard for FixedBoard {
        type Error = ();

        fn channel_count(&self) -> usize {
            self.channels
        }

        fn set_frequency(&mut self, _: f64) -> Result<(), ()> {
            Ok(())
        }

        fn set_voltage(&mut self, _: f64) -> Result<(), ()> {
            Ok(())
        }

        fn measure_impedance(
            &mut self,
            _: &ChannelState,
            options: &FeedbackOptions,
        ) -> Result<ImpedanceSample, ()> {
            self.measurements += 1;
            let count = usize::try_from(options.n_samples).unwrap_or(0);
            Ok(ImpedanceSample::from_pairs(
                core::iter::repeat_n(self.reading, count),
            ))
        }
    }

    fn request() -> RunRequest {
        RunRequest::new(
            1.0,
            ChannelState::from_actuated(4, &[0]).expect("in range"),
            50.0,
            1e3,
        )
    }

    fn enabled() -> FeedbackOptions {
        FeedbackOptions::new().with_feedback_enabled(true).with_n_samples(2)
    }

    #[test]
    fn disabled_feedback_skips_the_board() {
        let mut controller = FeedbackController::with_board(FixedBoard::new((1.0, 100.0)));
        let outcome = controller.run(&FeedbackOptions::new(), &request());

        assert_eq!(outcome, Ok(None));
        assert_eq!(controller.board().measurements, 0);
        assert!(controller.telemetry().is_empty());
    }

    #[test]
    fn missing_baseline_means_no_threshold() {
        let mut controller = FeedbackController::with_board(FixedBoard::new((1.0, 100.0)));
        let outcome = controller.run(&enabled(), &request()).expect("run succeeds");

        assert!(matches!(outcome, Some(MeasurementResult::Feedback(_))));
        assert_eq!(controller.board().measurements, 1);
    }

    #[test]
    fn required_calibration_rejects_before_measuring() {
        let mut controller = FeedbackController::with_board(FixedBoard::new((1.0, 100.0)))
            .with_config(ControllerConfig {
                require_calibration: true,
            });

        assert_eq!(
            controller.run(&enabled(), &request()),
            Err(FeedbackError::CalibrationRequired)
        );
        assert_eq!(controller.board().measurements, 0);
    }

    #[test]
    fn invalid_requests_are_configuration_errors() {
        let mut controller = FeedbackController::with_board(FixedBoard::new((1.0, 100.0)));
        let mut bad = request();
        bad.area = 0.0;

        assert_eq!(
            controller.run(&enabled(), &bad),
            Err(FeedbackError::Configuration(ConfigurationError::InvalidArea(
                0.0
            )))
        );

        let bad = RunRequest::new(1.0, ChannelState::all_off(4), 50.0, 1e3);
        assert_eq!(
            controller.run(&enabled(), &bad),
            Err(FeedbackError::Configuration(
                ConfigurationError::NoActuatedChannels
            ))
        );
    }

    #[test]
    fn electrode_beyond_board_is_rejected() {
        let mut controller = FeedbackController::with_board(FixedBoard::new((1.0, 100.0)));
        let wide = RunRequest::new(
            1.0,
            ChannelState::from_actuated(8, &[7]).expect("in range"),
            50.0,
            1e3,
        );

        assert_eq!(
            controller.calibrate(&wide),
            Err(FeedbackError::InsufficientChannels {
                required: 8,
                available: 4
            })
        );
    }

    #[test]
    fn run_lifecycle_is_recorded() {
        let mut controller = FeedbackController::with_board(FixedBoard::new((1.0, 100.0)));
        controller.run(&enabled(), &request()).expect("run succeeds");

        let events: Vec<TelemetryEventKind> = controller
            .telemetry()
            .oldest_first()
            .map(|record| record.event)
            .collect();
        assert_eq!(
            events,
            [
                TelemetryEventKind::RunStarted(ActionKind::Retry),
                TelemetryEventKind::MeasurementTaken,
                TelemetryEventKind::ThresholdMet,
                TelemetryEventKind::RunComplete(ActionKind::Retry),
            ]
        );
    }

    #[test]
    fn retry_state_terminal_only_when_done() {
        assert!(!RetryState::Measuring { repeat: 0 }.is_terminal());
        assert!(!RetryState::Escalating { repeat: 1 }.is_terminal());
    }
}
