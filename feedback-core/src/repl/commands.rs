//! High-level command dispatcher.
//!
//! Glues parsed commands to the current protocol step: option edits mutate the
//! step's [`FeedbackOptions`] in place, while `run` and `calibrate` hand the
//! step to the [`FeedbackController`].

use alloc::vec::Vec;

use thiserror::Error;
use tracing::debug;

use crate::calibration::{CalibrationStore, InMemoryCalibrationStore};
use crate::controller::{FeedbackBoard, FeedbackController, RunRequest};
use crate::error::FeedbackError;
use crate::options::{Action, ActionKind, FeedbackOptions};
use crate::results::MeasurementResult;
use crate::sample::ChannelState;

use super::grammar::{
    self, Command, ElectrodeCommand, RetryCommand, SamplingCommand, SweepCommand, SweepKind,
    ThresholdSetting,
};
use super::status::StatusSnapshot;

/// Applied voltage for a fresh step.
pub const DEFAULT_STEP_VOLTAGE: f64 = 100.0;
/// Waveform frequency for a fresh step.
pub const DEFAULT_STEP_FREQUENCY: f64 = 10e3;

/// The protocol step being edited: its feedback options plus the electrode
/// and waveform it actuates.
#[derive(Clone, Debug, PartialEq)]
pub struct StepSession {
    pub options: FeedbackOptions,
    pub channels: Vec<usize>,
    /// Total area of `channels` in mm²; unset until an electrode is selected.
    pub area: Option<f64>,
    pub voltage: f64,
    pub frequency: f64,
}

impl StepSession {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            options: FeedbackOptions::new(),
            channels: Vec::new(),
            area: None,
            voltage: DEFAULT_STEP_VOLTAGE,
            frequency: DEFAULT_STEP_FREQUENCY,
        }
    }

    /// Builds the controller request for a board with `board_channels`
    /// channels. Fails with [`CommandError::NoElectrode`] until an electrode
    /// is selected, and with `InsufficientChannels` when a selected channel
    /// is not on the board.
    pub fn request<'a, E>(
        &self,
        board_channels: usize,
    ) -> Result<RunRequest, CommandError<'a, E>> {
        let area = match self.area {
            Some(area) if !self.channels.is_empty() => area,
            _ => return Err(CommandError::NoElectrode),
        };
        let channels = ChannelState::from_actuated(board_channels, &self.channels)
            .map_err(FeedbackError::<E>::from)?;
        Ok(RunRequest::new(area, channels, self.voltage, self.frequency))
    }
}

impl Default for StepSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Command execution successes.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome<'a> {
    /// Feedback options were edited; carries the updated options.
    OptionsUpdated(FeedbackOptions),
    /// Electrode or waveform selection changed.
    SessionUpdated(StatusSnapshot),
    /// `None` when feedback is disabled for the step.
    RunCompleted(Option<MeasurementResult>),
    /// New capacitance-per-area baseline.
    Calibrated(f64),
    Status(StatusSnapshot),
    Help(Option<&'a str>),
}

/// Errors surfaced while executing a command.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError<'a, E> {
    #[error("{0}")]
    Parse(grammar::ParseError<'a>),
    #[error("no electrode selected; use `electrode <ch> area=<mm2>` first")]
    NoElectrode,
    #[error("{0}")]
    Feedback(FeedbackError<E>),
}

impl<'a, E> From<grammar::ParseError<'a>> for CommandError<'a, E> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl<E> From<FeedbackError<E>> for CommandError<'_, E> {
    fn from(error: FeedbackError<E>) -> Self {
        Self::Feedback(error)
    }
}

type CommandResult<'a, B> =
    Result<CommandOutcome<'a>, CommandError<'a, <B as FeedbackBoard>::Error>>;

/// Dispatches commands against one step and its controller.
pub struct CommandExecutor<B, C = InMemoryCalibrationStore> {
    controller: FeedbackController<B, C>,
    session: StepSession,
}

impl<B, C> CommandExecutor<B, C> {
    /// Creates a new executor with a fresh step.
    pub const fn new(controller: FeedbackController<B, C>) -> Self {
        Self {
            controller,
            session: StepSession::new(),
        }
    }

    pub fn controller(&self) -> &FeedbackController<B, C> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut FeedbackController<B, C> {
        &mut self.controller
    }

    pub fn session(&self) -> &StepSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut StepSession {
        &mut self.session
    }

    /// Consumes the executor and yields the inner controller.
    pub fn into_inner(self) -> FeedbackController<B, C> {
        self.controller
    }
}

impl<B, C> CommandExecutor<B, C>
where
    B: FeedbackBoard,
    C: CalibrationStore,
{
    /// Parses and executes a command line.
    pub fn execute<'a>(&mut self, line: &'a str) -> CommandResult<'a, B> {
        let command = grammar::parse(line)?;
        self.dispatch(command)
    }

    /// Captures the current step and calibration state.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            options: self.session.options,
            channels: self.session.channels.clone(),
            area: self.session.area,
            voltage: self.session.voltage,
            frequency: self.session.frequency,
            baseline: self.controller.calibration().baseline(),
            board_channels: self.controller.board().channel_count(),
            last_event: self
                .controller
                .telemetry()
                .latest()
                .map(|record| record.event),
        }
    }

    fn dispatch<'a>(&mut self, command: Command<'a>) -> CommandResult<'a, B> {
        match command {
            Command::Feedback(enabled) => {
                self.session.options.feedback_enabled = enabled;
                Ok(self.options_updated())
            }
            Command::Sampling(sampling) => {
                self.apply_sampling(sampling);
                Ok(self.options_updated())
            }
            Command::Retry(retry) => {
                self.apply_retry(retry);
                Ok(self.options_updated())
            }
            Command::Sweep(sweep) => {
                self.apply_sweep(sweep);
                Ok(self.options_updated())
            }
            Command::Electrode(electrode) => {
                self.select_electrode(electrode);
                Ok(CommandOutcome::SessionUpdated(self.snapshot()))
            }
            Command::Voltage(volts) => {
                self.session.voltage = volts;
                Ok(CommandOutcome::SessionUpdated(self.snapshot()))
            }
            Command::Frequency(hz) => {
                self.session.frequency = hz;
                Ok(CommandOutcome::SessionUpdated(self.snapshot()))
            }
            Command::Run => {
                let request = self.request()?;
                let result = self.controller.run(&self.session.options, &request)?;
                Ok(CommandOutcome::RunCompleted(result))
            }
            Command::Calibrate => {
                let request = self.request()?;
                let threshold = self.controller.calibrate(&request)?;
                Ok(CommandOutcome::Calibrated(threshold))
            }
            Command::Status => Ok(CommandOutcome::Status(self.snapshot())),
            Command::Help(help) => Ok(CommandOutcome::Help(help.topic)),
        }
    }

    fn options_updated<'a>(&self) -> CommandOutcome<'a> {
        debug!(options = ?self.session.options, "step options updated");
        CommandOutcome::OptionsUpdated(self.session.options)
    }

    fn request<'a>(&self) -> Result<RunRequest, CommandError<'a, B::Error>> {
        self.session.request(self.controller.board().channel_count())
    }

    fn apply_sampling(&mut self, sampling: SamplingCommand) {
        let options = &mut self.session.options;
        if let Some(time_ms) = sampling.time_ms {
            options.sampling_time_ms = time_ms;
        }
        if let Some(samples) = sampling.samples {
            options.n_samples = samples;
        }
        if let Some(delay_ms) = sampling.delay_ms {
            options.delay_between_samples_ms = delay_ms;
        }
    }

    fn apply_retry(&mut self, command: RetryCommand) {
        if let Action::Retry(retry) = self.session.options.select_action(ActionKind::Retry) {
            match command.threshold {
                Some(ThresholdSetting::Baseline) => retry.capacitance_threshold = None,
                Some(ThresholdSetting::Fixed(value)) => retry.capacitance_threshold = Some(value),
                None => {}
            }
            if let Some(increase) = command.increase {
                retry.increase_voltage = increase;
            }
            if let Some(repeats) = command.repeats {
                retry.max_repeats = repeats;
            }
        }
    }

    fn apply_sweep(&mut self, command: SweepCommand) {
        let kind = match command.kind {
            SweepKind::Frequency => ActionKind::SweepFrequency,
            SweepKind::Voltage => ActionKind::SweepVoltage,
        };

        match self.session.options.select_action(kind) {
            Action::SweepFrequency(sweep) => {
                if let Some(start) = command.start {
                    sweep.start_frequency = start;
                }
                if let Some(end) = command.end {
                    sweep.end_frequency = end;
                }
                if let Some(steps) = command.steps {
                    sweep.n_frequency_steps = steps;
                }
            }
            Action::SweepVoltage(sweep) => {
                if let Some(start) = command.start {
                    sweep.start_voltage = start;
                }
                if let Some(end) = command.end {
                    sweep.end_voltage = end;
                }
                if let Some(steps) = command.steps {
                    sweep.n_voltage_steps = steps;
                }
            }
            Action::Retry(_) => {}
        }
    }

    fn select_electrode(&mut self, electrode: ElectrodeCommand) {
        let mut channels: Vec<usize> = electrode.channels.iter().copied().collect();
        channels.sort_unstable();
        channels.dedup();
        debug!(?channels, area = electrode.area, "electrode selected");
        self.session.channels = channels;
        self.session.area = Some(electrode.area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;
    use crate::options::DEFAULT_MAX_REPEATS;
    use crate::sample::ImpedanceSample;

    #[derive(Default)]
    struct EchoBoard {
        measurements: usize,
    }

    impl FeedbackBoard for EchoBoard {
        type Error = ();

        fn channel_count(&self) -> usize {
            8
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
            _: &FeedbackOptions,
        ) -> Result<ImpedanceSample, ()> {
            self.measurements += 1;
            Ok(ImpedanceSample::from_pairs([(1.0, 100.0)]))
        }
    }

    fn executor() -> CommandExecutor<EchoBoard> {
        CommandExecutor::new(FeedbackController::with_board(EchoBoard::default()))
    }

    #[test]
    fn option_edits_mutate_the_step_in_place() {
        let mut executor = executor();
        executor.execute("feedback on").expect("toggle");
        executor
            .execute("sampling time=20 samples=4")
            .expect("sampling");

        let options = executor.session().options;
        assert!(options.feedback_enabled);
        assert_eq!(options.sampling_time_ms, 20);
        assert_eq!(options.n_samples, 4);
        assert_eq!(options.delay_between_samples_ms, 0);
    }

    #[test]
    fn switching_actions_resets_previous_parameters() {
        let mut executor = executor();
        executor.execute("retry repeats=7 increase=2").expect("retry");
        executor.execute("sweep voltage steps=2").expect("sweep");
        executor.execute("retry").expect("retry");

        match executor.session().options.action {
            Action::Retry(retry) => {
                assert_eq!(retry.max_repeats, DEFAULT_MAX_REPEATS);
                assert_eq!(retry.increase_voltage, 0.0);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn retry_threshold_auto_clears_fixed_value() {
        let mut executor = executor();
        executor.execute("retry threshold=1e-12").expect("retry");
        executor.execute("retry threshold=auto").expect("retry");

        match executor.session().options.action {
            Action::Retry(retry) => assert_eq!(retry.capacitance_threshold, None),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn run_requires_an_electrode() {
        let mut executor = executor();
        executor.execute("feedback on").expect("toggle");
        assert_eq!(executor.execute("run"), Err(CommandError::NoElectrode));
    }

    #[test]
    fn channels_beyond_the_board_are_rejected_before_running() {
        let mut executor = executor();
        executor.execute("feedback on").expect("toggle");

        executor
            .execute("electrode 18446744073709551615 area=1")
            .expect("electrode");
        assert_eq!(
            executor.execute("run"),
            Err(CommandError::Feedback(FeedbackError::InsufficientChannels {
                required: usize::MAX,
                available: 8
            }))
        );

        executor
            .execute("electrode 2,4000000000 area=1")
            .expect("electrode");
        assert_eq!(
            executor.execute("calibrate"),
            Err(CommandError::Feedback(FeedbackError::InsufficientChannels {
                required: 4_000_000_001,
                available: 8
            }))
        );
        assert_eq!(executor.controller().board().measurements, 0);
    }

    #[test]
    fn run_with_feedback_disabled_yields_no_result() {
        let mut executor = executor();
        executor.execute("electrode 1,2 area=2").expect("electrode");

        assert_eq!(
            executor.execute("run"),
            Ok(CommandOutcome::RunCompleted(None))
        );
        assert_eq!(executor.controller().board().measurements, 0);
    }

    #[test]
    fn run_surfaces_validation_errors() {
        let mut executor = executor();
        executor.execute("feedback on").expect("toggle");
        executor.execute("electrode 1 area=2").expect("electrode");
        executor.execute("sampling samples=0").expect("sampling");

        assert_eq!(
            executor.execute("run"),
            Err(CommandError::Feedback(FeedbackError::Configuration(
                ConfigurationError::ZeroSamples
            )))
        );
    }

    #[test]
    fn calibrate_updates_the_status_baseline() {
        let mut executor = executor();
        executor.execute("electrode 0 area=1").expect("electrode");

        let threshold = match executor.execute("calibrate") {
            Ok(CommandOutcome::Calibrated(threshold)) => threshold,
            other => panic!("unexpected outcome: {other:?}"),
        };

        match executor.execute("status") {
            Ok(CommandOutcome::Status(snapshot)) => {
                assert_eq!(snapshot.baseline, Some(threshold));
                assert_eq!(snapshot.channels, [0]);
                assert_eq!(snapshot.board_channels, 8);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn electrode_channels_are_sorted_and_deduplicated() {
        let mut executor = executor();
        executor
            .execute("electrode 5,1,5 area=3")
            .expect("electrode");
        assert_eq!(executor.session().channels, [1, 5]);
        assert_eq!(executor.session().area, Some(3.0));
    }

    #[test]
    fn parse_errors_are_returned() {
        let mut executor = executor();
        assert!(matches!(
            executor.execute("sweep sideways"),
            Err(CommandError::Parse(_))
        ));
    }

    #[test]
    fn help_echoes_topic() {
        let mut executor = executor();
        assert_eq!(
            executor.execute("help run"),
            Ok(CommandOutcome::Help(Some("run")))
        );
    }
}
