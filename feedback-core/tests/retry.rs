mod support;

use feedback_core::calibration::{
    CALIBRATION_SAFETY_FACTOR, CalibrationStore, InMemoryCalibrationStore,
};
use feedback_core::controller::{ControllerConfig, FeedbackController, RunRequest};
use feedback_core::error::FeedbackError;
use feedback_core::options::{
    Action, ActionKind, FeedbackOptions, RetryAction, SweepFrequencyAction,
};
use feedback_core::results::{FeedbackResult, MeasurementResult};
use feedback_core::sample::ChannelState;
use feedback_core::telemetry::TelemetryEventKind;

use support::{BoardCall, LinkDown, ScriptedBoard, assert_close, capacitance_per_area};

/// Poorly wetted electrode: about 3e-8 F/mm² at 50-65 V and 1 kHz.
const DRY: (f64, f64) = (1.0, 100.0);
/// Droplet in place: about 1e-6 F/mm² at 60 V and 1 kHz.
const WET: (f64, f64) = (25.0, 100.0);

fn request() -> RunRequest {
    RunRequest::new(
        1.0,
        ChannelState::from_actuated(8, &[2, 3]).expect("in range"),
        50.0,
        1e3,
    )
}

fn retry_options(threshold: Option<f64>, increase: f64, repeats: u32) -> FeedbackOptions {
    FeedbackOptions::new()
        .with_feedback_enabled(true)
        .with_n_samples(3)
        .with_action(Action::Retry(RetryAction {
            capacitance_threshold: threshold,
            increase_voltage: increase,
            max_repeats: repeats,
        }))
}

fn feedback(result: Option<MeasurementResult>) -> FeedbackResult {
    match result {
        Some(MeasurementResult::Feedback(result)) => result,
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn unmet_threshold_escalates_until_the_budget_is_spent() {
    let mut controller = FeedbackController::with_board(ScriptedBoard::new(&[DRY]));

    let result = controller
        .run(&retry_options(Some(1.0), 5.0, 3), &request())
        .expect("run succeeds");
    let result = feedback(result);

    let board = controller.board();
    assert_eq!(board.measurement_count(), 4, "max_repeats + 1 measurements");
    assert_eq!(
        board.voltages(),
        [50.0, 55.0, 60.0, 65.0, 50.0],
        "voltage escalates per repeat and is restored afterwards"
    );
    assert_eq!(result.v_total(), 65.0);
    assert_eq!(result.v_fb().len(), 3);

    let events: Vec<TelemetryEventKind> = controller
        .telemetry()
        .oldest_first()
        .map(|record| record.event)
        .collect();
    assert_eq!(
        events.iter().filter(|event| **event == TelemetryEventKind::VoltageEscalated).count(),
        3
    );
    assert_eq!(
        events[events.len() - 2..],
        [
            TelemetryEventKind::RetryBudgetExhausted,
            TelemetryEventKind::RunComplete(ActionKind::Retry),
        ]
    );
}

#[test]
fn met_threshold_stops_early() {
    let mut controller = FeedbackController::with_board(ScriptedBoard::new(&[DRY, DRY, WET]));

    let result = controller
        .run(&retry_options(Some(1e-7), 5.0, 5), &request())
        .expect("run succeeds");
    let result = feedback(result);

    assert_eq!(controller.board().measurement_count(), 3);
    assert_eq!(result.v_total(), 60.0);
    assert_close(
        result.capacitance_per_area(1e3).expect("derives"),
        capacitance_per_area(WET, 60.0, 1e3, 1.0),
    );
}

#[test]
fn threshold_met_on_the_last_allowed_repeat() {
    let mut controller =
        FeedbackController::with_board(ScriptedBoard::new(&[DRY, DRY, DRY, WET]));

    let result = controller
        .run(&retry_options(Some(1e-7), 5.0, 3), &request())
        .expect("run succeeds");
    let result = feedback(result);

    let board = controller.board();
    assert_eq!(board.measurement_count(), 4);
    assert_eq!(board.voltages(), [50.0, 55.0, 60.0, 65.0, 50.0]);
    assert_eq!(result.v_total(), 65.0);
    assert_close(
        result.capacitance_per_area(1e3).expect("derives"),
        capacitance_per_area(WET, 65.0, 1e3, 1.0),
    );

    let events: Vec<TelemetryEventKind> = controller
        .telemetry()
        .oldest_first()
        .map(|record| record.event)
        .collect();
    assert!(events.contains(&TelemetryEventKind::ThresholdMet));
    assert!(!events.contains(&TelemetryEventKind::RetryBudgetExhausted));
}

#[test]
fn zero_repeats_measures_exactly_once() {
    let mut controller = FeedbackController::with_board(ScriptedBoard::new(&[DRY]));

    controller
        .run(&retry_options(Some(1.0), 5.0, 0), &request())
        .expect("run succeeds");

    let board = controller.board();
    assert_eq!(
        board.calls,
        [
            BoardCall::SetVoltage(50.0),
            BoardCall::Measure {
                channels: vec![2, 3],
                n_samples: 3
            },
        ]
    );
}

#[test]
fn calibration_baseline_feeds_later_runs() {
    let mut controller = FeedbackController::with_board(ScriptedBoard::new(&[DRY]));
    let calibration = RunRequest::new(
        2.0,
        ChannelState::from_actuated(8, &[4]).expect("in range"),
        50.0,
        1e3,
    );

    let threshold = controller.calibrate(&calibration).expect("calibrates");
    assert_close(
        threshold,
        capacitance_per_area(DRY, 50.0, 1e3, 2.0) * CALIBRATION_SAFETY_FACTOR,
    );
    assert_eq!(controller.calibration().baseline(), Some(threshold));
    assert_eq!(
        controller.board().calls[1],
        BoardCall::Measure {
            channels: vec![4],
            n_samples: 1
        },
        "calibration uses single-shot options"
    );

    // Same reading at the same voltage clears the 95 % baseline first time.
    let run = RunRequest::new(
        2.0,
        ChannelState::from_actuated(8, &[4]).expect("in range"),
        50.0,
        1e3,
    );
    controller
        .run(&retry_options(None, 5.0, 3), &run)
        .expect("run succeeds");
    assert_eq!(controller.board().measurement_count(), 2);
}

#[test]
fn explicit_threshold_overrides_the_baseline() {
    let mut controller = FeedbackController::new(
        ScriptedBoard::new(&[DRY]),
        InMemoryCalibrationStore::with_baseline(0.0),
    );

    controller
        .run(&retry_options(Some(1.0), 1.0, 2), &request())
        .expect("run succeeds");
    assert_eq!(controller.board().measurement_count(), 3);
}

#[test]
fn required_calibration_is_enforced_only_without_explicit_threshold() {
    let config = ControllerConfig {
        require_calibration: true,
    };
    let mut controller =
        FeedbackController::with_board(ScriptedBoard::new(&[DRY])).with_config(config);

    assert_eq!(
        controller.run(&retry_options(None, 0.0, 3), &request()),
        Err(FeedbackError::CalibrationRequired)
    );
    assert!(controller.board().calls.is_empty());

    controller
        .run(&retry_options(Some(0.0), 0.0, 3), &request())
        .expect("explicit threshold needs no baseline");
    assert_eq!(controller.board().measurement_count(), 1);
}

#[test]
fn link_loss_discards_partial_retry_results() {
    let board = ScriptedBoard::new(&[DRY]).failing_on(3);
    let mut controller = FeedbackController::with_board(board);

    let error = controller
        .run(&retry_options(Some(1.0), 5.0, 3), &request())
        .expect_err("third measurement fails");

    assert_eq!(error, FeedbackError::connection(LinkDown, 2));
    assert!(error.is_connection_failure());
    assert_eq!(
        controller.telemetry().latest().map(|record| record.event),
        Some(TelemetryEventKind::RunAborted(ActionKind::Retry))
    );
}

#[test]
fn link_loss_after_escalation_restores_the_request_voltage() {
    let board = ScriptedBoard::new(&[DRY]).failing_on(3);
    let mut controller = FeedbackController::with_board(board);

    controller
        .run(&retry_options(Some(1.0), 5.0, 3), &request())
        .expect_err("third measurement fails");

    let board = controller.board();
    assert_eq!(board.voltages(), [50.0, 55.0, 60.0, 50.0]);
    assert_eq!(board.calls.last(), Some(&BoardCall::SetVoltage(50.0)));
}

#[test]
fn rejected_escalation_leaves_the_board_at_the_request_voltage() {
    let board = ScriptedBoard::new(&[DRY]).limited_to(100.0);
    let mut controller = FeedbackController::with_board(board);

    let error = controller
        .run(&retry_options(Some(1.0), 30.0, 3), &request())
        .expect_err("escalation to 110 V is rejected");
    assert_eq!(error, FeedbackError::connection(LinkDown, 2));
    assert_eq!(controller.board().voltages(), [50.0, 80.0, 110.0, 50.0]);

    // A later single-point sweep measures at the voltage it derives with.
    let sweep = FeedbackOptions::new()
        .with_feedback_enabled(true)
        .with_action(Action::SweepFrequency(SweepFrequencyAction {
            start_frequency: 1e3,
            end_frequency: 1e3,
            n_frequency_steps: 1,
        }));
    controller.run(&sweep, &request()).expect("sweep succeeds");
    assert_eq!(controller.board().voltages().last(), Some(&50.0));
}

#[test]
fn failed_first_measurement_touches_no_setpoint_afterwards() {
    let board = ScriptedBoard::new(&[DRY]).failing_on(1);
    let mut controller = FeedbackController::with_board(board);

    controller
        .run(&retry_options(Some(1.0), 5.0, 3), &request())
        .expect_err("first measurement fails");
    assert_eq!(controller.board().voltages(), [50.0]);
}

#[test]
fn zero_feedback_voltage_is_a_derivation_error() {
    let mut controller = FeedbackController::with_board(ScriptedBoard::new(&[(0.0, 100.0)]));

    assert!(matches!(
        controller.run(&retry_options(Some(1.0), 5.0, 3), &request()),
        Err(FeedbackError::Derivation(_))
    ));
    assert_eq!(controller.board().measurement_count(), 1);
}
