mod support;

use feedback_core::controller::FeedbackController;
use feedback_core::error::FeedbackError;
use feedback_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome};
use feedback_core::repl::status::StatusFormatter;
use feedback_core::results::MeasurementResult;

use support::{LinkDown, ScriptedBoard};

fn executor(board: ScriptedBoard) -> CommandExecutor<ScriptedBoard> {
    CommandExecutor::new(FeedbackController::with_board(board))
}

fn run(executor: &mut CommandExecutor<ScriptedBoard>, lines: &[&str]) {
    for line in lines {
        executor
            .execute(line)
            .unwrap_or_else(|err| panic!("`{line}` failed: {err:?}"));
    }
}

#[test]
fn scripted_frequency_sweep_runs_through_the_command_line() {
    let mut executor = executor(ScriptedBoard::new(&[(2.0, 1e3)]));
    run(
        &mut executor,
        &[
            "feedback on",
            "sampling samples=1",
            "electrode 1,2 area=3.5",
            "frequency 5e3",
            "sweep frequency start=1000 end=3000 steps=3",
        ],
    );

    let outcome = executor.execute("run").expect("run succeeds");
    match outcome {
        CommandOutcome::RunCompleted(Some(MeasurementResult::SweepFrequency(result))) => {
            assert_eq!(result.frequencies(), [1000.0, 2000.0, 3000.0]);
            assert_eq!(result.area(), 3.5);
            assert_eq!(result.v_total(), 100.0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        executor.controller().board().frequencies(),
        [1000.0, 2000.0, 3000.0, 5000.0]
    );
}

#[test]
fn calibrate_then_retry_against_the_baseline() {
    let mut executor = executor(ScriptedBoard::new(&[(1.0, 100.0)]));
    run(
        &mut executor,
        &[
            "electrode 0 area=1",
            "voltage 50",
            "frequency 1000",
            "calibrate",
            "feedback on",
            "retry threshold=auto increase=10 repeats=2",
        ],
    );

    let outcome = executor.execute("run").expect("run succeeds");
    assert!(matches!(
        outcome,
        CommandOutcome::RunCompleted(Some(MeasurementResult::Feedback(_)))
    ));
    // One calibration shot plus a single retry measurement that clears 95 %.
    assert_eq!(executor.controller().board().measurement_count(), 2);
}

#[test]
fn board_failures_surface_as_feedback_errors() {
    let mut executor = executor(ScriptedBoard::new(&[(1.0, 100.0)]).failing_on(1));
    run(&mut executor, &["feedback on", "electrode 0 area=1"]);

    assert_eq!(
        executor.execute("run"),
        Err(CommandError::Feedback(FeedbackError::connection(LinkDown, 0)))
    );
}

#[test]
fn status_lines_reflect_the_session() {
    let mut executor = executor(ScriptedBoard::new(&[(1.0, 100.0)]));
    run(
        &mut executor,
        &["feedback on", "sweep voltage start=10 end=20 steps=2", "electrode 4,6 area=1.25"],
    );

    let snapshot = match executor.execute("status") {
        Ok(CommandOutcome::Status(snapshot)) => snapshot,
        other => panic!("unexpected outcome: {other:?}"),
    };
    let formatter = StatusFormatter::new(&snapshot);

    let mut line = String::new();
    formatter.write_action_line(&mut line).expect("write");
    assert_eq!(line, "action sweep-voltage start=10V end=20V steps=2");

    line.clear();
    formatter.write_electrode_line(&mut line).expect("write");
    assert_eq!(line, "electrode channels=4,6 area=1.25mm2 board=8");
}
