use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use feedback_core::controller::FeedbackController;
use feedback_core::error::FeedbackError;
use feedback_core::repl::catalog::{self, COMMANDS};
use feedback_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome};
use feedback_core::repl::status::{StatusFormatter, StatusSnapshot};
use feedback_core::results::{MeasurementResult, SweepStep, capacitance};
use serde::Serialize;
use tracing::{info, warn};

use crate::board::{BoardError, ProfileKind, SimulatedBoard};

pub struct Session {
    executor: CommandExecutor<SimulatedBoard>,
    transcript: TranscriptLogger,
    results: ResultLog,
    kind: ProfileKind,
    started_at: Instant,
    run_count: usize,
}

impl Session {
    /// Opens a session whose transcript and result log live in `directory`.
    pub fn new(kind: ProfileKind, directory: &Path) -> io::Result<Self> {
        fs::create_dir_all(directory)?;
        let transcript = TranscriptLogger::new(kind, directory)?;
        let results = ResultLog::new(kind, directory)?;
        let board = SimulatedBoard::new(kind.profile());
        let executor = CommandExecutor::new(FeedbackController::with_board(board));
        info!(profile = kind.tag(), directory = %directory.display(), "session opened");

        Ok(Self {
            executor,
            transcript,
            results,
            kind,
            started_at: Instant::now(),
            run_count: 0,
        })
    }

    pub fn executor(&self) -> &CommandExecutor<SimulatedBoard> {
        &self.executor
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let lines = match self.executor.execute(trimmed) {
            Ok(CommandOutcome::OptionsUpdated(_)) => {
                let snapshot = self.executor.snapshot();
                let formatter = StatusFormatter::new(&snapshot);
                vec![
                    format!("OK {}", render(|out| formatter.write_feedback_line(out))),
                    format!("   {}", render(|out| formatter.write_action_line(out))),
                ]
            }
            Ok(CommandOutcome::SessionUpdated(snapshot)) => {
                let formatter = StatusFormatter::new(&snapshot);
                vec![
                    format!("OK {}", render(|out| formatter.write_electrode_line(out))),
                    format!("   {}", render(|out| formatter.write_waveform_line(out))),
                ]
            }
            Ok(CommandOutcome::RunCompleted(None)) => {
                vec!["OK run skipped (feedback off)".to_string()]
            }
            Ok(CommandOutcome::RunCompleted(Some(result))) => {
                self.run_count += 1;
                self.results
                    .append(self.run_count, self.kind, elapsed, &result)?;
                describe_result(self.run_count, &result, self.executor.session().frequency)
            }
            Ok(CommandOutcome::Calibrated(threshold)) => {
                vec![format!("OK calibrate baseline={threshold:.4e}F/mm2")]
            }
            Ok(CommandOutcome::Status(snapshot)) => describe_status(&snapshot),
            Ok(CommandOutcome::Help(topic)) => help_lines(topic),
            Err(CommandError::Parse(err)) => vec![format!("ERR syntax {err}")],
            Err(err @ CommandError::NoElectrode) => vec![format!("ERR {err}")],
            Err(CommandError::Feedback(err)) => describe_failure(&err),
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn render<F>(write: F) -> String
where
    F: FnOnce(&mut String) -> std::fmt::Result,
{
    let mut line = String::new();
    // Writing into a String cannot fail.
    let _ = write(&mut line);
    line
}

fn describe_status(snapshot: &StatusSnapshot) -> Vec<String> {
    let formatter = StatusFormatter::new(snapshot);
    vec![
        render(|out| formatter.write_feedback_line(out)),
        render(|out| formatter.write_action_line(out)),
        render(|out| formatter.write_electrode_line(out)),
        render(|out| formatter.write_waveform_line(out)),
    ]
}

/// `frequency` is the step waveform, used to derive capacitance for voltage
/// sweeps.
fn describe_result(seq: usize, result: &MeasurementResult, frequency: f64) -> Vec<String> {
    match result {
        MeasurementResult::Feedback(feedback) => {
            let mut head = format!(
                "OK run retry seq={seq} voltage={}V samples={}",
                feedback.v_total(),
                feedback.v_fb().len()
            );
            match (
                feedback.min_impedance(),
                feedback.capacitance_per_area(feedback.frequency()),
            ) {
                (Ok(impedance), Ok(per_area)) => head.push_str(&format!(
                    " min-impedance={impedance:.4e}ohm capacitance={per_area:.4e}F/mm2"
                )),
                (Err(err), _) | (_, Err(err)) => head.push_str(&format!(" derived=n/a ({err})")),
            }
            vec![head]
        }
        MeasurementResult::SweepFrequency(sweep) => {
            let mut lines = vec![format!(
                "OK run sweep-frequency seq={seq} voltage={}V steps={}",
                sweep.v_total(),
                sweep.len()
            )];
            lines.extend(
                sweep
                    .steps()
                    .iter()
                    .enumerate()
                    .map(|(index, step)| describe_step(index, step, "Hz", step.setpoint, sweep.area())),
            );
            lines
        }
        MeasurementResult::SweepVoltage(sweep) => {
            let mut lines = vec![format!(
                "OK run sweep-voltage seq={seq} steps={}",
                sweep.len()
            )];
            lines.extend(sweep.steps().iter().enumerate().map(|(index, step)| {
                describe_step(index, step, "V", frequency, sweep.area())
            }));
            lines
        }
    }
}

fn describe_step(index: usize, step: &SweepStep, unit: &str, frequency: f64, area: f64) -> String {
    let mut line = format!("  {}. {}{unit}", index + 1, step.setpoint);
    match step.min_impedance() {
        Ok(impedance) => {
            line.push_str(&format!(" min-impedance={impedance:.4e}ohm"));
            if let Ok(value) = capacitance(frequency, impedance) {
                line.push_str(&format!(" capacitance={:.4e}F/mm2", value / area));
            }
        }
        Err(err) => line.push_str(&format!(" derived=n/a ({err})")),
    }
    line
}

fn describe_failure(error: &FeedbackError<BoardError>) -> Vec<String> {
    match error {
        FeedbackError::Connection {
            cause,
            completed_measurements,
        } => {
            warn!(%cause, completed_measurements, "run aborted by board");
            vec![format!(
                "ERR link {cause} (discarded {completed_measurements} measurement(s))"
            )]
        }
        other => vec![format!("ERR feedback {other}")],
    }
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some(spec) = catalog::find(target) {
                lines.push(format!("{:<56} - {}", spec.usage, spec.summary));
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for spec in COMMANDS {
                lines.push(format!("  {:<56} - {}", spec.usage, spec.summary));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    COMMANDS
        .iter()
        .map(|spec| spec.name)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Serialize)]
struct ResultRecord<'a> {
    seq: usize,
    profile: &'static str,
    elapsed_ms: u64,
    result: &'a MeasurementResult,
}

/// One JSON object per finished run.
struct ResultLog {
    writer: BufWriter<File>,
}

impl ResultLog {
    fn new(kind: ProfileKind, directory: &Path) -> io::Result<Self> {
        let path = directory.join(format!("{}-results.jsonl", kind.tag()));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn append(
        &mut self,
        seq: usize,
        kind: ProfileKind,
        elapsed: Duration,
        result: &MeasurementResult,
    ) -> io::Result<()> {
        let record = ResultRecord {
            seq,
            profile: kind.tag(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            result,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        writeln!(self.writer)?;
        self.writer.flush()
    }
}

struct TranscriptLogger {
    writer: BufWriter<File>,
}

impl TranscriptLogger {
    fn new(kind: ProfileKind, directory: &Path) -> io::Result<Self> {
        let path = directory.join(format!("{}.log", kind.tag()));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(kind)?;
        Ok(logger)
    }

    fn write_header(&mut self, kind: ProfileKind) -> io::Result<()> {
        writeln!(self.writer, "# {}", kind.header())?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
