mod board;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use tracing_subscriber::EnvFilter;

use board::ProfileKind;
use session::Session;

const DEFAULT_TRANSCRIPT_DIR: &str = "transcripts";

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let (profile, directory) = parse_args().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!(
            "Usage: feedback-emulator [--profile <droplet|dry|flaky>] [--transcripts <dir>]"
        );
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(profile, &directory)?;
    let mut line = String::new();

    let board = session.executor().controller().board().profile();
    writeln!(
        writer,
        "DMF Feedback Emulator ({}, {} channels, {} V limit) ready. Type `help` for commands or `exit` to quit.",
        profile.tag(),
        board.channel_count,
        board.max_voltage
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            let board = session.executor().controller().board();
            writeln!(
                writer,
                "Session closed after {} measurement(s); amplifier at {} V.",
                board.measurements(),
                board.voltage()
            )?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_args() -> Result<(ProfileKind, PathBuf), String> {
    let mut profile = ProfileKind::Droplet;
    let mut directory = PathBuf::from(DEFAULT_TRANSCRIPT_DIR);
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            profile = ProfileKind::from_tag(value)?;
        } else if arg == "--profile" {
            let value = args.next().ok_or("Expected value after --profile")?;
            profile = ProfileKind::from_tag(&value)?;
        } else if let Some(value) = arg.strip_prefix("--transcripts=") {
            directory = PathBuf::from(value);
        } else if arg == "--transcripts" {
            let value = args.next().ok_or("Expected value after --transcripts")?;
            directory = PathBuf::from(value);
        } else {
            profile = ProfileKind::from_tag(&arg)?;
        }
    }

    Ok((profile, directory))
}
