use std::io;
use std::path::Path;

#[allow(dead_code)]
#[path = "../board.rs"]
mod board;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use board::ProfileKind;
use session::Session;

const TRANSCRIPT_DIR: &str = "transcripts";

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    for kind in ProfileKind::ALL {
        record_profile(kind)?;
    }
    Ok(())
}

fn record_profile(kind: ProfileKind) -> io::Result<()> {
    let mut session = Session::new(kind, Path::new(TRANSCRIPT_DIR))?;
    match kind {
        ProfileKind::Droplet => record_droplet(&mut session),
        ProfileKind::Dry => record_dry(&mut session),
        ProfileKind::Flaky => record_flaky(&mut session),
    }
}

fn replay(session: &mut Session, lines: &[&str]) -> io::Result<()> {
    for line in lines {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}

fn record_droplet(session: &mut Session) -> io::Result<()> {
    replay(
        session,
        &[
            "help",
            "electrode 12,13 area=5",
            "voltage 100",
            "frequency 10e3",
            "calibrate",
            "feedback on",
            "sampling time=10 samples=5",
            "retry threshold=auto increase=10 repeats=3",
            "voltage 40",
            "run",
            "sweep frequency start=100 end=30e3 steps=5",
            "run",
            "sweep voltage start=20 end=100 steps=5",
            "run",
            "status",
        ],
    )
}

fn record_dry(session: &mut Session) -> io::Result<()> {
    replay(
        session,
        &[
            "run",
            "electrode 4 area=2.5",
            "feedback on",
            "retry threshold=1e-12 increase=20 repeats=3",
            "run",
            "retry increase=50",
            "run",
            "status",
        ],
    )
}

fn record_flaky(session: &mut Session) -> io::Result<()> {
    replay(
        session,
        &[
            "electrode 7 area=2.5",
            "feedback on",
            "sweep voltage start=10 end=100 steps=10",
            "run",
            "help sweep",
            "feedback off",
            "run",
        ],
    )
}
