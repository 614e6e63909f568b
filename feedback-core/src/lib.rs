#![no_std]

extern crate alloc;

// Feedback measurement model and control policy for the DMF control board.
//
// This crate stays portable across transports by avoiding the Rust standard
// library. The board itself is reached through the `FeedbackBoard` trait so
// the emulator and a real serial link can share the same policy engine.

pub mod calibration;
pub mod controller;
pub mod error;
pub mod options;
pub mod repl;
pub mod results;
pub mod sample;
pub mod telemetry;
