//! Operator command language for editing a protocol step and running it.
//!
//! The grammar lives in [`grammar`] and is implemented with a token/parse
//! pipeline that stays compatible with `no_std`; [`commands`] applies parsed
//! commands to a step and its controller.

pub mod catalog;
pub mod commands;
pub mod grammar;
pub mod status;
