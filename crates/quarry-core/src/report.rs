//! Console reporting for build progress and failures
//!
//! The engine reports three classes of lines: informational progress
//! (what an artifact is about to do), warnings (a target skipped because
//! it is not expired, state tracking disabled), and failures. How much
//! detail a failure carries is controlled by the session verbosity.

use crate::error::BuildError;
use colored::Colorize;
use std::error::Error;

/// Print an informational progress line.
pub fn info(msg: impl AsRef<str>) {
    println!("{}", msg.as_ref());
}

/// Print a warning line.
pub fn warn(msg: impl AsRef<str>) {
    println!("{} {}", "WARNING:".yellow().bold(), msg.as_ref());
}

/// Print an error line.
pub fn error(msg: impl AsRef<str>) {
    eprintln!("{} {}", "ERROR:".red().bold(), msg.as_ref());
}

/// Report a build-step failure.
///
/// At verbosity 0 only the failure message is shown; at verbosity 1 the
/// whole cause chain is printed. Re-raising instead of reporting is the
/// caller's decision (see the tree builder).
pub fn failure(err: &BuildError, verbosity: u8) {
    error(err.to_string());
    if verbosity >= 1 {
        let mut cause = err.source();
        while let Some(c) = cause {
            eprintln!("  {} {}", "caused by:".red(), c);
            cause = c.source();
        }
    }
}
