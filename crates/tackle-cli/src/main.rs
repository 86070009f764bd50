//! CLI entrypoint for the Tackle plugin host.
//!
//! The binary delegates to [`tackle_cli::run`], which loads configuration,
//! installs telemetry, and runs one pipeline command.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    tackle_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
