//! Per-connection agent for the netkeep management server.
//!
//! The transport layer spawns one agent per client connection with the
//! client's byte stream on stdin and stdout. The binary delegates to
//! [`netkeep_agent::run`]; diagnostics go to stderr only.

use std::io::{self, StderrLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    netkeep_agent::run(std::env::args_os(), &mut stderr)
}
