//! Entry point for the netkeep management server.

use std::process::ExitCode;

fn main() -> ExitCode {
    match netkeepd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("netkeepd: {error}");
            ExitCode::FAILURE
        }
    }
}
