//! Per-connection agent for the netkeep management server.
//!
//! One agent serves one client session. It reads framed requests from the
//! client transport on stdin, answers on stdout and reaches the server over
//! the bus socket named by [`netkeep_config::Config::server_socket`]. The
//! session runs through the handshake, where capabilities are negotiated and
//! the session is registered with the server, and then a working phase that
//! multiplexes client requests with server signals until the client closes,
//! the session is killed or a termination signal arrives.
//!
//! Session-control operations are handled locally. Everything else is
//! forwarded to the server's dispatch engine. A successful
//! `create-subscription` starts a notification worker that polls the server's
//! event journal on its own bus connection.

mod agent;
mod channel;
mod credentials;
mod errors;
mod handshake;
mod notify;
mod operations;
mod poller;
mod session;
mod signals;
mod telemetry;

#[cfg(test)]
mod tests;

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::process::ExitCode;

use ortho_config::OrthoConfig;
use tracing::error;

use netkeep_config::Config;

pub use agent::Agent;
pub use channel::{ChannelLock, ClientChannel};
pub use credentials::{CLIENT_DN_VAR, Credentials};
pub use errors::AgentError;
pub use notify::{SlotGuard, SubscriptionSlot};
pub use session::SessionState;
pub use signals::{FORCED_EXIT_STATUS, StopFlag, TERMINATION_SIGNALS};
pub use telemetry::TelemetryError;

pub(crate) const AGENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::agent");

/// Runs one agent session and maps the outcome to a process exit status.
///
/// Failures are logged and summarised on `stderr`.
pub fn run<I, E>(args: I, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    E: Write,
{
    match run_session(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!(target: AGENT_TARGET, error = %failure, "agent failed");
            let _ = writeln!(stderr, "netkeep-agent: {failure}");
            ExitCode::FAILURE
        }
    }
}

fn run_session<I>(args: I) -> Result<(), AgentError>
where
    I: IntoIterator<Item = OsString>,
{
    let stop = StopFlag::install().map_err(AgentError::Signals)?;
    let config = Config::load_from_iter(args).map_err(AgentError::Configuration)?;
    telemetry::initialise(&config)?;
    let input = stdin_file().map_err(AgentError::Stdio)?;
    let agent = Agent::new(
        &config,
        std::process::id().to_string(),
        Credentials::from_environment(),
        input,
        io::stdout(),
        stop,
    );
    agent.run()
}

/// Opens stdin without the standard library's read buffer, so that `poll`
/// sees every byte the client has sent.
fn stdin_file() -> io::Result<File> {
    let fd = io::stdin().as_fd().try_clone_to_owned()?;
    Ok(File::from(fd))
}
