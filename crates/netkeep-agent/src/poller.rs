//! Bounded waits on the client and server descriptors.

use std::os::fd::BorrowedFd;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

/// Milliseconds the main loop waits before re-checking the stop flag.
pub const POLL_TIMEOUT_MS: u16 = 500;

/// State of one descriptor after a wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Readiness {
    /// Nothing happened.
    #[default]
    Idle,
    /// Data, or end of stream, can be read.
    Readable,
    /// The peer hung up and nothing is left to read.
    HungUp,
    /// The descriptor reported an error.
    Failed,
}

/// Result of one wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Client transport.
    pub client: Readiness,
    /// Server bus connection, when it was watched.
    pub server: Readiness,
}

/// Waits up to `timeout_ms` for input on the client and, optionally, the
/// server connection.
///
/// An interrupted wait is reported as a timeout so that the caller re-checks
/// its stop flag.
///
/// # Errors
///
/// Returns the `poll` error for anything other than `EINTR`.
pub fn wait(
    client: BorrowedFd<'_>,
    server: Option<BorrowedFd<'_>>,
    timeout_ms: u16,
) -> Result<PollOutcome, Errno> {
    let mut fds = vec![PollFd::new(client, PollFlags::POLLIN)];
    if let Some(server_fd) = server {
        fds.push(PollFd::new(server_fd, PollFlags::POLLIN));
    }
    match poll(&mut fds, PollTimeout::from(timeout_ms)) {
        Ok(0) | Err(Errno::EINTR) => Ok(PollOutcome::default()),
        Ok(_) => Ok(PollOutcome {
            client: fds.first().map(readiness).unwrap_or_default(),
            server: fds.get(1).map(readiness).unwrap_or_default(),
        }),
        Err(errno) => Err(errno),
    }
}

fn readiness(fd: &PollFd<'_>) -> Readiness {
    let Some(events) = fd.revents() else {
        return Readiness::Idle;
    };
    if events.contains(PollFlags::POLLIN) {
        Readiness::Readable
    } else if events.contains(PollFlags::POLLHUP) {
        Readiness::HungUp
    } else if events.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
        Readiness::Failed
    } else {
        Readiness::Idle
    }
}
