//! Two-phase handling of termination signals.
//!
//! The first interrupt, terminate, quit or abort signal only raises the
//! [`StopFlag`]; the main loop notices it within one poll timeout and shuts
//! down in order. A second signal arriving while the flag is already raised
//! exits the process at once with a failure status, which rescues an agent
//! stuck in a blocking call.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::signal::{SIGABRT, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::flag;

/// Signals that request termination.
pub const TERMINATION_SIGNALS: [i32; 4] = [SIGINT, SIGTERM, SIGQUIT, SIGABRT];

/// Exit status used when a repeated signal forces termination.
pub const FORCED_EXIT_STATUS: i32 = 1;

/// Process-wide cooperative stop request.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Creates a lowered flag that no signal is connected to.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a flag raised by [`TERMINATION_SIGNALS`].
    ///
    /// # Errors
    ///
    /// Propagates registration failures from the operating system.
    pub fn install() -> io::Result<Self> {
        let stop = Self::new();
        for signal in TERMINATION_SIGNALS {
            // Registered first so it sees the flag as it was before this
            // delivery raised it.
            flag::register_conditional_shutdown(signal, FORCED_EXIT_STATUS, Arc::clone(&stop.0))?;
            flag::register(signal, Arc::clone(&stop.0))?;
        }
        Ok(stop)
    }

    /// Requests a graceful stop.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Reports whether a stop was requested.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
