//! State held for the session once the handshake has completed.

use netkeep_bus::{BusClient, BusError, BusStream};
use netkeep_proto::CapabilitySet;
use tracing::debug;

use crate::AGENT_TARGET;
use crate::notify::SubscriptionSlot;

/// Phase of the session served by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Exchanging hellos and registering with the server.
    Handshaking,
    /// Serving requests.
    Working,
    /// Releasing server-side state.
    Closing,
    /// Nothing left to do.
    Closed,
}

impl SessionState {
    /// Name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshaking => "handshaking",
            Self::Working => "working",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// A registered session and its bus connection.
#[derive(Debug)]
pub(crate) struct WorkingSession {
    pub(crate) id: String,
    pub(crate) bus: BusClient<BusStream>,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) streams: Vec<String>,
    pub(crate) subscription: SubscriptionSlot,
    released: bool,
}

impl WorkingSession {
    pub(crate) fn new(
        id: String,
        bus: BusClient<BusStream>,
        capabilities: CapabilitySet,
        streams: Vec<String>,
    ) -> Self {
        Self {
            id,
            bus,
            capabilities,
            streams,
            subscription: SubscriptionSlot::default(),
            released: false,
        }
    }

    /// Asks the server to drop the session. Later calls do nothing once the
    /// server has confirmed.
    pub(crate) fn release(&mut self) -> Result<(), BusError> {
        if self.released {
            return Ok(());
        }
        self.bus.release_session(&self.id)?;
        self.released = true;
        debug!(target: AGENT_TARGET, session_id = %self.id, "session released");
        Ok(())
    }

    /// Records that the server already removed the session.
    pub(crate) const fn mark_released(&mut self) {
        self.released = true;
    }

    pub(crate) const fn is_released(&self) -> bool {
        self.released
    }
}
