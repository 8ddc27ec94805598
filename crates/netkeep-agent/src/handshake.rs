//! Capability exchange and session registration.

use std::io::{Read, Write};
use std::os::fd::AsFd;

use tracing::{debug, info};

use netkeep_bus::{BusClient, BusStream};
use netkeep_proto::{Hello, decode_hello, negotiate};

use crate::AGENT_TARGET;
use crate::agent::Agent;
use crate::errors::AgentError;
use crate::poller::{self, POLL_TIMEOUT_MS, Readiness};
use crate::session::WorkingSession;

impl<R, W> Agent<R, W>
where
    R: Read + AsFd,
    W: Write + Send + 'static,
{
    /// Sends the server hello, waits for the client's and registers the
    /// negotiated session.
    pub(crate) fn handshake(
        &mut self,
        mut bus: BusClient<BusStream>,
    ) -> Result<WorkingSession, AgentError> {
        let info = bus.server_info().map_err(AgentError::Discovery)?;
        self.channel
            .send_hello(&Hello::server(&self.session_id, info.capabilities.clone()))?;
        let hello = self.read_client_hello()?;
        let negotiated = negotiate(&info.capabilities, &hello.capabilities)?;
        bus.register_session(
            &self.session_id,
            &negotiated,
            self.credentials.username.as_deref(),
            self.credentials.transport_identity.as_deref(),
        )
        .map_err(|source| AgentError::Registration {
            session_id: self.session_id.clone(),
            source,
        })?;
        info!(
            target: AGENT_TARGET,
            session_id = %self.session_id,
            capabilities = negotiated.len(),
            username = ?self.credentials.username,
            "session registered"
        );
        Ok(WorkingSession::new(
            self.session_id.clone(),
            bus,
            negotiated,
            info.streams,
        ))
    }

    fn read_client_hello(&mut self) -> Result<Hello, AgentError> {
        loop {
            while let Some(frame) = self.decoder.next_frame()? {
                if frame.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let hello = decode_hello(&frame).map_err(AgentError::Hello)?;
                debug!(
                    target: AGENT_TARGET,
                    capabilities = hello.capabilities.len(),
                    "client hello received"
                );
                return Ok(hello);
            }
            if self.stop.is_raised() {
                return Err(AgentError::Interrupted);
            }
            let outcome =
                poller::wait(self.input.as_fd(), None, POLL_TIMEOUT_MS).map_err(AgentError::Poll)?;
            match outcome.client {
                Readiness::Idle => {}
                Readiness::HungUp => return Err(AgentError::HandshakeClosed),
                Readiness::Failed => return Err(AgentError::ClientFailed),
                Readiness::Readable => {
                    if self.decoder.fill_from(&mut self.input)? == 0 {
                        return Err(AgentError::HandshakeClosed);
                    }
                }
            }
        }
    }
}
