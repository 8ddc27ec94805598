//! Session runtime: the working-phase loop and orderly shutdown.

use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::time::Duration;

use tracing::{debug, info, warn};

use netkeep_bus::{BusClient, BusError, BusSignal, BusStream, DEFAULT_MAX_FRAME_BYTES};
use netkeep_config::{Config, SocketEndpoint};
use netkeep_proto::{Decoded, FrameDecoder, Reply, RpcError, decode_request};

use crate::AGENT_TARGET;
use crate::channel::ClientChannel;
use crate::credentials::Credentials;
use crate::errors::AgentError;
use crate::poller::{self, POLL_TIMEOUT_MS, Readiness};
use crate::session::{SessionState, WorkingSession};
use crate::signals::StopFlag;

/// Why the working phase ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Stopped,
    ClientClosed,
}

/// One client session, from handshake to shutdown.
#[derive(Debug)]
pub struct Agent<R, W> {
    pub(crate) endpoint: SocketEndpoint,
    pub(crate) poll_interval: Duration,
    pub(crate) session_id: String,
    pub(crate) credentials: Credentials,
    pub(crate) input: R,
    pub(crate) decoder: FrameDecoder,
    pub(crate) channel: ClientChannel<W>,
    pub(crate) stop: StopFlag,
    state: SessionState,
}

impl<R, W> Agent<R, W>
where
    R: Read + AsFd,
    W: Write + Send + 'static,
{
    /// Prepares an agent for the client transport `input` and `output`.
    pub fn new(
        config: &Config,
        session_id: impl Into<String>,
        credentials: Credentials,
        input: R,
        output: W,
        stop: StopFlag,
    ) -> Self {
        Self {
            endpoint: config.server_socket().clone(),
            poll_interval: config.notification_poll_interval(),
            session_id: session_id.into(),
            credentials,
            input,
            decoder: FrameDecoder::new(config.max_frame_bytes()),
            channel: ClientChannel::new(output),
            stop,
            state: SessionState::Handshaking,
        }
    }

    /// Current session phase.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Serves the session until it ends.
    ///
    /// A session closed by the client, killed by another session or stopped
    /// by a termination signal ends with `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the server cannot be reached, the handshake
    /// fails, the client transport breaks or the server reports that device
    /// state is unknown.
    pub fn run(mut self) -> Result<(), AgentError> {
        info!(
            target: AGENT_TARGET,
            session_id = %self.session_id,
            server = %self.endpoint,
            "agent starting"
        );
        let bus = self.connect_bus()?;
        let mut session = self.handshake(bus)?;
        self.enter(SessionState::Working);
        let outcome = self.serve(&mut session);
        self.close(&mut session);
        let ending = outcome?;
        info!(
            target: AGENT_TARGET,
            session_id = %session.id,
            ending = ?ending,
            "session ended"
        );
        Ok(())
    }

    pub(crate) fn connect_bus(&self) -> Result<BusClient<BusStream>, AgentError> {
        BusClient::connect(&self.endpoint, DEFAULT_MAX_FRAME_BYTES).map_err(AgentError::Connect)
    }

    pub(crate) fn enter(&mut self, next: SessionState) {
        debug!(
            target: AGENT_TARGET,
            session_id = %self.session_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "session state changed"
        );
        self.state = next;
    }

    fn serve(&mut self, session: &mut WorkingSession) -> Result<Ending, AgentError> {
        while !self.stop.is_raised() {
            if session.bus.has_buffered() {
                let signal = session.bus.read_signal().map_err(AgentError::Server)?;
                self.on_signal(session, signal);
                continue;
            }
            let outcome = poller::wait(
                self.input.as_fd(),
                Some(session.bus.get_ref().as_fd()),
                POLL_TIMEOUT_MS,
            )
            .map_err(AgentError::Poll)?;
            match outcome.server {
                Readiness::Idle => {}
                Readiness::Readable => {
                    let signal = session.bus.read_signal().map_err(AgentError::Server)?;
                    self.on_signal(session, signal);
                    continue;
                }
                Readiness::HungUp | Readiness::Failed => {
                    return Err(AgentError::Server(BusError::Disconnected));
                }
            }
            match outcome.client {
                Readiness::Idle => {}
                Readiness::HungUp => return Ok(self.client_closed(session)),
                Readiness::Failed => return Err(AgentError::ClientFailed),
                Readiness::Readable => {
                    if self.decoder.fill_from(&mut self.input)? == 0 {
                        return Ok(self.client_closed(session));
                    }
                    self.drain_frames(session)?;
                }
            }
        }
        Ok(Ending::Stopped)
    }

    fn drain_frames(&mut self, session: &mut WorkingSession) -> Result<(), AgentError> {
        while !self.stop.is_raised() {
            let Some(frame) = self.decoder.next_frame()? else {
                break;
            };
            self.process(session, &frame)?;
        }
        Ok(())
    }

    fn process(&mut self, session: &mut WorkingSession, frame: &[u8]) -> Result<(), AgentError> {
        match decode_request(frame) {
            Decoded::Rpc(rpc) => self.handle(session, &rpc),
            Decoded::NoMessage => Ok(()),
            Decoded::Unknown(kind) => {
                debug!(target: AGENT_TARGET, kind, "ignoring unexpected client message");
                Ok(())
            }
            Decoded::Malformed(error) => {
                warn!(target: AGENT_TARGET, error = %error, "malformed client message");
                self.channel
                    .send_reply(&Reply::error(RpcError::malformed_message(error.to_string())))
            }
        }
    }

    fn on_signal(&mut self, session: &mut WorkingSession, signal: BusSignal) {
        match signal {
            BusSignal::Terminate {
                session_id,
                killed_by,
            } => {
                info!(
                    target: AGENT_TARGET,
                    session_id = %session_id,
                    killed_by = ?killed_by,
                    "session terminated by the server"
                );
                session.mark_released();
                self.stop.raise();
            }
        }
    }

    fn client_closed(&mut self, session: &mut WorkingSession) -> Ending {
        info!(target: AGENT_TARGET, session_id = %session.id, "client closed the connection");
        if let Err(error) = session.release() {
            warn!(target: AGENT_TARGET, error = %error, "failed to release session");
        }
        Ending::ClientClosed
    }

    fn close(&mut self, session: &mut WorkingSession) {
        self.enter(SessionState::Closing);
        if self.decoder.has_partial() {
            debug!(target: AGENT_TARGET, "discarding incomplete client message");
        }
        self.decoder.clear();
        if !session.is_released()
            && let Err(error) = session.release()
        {
            debug!(target: AGENT_TARGET, error = %error, "session release skipped");
        }
        if let Err(error) = session.bus.get_ref().shutdown() {
            debug!(target: AGENT_TARGET, error = %error, "bus connection already closed");
        }
        self.enter(SessionState::Closed);
    }
}
