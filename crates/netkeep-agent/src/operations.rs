//! Request handling for a working session.
//!
//! `close-session`, `kill-session` and `create-subscription` are served by
//! the agent itself; every other operation goes to the server's dispatch
//! engine and its reply is relayed unchanged.

use std::io::{Read, Write};
use std::os::fd::AsFd;

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use netkeep_bus::BusError;
use netkeep_proto::capability::NOTIFICATION;
use netkeep_proto::{ErrorTag, ErrorType, OperationKind, Reply, Rpc, RpcError, SubscriptionRequest};

use crate::AGENT_TARGET;
use crate::agent::Agent;
use crate::errors::AgentError;
use crate::notify::NotificationJob;
use crate::session::WorkingSession;

const SESSION_ID: &str = "session-id";
const SUBSCRIPTION_ACTIVE: &str =
    "Another notification subscription is currently active on this session.";

impl<R, W> Agent<R, W>
where
    R: Read + AsFd,
    W: Write + Send + 'static,
{
    pub(crate) fn handle(
        &mut self,
        session: &mut WorkingSession,
        rpc: &Rpc,
    ) -> Result<(), AgentError> {
        debug!(
            target: AGENT_TARGET,
            message_id = %rpc.message_id,
            operation = %rpc.operation,
            "request received"
        );
        match rpc.kind() {
            OperationKind::CloseSession => self.close_session(session, rpc),
            OperationKind::KillSession => self.kill_session(session, rpc),
            OperationKind::CreateSubscription => self.create_subscription(session, rpc),
            OperationKind::Generic => self.forward(session, rpc),
        }
    }

    fn reply(&self, rpc: &Rpc, reply: Reply) -> Result<(), AgentError> {
        self.channel.send_reply(&reply.for_message(rpc.message_id.clone()))
    }

    fn close_session(&mut self, session: &mut WorkingSession, rpc: &Rpc) -> Result<(), AgentError> {
        let reply = match session.release() {
            Ok(()) => Reply::ok(),
            Err(failure) => {
                warn!(target: AGENT_TARGET, error = %failure, "close-session release failed");
                Reply::error(RpcError::operation_failed().with_message(failure.to_string()))
            }
        };
        self.stop.raise();
        self.reply(rpc, reply)
    }

    fn kill_session(&mut self, session: &mut WorkingSession, rpc: &Rpc) -> Result<(), AgentError> {
        let Some(target) = rpc.param(SESSION_ID).and_then(session_id_text) else {
            return self.reply(rpc, Reply::error(RpcError::missing_element(SESSION_ID)));
        };
        match session.bus.terminate_session(&session.id, &target) {
            Ok(()) => {
                info!(target: AGENT_TARGET, killed = %target, "session killed");
                self.reply(rpc, Reply::ok())
            }
            Err(BusError::Rejected { error }) => self.reply(rpc, Reply::error(error)),
            Err(failure) => Err(AgentError::Server(failure)),
        }
    }

    fn create_subscription(
        &mut self,
        session: &mut WorkingSession,
        rpc: &Rpc,
    ) -> Result<(), AgentError> {
        if !session.capabilities.contains(NOTIFICATION) {
            return self.reply(rpc, Reply::error(RpcError::operation_not_supported()));
        }
        if session.subscription.is_active() {
            return self.reply(rpc, Reply::error(subscription_active()));
        }
        let request = match parse_subscription(rpc, &session.streams) {
            Ok(request) => request,
            Err(rejection) => return self.reply(rpc, Reply::error(rejection)),
        };
        let Some(slot) = session.subscription.try_claim() else {
            return self.reply(rpc, Reply::error(subscription_active()));
        };
        let job = NotificationJob {
            session_id: session.id.clone(),
            request,
            endpoint: self.endpoint.clone(),
            poll_interval: self.poll_interval,
            channel: self.channel.clone(),
            stop: self.stop.clone(),
            _slot: slot,
        };
        // The worker may not write before the reply is out.
        let mut writer = self.channel.lock()?;
        let reply = match job.spawn() {
            Ok(()) => Reply::ok(),
            Err(failure) => {
                error!(target: AGENT_TARGET, error = %failure, "failed to start notification worker");
                Reply::error(
                    RpcError::operation_failed()
                        .with_message(format!("cannot start notification delivery: {failure}")),
                )
            }
        };
        writer.send_reply(&reply.for_message(rpc.message_id.clone()))
    }

    fn forward(&mut self, session: &mut WorkingSession, rpc: &Rpc) -> Result<(), AgentError> {
        match session.bus.dispatch(&session.id, rpc) {
            Ok(reply) => self.reply(rpc, reply),
            Err(BusError::Fatal { message }) => {
                error!(
                    target: AGENT_TARGET,
                    message_id = %rpc.message_id,
                    message = %message,
                    "server reported an inconsistent state"
                );
                let failure = RpcError::new(ErrorTag::RollbackFailed).with_message(message.clone());
                self.reply(rpc, Reply::error(failure))?;
                Err(AgentError::Inconsistent { message })
            }
            Err(failure) => Err(AgentError::Server(failure)),
        }
    }
}

fn session_id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn parse_subscription(rpc: &Rpc, streams: &[String]) -> Result<SubscriptionRequest, RpcError> {
    let request = SubscriptionRequest::from_content(&rpc.content)?;
    request.check(streams, OffsetDateTime::now_utc())?;
    Ok(request)
}

fn subscription_active() -> RpcError {
    RpcError::operation_failed()
        .with_type(ErrorType::Protocol)
        .with_message(SUBSCRIPTION_ACTIVE)
}
