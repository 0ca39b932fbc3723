//! Command dispatcher: authentication, decoding, gating, and hand-off.
//!
//! [`Dispatcher::handle`] is synchronous. It decodes the message, checks the
//! command gate, and queues the command on the session's lane; it never
//! waits for the hardware. Every per-command error becomes an error reply
//! and the session carries on. Only a failed credential check closes it.

use std::sync::Arc;

use rover_kernel::CommandGate;
use rover_types::{Command, RoverError};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::broadcaster::Broadcaster;
use crate::protocol::{self, GREETING, REJECTION, Reply};
use crate::scheduler::Scheduler;
use crate::session::Session;

/// What the transport should send back.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Plain text, used by the auth handshake.
    Text(String),
    Reply(Reply),
}

impl Frame {
    pub fn to_text(&self) -> String {
        match self {
            Frame::Text(text) => text.clone(),
            Frame::Reply(reply) => reply.to_json(),
        }
    }

    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Frame::Reply(reply) => Some(reply),
            Frame::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub frame: Frame,
    /// Close the session after sending `frame`.
    pub close: bool,
    /// Error behind the reply, if any.
    pub error: Option<RoverError>,
}

impl Response {
    fn send(frame: Frame) -> Self {
        Self {
            frame,
            close: false,
            error: None,
        }
    }

    fn failed(title: &str, error: RoverError) -> Self {
        Self {
            frame: Frame::Reply(Reply::error(title, &error)),
            close: false,
            error: Some(error),
        }
    }
}

pub struct Dispatcher {
    credential: Zeroizing<String>,
    gate: CommandGate,
    scheduler: Scheduler,
    broadcaster: Arc<Broadcaster>,
}

impl Dispatcher {
    pub fn new(
        credential: Zeroizing<String>,
        gate: CommandGate,
        scheduler: Scheduler,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            credential,
            gate,
            scheduler,
            broadcaster,
        }
    }

    pub fn open_session(&self) -> Session {
        let session = Session::new();
        debug!(session = %session.id(), "session opened");
        session
    }

    /// Handle one inbound message.
    pub fn handle(&self, session: &mut Session, line: &str) -> Response {
        session.touch();
        if !session.is_authenticated() {
            return self.authenticate(session, line);
        }

        let parsed = match protocol::parse(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(session = %session.id(), error = %e, "ignoring message");
                return Response::failed("unknown", e);
            }
        };
        let title = parsed.title.as_str();

        if parsed.command == Command::GetInfo {
            return Response::send(Frame::Reply(Reply::info(self.broadcaster.snapshot())));
        }

        if let Err(e) = self.gate.verify(&parsed.command) {
            info!(session = %session.id(), command = title, error = %e, "command refused");
            return Response::failed(title, e);
        }

        let Some(lane) = session.lane() else {
            return Response::failed(title, RoverError::Channel("session has no lane".into()));
        };
        match lane.submit(parsed.command) {
            Ok(()) => {
                debug!(session = %session.id(), command = title, "command queued");
                Response::send(Frame::Reply(Reply::queued(title)))
            }
            Err(e) => {
                warn!(session = %session.id(), command = title, error = %e, "command dropped");
                Response::failed(title, e)
            }
        }
    }

    fn authenticate(&self, session: &mut Session, line: &str) -> Response {
        if line.trim() == self.credential.as_str() {
            session.authenticate(self.scheduler.open_lane(session.id()));
            info!(session = %session.id(), "session authenticated");
            Response::send(Frame::Text(GREETING.into()))
        } else {
            warn!(session = %session.id(), "authentication failed");
            Response {
                frame: Frame::Text(REJECTION.into()),
                close: true,
                error: Some(RoverError::Auth),
            }
        }
    }
}
