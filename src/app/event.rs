use std::borrow::Cow;
use std::fmt;

use crate::irc::connection::Established;
use crate::irc::message::Message;

/// Stable identifier of one configured connection. Survives reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetId(String);

impl NetId {
    pub fn new(serial: u64, host: &str, port: u16, tls: bool) -> Self {
        Self(format!("{}:{}:{}{}", serial, host, port, if tls { "+" } else { "-" }))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation counter of a live session within one connection.
pub type SessionId = u64;

/// Messages fed into the manager's event loop by I/O tasks.
#[derive(Debug)]
pub enum AppEvent {
    /// A line was read from the socket.
    Line {
        net_id: NetId,
        session: SessionId,
        line: String,
    },
    /// Drain timer fired for a session.
    Tick { net_id: NetId, session: SessionId },
    /// The socket closed or failed.
    Closed {
        net_id: NetId,
        session: SessionId,
        reason: String,
    },
    /// A reconnect attempt established a new stream.
    Reconnected {
        net_id: NetId,
        attempt: u32,
        stream: Established,
    },
    /// The reconnect policy gave up.
    ReconnectFailed { net_id: NetId, attempts: u32 },
    /// A console or embedder command for one connection.
    Command { net_id: NetId, command: Command },
}

/// Commands accepted from outside the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join(Vec<String>),
    Part(Vec<String>),
    Say { target: String, text: String },
    Action { target: String, text: String },
    Nick(String),
    Raw(String),
    Quit(Option<String>),
}

/// Events published on the messaging substrate.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    /// Every received line, before parsing.
    Raw(String),
    /// A parsed line; published as `irc-<verb>`.
    Message(Message),
    /// A line written to the socket.
    Sent(String),
    CapsAcknowledged(Vec<String>),
    /// Waited capabilities the server did not grant.
    CapsUnavailable(Vec<String>),
    RegistrationComplete { nick: String },
    AuthComplete,
    AuthFailed { numeric: String, reason: String },
    SyncDone { channel: String },
    NetidAvailable,
    ConnectionLost { reason: String },
    Disconnected,
    Reconnected,
    ConnectionFailed { error: String },
}

impl Event {
    /// Name under which the event is published.
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Event::Connected => "connected".into(),
            Event::Raw(_) => "raw".into(),
            Event::Message(msg) => format!("irc-{}", msg.verb.to_ascii_lowercase()).into(),
            Event::Sent(_) => "irc-send".into(),
            Event::CapsAcknowledged(_) => "caps-acknowledged".into(),
            Event::CapsUnavailable(_) => "caps-unavailable".into(),
            Event::RegistrationComplete { .. } => "registration-complete".into(),
            Event::AuthComplete => "auth-complete".into(),
            Event::AuthFailed { .. } => "auth-failed".into(),
            Event::SyncDone { .. } => "sync-done".into(),
            Event::NetidAvailable => "netid-available".into(),
            Event::ConnectionLost { .. } => "connection-lost".into(),
            Event::Disconnected => "disconnected".into(),
            Event::Reconnected => "reconnected".into(),
            Event::ConnectionFailed { .. } => "connection-failed".into(),
        }
    }
}
