//! SASL PLAIN authentication layered on the `sasl` capability.

use std::collections::VecDeque;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{info, warn};

use crate::app::action::Action;
use crate::app::event::Event;
use crate::irc::cap::CapRequests;
use crate::irc::message::Message;

pub const SASL_CAP: &str = "sasl";

/// Longest payload carried by a single `AUTHENTICATE` line.
pub const SASL_CHUNK_SIZE: usize = 400;

/// Encode `authzid NUL authcid NUL password` with authzid = authcid.
pub fn encode_plain(principal: &str, secret: &str) -> String {
    let payload = format!("{}\0{}\0{}", principal, principal, secret);
    BASE64.encode(payload.as_bytes())
}

/// Split an encoded response into `AUTHENTICATE` payloads.
///
/// A response whose final chunk is exactly [`SASL_CHUNK_SIZE`] long is
/// terminated by an empty `+` chunk.
pub fn chunk_response(encoded: &str) -> Vec<String> {
    // base64 output is ASCII, so byte offsets are char boundaries.
    let mut chunks: Vec<String> = (0..encoded.len())
        .step_by(SASL_CHUNK_SIZE)
        .map(|start| encoded[start..(start + SASL_CHUNK_SIZE).min(encoded.len())].to_string())
        .collect();
    if chunks.last().map_or(true, |last| last.len() == SASL_CHUNK_SIZE) {
        chunks.push("+".to_string());
    }
    chunks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Idle,
    MechanismSent,
    Finished,
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    /// Everything registered, replayed into `queue` for each session.
    credentials: Vec<(String, String)>,
    queue: VecDeque<(String, String)>,
    state: AuthState,
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator {
    pub fn new() -> Self {
        Self {
            credentials: Vec::new(),
            queue: VecDeque::new(),
            state: AuthState::Idle,
        }
    }

    /// Hold capability negotiation open for `sasl` and queue one credential pair.
    pub fn register(&mut self, caps: &mut CapRequests, principal: &str, secret: &str) {
        caps.wait(SASL_CAP);
        let pair = (principal.to_string(), secret.to_string());
        self.credentials.push(pair.clone());
        self.queue.push_back(pair);
    }

    pub fn is_configured(&self) -> bool {
        !self.credentials.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Start over on a fresh session with every registered pair queued again.
    pub fn reset_for_session(&mut self) {
        self.queue = self.credentials.iter().cloned().collect();
        self.state = AuthState::Idle;
    }

    pub fn handle_event(&mut self, event: &Event) -> Vec<Action> {
        if self.state != AuthState::Idle || self.queue.is_empty() {
            return Vec::new();
        }
        match event {
            Event::CapsAcknowledged(caps) if caps.iter().any(|cap| cap == SASL_CAP) => {
                self.state = AuthState::MechanismSent;
                vec![Action::send("AUTHENTICATE", ["PLAIN"])]
            }
            Event::CapsUnavailable(caps) if caps.iter().any(|cap| cap == SASL_CAP) => {
                self.fail("CAP", "server does not offer sasl")
            }
            _ => Vec::new(),
        }
    }

    pub fn handle_message(&mut self, msg: &Message) -> Vec<Action> {
        if self.state != AuthState::MechanismSent {
            return Vec::new();
        }
        match msg.command().as_str() {
            "AUTHENTICATE" if msg.param(0) == Some("+") => self.respond(),
            // RPL_LOGGEDIN, RPL_SASLSUCCESS
            "900" | "903" => {
                self.state = AuthState::Finished;
                info!(numeric = %msg.verb, "SASL authentication succeeded");
                vec![
                    Action::Publish(Event::AuthComplete),
                    Action::CapDone(SASL_CAP.to_string()),
                ]
            }
            // ERR_NICKLOCKED, ERR_SASLFAIL, ERR_SASLTOOLONG, ERR_SASLABORTED
            "902" | "904" | "905" | "906" => {
                let reason = msg.params.last().cloned().unwrap_or_default();
                self.fail(&msg.verb, &reason)
            }
            _ => Vec::new(),
        }
    }

    fn respond(&mut self) -> Vec<Action> {
        let Some((principal, secret)) = self.queue.pop_front() else {
            return vec![Action::send("AUTHENTICATE", ["*"])];
        };
        chunk_response(&encode_plain(&principal, &secret))
            .into_iter()
            .map(|chunk| Action::send("AUTHENTICATE", [chunk]))
            .collect()
    }

    fn fail(&mut self, numeric: &str, reason: &str) -> Vec<Action> {
        self.state = AuthState::Finished;
        warn!(numeric, reason, "SASL authentication failed");
        vec![Action::Publish(Event::AuthFailed {
            numeric: numeric.to_string(),
            reason: reason.to_string(),
        })]
    }
}
