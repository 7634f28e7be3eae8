//! Capability negotiation (`CAP LS` / `REQ` / `ACK` / `END`).
//!
//! Extensions register what they want through [`CapRequests`] when a
//! connection is set up. A *waited* capability keeps negotiation open after
//! the server acknowledges it, until its dependent calls
//! [`CapNegotiator::done`]; `CAP END` goes out once nothing is pending.

use std::collections::BTreeSet;

use tracing::debug;

use crate::app::action::Action;
use crate::app::event::Event;
use crate::irc::message::Message;

/// Per-connection capability wishes, collected at setup time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapRequests {
    requested: BTreeSet<String>,
    waited: BTreeSet<String>,
}

impl CapRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, cap: &str) {
        self.requested.insert(cap.to_string());
    }

    /// Request `cap` and hold `CAP END` until its dependent reports back.
    pub fn wait(&mut self, cap: &str) {
        self.requested.insert(cap.to_string());
        self.waited.insert(cap.to_string());
    }

    pub fn requested(&self) -> &BTreeSet<String> {
        &self.requested
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapState {
    Idle,
    LsSent,
    ReqSent,
    Ended,
}

#[derive(Debug, Clone)]
pub struct CapNegotiator {
    requests: CapRequests,
    state: CapState,
    available: BTreeSet<String>,
    pending: BTreeSet<String>,
    granted: BTreeSet<String>,
    acknowledged: BTreeSet<String>,
    /// Set once the server answered our REQ (ACK or NAK).
    answered: bool,
}

impl CapNegotiator {
    pub fn new(requests: CapRequests) -> Self {
        Self {
            requests,
            state: CapState::Idle,
            available: BTreeSet::new(),
            pending: BTreeSet::new(),
            granted: BTreeSet::new(),
            acknowledged: BTreeSet::new(),
            answered: false,
        }
    }

    pub fn state(&self) -> CapState {
        self.state
    }

    pub fn available(&self) -> &BTreeSet<String> {
        &self.available
    }

    pub fn pending(&self) -> &BTreeSet<String> {
        &self.pending
    }

    pub fn granted(&self) -> &BTreeSet<String> {
        &self.granted
    }

    /// Capabilities the server ACKed in this session.
    pub fn is_enabled(&self, cap: &str) -> bool {
        self.acknowledged.contains(cap)
    }

    /// Session established: ask for the capability list.
    pub fn on_connected(&mut self) -> Vec<Action> {
        self.state = CapState::LsSent;
        vec![Action::send("CAP", ["LS", "302"])]
    }

    /// Handle `CAP <target> <subcommand> ...`.
    pub fn handle_message(&mut self, msg: &Message) -> Vec<Action> {
        let Some(sub) = msg.param(1) else {
            return Vec::new();
        };
        match sub.to_ascii_uppercase().as_str() {
            "LS" => self.on_ls(msg),
            "ACK" => self.on_ack(msg),
            "NAK" => self.on_nak(msg),
            _ => Vec::new(),
        }
    }

    fn on_ls(&mut self, msg: &Message) -> Vec<Action> {
        // CAP * LS * :caps...  marks a continuation line (302)
        let (more, list) = match (msg.param(2), msg.param(3)) {
            (Some("*"), Some(list)) => (true, list),
            (Some(list), _) => (false, list),
            (None, _) => (false, ""),
        };
        self.available.extend(
            list.split_whitespace()
                .map(|cap| cap.split('=').next().unwrap_or(cap).to_string()),
        );
        if more || self.state != CapState::LsSent {
            return Vec::new();
        }
        debug!(available = ?self.available, "server capabilities");

        let wanted: Vec<String> = self
            .requests
            .requested
            .intersection(&self.available)
            .cloned()
            .collect();

        let mut actions = Vec::new();
        let unavailable: Vec<String> = self
            .requests
            .waited
            .difference(&self.available)
            .cloned()
            .collect();
        if !unavailable.is_empty() {
            actions.push(Action::Publish(Event::CapsUnavailable(unavailable)));
        }

        if wanted.is_empty() {
            // Nothing to wait for: pending is trivially empty.
            actions.extend(self.end());
            return actions;
        }

        for cap in &wanted {
            if self.requests.waited.contains(cap) {
                self.pending.insert(cap.clone());
            } else {
                self.granted.insert(cap.clone());
            }
        }
        self.state = CapState::ReqSent;
        actions.push(Action::send("CAP", ["REQ".to_string(), wanted.join(" ")]));
        actions
    }

    fn on_ack(&mut self, msg: &Message) -> Vec<Action> {
        let acked: Vec<String> = msg
            .params
            .last()
            .map(|list| list.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        self.acknowledged.extend(acked.iter().cloned());
        if self.state != CapState::ReqSent {
            return Vec::new();
        }
        debug!(caps = ?acked, "capabilities acknowledged");
        self.answered = true;
        let mut actions = vec![Action::Publish(Event::CapsAcknowledged(acked))];
        actions.extend(self.check_all_done());
        actions
    }

    fn on_nak(&mut self, msg: &Message) -> Vec<Action> {
        if self.state != CapState::ReqSent {
            return Vec::new();
        }
        let rejected: Vec<String> = msg
            .params
            .last()
            .map(|list| list.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        self.answered = true;
        let mut unavailable = Vec::new();
        for cap in &rejected {
            self.granted.remove(cap);
            if self.pending.remove(cap) {
                unavailable.push(cap.clone());
            }
        }
        let mut actions = Vec::new();
        if !unavailable.is_empty() {
            actions.push(Action::Publish(Event::CapsUnavailable(unavailable)));
        }
        actions.extend(self.check_all_done());
        actions
    }

    /// A dependent finished with `cap`.
    pub fn done(&mut self, cap: &str) -> Vec<Action> {
        if self.pending.remove(cap) {
            self.granted.insert(cap.to_string());
        }
        self.check_all_done()
    }

    fn check_all_done(&mut self) -> Vec<Action> {
        if self.state == CapState::ReqSent && self.answered && self.pending.is_empty() {
            self.end()
        } else {
            Vec::new()
        }
    }

    fn end(&mut self) -> Vec<Action> {
        if self.state == CapState::Ended {
            return Vec::new();
        }
        self.state = CapState::Ended;
        vec![Action::send("CAP", ["END"])]
    }
}
