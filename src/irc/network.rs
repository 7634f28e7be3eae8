//! The stable handle for one configured connection.
//!
//! A [`Network`] outlives individual sessions: on reconnect the manager
//! installs a new [`Session`] into the same handle, so callers and bus
//! subscribers keep talking to one object. It owns the outbound queue,
//! the handshake components and the tracking registry, and runs every
//! parsed line through them in a fixed order.

use std::collections::VecDeque;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app::action::Action;
use crate::app::event::{Event, NetId, SessionId};
use crate::app::handler::{TrackContext, Tracker};
use crate::app::state::{irc_to_lower, Registry};
use crate::config::model::ServerConfig;
use crate::error::ClientError;
use crate::irc::cap::{CapNegotiator, CapRequests};
use crate::irc::connection::Session;
use crate::irc::message::Message;
use crate::irc::registration::{Identity, NickGenerator, Registration};
use crate::irc::sasl::Authenticator;

/// Longest message text placed in one `PRIVMSG`.
pub const MAX_MESSAGE_BYTES: usize = 400;

/// One channel or several, as accepted by [`Network::join`] and [`Network::part`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelList(pub Vec<String>);

impl From<&str> for ChannelList {
    fn from(channel: &str) -> Self {
        Self(vec![channel.to_string()])
    }
}

impl From<String> for ChannelList {
    fn from(channel: String) -> Self {
        Self(vec![channel])
    }
}

impl From<Vec<String>> for ChannelList {
    fn from(channels: Vec<String>) -> Self {
        Self(channels)
    }
}

impl From<&[&str]> for ChannelList {
    fn from(channels: &[&str]) -> Self {
        Self(channels.iter().map(|c| c.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ChannelList {
    fn from(channels: [&str; N]) -> Self {
        Self(channels.iter().map(|c| c.to_string()).collect())
    }
}

pub struct Network {
    net_id: NetId,
    config: ServerConfig,
    session: Option<Session>,
    generation: SessionId,
    queue: VecDeque<String>,
    cap_requests: CapRequests,
    caps: CapNegotiator,
    auth: Authenticator,
    registration: Registration,
    tracker: Tracker,
    /// Channels we want to be in, carried across reconnects.
    desired_channels: Vec<String>,
    /// Published events not yet delivered to bus subscribers.
    outbox: Vec<Event>,
    auth_failure: Option<(String, String)>,
    quitting: bool,
    /// Writer tasks of closed sessions still flushing their last lines.
    flushing: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("net_id", &self.net_id)
            .field("session", &self.session)
            .field("queued", &self.queue.len())
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

impl Network {
    pub fn new(net_id: NetId, config: ServerConfig) -> Self {
        let mut cap_requests = CapRequests::new();
        Tracker::register(&mut cap_requests);
        for cap in &config.caps {
            cap_requests.request(cap);
        }
        let mut auth = Authenticator::new();
        if let Some(ref sasl) = config.sasl {
            auth.register(&mut cap_requests, &sasl.account, &sasl.password);
        }

        let mut network = Self {
            registration: Registration::new(Identity::from_config(&config)),
            caps: CapNegotiator::new(cap_requests.clone()),
            cap_requests,
            auth,
            tracker: Tracker::new(),
            desired_channels: Vec::new(),
            net_id,
            session: None,
            generation: 0,
            queue: VecDeque::new(),
            outbox: Vec::new(),
            auth_failure: None,
            quitting: false,
            flushing: Vec::new(),
            config,
        };
        let channels = network.config.channels.clone();
        network.remember_channels(&channels);
        network
    }

    /// Swap the substitute-nickname source used after collisions.
    pub fn set_nick_generator(&mut self, generator: Box<dyn NickGenerator>) {
        self.registration.set_generator(generator);
    }

    pub fn net_id(&self) -> &NetId {
        &self.net_id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        self.tracker.registry()
    }

    pub fn caps(&self) -> &CapNegotiator {
        &self.caps
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Our current nickname.
    pub fn nick(&self) -> &str {
        self.registration.nick()
    }

    pub fn is_registered(&self) -> bool {
        self.session.is_some() && self.registration.is_complete()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    pub fn desired_channels(&self) -> &[String] {
        &self.desired_channels
    }

    pub fn queued(&self) -> &VecDeque<String> {
        &self.queue
    }

    /// `(numeric, reason)` of a rejected authentication, if any.
    pub fn auth_failure(&self) -> Option<(&str, &str)> {
        self.auth_failure
            .as_ref()
            .map(|(numeric, reason)| (numeric.as_str(), reason.as_str()))
    }

    /// Publish an event that did not come from a protocol handler.
    pub fn publish(&mut self, event: Event) {
        self.outbox.push(event);
    }

    /// Writer tasks of sessions closed by [`close`](Self::close) or
    /// [`quit`](Self::quit); each finishes once its socket is flushed.
    pub fn take_flushing(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.flushing)
    }

    /// Events published since the last call, in publication order.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox)
    }

    // -- session lifecycle ----------------------------------------------

    /// Allocate the generation number for the next session.
    pub fn next_session_id(&mut self) -> SessionId {
        self.generation += 1;
        self.generation
    }

    pub fn is_current(&self, session: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id() == session)
    }

    /// Make `session` the live one and start the handshakes on it.
    pub fn install_session(&mut self, session: Session) {
        if let Some(mut old) = self.session.replace(session) {
            self.flushing.extend(old.close());
        }
        self.queue.clear();
        self.quitting = false;
        self.auth_failure = None;
        self.caps = CapNegotiator::new(self.cap_requests.clone());
        self.auth.reset_for_session();
        self.tracker.reset();
        info!(net_id = %self.net_id, "session established");

        self.outbox.push(Event::Connected);
        let mut actions = self.caps.on_connected();
        actions.extend(self.registration.on_connected());
        let channels = self.desired_channels.clone();
        actions.extend(self.registration.join(&channels));
        self.dispatch(actions);
    }

    /// The session `session` closed. Returns false for stale or repeated reports.
    pub fn mark_lost(&mut self, session: SessionId, reason: &str) -> bool {
        if !self.is_current(session) {
            return false;
        }
        if let Some(mut old) = self.session.take() {
            let _ = old.close();
        }
        self.queue.clear();
        info!(net_id = %self.net_id, %reason, "connection lost");
        self.outbox.push(Event::ConnectionLost {
            reason: reason.to_string(),
        });
        self.outbox.push(Event::Disconnected);
        true
    }

    /// Close the live session without a `QUIT`.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.flushing.extend(session.close());
            self.outbox.push(Event::Disconnected);
        }
        self.queue.clear();
    }

    /// Drain timer fired: write at most one queued line.
    pub fn tick(&mut self, session: SessionId) {
        if !self.is_current(session) {
            return;
        }
        let Some(line) = self.queue.pop_front() else {
            return;
        };
        if let Some(ref live) = self.session {
            debug!(net_id = %self.net_id, ">> {}", line);
            if live.write(line.clone()) {
                self.outbox.push(Event::Sent(line));
            }
        }
    }

    /// Feed one received line through the protocol components.
    pub fn receive(&mut self, line: &str) {
        debug!(net_id = %self.net_id, "<< {}", line);
        self.outbox.push(Event::Raw(line.to_string()));
        let Some(msg) = Message::parse(line) else {
            debug!(net_id = %self.net_id, %line, "dropping unparsable line");
            return;
        };

        let mut actions = Vec::new();
        if msg.command() == "CAP" {
            actions.extend(self.caps.handle_message(&msg));
        }
        actions.extend(self.registration.handle_message(&msg));
        actions.extend(self.auth.handle_message(&msg));
        let ctx = TrackContext {
            own_nick: self.registration.nick(),
            whox: self.registration.whox(),
        };
        actions.extend(self.tracker.handle_message(&msg, ctx));

        self.outbox.push(Event::Message(msg));
        self.dispatch(actions);
    }

    /// Apply handler outputs in order; published events are routed to the
    /// components before anything queued after them.
    fn dispatch(&mut self, actions: Vec<Action>) {
        let mut work: VecDeque<Action> = actions.into();
        while let Some(action) = work.pop_front() {
            let follow = match action {
                Action::Send(msg) => {
                    self.enqueue(msg.to_string());
                    Vec::new()
                }
                Action::CapDone(cap) => self.caps.done(&cap),
                Action::Publish(event) => {
                    let follow = self.route(&event);
                    self.outbox.push(event);
                    follow
                }
            };
            for action in follow.into_iter().rev() {
                work.push_front(action);
            }
        }
    }

    fn route(&mut self, event: &Event) -> Vec<Action> {
        match event {
            Event::CapsAcknowledged(_) | Event::CapsUnavailable(_) => self.auth.handle_event(event),
            Event::AuthFailed { numeric, reason } => {
                self.auth_failure = Some((numeric.clone(), reason.clone()));
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn enqueue(&mut self, line: String) {
        if self.session.is_none() {
            debug!(net_id = %self.net_id, %line, "no live session, dropping line");
            return;
        }
        self.queue.push_back(line);
    }

    fn remember_channels(&mut self, channels: &[String]) {
        for chan in channels {
            let key = irc_to_lower(chan);
            if !self.desired_channels.iter().any(|c| irc_to_lower(c) == key) {
                self.desired_channels.push(chan.clone());
            }
        }
    }

    // -- client operations ----------------------------------------------

    /// Set the identity used for registration on this and later sessions.
    ///
    /// If a session is live but not yet registered, the new nickname is
    /// submitted right away.
    pub fn register(&mut self, identity: Identity) {
        let nick = identity.nick.clone();
        self.registration.set_identity(identity);
        if self.session.is_some() && !self.registration.is_complete() {
            self.dispatch(vec![Action::send("NICK", [nick])]);
        }
    }

    pub fn join(&mut self, channels: impl Into<ChannelList>) {
        let ChannelList(channels) = channels.into();
        self.remember_channels(&channels);
        if self.session.is_some() {
            let actions = self.registration.join(&channels);
            self.dispatch(actions);
        }
    }

    pub fn part(&mut self, channels: impl Into<ChannelList>) {
        let ChannelList(channels) = channels.into();
        if channels.is_empty() {
            return;
        }
        self.desired_channels
            .retain(|c| !channels.iter().any(|p| irc_to_lower(p) == irc_to_lower(c)));
        self.registration.cancel_joins(&channels);
        self.dispatch(vec![Action::send("PART", [channels.join(",")])]);
    }

    /// Send `text` to `target`, split into chunks of at most
    /// [`MAX_MESSAGE_BYTES`]. Line breaks are stripped.
    pub fn say(&mut self, target: &str, text: &str) {
        let text = strip_line_breaks(text);
        let actions = chunk_text(&text, MAX_MESSAGE_BYTES)
            .into_iter()
            .map(|chunk| Action::send("PRIVMSG", [target, chunk]))
            .collect();
        self.dispatch(actions);
    }

    /// Send a single CTCP `ACTION`. Oversize text is rejected, not split.
    pub fn action(&mut self, target: &str, text: &str) -> Result<(), ClientError> {
        let text = strip_line_breaks(text);
        if text.len() > MAX_MESSAGE_BYTES {
            return Err(ClientError::MessageTooLong {
                len: text.len(),
                max: MAX_MESSAGE_BYTES,
            });
        }
        let body = format!("\x01ACTION {}\x01", text);
        self.dispatch(vec![Action::send("PRIVMSG", [target, body.as_str()])]);
        Ok(())
    }

    /// Queue a line verbatim (line breaks stripped).
    pub fn send_raw(&mut self, line: &str) {
        let line = strip_line_breaks(line);
        if !line.is_empty() {
            self.enqueue(line);
        }
    }

    pub fn change_nick(&mut self, nick: &str) {
        self.dispatch(vec![Action::send("NICK", [nick])]);
    }

    /// Write `QUIT` immediately and close; the manager will not reconnect.
    /// The line is flushed by the session's writer task, see
    /// [`take_flushing`](Self::take_flushing).
    pub fn quit(&mut self, message: Option<&str>) {
        self.quitting = true;
        self.queue.clear();
        if let Some(mut session) = self.session.take() {
            let line = Message::new("QUIT", message).to_string();
            if session.write(line.clone()) {
                self.outbox.push(Event::Sent(line));
            }
            self.flushing.extend(session.close());
            self.outbox.push(Event::Disconnected);
        }
    }

    /// A network with a live in-memory session; written lines arrive on
    /// the returned receiver.
    #[cfg(test)]
    pub(crate) fn for_tests(config: ServerConfig) -> Self {
        let net_id = NetId::new(0, &config.host, config.port, config.tls);
        Self::new(net_id, config)
    }

    #[cfg(test)]
    pub(crate) fn attach_test_session(&mut self) -> tokio::sync::mpsc::UnboundedReceiver<String> {
        let id = self.next_session_id();
        let (session, written) = Session::for_tests(id);
        self.install_session(session);
        written
    }
}

fn strip_line_breaks(text: &str) -> String {
    text.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Split at char boundaries into pieces of at most `max` bytes.
fn chunk_text(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = rest.len().min(max);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::SaslConfig;
    use crate::irc::sasl::encode_plain;

    fn network() -> Network {
        Network::for_tests(ServerConfig::for_tests())
    }

    fn sasl_network() -> Network {
        let mut config = ServerConfig::for_tests();
        config.sasl = Some(SaslConfig {
            account: "bot".into(),
            password: "secret".into(),
        });
        Network::for_tests(config)
    }

    fn drain_queue(network: &mut Network) -> Vec<String> {
        network.queue.drain(..).collect()
    }

    fn names(events: &[Event]) -> Vec<String> {
        events.iter().map(|e| e.name().into_owned()).collect()
    }

    #[test]
    fn test_connect_queues_cap_ls_then_registration() {
        let mut network = network();
        let _written = network.attach_test_session();
        assert_eq!(
            drain_queue(&mut network),
            vec!["CAP LS 302", "USER bot 8 * :Test Bot", "NICK botnick"]
        );
        assert_eq!(names(&network.take_events()), vec!["connected"]);
    }

    #[test]
    fn test_full_sasl_handshake_ends_once() {
        let mut network = sasl_network();
        let _written = network.attach_test_session();
        drain_queue(&mut network);

        network.receive(":srv CAP * LS :sasl extended-join account-notify multi-prefix");
        assert_eq!(
            drain_queue(&mut network),
            vec!["CAP REQ :account-notify extended-join sasl"]
        );

        network.receive(":srv CAP * ACK :account-notify extended-join sasl");
        assert_eq!(drain_queue(&mut network), vec!["AUTHENTICATE PLAIN"]);

        network.receive("AUTHENTICATE +");
        assert_eq!(
            drain_queue(&mut network),
            vec![format!("AUTHENTICATE {}", encode_plain("bot", "secret"))]
        );

        network.take_events();
        network.receive(":srv 900 botnick botnick!bot@h bot :You are now logged in as bot");
        network.receive(":srv 903 botnick :SASL authentication successful");
        assert_eq!(drain_queue(&mut network), vec!["CAP END"]);
        let events = names(&network.take_events());
        assert_eq!(events.iter().filter(|n| *n == "auth-complete").count(), 1);
        assert!(network.auth_failure().is_none());
    }

    #[test]
    fn test_auth_failure_is_recorded() {
        let mut network = sasl_network();
        let _written = network.attach_test_session();
        network.receive(":srv CAP * LS :sasl");
        network.receive(":srv CAP * ACK :sasl");
        network.receive("AUTHENTICATE +");
        network.receive(":srv 904 botnick :SASL authentication failed");
        assert_eq!(network.auth_failure(), Some(("904", "SASL authentication failed")));
        assert!(names(&network.take_events()).contains(&"auth-failed".to_string()));
    }

    #[test]
    fn test_joins_wait_for_welcome() {
        let mut network = network();
        let _written = network.attach_test_session();
        network.join(["#a", "#b"]);
        network.join("#c");
        drain_queue(&mut network);

        network.receive(":srv 001 botnick :Welcome");
        assert_eq!(drain_queue(&mut network), vec!["JOIN #a,#b,#c"]);
        assert!(network.is_registered());

        network.join("#d");
        assert_eq!(drain_queue(&mut network), vec!["JOIN #d"]);
        assert_eq!(network.desired_channels(), ["#a", "#b", "#c", "#d"]);
    }

    #[test]
    fn test_part_forgets_desired_channel() {
        let mut network = network();
        let _written = network.attach_test_session();
        network.join(["#a", "#b"]);
        network.part("#A");
        assert_eq!(network.desired_channels(), ["#b"]);
        assert_eq!(network.queued().back().map(String::as_str), Some("PART #A"));
    }

    #[test]
    fn test_say_strips_and_chunks() {
        let mut network = network();
        let _written = network.attach_test_session();
        drain_queue(&mut network);

        network.say("#c", "hello\r\nworld");
        assert_eq!(drain_queue(&mut network), vec!["PRIVMSG #c helloworld"]);

        let long = "x".repeat(MAX_MESSAGE_BYTES * 2 + 10);
        network.say("#c", &long);
        let lines = drain_queue(&mut network);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], format!("PRIVMSG #c {}", "x".repeat(10)));

        network.say("#c", "");
        assert!(network.queued().is_empty());
    }

    #[test]
    fn test_action_rejects_oversize() {
        let mut network = network();
        let _written = network.attach_test_session();
        drain_queue(&mut network);

        network.action("#c", "waves").unwrap();
        assert_eq!(drain_queue(&mut network), vec!["PRIVMSG #c :\x01ACTION waves\x01"]);

        let err = network.action("#c", &"y".repeat(401)).unwrap_err();
        assert!(matches!(err, ClientError::MessageTooLong { len: 401, max: 400 }));
        assert!(network.queued().is_empty());
    }

    #[test]
    fn test_tick_writes_one_line_per_interval() {
        let mut network = network();
        let mut written = network.attach_test_session();
        let id = network.generation;
        network.take_events();

        network.tick(id);
        assert_eq!(written.try_recv().unwrap(), "CAP LS 302");
        assert!(written.try_recv().is_err());
        assert_eq!(network.queued().len(), 2);
        assert_eq!(names(&network.take_events()), vec!["irc-send"]);

        network.tick(id + 1);
        assert!(written.try_recv().is_err());
    }

    #[test]
    fn test_lost_session_is_inert() {
        let mut network = network();
        let _written = network.attach_test_session();
        let id = network.generation;
        network.take_events();

        assert!(network.mark_lost(id, "eof"));
        assert!(!network.mark_lost(id, "eof"));
        assert_eq!(
            names(&network.take_events()),
            vec!["connection-lost", "disconnected"]
        );

        network.say("#c", "late");
        network.send_raw("PING x");
        network.tick(id);
        assert!(network.queued().is_empty());
        assert!(!network.is_connected());
    }

    #[test]
    fn test_reinstall_replays_registration_and_channels() {
        let mut network = sasl_network();
        let _first = network.attach_test_session();
        network.join("#a");
        network.receive(":srv 001 botnick :Welcome");
        network.receive(":botnick!bot@h JOIN #a");
        assert!(network.registry().channel("#a").is_some());
        let first_id = network.generation;
        network.mark_lost(first_id, "reset");

        let _second = network.attach_test_session();
        assert!(network.registry().channel("#a").is_none());
        assert!(!network.is_registered());
        assert_eq!(
            drain_queue(&mut network),
            vec!["CAP LS 302", "USER bot 8 * :Test Bot", "NICK botnick"]
        );
        // Stale lines from the old generation are not current.
        assert!(!network.is_current(first_id));

        network.receive(":srv CAP * LS :sasl");
        network.receive(":srv CAP * ACK :sasl");
        assert_eq!(drain_queue(&mut network), vec!["CAP REQ sasl", "AUTHENTICATE PLAIN"]);
        network.receive(":srv 001 botnick :Welcome");
        assert!(drain_queue(&mut network).contains(&"JOIN #a".to_string()));
    }

    #[test]
    fn test_quit_writes_immediately_and_stops() {
        let mut network = network();
        let mut written = network.attach_test_session();
        network.quit(Some("bye now"));
        assert_eq!(written.try_recv().unwrap(), "QUIT :bye now");
        assert_eq!(names(&network.take_events()), vec!["connected", "irc-send", "disconnected"]);
        assert!(network.is_quitting());
        assert!(!network.is_connected());
        assert!(network.queued().is_empty());
    }

    #[test]
    fn test_tracking_runs_on_received_lines() {
        let mut network = network();
        let _written = network.attach_test_session();
        network.receive(":srv 001 botnick :Welcome");
        drain_queue(&mut network);
        network.receive(":botnick!bot@h JOIN #example");
        assert_eq!(
            drain_queue(&mut network),
            vec!["MODE #example", "WHO #example"]
        );
        network.receive(":example!example@example.com JOIN #example");
        assert!(network.registry().is_member("example", "#example"));
    }

    #[test]
    fn test_register_after_welcome_keeps_tracking_our_nick() {
        let mut network = network();
        let _written = network.attach_test_session();
        network.receive(":srv 001 botnick :Welcome");
        drain_queue(&mut network);

        let identity = Identity {
            nick: "othernick".into(),
            ..Identity::from_config(network.config())
        };
        network.register(identity);
        assert!(network.queued().is_empty());
        assert_eq!(network.nick(), "botnick");

        network.receive(":botnick!bot@h JOIN #example");
        assert_eq!(drain_queue(&mut network), vec!["MODE #example", "WHO #example"]);
        network.receive(":botnick!bot@h PART #example");
        assert!(network.registry().channel("#example").is_none());

        // The next session registers with the new identity.
        let id = network.generation;
        network.mark_lost(id, "reset");
        let _second = network.attach_test_session();
        assert_eq!(drain_queue(&mut network).last().map(String::as_str), Some("NICK othernick"));
    }

    #[test]
    fn test_register_before_welcome_resubmits_nick() {
        let mut network = network();
        let _written = network.attach_test_session();
        drain_queue(&mut network);
        let identity = Identity {
            nick: "othernick".into(),
            ..Identity::from_config(network.config())
        };
        network.register(identity);
        assert_eq!(drain_queue(&mut network), vec!["NICK othernick"]);
        assert_eq!(network.nick(), "othernick");
    }

    struct Sequence(Vec<&'static str>);

    impl NickGenerator for Sequence {
        fn generate(&mut self) -> String {
            self.0.remove(0).to_string()
        }
    }

    #[test]
    fn test_installed_nick_generator_handles_collisions() {
        let mut network = network();
        network.set_nick_generator(Box::new(Sequence(vec!["aFIRST", "aSECOND"])));
        let _written = network.attach_test_session();
        drain_queue(&mut network);

        network.receive(":srv 433 * botnick :Nickname is already in use");
        assert_eq!(drain_queue(&mut network), vec!["NICK aFIRST"]);
        network.receive(":srv 433 * aFIRST :Nickname is already in use");
        assert_eq!(drain_queue(&mut network), vec!["NICK aSECOND"]);

        network.receive(":srv 001 aSECOND :Welcome");
        network.receive(":aSECOND!bot@h JOIN #example");
        assert_eq!(drain_queue(&mut network), vec!["MODE #example", "WHO #example"]);
        assert_eq!(network.nick(), "aSECOND");
    }

    #[test]
    fn test_close_reports_disconnect_once() {
        let mut network = network();
        let _written = network.attach_test_session();
        network.take_events();
        network.close();
        network.close();
        assert_eq!(names(&network.take_events()), vec!["disconnected"]);
        assert!(network.take_flushing().is_empty());
    }

    #[test]
    fn test_chunk_text_respects_char_boundaries() {
        let text = "é".repeat(3);
        assert_eq!(chunk_text(&text, 3), vec!["é", "é", "é"]);
        assert_eq!(chunk_text("abcdef", 4), vec!["abcd", "ef"]);
        assert!(chunk_text("", 4).is_empty());
    }
}
