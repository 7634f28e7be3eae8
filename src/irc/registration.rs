//! Connection registration: `PASS`/`USER`/`NICK`, nickname collisions,
//! keepalive replies and the server's `ISUPPORT` tokens.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::app::action::Action;
use crate::app::event::Event;
use crate::app::state::irc_to_lower;
use crate::config::model::ServerConfig;
use crate::config::nickname::generate_nickname;
use crate::irc::message::Message;

/// Source of substitute nicknames after a collision.
pub trait NickGenerator: Send {
    fn generate(&mut self) -> String;
}

/// Default generator: `a` followed by eight random `[0-9A-Z]` characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNick;

impl NickGenerator for RandomNick {
    fn generate(&mut self) -> String {
        generate_nickname()
    }
}

/// Who we register as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub nick: String,
    pub username: String,
    pub realname: String,
    pub mode: String,
    pub password: Option<String>,
}

impl Identity {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            nick: config.nickname.clone(),
            username: config.username().to_string(),
            realname: config.realname().to_string(),
            mode: config.mode.clone(),
            password: config.password.clone(),
        }
    }
}

pub struct Registration {
    identity: Identity,
    nick: String,
    complete: bool,
    /// Channels to join once registration completes.
    buffered_joins: Vec<String>,
    server_supports: HashMap<String, Option<String>>,
    generator: Box<dyn NickGenerator>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("nick", &self.nick)
            .field("complete", &self.complete)
            .field("buffered_joins", &self.buffered_joins)
            .finish_non_exhaustive()
    }
}

impl Registration {
    pub fn new(identity: Identity) -> Self {
        Self::with_generator(identity, Box::new(RandomNick))
    }

    pub fn with_generator(identity: Identity, generator: Box<dyn NickGenerator>) -> Self {
        Self {
            nick: identity.nick.clone(),
            identity,
            complete: false,
            buffered_joins: Vec::new(),
            server_supports: HashMap::new(),
            generator,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Replace the identity used for registration.
    ///
    /// Once registered, the live nickname stays what the server assigned;
    /// the new identity applies from the next session.
    pub fn set_identity(&mut self, identity: Identity) {
        if !self.complete {
            self.nick = identity.nick.clone();
        }
        self.identity = identity;
    }

    pub fn set_generator(&mut self, generator: Box<dyn NickGenerator>) {
        self.generator = generator;
    }

    /// Our current nickname on the server.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn supports(&self, token: &str) -> bool {
        self.server_supports.contains_key(&token.to_ascii_uppercase())
    }

    pub fn support_value(&self, token: &str) -> Option<&str> {
        self.server_supports
            .get(&token.to_ascii_uppercase())
            .and_then(|value| value.as_deref())
    }

    pub fn whox(&self) -> bool {
        self.supports("WHOX")
    }

    /// Fresh session: forget per-session state and queue the registration lines.
    pub fn on_connected(&mut self) -> Vec<Action> {
        self.complete = false;
        self.nick = self.identity.nick.clone();
        self.buffered_joins.clear();
        self.server_supports.clear();
        self.registration_lines()
    }

    /// `PASS` (if any), then `USER`, then `NICK`.
    pub fn registration_lines(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(ref password) = self.identity.password {
            actions.push(Action::send("PASS", [password.as_str()]));
        }
        actions.push(Action::send(
            "USER",
            [
                self.identity.username.as_str(),
                self.identity.mode.as_str(),
                "*",
                self.identity.realname.as_str(),
            ],
        ));
        actions.push(Action::send("NICK", [self.nick.as_str()]));
        actions
    }

    /// Join now if registered, otherwise hold until `001`.
    pub fn join(&mut self, channels: &[String]) -> Vec<Action> {
        if channels.is_empty() {
            return Vec::new();
        }
        if self.complete {
            return vec![Action::send("JOIN", [channels.join(",")])];
        }
        for chan in channels {
            if !self.buffered_joins.contains(chan) {
                self.buffered_joins.push(chan.clone());
            }
        }
        Vec::new()
    }

    /// Drop channels from the pending joins.
    pub fn cancel_joins(&mut self, channels: &[String]) {
        self.buffered_joins
            .retain(|chan| !channels.iter().any(|c| irc_to_lower(c) == irc_to_lower(chan)));
    }

    pub fn buffered_joins(&self) -> &[String] {
        &self.buffered_joins
    }

    pub fn handle_message(&mut self, msg: &Message) -> Vec<Action> {
        match msg.command().as_str() {
            "PING" => vec![Action::send("PONG", msg.params.iter().cloned())],
            // RPL_WELCOME
            "001" => self.on_welcome(msg),
            // RPL_ISUPPORT
            "005" => {
                self.on_isupport(msg);
                Vec::new()
            }
            // ERR_NICKNAMEINUSE
            "433" => self.on_nick_in_use(msg),
            "NICK" => {
                if let (Some(old), Some(new)) = (msg.source_nick(), msg.param(0)) {
                    if irc_to_lower(old) == irc_to_lower(&self.nick) {
                        self.nick = new.to_string();
                    }
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_welcome(&mut self, msg: &Message) -> Vec<Action> {
        if self.complete {
            return Vec::new();
        }
        if let Some(nick) = msg.param(0) {
            self.nick = nick.to_string();
        }
        self.complete = true;
        info!(nick = %self.nick, "registration complete");

        let mut actions = Vec::new();
        if !self.buffered_joins.is_empty() {
            actions.push(Action::send("JOIN", [self.buffered_joins.join(",")]));
            self.buffered_joins.clear();
        }
        actions.push(Action::Publish(Event::RegistrationComplete {
            nick: self.nick.clone(),
        }));
        actions
    }

    fn on_isupport(&mut self, msg: &Message) {
        let Some((_, tokens)) = msg.params.split_last() else {
            return;
        };
        for token in tokens.iter().skip(1) {
            if let Some(removed) = token.strip_prefix('-') {
                self.server_supports.remove(&removed.to_ascii_uppercase());
                continue;
            }
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (token.as_str(), None),
            };
            self.server_supports.insert(name.to_ascii_uppercase(), value);
        }
        debug!(tokens = self.server_supports.len(), "ISUPPORT updated");
    }

    fn on_nick_in_use(&mut self, msg: &Message) -> Vec<Action> {
        if self.complete {
            warn!(nick = ?msg.param(1), "nickname already in use");
            return Vec::new();
        }
        let substitute = self.generator.generate();
        warn!(taken = %self.nick, %substitute, "nickname in use, retrying");
        self.nick = substitute;
        vec![Action::send("NICK", [self.nick.as_str()])]
    }
}
