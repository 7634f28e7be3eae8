//! Tracking rules: how each incoming message mutates the [`Registry`].
//!
//! Every handler reads and validates all parameters it needs before touching
//! the registry, so a malformed message leaves state untouched.

use tracing::{debug, error};

use crate::app::action::Action;
use crate::app::event::Event;
use crate::app::state::{irc_to_lower, Registry, SyncPhase};
use crate::irc::cap::CapRequests;
use crate::irc::message::Message;

/// Token placed in our WHOX queries so replies can be matched positionally.
pub const WHOX_TOKEN: &str = "616";

/// Status prefixes that may precede nicks in NAMES replies.
const NAMES_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

/// What the tracker needs to know about the session it runs in.
#[derive(Debug, Clone, Copy)]
pub struct TrackContext<'a> {
    pub own_nick: &'a str,
    pub whox: bool,
}

#[derive(Debug, Default)]
pub struct Tracker {
    registry: Registry,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capabilities that make tracking more precise.
    pub fn register(caps: &mut CapRequests) {
        caps.request("extended-join");
        caps.request("account-notify");
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Tracked state does not survive a reconnect; it is rebuilt from the
    /// joins and sync replies of the new session.
    pub fn reset(&mut self) {
        self.registry.clear();
    }

    pub fn handle_message(&mut self, msg: &Message, ctx: TrackContext<'_>) -> Vec<Action> {
        let mut actions = Vec::new();
        match msg.command().as_str() {
            "JOIN" => self.on_join(msg, ctx, &mut actions),
            "PART" => self.on_part(msg, ctx),
            "KICK" => self.on_kick(msg, ctx),
            "QUIT" => self.on_quit(msg),
            "NICK" => self.on_nick(msg),
            "ACCOUNT" => self.on_account(msg),
            "PRIVMSG" | "NOTICE" => self.on_chat(msg),
            "TOPIC" => self.on_topic(msg),
            "331" => self.on_topic_numeric(msg, false),
            "332" => self.on_topic_numeric(msg, true),
            "324" => self.on_mode_numeric(msg, &mut actions),
            "352" => self.on_who_reply(msg),
            "354" => self.on_whox_reply(msg),
            "315" => self.on_end_of_who(msg, &mut actions),
            "353" => self.on_names(msg),
            _ => return actions,
        }

        if let Err(err) = self.registry.check_consistency() {
            error!(%err, verb = %msg.verb, "tracking registry out of sync");
            debug_assert!(false, "tracking registry out of sync: {}", err);
        }
        actions
    }

    fn on_join(&mut self, msg: &Message, ctx: TrackContext<'_>, actions: &mut Vec<Action>) {
        let (Some(nick), Some(channels)) = (msg.source_nick(), msg.param(0)) else {
            return;
        };
        let mask = msg.source();
        // extended-join: JOIN <channel> <account> :<realname>
        let account = msg.param(1).map(|a| if a == "*" { None } else { Some(a) });
        let is_self = is_same_nick(nick, ctx.own_nick);

        for channel in channels.split(',').filter(|c| !c.is_empty()) {
            if is_self {
                let chan = self.registry.upsert_channel(channel);
                chan.state.clear();
                actions.push(Action::send("MODE", [channel]));
                if ctx.whox {
                    actions.push(Action::send(
                        "WHO",
                        [channel.to_string(), format!("%tcuhna,{}", WHOX_TOKEN)],
                    ));
                } else {
                    actions.push(Action::send("WHO", [channel]));
                }
            }
            self.registry.upsert_user(
                nick,
                mask.as_ref().map(|m| m.user.as_str()),
                mask.as_ref().map(|m| m.host.as_str()),
            );
            if let Some(account) = account {
                self.registry.set_account(nick, account);
            }
            self.registry.add_member(nick, channel);
        }
    }

    fn on_part(&mut self, msg: &Message, ctx: TrackContext<'_>) {
        let (Some(nick), Some(channels)) = (msg.source_nick(), msg.param(0)) else {
            return;
        };
        for channel in channels.split(',') {
            self.leave(nick, channel, ctx);
        }
    }

    fn on_kick(&mut self, msg: &Message, ctx: TrackContext<'_>) {
        let (Some(channel), Some(targets)) = (msg.param(0), msg.param(1)) else {
            return;
        };
        for target in targets.split(',') {
            self.leave(target, channel, ctx);
        }
    }

    fn leave(&mut self, nick: &str, channel: &str, ctx: TrackContext<'_>) {
        if is_same_nick(nick, ctx.own_nick) {
            // We can no longer observe this channel.
            self.registry.remove_channel(channel);
        } else {
            self.registry.remove_member(nick, channel);
        }
    }

    fn on_quit(&mut self, msg: &Message) {
        if let Some(nick) = msg.source_nick() {
            self.registry.remove_user(nick);
        }
    }

    fn on_nick(&mut self, msg: &Message) {
        let (Some(old), Some(new)) = (msg.source_nick(), msg.param(0)) else {
            return;
        };
        if !self.registry.rename_user(old, new) {
            debug!(old, new, "nick change for untracked user");
        }
    }

    fn on_account(&mut self, msg: &Message) {
        let (Some(nick), Some(account)) = (msg.source_nick(), msg.param(0)) else {
            return;
        };
        let account = (account != "*").then_some(account);
        self.registry.set_account(nick, account);
    }

    fn on_chat(&mut self, msg: &Message) {
        if let Some(mask) = msg.source() {
            self.registry
                .upsert_user(&mask.nick, Some(&mask.user), Some(&mask.host));
        }
    }

    fn on_topic(&mut self, msg: &Message) {
        let Some(channel) = msg.param(0) else {
            return;
        };
        let topic = msg.param(1).filter(|t| !t.is_empty()).map(str::to_string);
        self.registry.upsert_channel(channel).topic = topic;
    }

    // 331 RPL_NOTOPIC / 332 RPL_TOPIC: <me> <channel> [:topic]
    fn on_topic_numeric(&mut self, msg: &Message, has_topic: bool) {
        let Some(channel) = msg.param(1) else {
            return;
        };
        let topic = if has_topic {
            let Some(text) = msg.param(2) else {
                return;
            };
            Some(text.to_string())
        } else {
            None
        };
        self.registry.upsert_channel(channel).topic = topic;
    }

    // 324 RPL_CHANNELMODEIS: <me> <channel> <modes> [args...]
    fn on_mode_numeric(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        let (Some(channel), Some(_)) = (msg.param(1), msg.param(2)) else {
            return;
        };
        let mode = msg.params[2..].join(" ");
        self.registry.upsert_channel(channel).mode = Some(mode);
        self.mark_synced(channel, SyncPhase::Mode, actions);
    }

    // 352 RPL_WHOREPLY: <me> <channel> <user> <host> <server> <nick> <flags> :<hops> <realname>
    fn on_who_reply(&mut self, msg: &Message) {
        let (Some(channel), Some(user), Some(host), Some(nick)) =
            (msg.param(1), msg.param(2), msg.param(3), msg.param(5))
        else {
            return;
        };
        self.record_member(channel, nick, user, host, None);
    }

    // 354 RPL_WHOSPCRPL for %tcuhna: <me> [token] <channel> <user> <host> <nick> <account>
    fn on_whox_reply(&mut self, msg: &Message) {
        let offset = usize::from(msg.param(1) == Some(WHOX_TOKEN));
        let field = |i: usize| msg.param(offset + i);
        let (Some(channel), Some(user), Some(host), Some(nick), Some(account)) =
            (field(1), field(2), field(3), field(4), field(5))
        else {
            return;
        };
        let account = (account != "0" && account != "*").then_some(account);
        self.record_member(channel, nick, user, host, Some(account));
    }

    fn record_member(
        &mut self,
        channel: &str,
        nick: &str,
        user: &str,
        host: &str,
        account: Option<Option<&str>>,
    ) {
        self.registry.upsert_user(nick, Some(user), Some(host));
        if let Some(account) = account {
            self.registry.set_account(nick, account);
        }
        if channel != "*" {
            self.registry.upsert_channel(channel);
            self.registry.add_member(nick, channel);
        }
    }

    // 315 RPL_ENDOFWHO: <me> <mask> :End of WHO list
    fn on_end_of_who(&mut self, msg: &Message, actions: &mut Vec<Action>) {
        let Some(channel) = msg.param(1) else {
            return;
        };
        if !is_channel_name(channel) {
            return;
        }
        self.registry.upsert_channel(channel);
        self.mark_synced(channel, SyncPhase::Who, actions);
    }

    // 353 RPL_NAMREPLY: <me> <symbol> <channel> :<names>
    fn on_names(&mut self, msg: &Message) {
        let (Some(channel), Some(names)) = (msg.param(2), msg.param(3)) else {
            return;
        };
        self.registry.upsert_channel(channel);
        for entry in names.split_whitespace() {
            let entry = entry.trim_start_matches(NAMES_PREFIXES);
            // userhost-in-names sends full masks
            let (nick, user, host) = match crate::irc::message::Hostmask::parse(entry) {
                Some(mask) => (mask.nick, Some(mask.user), Some(mask.host)),
                None => (entry.to_string(), None, None),
            };
            if nick.is_empty() {
                continue;
            }
            self.registry
                .upsert_user(&nick, user.as_deref(), host.as_deref());
            self.registry.add_member(&nick, channel);
        }
    }

    fn mark_synced(&mut self, channel: &str, phase: SyncPhase, actions: &mut Vec<Action>) {
        let Some(chan) = self.registry.channel_mut(channel) else {
            return;
        };
        if chan.state.insert(phase) && chan.is_synced() {
            actions.push(Action::Publish(Event::SyncDone {
                channel: chan.name.clone(),
            }));
        }
    }
}

fn is_same_nick(a: &str, b: &str) -> bool {
    !b.is_empty() && irc_to_lower(a) == irc_to_lower(b)
}

fn is_channel_name(name: &str) -> bool {
    name.starts_with(['#', '&', '!', '+'])
}
