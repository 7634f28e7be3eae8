//! Tracked server state for one connection: who is visible, where, and
//! what each channel looks like.
//!
//! Users and channels are keyed by their RFC 1459 case-folded names. Every
//! mutation keeps the two membership views (`User::channels` and
//! `Channel::users`) exact inverses of each other.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// RFC 1459 lower-casing, used for registry keys.
pub fn irc_to_lower(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub nick: String,
    pub user: String,
    pub host: String,
    pub account: Option<String>,
    /// Most recent first.
    pub previous_nicks: Vec<String>,
    /// Folded channel names.
    pub channels: BTreeSet<String>,
}

impl User {
    pub fn new(nick: &str, user: &str, host: &str) -> Self {
        Self {
            nick: nick.to_string(),
            user: user.to_string(),
            host: host.to_string(),
            account: None,
            previous_nicks: Vec::new(),
            channels: BTreeSet::new(),
        }
    }

    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }
}

/// Bulk state categories fetched after joining a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncPhase {
    Who,
    Mode,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Who => "who",
            SyncPhase::Mode => "mode",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    /// Folded nicks of members.
    pub users: BTreeSet<String>,
    pub topic: Option<String>,
    pub mode: Option<String>,
    pub state: BTreeSet<SyncPhase>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            users: BTreeSet::new(),
            topic: None,
            mode: None,
            state: BTreeSet::new(),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.state.contains(&SyncPhase::Who) && self.state.contains(&SyncPhase::Mode)
    }
}

/// A membership pair that only one side knows about.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Inconsistency {
    #[error("channel {channel} lists {nick} but the user is unknown or does not list it")]
    MissingUserSide { channel: String, nick: String },
    #[error("user {nick} lists {channel} but the channel is unknown or does not list them")]
    MissingChannelSide { nick: String, channel: String },
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    users: HashMap<String, User>,
    channels: HashMap<String, Channel>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, nick: &str) -> Option<&User> {
        self.users.get(&irc_to_lower(nick))
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&irc_to_lower(name))
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn is_member(&self, nick: &str, channel: &str) -> bool {
        self.channel(channel)
            .is_some_and(|chan| chan.users.contains(&irc_to_lower(nick)))
    }

    pub fn clear(&mut self) {
        self.users.clear();
        self.channels.clear();
    }

    /// Create the user if absent, refreshing user/host when known.
    pub fn upsert_user(&mut self, nick: &str, user: Option<&str>, host: Option<&str>) -> &mut User {
        let entry = self
            .users
            .entry(irc_to_lower(nick))
            .or_insert_with(|| User::new(nick, user.unwrap_or(""), host.unwrap_or("")));
        if let Some(user) = user {
            entry.user = user.to_string();
        }
        if let Some(host) = host {
            entry.host = host.to_string();
        }
        entry
    }

    pub fn upsert_channel(&mut self, name: &str) -> &mut Channel {
        self.channels
            .entry(irc_to_lower(name))
            .or_insert_with(|| Channel::new(name))
    }

    pub fn set_account(&mut self, nick: &str, account: Option<&str>) {
        if let Some(user) = self.users.get_mut(&irc_to_lower(nick)) {
            user.account = account.map(str::to_string);
        }
    }

    /// Record `nick` as a member of `channel`. The user must exist.
    pub fn add_member(&mut self, nick: &str, channel: &str) {
        let nick_key = irc_to_lower(nick);
        let chan_key = irc_to_lower(channel);
        let Some(user) = self.users.get_mut(&nick_key) else {
            return;
        };
        user.channels.insert(chan_key.clone());
        self.channels
            .entry(chan_key)
            .or_insert_with(|| Channel::new(channel))
            .users
            .insert(nick_key);
    }

    pub fn remove_member(&mut self, nick: &str, channel: &str) {
        let nick_key = irc_to_lower(nick);
        let chan_key = irc_to_lower(channel);
        if let Some(user) = self.users.get_mut(&nick_key) {
            user.channels.remove(&chan_key);
        }
        if let Some(chan) = self.channels.get_mut(&chan_key) {
            chan.users.remove(&nick_key);
        }
    }

    /// Drop the user and every membership they hold.
    pub fn remove_user(&mut self, nick: &str) -> Option<User> {
        let nick_key = irc_to_lower(nick);
        let user = self.users.remove(&nick_key)?;
        for chan_key in &user.channels {
            if let Some(chan) = self.channels.get_mut(chan_key) {
                chan.users.remove(&nick_key);
            }
        }
        Some(user)
    }

    /// Move a user to a new nick, carrying memberships along.
    ///
    /// A stale entry already holding `new` is dropped first.
    pub fn rename_user(&mut self, old: &str, new: &str) -> bool {
        let old_key = irc_to_lower(old);
        let new_key = irc_to_lower(new);
        if !self.users.contains_key(&old_key) {
            return false;
        }
        if old_key != new_key {
            self.remove_user(new);
        }
        let Some(mut user) = self.users.remove(&old_key) else {
            return false;
        };
        user.previous_nicks.insert(0, user.nick.clone());
        user.nick = new.to_string();
        for chan_key in &user.channels {
            if let Some(chan) = self.channels.get_mut(chan_key) {
                chan.users.remove(&old_key);
                chan.users.insert(new_key.clone());
            }
        }
        self.users.insert(new_key, user);
        true
    }

    /// Forget a channel entirely (used when we leave it ourselves).
    pub fn remove_channel(&mut self, name: &str) -> Option<Channel> {
        let chan_key = irc_to_lower(name);
        let chan = self.channels.remove(&chan_key)?;
        for nick_key in &chan.users {
            if let Some(user) = self.users.get_mut(nick_key) {
                user.channels.remove(&chan_key);
            }
        }
        Some(chan)
    }

    /// Check that both membership views agree.
    pub fn check_consistency(&self) -> Result<(), Inconsistency> {
        for (chan_key, chan) in &self.channels {
            for nick_key in &chan.users {
                let listed = self
                    .users
                    .get(nick_key)
                    .is_some_and(|user| user.channels.contains(chan_key));
                if !listed {
                    return Err(Inconsistency::MissingUserSide {
                        channel: chan.name.clone(),
                        nick: nick_key.clone(),
                    });
                }
            }
        }
        for (nick_key, user) in &self.users {
            for chan_key in &user.channels {
                let listed = self
                    .channels
                    .get(chan_key)
                    .is_some_and(|chan| chan.users.contains(nick_key));
                if !listed {
                    return Err(Inconsistency::MissingChannelSide {
                        nick: user.nick.clone(),
                        channel: chan_key.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&irc_to_lower(name))
    }
}
