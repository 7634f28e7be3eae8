//! IRC line parsing and serialization.
//!
//! Grammar handled here:
//!
//! ```text
//! [@tags SPACE] [:prefix SPACE] verb *(SPACE param) [SPACE :trailing]
//! ```
//!
//! The verb is either a word or a three digit numeric. Everything after the
//! `:` marker of the final parameter, spaces included, is one parameter.

use std::fmt;

/// A parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw IRCv3 tag segment without the leading `@`, kept verbatim.
    pub tags: Option<String>,
    /// Server name or `nick!user@host`.
    pub prefix: Option<String>,
    /// Command word or numeric, as received.
    pub verb: String,
    pub params: Vec<String>,
}

impl Message {
    /// Build an outgoing message without prefix.
    pub fn new<S: Into<String>>(verb: &str, params: impl IntoIterator<Item = S>) -> Self {
        Self {
            tags: None,
            prefix: None,
            verb: verb.to_string(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse one line (terminator optional).
    ///
    /// Returns `None` for empty lines and lines without a usable verb; such
    /// lines are dropped by callers rather than treated as errors.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let mut tags = None;
        if let Some(stripped) = rest.strip_prefix('@') {
            let (segment, after) = stripped.split_once(' ')?;
            tags = Some(segment.to_string());
            rest = after.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (segment, after) = stripped.split_once(' ')?;
            if segment.is_empty() {
                return None;
            }
            prefix = Some(segment.to_string());
            rest = after.trim_start_matches(' ');
        }

        let (verb, mut remaining) = match rest.split_once(' ') {
            Some((verb, after)) => (verb, after),
            None => (rest, ""),
        };
        if !is_valid_verb(verb) {
            return None;
        }

        let mut params = Vec::new();
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    remaining = after;
                }
                None => {
                    params.push(remaining.to_string());
                    break;
                }
            }
        }

        Some(Self {
            tags,
            prefix,
            verb: verb.to_string(),
            params,
        })
    }

    /// Verb in upper case, for dispatch.
    pub fn command(&self) -> String {
        self.verb.to_ascii_uppercase()
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Parsed prefix, if it is a full `nick!user@host`.
    pub fn source(&self) -> Option<Hostmask> {
        self.prefix.as_deref().and_then(Hostmask::parse)
    }

    /// Nickname (or server name) of the sender.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split(['!', '@']).next().unwrap_or(prefix))
    }
}

fn is_valid_verb(verb: &str) -> bool {
    if verb.is_empty() {
        return false;
    }
    let numeric = verb.len() == 3 && verb.bytes().all(|b| b.is_ascii_digit());
    numeric || verb.bytes().all(|b| b.is_ascii_alphabetic())
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref tags) = self.tags {
            write!(f, "@{} ", tags)?;
        }
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.verb)?;

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                write!(f, " {}", param)?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }
        Ok(())
    }
}

/// The `nick!user@host` form of a message source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hostmask {
    pub nick: String,
    pub user: String,
    pub host: String,
}

impl Hostmask {
    /// Returns `None` when the prefix is a bare server or nick name.
    pub fn parse(prefix: &str) -> Option<Self> {
        let (nick, userhost) = prefix.split_once('!')?;
        let (user, host) = userhost.split_once('@')?;
        if nick.is_empty() {
            return None;
        }
        Some(Self {
            nick: nick.to_string(),
            user: user.to_string(),
            host: host.to_string(),
        })
    }
}

impl fmt::Display for Hostmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}@{}", self.nick, self.user, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefix_verb_and_trailing() {
        let msg = Message::parse(":example!example@example.com JOIN #example exampleaccount :Example user")
            .unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("example!example@example.com"));
        assert_eq!(msg.verb, "JOIN");
        assert_eq!(msg.params, vec!["#example", "exampleaccount", "Example user"]);
    }

    #[test]
    fn test_parse_numeric_without_prefix() {
        let msg = Message::parse("001 me :Welcome to the network\r\n").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.verb, "001");
        assert_eq!(msg.params, vec!["me", "Welcome to the network"]);
    }

    #[test]
    fn test_trailing_keeps_colons_and_spaces() {
        let msg = Message::parse("PRIVMSG #c :: hi  there :)").unwrap();
        assert_eq!(msg.params, vec!["#c", ": hi  there :)"]);
    }

    #[test]
    fn test_verbless_lines_are_dropped() {
        assert!(Message::parse("").is_none());
        assert!(Message::parse(":irc.example.com").is_none());
        assert!(Message::parse(":irc.example.com ").is_none());
        assert!(Message::parse("@a=b").is_none());
        assert!(Message::parse("PRIV-MSG x").is_none());
        assert!(Message::parse("12 x").is_none());
    }

    #[test]
    fn test_tags_are_kept() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z :n!u@h PRIVMSG #c hi").unwrap();
        assert_eq!(msg.tags.as_deref(), Some("time=2024-01-01T00:00:00Z"));
        assert_eq!(msg.verb, "PRIVMSG");
    }

    #[test]
    fn test_canonical_lines_round_trip() {
        let lines = [
            ":example!example@example.com JOIN #example exampleaccount :Example user",
            ":irc.example.com 354 botnick #example ex2 example.net ex2 ex2",
            ":irc.example.com 332 botnick #example :the topic",
            "CAP REQ :sasl extended-join",
            "PRIVMSG #chan :",
            "USER bot 8 * :Real Name",
            "@id=1 :n!u@h TOPIC #c :new one",
            "QUIT",
        ];
        for line in lines {
            let msg = Message::parse(line).unwrap();
            assert_eq!(msg.to_string(), line);
        }
    }

    #[test]
    fn test_serialize_quotes_last_param_when_needed() {
        assert_eq!(Message::new("PRIVMSG", ["#c", "a b"]).to_string(), "PRIVMSG #c :a b");
        assert_eq!(Message::new("PRIVMSG", ["#c", ""]).to_string(), "PRIVMSG #c :");
        assert_eq!(Message::new("PRIVMSG", ["#c", ":)"]).to_string(), "PRIVMSG #c ::)");
        assert_eq!(Message::new("NICK", ["bot"]).to_string(), "NICK bot");
    }

    #[test]
    fn test_hostmask() {
        let mask = Hostmask::parse("example!example@example.com").unwrap();
        assert_eq!(mask.nick, "example");
        assert_eq!(mask.user, "example");
        assert_eq!(mask.host, "example.com");
        assert_eq!(mask.to_string(), "example!example@example.com");
        assert!(Hostmask::parse("irc.example.com").is_none());
    }

    #[test]
    fn test_source_nick_for_servers_and_users() {
        let msg = Message::parse(":irc.example.com NOTICE * :hi").unwrap();
        assert_eq!(msg.source_nick(), Some("irc.example.com"));
        assert!(msg.source().is_none());
        let msg = Message::parse(":nick!u@h NOTICE * :hi").unwrap();
        assert_eq!(msg.source_nick(), Some("nick"));
    }
}
