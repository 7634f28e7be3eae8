//! Console slash-command parser.
//!
//! Parses `/command arg1 arg2 ...` input lines into typed [`ParsedCommand`]
//! values; the console turns them into [`Command`]s for one connection.

use crate::app::event::Command;

/// A parsed user command. Each variant corresponds to a `/command`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCommand {
    /// Switch the console to another configured connection.
    Server { name: String },
    Join { channels: Vec<String> },
    Part { channels: Vec<String> },
    Msg { target: String, text: String },
    Me { text: String },
    Nick { nick: String },
    Raw { command: String },
    Quit { message: Option<String> },
    Help,
}

/// Parse a slash-command string into a [`ParsedCommand`].
///
/// Returns `None` if the input does not start with `/` or is not a recognized
/// command. Commands are case-insensitive.
pub fn parse_command(input: &str) -> Option<ParsedCommand> {
    let input = input.trim();
    let body = input.strip_prefix('/')?;

    let mut parts = body.splitn(2, ' ');
    let cmd = parts.next()?.to_lowercase();
    let rest = parts.next().map(str::trim).unwrap_or("");

    match cmd.as_str() {
        "server" => {
            let name = rest.split_whitespace().next()?.to_string();
            Some(ParsedCommand::Server { name })
        }
        "join" | "j" => {
            let channels = channel_args(rest);
            if channels.is_empty() {
                return None;
            }
            Some(ParsedCommand::Join { channels })
        }
        "part" | "leave" => {
            let channels = channel_args(rest);
            if channels.is_empty() {
                return None;
            }
            Some(ParsedCommand::Part { channels })
        }
        "msg" | "query" => {
            let (target, text) = rest.split_once(' ')?;
            Some(ParsedCommand::Msg {
                target: target.to_string(),
                text: text.to_string(),
            })
        }
        "me" => Some(ParsedCommand::Me {
            text: rest.to_string(),
        }),
        "nick" => {
            let nick = rest.split_whitespace().next()?.to_string();
            Some(ParsedCommand::Nick { nick })
        }
        "raw" | "quote" => {
            if rest.is_empty() {
                return None;
            }
            Some(ParsedCommand::Raw {
                command: rest.to_string(),
            })
        }
        "quit" | "exit" => {
            let message = (!rest.is_empty()).then(|| rest.to_string());
            Some(ParsedCommand::Quit { message })
        }
        "help" | "h" => Some(ParsedCommand::Help),
        _ => None,
    }
}

/// `a b,c` -> `#a`, `#b`, `#c`: bare names get a `#` prefix.
fn channel_args(rest: &str) -> Vec<String> {
    rest.split([' ', ','])
        .filter(|c| !c.is_empty())
        .map(|c| {
            if c.starts_with('#') || c.starts_with('&') {
                c.to_string()
            } else {
                format!("#{}", c)
            }
        })
        .collect()
}

impl ParsedCommand {
    /// The command for the active connection. `target` is the console's
    /// current conversation, needed by `/me`.
    pub fn into_command(self, target: Option<&str>) -> Option<Command> {
        match self {
            ParsedCommand::Join { channels } => Some(Command::Join(channels)),
            ParsedCommand::Part { channels } => Some(Command::Part(channels)),
            ParsedCommand::Msg { target, text } => Some(Command::Say { target, text }),
            ParsedCommand::Me { text } => Some(Command::Action {
                target: target?.to_string(),
                text,
            }),
            ParsedCommand::Nick { nick } => Some(Command::Nick(nick)),
            ParsedCommand::Raw { command } => Some(Command::Raw(command)),
            ParsedCommand::Quit { message } => Some(Command::Quit(message)),
            ParsedCommand::Server { .. } | ParsedCommand::Help => None,
        }
    }
}

pub const HELP: &str = "\
/server <name>         switch the active connection
/join <#chan>[,...]    join channels
/part <#chan>[,...]    leave channels
/msg <target> <text>   send a message
/me <text>             send an action to the current target
/nick <nick>           change nickname
/raw <line>            send a raw protocol line
/quit [message]        disconnect everything and exit
Any other input is sent as a raw protocol line.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_part_normalise_channels() {
        assert_eq!(
            parse_command("/join rust,#tokio &local"),
            Some(ParsedCommand::Join {
                channels: vec!["#rust".into(), "#tokio".into(), "&local".into()]
            })
        );
        assert_eq!(
            parse_command("/PART #rust"),
            Some(ParsedCommand::Part { channels: vec!["#rust".into()] })
        );
        assert_eq!(parse_command("/join"), None);
    }

    #[test]
    fn test_msg_keeps_spaces() {
        assert_eq!(
            parse_command("/msg #c hello  there"),
            Some(ParsedCommand::Msg {
                target: "#c".into(),
                text: "hello  there".into()
            })
        );
        assert_eq!(parse_command("/msg #c"), None);
    }

    #[test]
    fn test_quit_message_is_optional() {
        assert_eq!(parse_command("/quit"), Some(ParsedCommand::Quit { message: None }));
        assert_eq!(
            parse_command("/quit see you"),
            Some(ParsedCommand::Quit { message: Some("see you".into()) })
        );
    }

    #[test]
    fn test_non_commands() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/nosuchthing"), None);
        assert_eq!(parse_command("/raw"), None);
    }

    #[test]
    fn test_into_command() {
        let me = parse_command("/me waves").unwrap();
        assert_eq!(
            me.clone().into_command(Some("#c")),
            Some(Command::Action { target: "#c".into(), text: "waves".into() })
        );
        assert_eq!(me.into_command(None), None);
        assert_eq!(
            parse_command("/raw PRIVMSG #c :hi").unwrap().into_command(None),
            Some(Command::Raw("PRIVMSG #c :hi".into()))
        );
        assert_eq!(parse_command("/server libera").unwrap().into_command(None), None);
    }
}
