//! Outbound commands and their exact wire text.

use std::fmt;

/// Line terminator expected by the server.
pub const CRLF: &str = "\r\n";

/// A command the client writes to the server.
///
/// Channel names are given without `#`; the encoder adds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CAP REQ :<caps>`
    CapReq(String),
    /// `PASS <token>`
    Pass(String),
    /// `NICK <name>`
    Nick(String),
    /// `USER <name> 0 * :<realname>`
    User { name: String, realname: String },
    /// `JOIN #<channel>`
    Join(String),
    /// `PART #<channel>`
    Part(String),
    /// `PONG` or `PONG :<token>`
    Pong(Option<String>),
    /// `QUIT`
    Quit,
    /// `PRIVMSG #<channel> :<text>`
    Privmsg { channel: String, text: String },
    /// Passed through untouched.
    Raw(String),
}

impl Command {
    /// Wire text including the line terminator.
    pub fn to_wire(&self) -> String {
        format!("{self}{CRLF}")
    }

    /// `PASS` with the `oauth:` scheme Twitch expects, whether or not the
    /// token already carries it.
    pub fn pass_oauth(token: &str) -> Self {
        let token = token.strip_prefix("oauth:").unwrap_or(token);
        Command::Pass(format!("oauth:{token}"))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::CapReq(caps) => write!(f, "CAP REQ :{caps}"),
            Command::Pass(token) => write!(f, "PASS {token}"),
            Command::Nick(name) => write!(f, "NICK {name}"),
            Command::User { name, realname } => write!(f, "USER {name} 0 * :{realname}"),
            Command::Join(channel) => write!(f, "JOIN #{channel}"),
            Command::Part(channel) => write!(f, "PART #{channel}"),
            Command::Pong(None) => write!(f, "PONG"),
            Command::Pong(Some(token)) => write!(f, "PONG :{token}"),
            Command::Quit => write!(f, "QUIT"),
            Command::Privmsg { channel, text } => {
                let text = text.replace(['\r', '\n'], " ");
                write!(f, "PRIVMSG #{channel} :{text}")
            }
            Command::Raw(line) => write!(f, "{line}"),
        }
    }
}
