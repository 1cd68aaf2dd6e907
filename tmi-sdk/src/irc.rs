//! TMI line parser.
//!
//! Twitch chat speaks IRC with IRCv3 tags: `[@tags ][:prefix ]COMMAND params`.
//! Parsing is split into three stages: the line grammar, the prefix, and
//! (for `PRIVMSG` only) the chat payload. Missing optional groups come back
//! empty instead of failing, so "no tags" and "no emotes" look the same
//! downstream.

use std::collections::HashMap;

/// A line that has no command at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed line ({reason}): {line:?}")]
pub struct ParseError {
    pub line: String,
    pub reason: &'static str,
}

/// Origin of a message: `nick!user@host` or a bare servername.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefix {
    Server { name: String },
    User { nick: String, user: String, host: String },
}

impl Default for Prefix {
    fn default() -> Self {
        Prefix::Server { name: String::new() }
    }
}

impl Prefix {
    /// Decompose a raw prefix (without the leading `:`).
    pub fn parse(raw: &str) -> Self {
        if let Some((nick, rest)) = raw.split_once('!')
            && let Some((user, host)) = rest.split_once('@')
        {
            return Prefix::User {
                nick: nick.to_string(),
                user: user.to_string(),
                host: host.to_string(),
            };
        }
        Prefix::Server { name: raw.to_string() }
    }

    pub fn servername(&self) -> &str {
        match self {
            Prefix::Server { name } => name,
            Prefix::User { .. } => "",
        }
    }

    pub fn nick(&self) -> &str {
        match self {
            Prefix::User { nick, .. } => nick,
            Prefix::Server { .. } => "",
        }
    }

    pub fn user(&self) -> &str {
        match self {
            Prefix::User { user, .. } => user,
            Prefix::Server { .. } => "",
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Prefix::User { host, .. } => host,
            Prefix::Server { .. } => "",
        }
    }

    /// Nick when present, servername otherwise.
    pub fn name(&self) -> &str {
        match self {
            Prefix::User { nick, .. } if !nick.is_empty() => nick,
            Prefix::User { .. } => "",
            Prefix::Server { name } => name,
        }
    }
}

/// One decoded protocol line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    /// IRCv3 message tags (empty if none).
    pub tags: HashMap<String, String>,
    pub prefix: Prefix,
    /// Command word, uppercased (`PRIVMSG`, `PING`, `001`, ...).
    pub command: String,
    /// Everything after the command, verbatim.
    pub params: String,
}

impl ParsedMessage {
    /// Parse one raw line. Trailing CR/LF is ignored.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let anomaly = |reason| ParseError {
            line: line.to_string(),
            reason,
        };

        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return Err(anomaly("empty line"));
        }

        let tags = match rest.strip_prefix('@') {
            Some(tagged) => {
                let (raw, after) = tagged
                    .split_once(' ')
                    .ok_or_else(|| anomaly("tags without command"))?;
                rest = after;
                parse_tags(raw)
            }
            None => HashMap::new(),
        };

        let prefix = match rest.strip_prefix(':') {
            Some(prefixed) => {
                let (raw, after) = prefixed
                    .split_once(' ')
                    .ok_or_else(|| anomaly("prefix without command"))?;
                rest = after;
                Prefix::parse(raw)
            }
            None => Prefix::default(),
        };

        let (command, params) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(anomaly("missing command"));
        }

        Ok(ParsedMessage {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params: params.to_string(),
        })
    }

    pub fn tag(&self, key: &str) -> &str {
        self.tags.get(key).map(String::as_str).unwrap_or("")
    }

    /// Token carried by a `PING` (`PING :tmi.twitch.tv` → `tmi.twitch.tv`).
    pub fn trailing(&self) -> &str {
        match self.params.find(':') {
            Some(0) => &self.params[1..],
            Some(i) if self.params.as_bytes()[i - 1] == b' ' => &self.params[i + 1..],
            _ => &self.params,
        }
    }

    /// Decompose a `PRIVMSG` into its chat payload. `None` for any other
    /// command.
    pub fn chat_event(&self) -> Option<ChatEvent> {
        if self.command != "PRIVMSG" {
            return None;
        }
        let params = self.params.strip_prefix('#').unwrap_or(&self.params);
        let (channel, text) = match params.split_once(" :") {
            Some((channel, text)) => (channel, text),
            None => params.split_once(' ').unwrap_or((params, "")),
        };
        Some(ChatEvent {
            channel: channel.to_ascii_lowercase(),
            text: text.to_string(),
            emotes: self.tag("emotes").to_string(),
            sender: self.prefix.name().to_string(),
        })
    }
}

/// A chat message addressed to a channel, before sender enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatEvent {
    /// Channel name without `#`.
    pub channel: String,
    pub text: String,
    /// Raw `emotes` tag, e.g. `25:0-4,12-16/1902:6-10`.
    pub emotes: String,
    /// Login name of the sender.
    pub sender: String,
}

/// Parse IRCv3 tag string: `key=value;key2=value2`
fn parse_tags(tag_str: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    for pair in tag_str.split(';') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => tags.insert(key.to_string(), unescape_tag_value(value)),
            None => tags.insert(pair.to_string(), String::new()),
        };
    }
    tags
}

/// `\:` → `;`, `\s` → space, `\\` → `\`, `\r` → CR, `\n` → LF
fn unescape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => result.push(';'),
            Some('s') => result.push(' '),
            Some('\\') => result.push('\\'),
            Some('r') => result.push('\r'),
            Some('n') => result.push('\n'),
            Some(other) => result.push(other),
            None => {}
        }
    }
    result
}
