//! Minimal STOMP 1.2 frame codec.
//!
//! The storefront backend speaks STOMP over WebSocket text messages. The
//! client only needs a subset of the protocol: CONNECT/CONNECTED for the
//! handshake, SUBSCRIBE/UNSUBSCRIBE for topic registration, MESSAGE for
//! inbound payloads, ERROR, DISCONNECT, and bare-newline heart-beats.
//!
//! Frames are pure values with pure parse/serialize functions; the
//! connection actor owns all I/O.
//!
//! Wire shape:
//!
//! ```text
//! COMMAND
//! header:value
//! header:value
//!
//! body^@
//! ```
//!
//! where `^@` is a NUL byte and a heart-beat is a lone EOL.

use thiserror::Error;

/// Frame-level parse errors.
///
/// These never propagate past the connection actor: an unparseable frame is
/// logged and dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The frame had no command line.
    #[error("frame has no command line")]
    MissingCommand,

    /// The command is not one this client understands.
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),

    /// A header line had no `:` separator.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
}

/// The STOMP commands this client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client → server handshake
    Connect,
    /// Server → client handshake acknowledgement
    Connected,
    /// Register interest in a destination
    Subscribe,
    /// Withdraw interest in a destination
    Unsubscribe,
    /// Inbound payload for a destination
    Message,
    /// Server-reported protocol error (usually precedes a close)
    Error,
    /// Client → server graceful teardown
    Disconnect,
}

impl Command {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn parse(input: &str) -> Result<Self, FrameError> {
        match input {
            "CONNECT" => Ok(Self::Connect),
            "CONNECTED" => Ok(Self::Connected),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "MESSAGE" => Ok(Self::Message),
            "ERROR" => Ok(Self::Error),
            "DISCONNECT" => Ok(Self::Disconnect),
            other => Err(FrameError::UnknownCommand(other.to_string())),
        }
    }
}

/// A STOMP frame: command, headers in order, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame command
    pub command: Command,
    headers: Vec<(String, String)>,
    /// The frame body (JSON for every payload this client handles)
    pub body: String,
}

impl Frame {
    /// Create an empty frame for the given command.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value for a header name, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `destination` header, present on MESSAGE frames.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.header("destination")
    }

    /// CONNECT frame for the handshake.
    ///
    /// The bearer token rides as a connect-time credential header; heart-beat
    /// intervals are symmetric in both directions.
    #[must_use]
    pub fn connect(host: &str, token: &str, heartbeat_ms: u64) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("heart-beat", format!("{heartbeat_ms},{heartbeat_ms}"))
            .with_header("Authorization", format!("Bearer {token}"))
    }

    /// SUBSCRIBE frame. The subscription id doubles as the destination,
    /// which is unique by the registry's at-most-one invariant.
    #[must_use]
    pub fn subscribe(destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", destination)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    /// UNSUBSCRIBE frame for a previously subscribed destination.
    #[must_use]
    pub fn unsubscribe(destination: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", destination)
    }

    /// DISCONNECT frame for graceful teardown.
    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Serialize to the wire representation, NUL-terminated.
    #[must_use]
    pub fn serialize(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one WebSocket text message into a frame.
    ///
    /// Returns `Ok(None)` for a heart-beat (a message that is nothing but
    /// EOLs).
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] when the command line is missing or unknown,
    /// or a header line has no separator.
    pub fn parse(input: &str) -> Result<Option<Self>, FrameError> {
        // A heart-beat is a lone EOL; servers may also pad frames with
        // trailing EOLs.
        let trimmed = input.trim_end_matches(['\n', '\r']);
        let trimmed = trimmed.strip_suffix('\0').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(None);
        }

        let (head, body) = match trimmed.split_once("\n\n") {
            Some((head, body)) => (head, body),
            None => (trimmed, ""),
        };

        let mut lines = head.lines();
        let command_line = lines.next().ok_or(FrameError::MissingCommand)?;
        let command = Command::parse(command_line.trim_end_matches('\r'))?;
        let unescape_headers = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if unescape_headers {
                headers.push((unescape(name), unescape(value)));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

impl Command {
    /// STOMP 1.2: every frame escapes header values except the handshake
    /// pair, which predates escaping.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

fn push_escaped(out: &mut String, input: &str) {
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            // Undefined escape: keep it verbatim rather than guessing.
            Some(other) => {
                out.push('\\');
                out.push(other);
            },
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_round_trips() {
        let frame = Frame::subscribe("/topic/events/7/queue");
        let parsed = Frame::parse(&frame.serialize()).unwrap().unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.header("id"), Some("/topic/events/7/queue"));
        assert_eq!(parsed.destination(), Some("/topic/events/7/queue"));
    }

    #[test]
    fn heartbeat_parses_to_none() {
        assert_eq!(Frame::parse("\n").unwrap(), None);
        assert_eq!(Frame::parse("\r\n").unwrap(), None);
    }

    #[test]
    fn message_frame_carries_destination_and_body() {
        let wire = "MESSAGE\ndestination:/topic/users/9/queue\nsubscription:/topic/users/9/queue\n\n{\"enteredAt\":\"2025-03-01T12:00:00Z\",\"message\":\"go\"}\0";
        let frame = Frame::parse(wire).unwrap().unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.destination(), Some("/topic/users/9/queue"));
        assert!(frame.body.contains("enteredAt"));
    }

    #[test]
    fn connect_frame_skips_header_escaping() {
        let frame = Frame::connect("api.example.com", "abc123", 4000);
        let wire = frame.serialize();
        // The Authorization value contains no escaping; the colon separator
        // stays the first colon on the line.
        assert!(wire.contains("Authorization:Bearer abc123\n"));
        assert!(wire.contains("heart-beat:4000,4000\n"));
        assert!(wire.contains("accept-version:1.2\n"));
    }

    #[test]
    fn header_values_escape_and_unescape() {
        let frame = Frame::new(Command::Message)
            .with_header("destination", "/topic/x")
            .with_header("note", "a:b\nc\\d");
        let parsed = Frame::parse(&frame.serialize()).unwrap().unwrap();
        assert_eq!(parsed.header("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn unknown_command_is_an_error() {
        let result = Frame::parse("BEGIN\n\n\0");
        assert_eq!(
            result,
            Err(FrameError::UnknownCommand("BEGIN".to_string()))
        );
    }

    #[test]
    fn missing_nul_is_tolerated() {
        let frame = Frame::parse("MESSAGE\ndestination:/topic/t\n\n{}").unwrap().unwrap();
        assert_eq!(frame.body, "{}");
    }
}
