//! STOMP Frame Codec
//!
//! Encoding and decoding of STOMP 1.0-1.2 frames as carried inside
//! WebSocket messages.
//!
//! # Frame Layout
//!
//! ```text
//! COMMAND\n
//! header1:value1\n
//! header2:value2\n
//! \n
//! body^@
//! ```
//!
//! A bare EOL between frames is a heart-beat. One WebSocket message may
//! carry several frames; a frame never spans WebSocket messages.
//!
//! Header escaping depends on the negotiated version: 1.0 takes values
//! literally, 1.1 defines `\\`, `\n` and `\c`, and 1.2 adds `\r`.
//! `CONNECT` and `CONNECTED` are never escaped.

use std::fmt;

/// Frame terminator.
const NUL: u8 = 0;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Input held no frame data at all.
    #[error("empty frame")]
    Empty,

    /// Command line is not a STOMP command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Header line has no `:` separator.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    /// Header value contains an undefined escape sequence.
    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    /// Frame is not terminated by NUL.
    #[error("frame is not NUL-terminated")]
    MissingNul,

    /// `content-length` header is not a valid length.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    /// Frame exceeds the configured maximum size.
    #[error("frame exceeds {max} bytes")]
    TooLarge {
        /// Configured limit.
        max: usize,
    },

    /// Command or header is not valid UTF-8.
    #[error("frame header is not valid UTF-8")]
    InvalidUtf8,
}

/// Header escaping rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escaping {
    /// Values are taken literally (STOMP 1.0).
    None,
    /// `\\`, `\n` and `\c` (STOMP 1.1).
    Basic,
    /// `\\`, `\n`, `\c` and `\r` (STOMP 1.2).
    #[default]
    Full,
}

// =============================================================================
// Commands
// =============================================================================

/// STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client connect (1.0 and later).
    Connect,
    /// Client connect (1.1 and later alias).
    Stomp,
    /// Server connect acknowledgement.
    Connected,
    /// Client publish.
    Send,
    /// Client subscribe.
    Subscribe,
    /// Client unsubscribe.
    Unsubscribe,
    /// Client acknowledgement.
    Ack,
    /// Client negative acknowledgement.
    Nack,
    /// Client transaction start.
    Begin,
    /// Client transaction commit.
    Commit,
    /// Client transaction abort.
    Abort,
    /// Client disconnect.
    Disconnect,
    /// Server message delivery.
    Message,
    /// Server receipt.
    Receipt,
    /// Server error.
    Error,
}

impl Command {
    /// Parse a command line.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Whether header values of this command are written without escaping.
    const fn is_unescaped(self) -> bool {
        matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Frame
// =============================================================================

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are allowed; the first wins.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body along with `content-type` and `content-length`.
    #[must_use]
    pub fn body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        let length = self.body.len();
        self.header("content-type", content_type)
            .header("content-length", length.to_string())
    }

    /// Look up a header; the first occurrence wins.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text, replacing invalid sequences.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Serialize to wire bytes with STOMP 1.2 escaping, NUL terminator
    /// included.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with(Escaping::Full)
    }

    /// Serialize to wire bytes using the given header escaping.
    #[must_use]
    pub fn encode_with(&self, escaping: Escaping) -> Vec<u8> {
        let escaping = if self.command.is_unescaped() {
            Escaping::None
        } else {
            escaping
        };

        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            out.extend_from_slice(escape(name, escaping).as_bytes());
            out.push(b':');
            out.extend_from_slice(escape(value, escaping).as_bytes());
            out.push(b'\n');
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(NUL);
        out
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// One unit read from a WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A run of bare EOLs.
    Heartbeat,
    /// A complete frame.
    Frame(Frame),
}

/// Decoder enforcing a maximum frame size.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_bytes: usize,
    escaping: Escaping,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl FrameDecoder {
    /// Create a decoder with the given frame size limit.
    #[must_use]
    pub const fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            escaping: Escaping::Full,
        }
    }

    /// Header escaping applied to frames other than `CONNECT`.
    #[must_use]
    pub const fn escaping(&self) -> Escaping {
        self.escaping
    }

    /// Switch header escaping, typically once the version is negotiated.
    pub const fn set_escaping(&mut self, escaping: Escaping) {
        self.escaping = escaping;
    }

    /// Decode every frame and heart-beat in one WebSocket message.
    ///
    /// # Errors
    ///
    /// Returns the first `FrameError` encountered; frames before it are
    /// discarded.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<Inbound>, FrameError> {
        if data.is_empty() {
            return Err(FrameError::Empty);
        }

        let mut items = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let (item, next) = self.decode_next(data, pos)?;
            items.push(item);
            pos = next;
        }
        Ok(items)
    }

    /// Decode the heart-beat or frame starting at `pos`, returning it with
    /// the position just past it.
    ///
    /// Lets a caller change the escaping between frames of one message.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Empty` when `pos` is at the end of `data`, or
    /// the error of the malformed frame.
    pub fn decode_next(&self, data: &[u8], pos: usize) -> Result<(Inbound, usize), FrameError> {
        if pos >= data.len() {
            return Err(FrameError::Empty);
        }

        let eol = skip_eols(data, pos);
        if eol > pos {
            return Ok((Inbound::Heartbeat, eol));
        }

        let (frame, next) = self.decode_frame(data, pos)?;
        Ok((Inbound::Frame(frame), next))
    }

    fn decode_frame(&self, data: &[u8], start: usize) -> Result<(Frame, usize), FrameError> {
        let mut pos = start;

        let (line, next) = read_line(data, pos).ok_or(FrameError::MissingNul)?;
        let command_str = std::str::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)?;
        let command = Command::parse(command_str)
            .ok_or_else(|| FrameError::UnknownCommand(truncate(command_str)))?;
        pos = next;

        let escaping = if command.is_unescaped() {
            Escaping::None
        } else {
            self.escaping
        };

        let mut headers = Vec::new();
        loop {
            let (line, next) = read_line(data, pos).ok_or(FrameError::MissingNul)?;
            pos = next;
            if line.is_empty() {
                break;
            }
            self.check_size(start, pos)?;

            let line = std::str::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(truncate(line)))?;
            headers.push((unescape(name, escaping)?, unescape(value, escaping)?));
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                let end = pos.checked_add(len).ok_or(FrameError::TooLarge {
                    max: self.max_frame_bytes,
                })?;
                self.check_size(start, end)?;
                if data.get(end) != Some(&NUL) {
                    return Err(FrameError::MissingNul);
                }
                end
            }
            None => {
                let end = data[pos..]
                    .iter()
                    .position(|&b| b == NUL)
                    .map(|offset| pos + offset)
                    .ok_or(FrameError::MissingNul)?;
                self.check_size(start, end)?;
                end
            }
        };

        let frame = Frame {
            command,
            headers,
            body: data[pos..body_end].to_vec(),
        };
        Ok((frame, body_end + 1))
    }

    const fn check_size(&self, start: usize, end: usize) -> Result<(), FrameError> {
        if end - start > self.max_frame_bytes {
            Err(FrameError::TooLarge {
                max: self.max_frame_bytes,
            })
        } else {
            Ok(())
        }
    }
}

/// Encoded heart-beat.
#[must_use]
pub const fn heartbeat() -> &'static str {
    "\n"
}

fn skip_eols(data: &[u8], mut pos: usize) -> usize {
    loop {
        match data.get(pos) {
            Some(b'\n') => pos += 1,
            Some(b'\r') if data.get(pos + 1) == Some(&b'\n') => pos += 2,
            _ => return pos,
        }
    }
}

/// Read one line, stripping `\n` or `\r\n`. Returns the line and the
/// position after its terminator.
fn read_line(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let offset = data.get(pos..)?.iter().position(|&b| b == b'\n')?;
    let mut line = &data[pos..pos + offset];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    Some((line, pos + offset + 1))
}

fn escape(s: &str, escaping: Escaping) -> String {
    if escaping == Escaping::None {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' if escaping == Escaping::Full => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str, escaping: Escaping) -> Result<String, FrameError> {
    if escaping == Escaping::None || !s.contains('\\') {
        return Ok(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') if escaping == Escaping::Full => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(truncate(s))),
        }
    }
    Ok(out)
}

fn truncate(s: &str) -> String {
    s.chars().take(64).collect()
}

// =============================================================================
// Tests
// =============================================================================
