//! # STOMP 1.2 Frame Codec
//!
//! Encodes and decodes the text frames exchanged with a STOMP broker. A frame is
//! a command line, zero or more `name:value` header lines, a blank line, an
//! optional body and a terminating NUL octet. A bare end-of-line between frames is
//! a heart-beat.
//!
//! ## Wire rules implemented here:
//!
//! - Header names and values are escaped (`\\`, `\n`, `\r`, `:`) in every frame
//!   except `CONNECT` and `CONNECTED`, which are always sent verbatim.
//! - When a header is repeated, the first occurrence wins.
//! - A body is read up to `content-length` octets when that header is present
//!   (so it may contain NUL octets), otherwise up to the first NUL.
//! - Both `\n` and `\r\n` line endings are accepted on input. Output uses `\n`.
//!
//! A single WebSocket message may carry several frames and heart-beats, so the
//! decoder works on a whole buffer and returns every [`Packet`] found in it.

use std::fmt;
use thiserror::Error;

/// Errors raised while decoding a frame from the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unknown STOMP command: {0}")]
    UnknownCommand(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("Frame is missing its NUL terminator")]
    MissingTerminator,

    #[error("Frame command or headers are not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid content-length header: {0}")]
    InvalidContentLength(String),
}

/// Every command defined by STOMP 1.2, client and server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// The command as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Parses a wire command. Commands are case-sensitive.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let command = match raw {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    // CONNECT and CONNECTED frames never escape their headers.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # STOMP Frame
///
/// Headers keep their wire order. Lookups through [`Frame::get_header`] return
/// the first occurrence of a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header, builder style.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends every header from an iterator, builder style.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Replaces the body, builder style.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the value of the first header called `name`.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The body decoded as UTF-8, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Serializes the frame, NUL terminator included.
    ///
    /// A `content-length` header is added for non-empty bodies unless the caller
    /// already supplied one.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());

        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }

        if !self.body.is_empty() && self.get_header("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

/// A unit read from or written to the wire: a full frame or a heart-beat EOL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Frame(Frame),
    Heartbeat,
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Frame(frame) => frame.encode(),
            Packet::Heartbeat => b"\n".to_vec(),
        }
    }
}

impl From<Frame> for Packet {
    fn from(frame: Frame) -> Self {
        Packet::Frame(frame)
    }
}

/// Decodes every frame and heart-beat contained in `input`.
///
/// The buffer must hold complete frames. A truncated frame yields
/// [`FrameError::MissingTerminator`].
pub fn decode_packets(input: &[u8]) -> Result<Vec<Packet>, FrameError> {
    let mut packets = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        match input[pos] {
            b'\n' => {
                packets.push(Packet::Heartbeat);
                pos += 1;
            }
            b'\r' if input.get(pos + 1) == Some(&b'\n') => {
                packets.push(Packet::Heartbeat);
                pos += 2;
            }
            _ => {
                let (frame, consumed) = decode_frame(&input[pos..])?;
                packets.push(Packet::Frame(frame));
                pos += consumed;
            }
        }
    }

    Ok(packets)
}

/// Decodes exactly one frame from the start of `input`, returning it together
/// with the number of bytes consumed (NUL included).
pub fn decode_frame(input: &[u8]) -> Result<(Frame, usize), FrameError> {
    let (command_line, mut pos) = read_line(input, 0).ok_or(FrameError::MissingTerminator)?;
    let command = Command::parse(as_utf8(command_line)?)?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, next) = read_line(input, pos).ok_or(FrameError::MissingTerminator)?;
        pos = next;
        if line.is_empty() {
            break;
        }

        let line = as_utf8(line)?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;

        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
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
            let end = pos
                .checked_add(len)
                .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
            if input.get(end) != Some(&0) {
                return Err(FrameError::MissingTerminator);
            }
            end
        }
        None => input[pos..]
            .iter()
            .position(|b| *b == 0)
            .map(|offset| pos + offset)
            .ok_or(FrameError::MissingTerminator)?,
    };

    let frame = Frame {
        command,
        headers,
        body: input[pos..body_end].to_vec(),
    };

    Ok((frame, body_end + 1))
}

// Returns the line starting at `start` without its EOL, and the offset after the EOL.
fn read_line(input: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let offset = input.get(start..)?.iter().position(|b| *b == b'\n')?;
    let end = start + offset;
    let line = &input[start..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, end + 1))
}

fn as_utf8(raw: &[u8]) -> Result<&str, FrameError> {
    std::str::from_utf8(raw).map_err(|_| FrameError::InvalidUtf8)
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_send_frame_with_escaped_headers_and_length() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/app/risk")
            .header("note", "a:b\nc")
            .with_body("{\"x\":1}");

        let wire = String::from_utf8(frame.encode()).unwrap();
        assert_eq!(
            wire,
            "SEND\ndestination:/app/risk\nnote:a\\cb\\nc\ncontent-length:7\n\n{\"x\":1}\0"
        );
    }

    #[test]
    fn connect_frame_headers_are_not_escaped() {
        let frame = Frame::new(Command::Connect).header("passcode", "se:cret");
        let wire = String::from_utf8(frame.encode()).unwrap();
        assert_eq!(wire, "CONNECT\npasscode:se:cret\n\n\0");
    }

    #[test]
    fn decodes_message_frame() {
        let raw = b"MESSAGE\nsubscription:sub-1\nmessage-id:7\ndestination:/topic/alerts\n\n{\"level\":\"HIGH\"}\0";
        let packets = decode_packets(raw).unwrap();
        assert_eq!(packets.len(), 1);

        let Packet::Frame(frame) = &packets[0] else {
            panic!("expected a frame");
        };
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get_header("destination"), Some("/topic/alerts"));
        assert_eq!(frame.get_header("subscription"), Some("sub-1"));
        assert_eq!(frame.body_text(), "{\"level\":\"HIGH\"}");
    }

    #[test]
    fn decodes_frames_and_heartbeats_in_one_buffer() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"\n");
        raw.extend_from_slice(&Frame::new(Command::Receipt).header("receipt-id", "1").encode());
        raw.extend_from_slice(b"\r\n");
        raw.extend_from_slice(&Frame::new(Command::Message).with_body("hi").encode());

        let packets = decode_packets(&raw).unwrap();
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[0], Packet::Heartbeat);
        assert!(matches!(&packets[1], Packet::Frame(f) if f.command == Command::Receipt));
        assert_eq!(packets[2], Packet::Heartbeat);
        assert!(matches!(&packets[3], Packet::Frame(f) if f.body == b"hi"));
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let raw = b"MESSAGE\ncontent-length:3\n\na\0b\0";
        let (frame, consumed) = decode_frame(raw).unwrap();
        assert_eq!(frame.body, b"a\0b");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn oversized_content_length_is_an_error() {
        assert_eq!(
            decode_packets(b"MESSAGE\ncontent-length:18446744073709551615\n\nx\0").unwrap_err(),
            FrameError::InvalidContentLength("18446744073709551615".to_string())
        );
        assert_eq!(
            decode_packets(b"MESSAGE\ncontent-length:50\n\nshort\0").unwrap_err(),
            FrameError::MissingTerminator
        );
    }

    #[test]
    fn accepts_crlf_line_endings() {
        let raw = b"CONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0";
        let (frame, _) = decode_frame(raw).unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get_header("version"), Some("1.2"));
        assert_eq!(frame.get_header("heart-beat"), Some("0,0"));
    }

    #[test]
    fn first_repeated_header_wins() {
        let raw = b"MESSAGE\nfoo:first\nfoo:second\n\n\0";
        let (frame, _) = decode_frame(raw).unwrap();
        assert_eq!(frame.get_header("foo"), Some("first"));
        assert_eq!(frame.headers.len(), 2);
    }

    #[test]
    fn escaped_header_round_trips() {
        let frame = Frame::new(Command::Message).header("path", "c:\\tmp\r\n");
        let (decoded, _) = decode_frame(&frame.encode()).unwrap();
        assert_eq!(decoded.get_header("path"), Some("c:\\tmp\r\n"));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            decode_frame(b"HELLO\n\n\0").unwrap_err(),
            FrameError::UnknownCommand("HELLO".to_string())
        );
        assert_eq!(
            decode_frame(b"MESSAGE\nno-colon\n\n\0").unwrap_err(),
            FrameError::MalformedHeader("no-colon".to_string())
        );
        assert_eq!(
            decode_frame(b"MESSAGE\nbad:\\t\n\n\0").unwrap_err(),
            FrameError::InvalidEscape("\\t".to_string())
        );
        assert_eq!(
            decode_frame(b"MESSAGE\n\nbody without nul").unwrap_err(),
            FrameError::MissingTerminator
        );
        assert_eq!(
            decode_frame(b"MESSAGE\ncontent-length:x\n\n\0").unwrap_err(),
            FrameError::InvalidContentLength("x".to_string())
        );
    }
}
