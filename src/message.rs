use std::{fmt, io};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum sender length in bytes, shared by both transports.
pub const SENDER_MAX: usize = 49;
/// Maximum body length in bytes, shared by both transports.
pub const BODY_MAX: usize = 255;
/// Size of one read from an established connection. The wire has no framing:
/// one read may carry a partial message or several concatenated sends. That
/// weakness is inherited from the original protocol and kept for
/// compatibility rather than papered over with a length prefix.
pub const RECV_CHUNK: usize = 1024;

/// An immutable sender-tagged text message. No timestamp, no identifier; the
/// wire bytes are the only record it ever existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub body: String,
}

impl Message {
    /// Build a message, truncating both fields to their byte bounds on a
    /// character boundary.
    pub fn new(sender: &str, body: &str) -> Self {
        Self {
            sender: truncate_to(sender, SENDER_MAX).to_string(),
            body: truncate_to(body, BODY_MAX).to_string(),
        }
    }

    /// Encode as the published wire convention: `[sender]: body`, one opaque
    /// unframed chunk.
    pub fn encode_wire(&self) -> Vec<u8> {
        format!("[{}]: {}", self.sender, self.body).into_bytes()
    }

    /// Recover a message from a received chunk. Chunks without the
    /// `[sender]: ` prefix come from peers speaking the raw convention; they
    /// are delivered with an empty sender rather than dropped.
    pub fn parse_wire(chunk: &[u8]) -> Self {
        let text = String::from_utf8_lossy(chunk);
        if let Some(rest) = text.strip_prefix('[') {
            if let Some((sender, body)) = rest.split_once("]: ") {
                return Self::new(sender, body);
            }
        }
        Self::new("", &text)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sender.is_empty() {
            write!(f, "{}", self.body)
        } else {
            write!(f, "[{}]: {}", self.sender, self.body)
        }
    }
}

/// Truncate `text` to at most `max` bytes without splitting a character.
pub fn truncate_to(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Write one message as a single unframed chunk and flush so peers see it
/// promptly.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.encode_wire()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one chunk and parse it. Returns `None` when the peer closed the
/// connection.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; RECV_CHUNK];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(Message::parse_wire(&buf[..n])))
}
