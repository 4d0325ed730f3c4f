//! Wire codec for the client-facing socket.
//!
//! One message per line, space-separated tokens, token 0 is the header:
//!
//! ```text
//! handle_key_event 3 97 true shift\n
//! commit_string 3 hello\sworld\n
//! ```
//!
//! Escapes inside a token:
//! - `\\` → backslash
//! - `\s` → space
//! - `\n` → newline
//!
//! Encoding is canonical, so a well-formed frame re-encodes byte for byte.

use anyhow::{anyhow, bail, Result};

use crate::constants::MAX_MESSAGE_SIZE;

/// A decoded client message: header plus string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: String,
    args: Vec<String>,
}

impl Message {
    /// Create a message with no arguments.
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument (builder style).
    #[must_use]
    pub fn arg(mut self, value: impl ToString) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// Append several arguments (builder style).
    #[must_use]
    pub fn args<I, T>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        self.args.extend(values.into_iter().map(|v| v.to_string()));
        self
    }

    /// Header token.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// All arguments.
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Argument at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Encode into wire bytes, including the trailing newline.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::with_capacity(self.header.len() + 16);
        escape_into(&self.header, &mut out);
        for arg in &self.args {
            out.push(' ');
            escape_into(arg, &mut out);
        }
        out.push('\n');
        out.into_bytes()
    }
}

fn escape_into(token: &str, out: &mut String) {
    for c in token.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ' ' => out.push_str("\\s"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
}

fn unescape(token: &str) -> Result<String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some(other) => bail!("unknown escape '\\{other}'"),
            None => bail!("dangling backslash at end of token"),
        }
    }
    Ok(out)
}

/// Decode a single line (without its terminating newline).
fn decode_line(line: &[u8]) -> Result<Message> {
    let text = std::str::from_utf8(line).map_err(|e| anyhow!("message is not UTF-8: {e}"))?;
    let mut tokens = text.split(' ');
    let header = unescape(tokens.next().unwrap_or_default())?;
    if header.is_empty() {
        bail!("message has an empty header");
    }
    let args = tokens.map(unescape).collect::<Result<Vec<_>>>()?;
    Ok(Message { header, args })
}

/// Incremental message decoder that handles partial reads.
///
/// Feed bytes via [`MessageDecoder::feed`] and collect complete messages.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: Vec<u8>,
}

impl MessageDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes and extract every complete message.
    ///
    /// Incomplete data is buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame is malformed or exceeds
    /// [`MAX_MESSAGE_SIZE`], terminated or not.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        self.buf.extend_from_slice(bytes);
        let mut messages = Vec::new();
        let mut consumed = 0;

        while let Some(pos) = self.buf[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + pos;
            if pos > MAX_MESSAGE_SIZE {
                bail!("message too large: {pos} bytes (max {MAX_MESSAGE_SIZE})");
            }
            messages.push(decode_line(&self.buf[consumed..end])?);
            consumed = end + 1;
        }
        self.buf.drain(..consumed);

        if self.buf.len() > MAX_MESSAGE_SIZE {
            bail!(
                "unterminated message exceeds {MAX_MESSAGE_SIZE} bytes ({} buffered)",
                self.buf.len()
            );
        }
        Ok(messages)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Signal end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if a truncated frame is still buffered.
    pub fn finish(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let len = self.buf.len();
        self.buf.clear();
        bail!("truncated message: {len} bytes without terminator")
    }
}
