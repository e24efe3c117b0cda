//! Server-Sent Events framing.
//!
//! Incoming text is buffered, line endings are normalized to `\n`, and the
//! buffer is split on blank lines. Each complete chunk becomes an
//! [`SseFrame`]; a trailing partial chunk stays buffered until more text
//! arrives.

use std::fmt;

/// One `\n\n`-terminated chunk of an event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field
    pub event: Option<String>,
    /// `data:` lines, in order
    pub data: Vec<String>,
    /// Last `id:` field
    pub id: Option<String>,
    /// Last valid `retry:` field, in milliseconds
    pub retry: Option<u64>,
}

impl SseFrame {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a data line.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ocxp_client::shared::sse_parser::SseFrame;
    ///
    /// let frame = SseFrame::new().with_data("{\"a\":").with_data("1}");
    /// assert_eq!(frame.data_text().as_deref(), Some("{\"a\":\n1}"));
    /// ```
    pub fn with_data(mut self, line: impl Into<String>) -> Self {
        self.data.push(line.into());
        self
    }

    /// Set the event name.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Set the event ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the retry interval.
    pub fn with_retry(mut self, retry: u64) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Data lines joined with `\n`, or `None` when the frame had no data line.
    pub fn data_text(&self) -> Option<String> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data.join("\n"))
        }
    }
}

impl fmt::Display for SseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = &self.id {
            writeln!(f, "id: {}", id)?;
        }
        if let Some(event) = &self.event {
            writeln!(f, "event: {}", event)?;
        }
        if let Some(retry) = self.retry {
            writeln!(f, "retry: {}", retry)?;
        }
        for line in &self.data {
            writeln!(f, "data: {}", line)?;
        }
        writeln!(f)
    }
}

/// Leading decimal digits of a `retry:` value.
fn parse_retry(value: &str) -> Option<u64> {
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

fn parse_frame(chunk: &str) -> SseFrame {
    let mut frame = SseFrame::new();

    for line in chunk.split('\n') {
        if let Some(rest) = line.strip_prefix("data:") {
            frame.data.push(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("event:") {
            frame.event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("id:") {
            frame.id = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("retry:") {
            if let Some(retry) = parse_retry(rest.trim_start()) {
                frame.retry = Some(retry);
            }
        }
    }

    frame
}

/// Incremental event stream framer.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decoded text and return every frame it completes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ocxp_client::shared::sse_parser::SseParser;
    ///
    /// let mut parser = SseParser::new();
    /// assert!(parser.feed("data: hel").is_empty());
    /// let frames = parser.feed("lo\r\n\r\n");
    /// assert_eq!(frames.len(), 1);
    /// assert_eq!(frames[0].data_text().as_deref(), Some("hello"));
    /// ```
    pub fn feed(&mut self, text: &str) -> Vec<SseFrame> {
        self.buffer.push_str(text);

        // A trailing CR may be the first half of a CRLF split across chunks.
        let held_cr = self.buffer.ends_with('\r');
        if held_cr {
            self.buffer.pop();
        }
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n").replace('\r', "\n");
        }

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            frames.push(parse_frame(&self.buffer[..end]));
            self.buffer.drain(..end + 2);
        }

        if held_cr {
            self.buffer.push('\r');
        }
        frames
    }

    /// Drop any buffered partial chunk.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Buffered text not yet terminated by a blank line.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
