//! Line reassembly and sentinel-tag decoding for worker stdout.
//!
//! Worker output arrives in arbitrary chunks. `FrameParser` keeps the
//! incomplete trailing line between chunks and turns every complete line into
//! at most one `Frame`. Reassembly works on bytes, so a UTF-8 sequence split
//! across two chunks decodes the same as if it had arrived whole.
//!
//! Sentinel lines carry a JSON payload right after the tag:
//!
//! ```text
//! __CLAUDE_MESSAGE__{"content":"Creating the landing page"}
//! __TOOL_USE__{"name":"Write","input":{"file_path":"app/page.tsx"}}
//! __TOOL_RESULT__{"name":"Write","result":"ok"}
//! ```

use std::collections::VecDeque;
use std::io;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

pub const MESSAGE_TAG: &str = "__CLAUDE_MESSAGE__";
pub const TOOL_USE_TAG: &str = "__TOOL_USE__";
pub const TOOL_RESULT_TAG: &str = "__TOOL_RESULT__";

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagePayload {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolUsePayload {
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolResultPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub result: Value,
}

/// One decoded line of worker output.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(MessagePayload),
    ToolUse(ToolUsePayload),
    ToolResult(ToolResultPayload),
    /// Free text, already trimmed and never empty.
    Text(String),
}

/// Stateful line reassembler. One instance per output stream.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk and return the frames for every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(|line| Self::parse_line(&String::from_utf8_lossy(line)))
            .collect()
    }

    /// Flush the residual partial line at end of stream.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        Self::parse_line(&String::from_utf8_lossy(&line))
    }

    /// Bytes currently held back waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Classify a single complete line.
    ///
    /// Priority order:
    /// 1. message tag → `Frame::Message`
    /// 2. tool-use tag → `Frame::ToolUse`
    /// 3. tool-result tag → `Frame::ToolResult`
    /// 4. anything non-blank → `Frame::Text`
    ///
    /// A sentinel line whose payload fails to decode yields `None`; it never
    /// falls through to plain text.
    pub fn parse_line(line: &str) -> Option<Frame> {
        if let Some(payload) = payload_after(line, MESSAGE_TAG) {
            return decode::<MessagePayload>(payload, MESSAGE_TAG).map(Frame::Message);
        }
        if let Some(payload) = payload_after(line, TOOL_USE_TAG) {
            return decode::<ToolUsePayload>(payload, TOOL_USE_TAG).map(Frame::ToolUse);
        }
        if let Some(payload) = payload_after(line, TOOL_RESULT_TAG) {
            return decode::<ToolResultPayload>(payload, TOOL_RESULT_TAG).map(Frame::ToolResult);
        }

        let text = line.trim();
        if text.is_empty() {
            None
        } else {
            Some(Frame::Text(text.to_string()))
        }
    }
}

fn payload_after<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.find(tag).map(|start| line[start + tag.len()..].trim())
}

fn decode<T: DeserializeOwned>(payload: &str, tag: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::trace!(tag, error = %e, "Discarding malformed sentinel payload");
            None
        }
    }
}

/// Pull-based frame sequence over an async byte stream.
///
/// `next_frame` is cancel-safe: frames decoded from a completed read are
/// queued before the call returns, and an interrupted read consumes nothing.
pub struct FrameReader<R> {
    reader: R,
    parser: FrameParser,
    pending: VecDeque<Frame>,
    chunk: Box<[u8]>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: FrameParser::new(),
            pending: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
            eof: false,
        }
    }

    /// Next complete frame, or `None` once the stream is exhausted.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.eof = true;
                self.pending.extend(self.parser.finish());
            } else {
                let frames = self.parser.push(&self.chunk[..n]);
                self.pending.extend(frames);
            }
        }
    }

    /// Drain the remaining frames into a vector.
    pub async fn collect(mut self) -> io::Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

/// Line reader for diagnostic output.
///
/// Bytes that are not valid UTF-8 are replaced instead of failing the read,
/// and the line terminator (`\n` or `\r\n`) is stripped.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next line, or `None` at end of stream. A final line without a
    /// terminator is still returned.
    ///
    /// Cancel-safe: bytes of an interrupted read stay in the buffer and are
    /// completed by the next call.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}
