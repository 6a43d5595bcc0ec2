//! Incremental STOMP frame codec.
//!
//! Decoding is a staged state machine over a residue buffer: bytes that do
//! not yet complete the current stage stay buffered until the next read
//! arrives, so a frame boundary may fall anywhere in the stream, including
//! inside the command line, a header, or the body.

use crate::protocol::frame::{headers, Frame, Headers};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Initial residue capacity; `BytesMut` grows by doubling beyond this.
const RESIDUE_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame line is not valid UTF-8")]
    InvalidUtf8,
}

enum DecodeState {
    /// Skipping blank lines and waiting for a complete command line.
    Command,
    /// Reading header lines until the blank separator line.
    Headers { command: String, headers: Headers },
    /// Reading the body: an exact `content-length` count, or a NUL scan.
    Body {
        command: String,
        headers: Headers,
        content_length: Option<usize>,
    },
}

/// Streaming frame decoder. Feed raw reads in; complete frames come out.
pub struct FrameDecoder {
    residue: BytesMut,
    state: DecodeState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            residue: BytesMut::with_capacity(RESIDUE_CAPACITY),
            state: DecodeState::Command,
        }
    }

    /// Buffer `input` and decode every frame it completes.
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.residue.extend_from_slice(input);
        let mut frames = Vec::new();
        while let Some(frame) = self.decode_next()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes currently buffered awaiting more input.
    pub fn residue_len(&self) -> usize {
        self.residue.len()
    }

    fn decode_next(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            match std::mem::replace(&mut self.state, DecodeState::Command) {
                DecodeState::Command => {
                    self.skip_blank_lines();
                    let Some(line) = self.take_line()? else {
                        return Ok(None);
                    };
                    self.state = DecodeState::Headers {
                        command: line,
                        headers: Headers::new(),
                    };
                }
                DecodeState::Headers {
                    command,
                    mut headers,
                } => {
                    let Some(line) = self.take_line()? else {
                        self.state = DecodeState::Headers { command, headers };
                        return Ok(None);
                    };
                    if line.is_empty() {
                        let content_length = headers
                            .get(headers::CONTENT_LENGTH)
                            .and_then(|v| v.trim().parse::<usize>().ok());
                        self.state = DecodeState::Body {
                            command,
                            headers,
                            content_length,
                        };
                    } else {
                        let (key, value) = split_header_line(&line);
                        headers.push(key, value);
                        self.state = DecodeState::Headers { command, headers };
                    }
                }
                DecodeState::Body {
                    command,
                    headers,
                    content_length,
                } => {
                    let body = match content_length {
                        Some(len) => {
                            if self.residue.len() < len {
                                self.state = DecodeState::Body {
                                    command,
                                    headers,
                                    content_length,
                                };
                                return Ok(None);
                            }
                            let body = self.residue.split_to(len).freeze();
                            // Consume the optional trailing NUL terminator.
                            if self.residue.first() == Some(&0) {
                                let _ = self.residue.split_to(1);
                            }
                            body
                        }
                        None => {
                            // Scan for the NUL terminator; it is not assumed
                            // to be adjacent to anything.
                            let Some(nul) = self.residue.iter().position(|&b| b == 0) else {
                                self.state = DecodeState::Body {
                                    command,
                                    headers,
                                    content_length,
                                };
                                return Ok(None);
                            };
                            let body = self.residue.split_to(nul).freeze();
                            let _ = self.residue.split_to(1);
                            body
                        }
                    };
                    return Ok(Some(Frame {
                        command,
                        headers,
                        body,
                    }));
                }
            }
        }
    }

    fn skip_blank_lines(&mut self) {
        while matches!(self.residue.first(), Some(b'\n') | Some(b'\r')) {
            // A lone CR with nothing after it could still be the start of a
            // CRLF split across reads; leave it for the line scanner.
            if self.residue[0] == b'\r' && self.residue.len() == 1 {
                break;
            }
            if self.residue[0] == b'\r' && self.residue[1] != b'\n' {
                break;
            }
            let skip = if self.residue[0] == b'\r' { 2 } else { 1 };
            let _ = self.residue.split_to(skip);
        }
    }

    /// Take one text line if a full `\n` terminator is buffered, stripping an
    /// optional preceding `\r`. Partial lines stay in the residue.
    fn take_line(&mut self) -> Result<Option<String>, FrameError> {
        let Some(newline) = self.residue.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let mut line = self.residue.split_to(newline);
        let _ = self.residue.split_to(1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| FrameError::InvalidUtf8)
    }
}

/// Split a header line on the first `:`, trimming whitespace from both
/// sides. Lines without a colon become a key with an empty value rather
/// than an error.
fn split_header_line(line: &str) -> (String, String) {
    match line.split_once(':') {
        Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
        None => (line.trim().to_string(), String::new()),
    }
}

/// Serialize a frame: command line, `key: value` headers, blank line, body,
/// NUL terminator. `content-length` is always recomputed from the body,
/// overwriting any caller-supplied value. Heartbeat frames serialize as a
/// bare newline.
pub fn encode(frame: &Frame) -> Bytes {
    if frame.is_heartbeat() {
        return Bytes::from_static(b"\n");
    }
    debug_assert!(!frame.command.is_empty());
    let mut out = BytesMut::with_capacity(64 + frame.body.len());
    out.put_slice(frame.command.as_bytes());
    out.put_u8(b'\n');
    for (key, value) in frame.headers.iter() {
        if key == headers::CONTENT_LENGTH {
            continue;
        }
        out.put_slice(key.as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_u8(b'\n');
    }
    out.put_slice(headers::CONTENT_LENGTH.as_bytes());
    out.put_slice(b": ");
    out.put_slice(frame.body.len().to_string().as_bytes());
    out.put_u8(b'\n');
    out.put_u8(b'\n');
    out.put_slice(&frame.body);
    out.put_u8(0);
    out.freeze()
}
