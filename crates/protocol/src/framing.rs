//! Newline-delimited record framing
//!
//! The backend stream is a sequence of UTF-8 JSON objects, one per line.
//! Reads arrive in arbitrary chunks, so a record may be split across several
//! of them; the framer buffers until the terminating newline shows up.

use thiserror::Error;

use crate::message::Envelope;

/// Upper bound for a single buffered record
pub const DEFAULT_MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

const PREVIEW_CHARS: usize = 200;

/// A record that could not be turned into an envelope
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("record is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed record: {source} (preview: {preview})")]
    Malformed {
        #[source]
        source: serde_json::Error,
        preview: String,
    },

    #[error("record exceeded {limit} bytes without a newline")]
    RecordTooLarge { limit: usize },

    #[error("stream ended with {len} bytes of an unterminated record")]
    TruncatedRecord { len: usize },
}

/// Incremental splitter for the inbound byte stream
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_record_len: usize,
    /// Set after an oversized record; bytes are skipped until the next newline
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_record_len(DEFAULT_MAX_RECORD_LEN)
    }

    pub fn with_max_record_len(max_record_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_record_len,
            discarding: false,
        }
    }

    /// Number of buffered bytes belonging to an incomplete record
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk and return every record it completed, in order.
    ///
    /// Blank lines are skipped. A bad record yields an error in its slot and
    /// never affects the records around it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Envelope, ProtocolError>> {
        let mut out = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.buf.clear();
                continue;
            }

            self.buf.extend_from_slice(head);
            let line = std::mem::take(&mut self.buf);
            if let Some(record) = parse_line(&line) {
                out.push(record);
            }
        }

        if !rest.is_empty() && !self.discarding {
            self.buf.extend_from_slice(rest);
            if self.buf.len() > self.max_record_len {
                self.buf.clear();
                self.discarding = true;
                out.push(Err(ProtocolError::RecordTooLarge {
                    limit: self.max_record_len,
                }));
            }
        }

        out
    }

    /// Call at end of stream. Reports a dangling partial record, if any.
    pub fn finish(&mut self) -> Option<ProtocolError> {
        self.discarding = false;
        let leftover = std::mem::take(&mut self.buf);
        if leftover.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(ProtocolError::TruncatedRecord {
                len: leftover.len(),
            })
        }
    }
}

fn parse_line(line: &[u8]) -> Option<Result<Envelope, ProtocolError>> {
    let text = match std::str::from_utf8(line) {
        Ok(t) => t.trim(),
        Err(_) => return Some(Err(ProtocolError::InvalidUtf8)),
    };
    if text.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<Envelope>(text).map_err(|source| ProtocolError::Malformed {
            source,
            preview: text.chars().take(PREVIEW_CHARS).collect(),
        }),
    )
}

/// Serialize an envelope as one outbound record, newline included
pub fn encode_record(envelope: &Envelope) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(envelope)?;
    line.push('\n');
    Ok(line)
}
