//! Server-Sent-Events transport decoding
//!
//! Frames look like `data: <json>\n\n` where the JSON is `{"text": ...}`
//! (a chunk for the parser) or `{"error": ...}` (abort). A frame whose
//! payload is `[DONE]` ends the stream.

use crate::error::{Error, Result};
use futures::Stream;
use serde::Deserialize;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Payload marking the end of the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Text(String),
    Error(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Incremental frame decoder over raw bytes.
///
/// Bytes accumulate until a blank line closes a frame, so multi-byte
/// characters split across reads are reassembled before decoding.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend(bytes.iter().copied().filter(|&b| b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = find_frame_end(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            self.decode(&raw[..end], &mut frames);
        }
        frames
    }

    /// Decode a final frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let raw = std::mem::take(&mut self.buffer);
        let mut frames = Vec::new();
        if !raw.iter().all(u8::is_ascii_whitespace) {
            self.decode(&raw, &mut frames);
        }
        frames
    }

    fn decode(&mut self, raw: &[u8], frames: &mut Vec<SseFrame>) {
        if self.done {
            return;
        }

        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping SSE frame with invalid UTF-8");
                return;
            }
        };

        let data: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|value| value.strip_prefix(' ').unwrap_or(value))
            .collect();
        if data.is_empty() {
            return;
        }
        let data = data.join("\n");

        if data.trim() == DONE_SENTINEL {
            self.done = true;
            frames.push(SseFrame::Done);
            return;
        }

        match serde_json::from_str::<Payload>(&data) {
            Ok(Payload {
                error: Some(message),
                ..
            }) => frames.push(SseFrame::Error(message)),
            Ok(Payload {
                text: Some(text), ..
            }) => frames.push(SseFrame::Text(text)),
            Ok(_) => tracing::debug!("SSE frame without text or error field"),
            Err(e) => tracing::warn!(error = %e, "Skipping SSE frame with malformed JSON"),
        }
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

struct SourceState<R> {
    reader: R,
    buf: Vec<u8>,
    pending: VecDeque<SseFrame>,
    finished: bool,
    decoder: SseDecoder,
}

/// Decoded text chunks from an SSE byte source.
///
/// An error frame yields `Err(Error::Stream)` and ends the stream; `[DONE]`
/// or end of input ends it cleanly.
pub fn sse_text_stream<R>(reader: R, read_size: usize) -> impl Stream<Item = Result<String>>
where
    R: AsyncRead + Unpin,
{
    let state = SourceState {
        reader,
        buf: vec![0u8; read_size.max(1)],
        pending: VecDeque::new(),
        finished: false,
        decoder: SseDecoder::new(),
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                match frame {
                    SseFrame::Text(text) => return Some((Ok(text), st)),
                    SseFrame::Error(message) => {
                        st.finished = true;
                        st.pending.clear();
                        return Some((Err(Error::Stream(message)), st));
                    }
                    SseFrame::Done => return None,
                }
            }
            if st.finished {
                return None;
            }

            match st.reader.read(&mut st.buf).await {
                Ok(0) => {
                    st.finished = true;
                    let frames = st.decoder.finish();
                    st.pending.extend(frames);
                }
                Ok(n) => {
                    let frames = st.decoder.feed(&st.buf[..n]);
                    st.pending.extend(frames);
                }
                Err(e) => {
                    st.finished = true;
                    return Some((Err(Error::Io(e)), st));
                }
            }
        }
    })
}

/// Plain model text from a byte source, for captures that are not SSE-framed.
///
/// UTF-8 sequences split across reads are held back until complete.
pub fn raw_text_stream<R>(reader: R, read_size: usize) -> impl Stream<Item = Result<String>>
where
    R: AsyncRead + Unpin,
{
    let state = (reader, vec![0u8; read_size.max(1)], Vec::<u8>::new(), false);

    futures::stream::unfold(state, |(mut reader, mut buf, mut carry, finished)| async move {
        if finished {
            return None;
        }
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    if carry.is_empty() {
                        return None;
                    }
                    let tail = String::from_utf8_lossy(&carry).into_owned();
                    return Some((Ok(tail), (reader, buf, Vec::new(), true)));
                }
                Ok(n) => {
                    carry.extend_from_slice(&buf[..n]);
                    let text = take_complete_utf8(&mut carry);
                    if !text.is_empty() {
                        return Some((Ok(text), (reader, buf, carry, false)));
                    }
                }
                Err(e) => return Some((Err(Error::Io(e)), (reader, buf, carry, true))),
            }
        }
    })
}

/// Drain the longest decodable prefix, keeping an incomplete trailing sequence.
fn take_complete_utf8(carry: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(carry) {
            Ok(text) => {
                out.push_str(text);
                carry.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&carry[..valid]));
                match e.error_len() {
                    // Incomplete sequence at the end: wait for more bytes.
                    None => {
                        carry.drain(..valid);
                        return out;
                    }
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        carry.drain(..valid + len);
                    }
                }
            }
        }
    }
}
