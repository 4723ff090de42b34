//! Incremental frame decoding.
//!
//! Bytes arrive in arbitrary chunks. Lines are split on `\n` at the byte
//! level before any UTF-8 decoding, so a multi-byte character split across
//! two chunks is reassembled intact. An event is dispatched when the blank
//! line ending its frame arrives; multiple `data:` lines in one frame are
//! joined with `\n`.

use crate::wire::{DONE_PAYLOAD, WireEvent};

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(WireEvent),
    Done,
    /// A frame whose payload is not a valid event.
    Malformed { payload: String, reason: String },
}

/// Largest frame, in bytes, the decoder holds before giving up on it.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// How much of an oversized frame its `Malformed` report quotes.
const OVERSIZE_PREVIEW_CHARS: usize = 120;

/// Input still to be thrown away after an oversized frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Skip {
    #[default]
    Nothing,
    /// The tail of a line that was cut off mid-way.
    RestOfLine,
    /// Every line up to the blank line ending the frame.
    RestOfFrame,
}

/// Buffers partial input until frame boundaries are seen.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a newline.
    scanned: usize,
    data_lines: Vec<String>,
    data_bytes: usize,
    max_frame_bytes: usize,
    skip: Skip,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            data_lines: Vec::new(),
            data_bytes: 0,
            max_frame_bytes: max_frame_bytes.max(1),
            skip: Skip::Nothing,
        }
    }

    /// Feed a chunk; returns every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(chunk);

        let mut start = 0;
        let mut search = self.scanned;
        while let Some(offset) = buffer[search..].iter().position(|&b| b == b'\n') {
            let end = search + offset;
            if let Some(frame) = self.line(trim_cr(&buffer[start..end])) {
                frames.push(frame);
            }
            start = end + 1;
            search = start;
        }
        buffer.drain(..start);
        self.scanned = buffer.len();
        self.buffer = buffer;

        if self.buffer.len() + self.data_bytes > self.max_frame_bytes {
            if self.skip == Skip::Nothing {
                frames.push(self.overflow());
            } else {
                self.buffer.clear();
                self.scanned = 0;
                self.skip = Skip::RestOfLine;
            }
        }

        frames
    }

    /// Flush at end of input: an unterminated last line and any pending
    /// data lines form one final frame.
    pub fn finish(&mut self) -> Option<Frame> {
        let line = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let frame = if line.is_empty() {
            None
        } else {
            self.line(trim_cr(&line))
        };
        let frame = frame.or_else(|| self.dispatch());
        self.skip = Skip::Nothing;
        frame
    }

    /// Bytes and lines held back waiting for a frame boundary.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.data_lines.is_empty()
    }

    fn line(&mut self, raw: &[u8]) -> Option<Frame> {
        match self.skip {
            Skip::RestOfLine => {
                self.skip = Skip::RestOfFrame;
                return None;
            }
            Skip::RestOfFrame => {
                if raw.is_empty() {
                    self.skip = Skip::Nothing;
                }
                return None;
            }
            Skip::Nothing => {}
        }

        if raw.is_empty() {
            return self.dispatch();
        }

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(_) => {
                return Some(Frame::Malformed {
                    payload: String::from_utf8_lossy(raw).into_owned(),
                    reason: "invalid UTF-8".into(),
                });
            }
        };

        // Comments and non-data fields (event:, id:, retry:) carry nothing we use.
        if line.starts_with(':') {
            return None;
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            self.data_bytes += data.len();
            self.data_lines.push(data.to_string());
            if self.data_bytes > self.max_frame_bytes {
                return Some(self.overflow());
            }
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        if self.data_lines.is_empty() {
            return None;
        }
        self.data_bytes = 0;
        let payload = std::mem::take(&mut self.data_lines).join("\n");
        Some(parse_payload(payload))
    }

    /// Drop the frame being assembled and skip the rest of it.
    fn overflow(&mut self) -> Frame {
        let preview: String = match self.data_lines.first() {
            Some(first) => first.chars().take(OVERSIZE_PREVIEW_CHARS).collect(),
            None => String::from_utf8_lossy(&self.buffer)
                .chars()
                .take(OVERSIZE_PREVIEW_CHARS)
                .collect(),
        };
        self.skip = if self.buffer.is_empty() {
            Skip::RestOfFrame
        } else {
            Skip::RestOfLine
        };
        self.buffer.clear();
        self.scanned = 0;
        self.data_lines.clear();
        self.data_bytes = 0;
        Frame::Malformed {
            payload: preview,
            reason: format!("frame exceeds {} bytes", self.max_frame_bytes),
        }
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_payload(payload: String) -> Frame {
    if payload.trim() == DONE_PAYLOAD {
        return Frame::Done;
    }
    match serde_json::from_str::<WireEvent>(&payload) {
        Ok(event) => Frame::Event(event),
        Err(e) => Frame::Malformed {
            payload,
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{DONE_FRAME, encode};
    use caduceus_core::Step;

    fn sample_stream() -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&encode(&WireEvent::from(&Step::thought(1, "Évaluer la clairance — 38 mL/min ✓"))).unwrap());
        out.push_str(&encode(&WireEvent::from(&Step::observation(1, "日本語の観察"))).unwrap());
        out.push_str(DONE_FRAME);
        out.into_bytes()
    }

    fn decode_in_chunks(bytes: &[u8], size: usize) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(size) {
            frames.extend(decoder.push(chunk));
        }
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn whole_input_decodes() {
        let frames = decode_in_chunks(&sample_stream(), usize::MAX);
        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], Frame::Event(WireEvent::Thought { .. })));
        assert!(matches!(frames[1], Frame::Event(WireEvent::Observation { .. })));
        assert_eq!(frames[2], Frame::Done);
    }

    #[test]
    fn every_chunk_size_yields_the_same_frames() {
        let bytes = sample_stream();
        let expected = decode_in_chunks(&bytes, usize::MAX);
        for size in 1..=bytes.len() {
            assert_eq!(decode_in_chunks(&bytes, size), expected, "chunk size {size}");
        }
    }

    #[test]
    fn comments_and_other_fields_ignored() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b": keep-alive\n\nevent: progress\nid: 7\ndata: [DONE]\n\n");
        assert_eq!(frames, vec![Frame::Done]);
    }

    #[test]
    fn crlf_line_endings() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"type\":\"error\",\"error\":\"x\"}\r\n\r\n");
        assert_eq!(
            frames,
            vec![Frame::Event(WireEvent::Error { error: "x".into() })]
        );
    }

    #[test]
    fn malformed_payload_is_reported_not_fatal() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {not json\n\ndata: [DONE]\n\n");
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Malformed { .. }));
        assert_eq!(frames[1], Frame::Done);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"type\":\"error\",\ndata: \"error\":\"split\"}\n\n");
        assert_eq!(
            frames,
            vec![Frame::Event(WireEvent::Error {
                error: "split".into()
            })]
        );
    }

    #[test]
    fn oversized_line_is_reported_once_and_skipped() {
        let mut decoder = FrameDecoder::with_max_frame_bytes(64);
        let long = format!("data: {}", "x".repeat(500));
        let mut frames = Vec::new();
        for chunk in long.as_bytes().chunks(10) {
            frames.extend(decoder.push(chunk));
        }
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Malformed { reason, payload } => {
                assert!(reason.contains("exceeds 64 bytes"));
                assert!(payload.starts_with("data: xxx"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let frames = decoder.push(b"xxxx\n\ndata: [DONE]\n\n");
        assert_eq!(frames, vec![Frame::Done]);
    }

    #[test]
    fn oversized_multi_line_frame_is_skipped() {
        let mut decoder = FrameDecoder::with_max_frame_bytes(64);
        let mut input = String::new();
        for _ in 0..10 {
            input.push_str("data: 0123456789\n");
        }
        input.push_str("\ndata: [DONE]\n\n");

        let frames = decoder.push(input.as_bytes());
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Malformed { reason, .. } if reason.contains("exceeds")));
        assert_eq!(frames[1], Frame::Done);
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        assert!(decoder.has_pending());
        assert_eq!(decoder.finish(), Some(Frame::Done));
        assert!(!decoder.has_pending());
    }
}
