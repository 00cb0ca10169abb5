// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encoding and incremental decoding.
//!
//! Frames are written as:
//! - ASCII decimal byte length of the JSON envelope
//! - `#`
//! - the JSON envelope itself
//!
//! e.g. `15#{"data":"ping"}`. There is no other delimiter, so the decoder
//! keeps per-connection state across reads: bytes that do not yet form a
//! complete frame stay buffered until the next [`FrameDecoder::feed`].

use tracing::debug;

use crate::error::Result;
use crate::protocol::Packet;

/// Largest accepted frame length. Longer headers are treated as corrupt.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Longest accepted length header, padding included.
const MAX_HEADER_LEN: usize = 16;

const LENGTH_DELIMITER: u8 = b'#';

/// Encodes a packet as one wire frame.
pub fn encode(packet: &Packet) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(packet)?;
    let header = json.len().to_string();
    let mut frame = Vec::with_capacity(header.len() + 1 + json.len());
    frame.extend_from_slice(header.as_bytes());
    frame.push(LENGTH_DELIMITER);
    frame.extend_from_slice(&json);
    Ok(frame)
}

/// Incremental decoder for one physical connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    expected_len: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes and returns the frames they complete.
    ///
    /// The returned iterator is lazy. Frames it does not yield before being
    /// dropped stay buffered and come out of the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(bytes);
        Frames { decoder: self }
    }

    /// Number of buffered bytes not yet part of a decoded frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Length announced by the current frame header, if one has been read.
    pub fn expected_len(&self) -> Option<usize> {
        self.expected_len
    }

    fn next_frame(&mut self) -> Option<Result<Packet>> {
        if self.expected_len.is_none() {
            // A header split across reads has no delimiter yet.
            let scan = self.buffer.len().min(MAX_HEADER_LEN + 1);
            let Some(pos) = self.buffer[..scan].iter().position(|b| *b == LENGTH_DELIMITER)
            else {
                if self.buffer.len() > MAX_HEADER_LEN {
                    debug!(
                        "discarding {} bytes without a frame header",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                }
                return None;
            };
            match parse_length(&self.buffer[..pos]) {
                Some(len) => {
                    self.expected_len = Some(len);
                    self.buffer.drain(..=pos);
                }
                None => {
                    debug!(
                        "discarding {} bytes after malformed frame header",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                    return None;
                }
            }
        }

        let len = self.expected_len?;
        if self.buffer.len() < len {
            return None;
        }

        let payload: Vec<u8> = self.buffer.drain(..len).collect();
        self.expected_len = None;
        Some(serde_json::from_slice(&payload).map_err(Into::into))
    }
}

/// Frames completed by one [`FrameDecoder::feed`] call.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}

fn parse_length(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<usize>().ok().filter(|len| *len <= MAX_FRAME_LEN)
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
