// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Framing for the worker's stdout.
//!
//! Every frame is a one-byte tag, a big-endian `u32` payload length and the payload. A worker
//! writes any number of progress frames followed by exactly one record frame. Payloads are
//! never scanned for delimiters, so error text can contain anything.

use crate::errors::FrameDecodeError;
use bytes::{Buf, BufMut, BytesMut};
use hivetest_metadata::ResultRecord;

/// The largest payload a decoder accepts.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 5;
const PROGRESS_TAG: u8 = b'P';
const RECORD_TAG: u8 = b'R';

/// A message from a worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    /// Progress text, forwarded verbatim.
    Progress(String),

    /// The worker's result record. Always the last frame.
    Record(ResultRecord),
}

impl Frame {
    /// Appends the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), serde_json::Error> {
        let (tag, payload) = match self {
            Frame::Progress(text) => (PROGRESS_TAG, text.as_bytes().to_vec()),
            Frame::Record(record) => (RECORD_TAG, serde_json::to_vec(record)?),
        };
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u8(tag);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

/// Incrementally decodes frames from a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the internal buffer, for reading into directly.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Appends bytes to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decodes the next complete frame, if there is one.
    pub fn decode(&mut self) -> Result<Option<Frame>, FrameDecodeError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let tag = self.buf[0];
        if tag != PROGRESS_TAG && tag != RECORD_TAG {
            return Err(FrameDecodeError::UnknownTag(tag));
        }
        let len = (&self.buf[1..HEADER_LEN]).get_u32() as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(FrameDecodeError::TooLarge {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }
        if self.buf.len() < HEADER_LEN + len {
            self.buf.reserve(HEADER_LEN + len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len);
        let frame = if tag == PROGRESS_TAG {
            Frame::Progress(String::from_utf8_lossy(&payload).into_owned())
        } else {
            let record = serde_json::from_slice(&payload).map_err(|error| {
                FrameDecodeError::InvalidRecord {
                    message: error.to_string(),
                }
            })?;
            Frame::Record(record)
        };
        Ok(Some(frame))
    }

    /// Checks that the stream ended on a frame boundary.
    pub fn finish(&self) -> Result<(), FrameDecodeError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(FrameDecodeError::Truncated {
                remaining: self.buf.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivetest_metadata::RecordError;
    use pretty_assertions::assert_eq;
    use test_strategy::proptest;

    fn record_with_error(trace: &str) -> ResultRecord {
        ResultRecord {
            failed: 1,
            errors: vec![RecordError {
                title: "frames.rs: R\u{0}P".to_owned(),
                trace: trace.to_owned(),
            }],
            ..ResultRecord::default()
        }
    }

    #[test]
    fn decodes_across_partial_reads() {
        let mut encoded = BytesMut::new();
        Frame::Progress("..F".to_owned())
            .encode(&mut encoded)
            .unwrap();
        let record = record_with_error("R\0\0\0\u{5}P looks like a frame");
        Frame::Record(record.clone()).encode(&mut encoded).unwrap();

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in encoded.chunks(3) {
            decoder.extend(chunk);
            while let Some(frame) = decoder.decode().unwrap() {
                frames.push(frame);
            }
        }
        decoder.finish().unwrap();

        assert_eq!(
            frames,
            vec![Frame::Progress("..F".to_owned()), Frame::Record(record)]
        );
    }

    #[test]
    fn rejects_unknown_tags_and_oversized_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"X\0\0\0\x01!");
        assert_eq!(decoder.decode(), Err(FrameDecodeError::UnknownTag(b'X')));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&[b'P', 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(
            decoder.decode(),
            Err(FrameDecodeError::TooLarge {
                len: u32::MAX as usize,
                max: MAX_PAYLOAD_LEN,
            })
        );
    }

    #[test]
    fn reports_truncation_and_bad_records() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"P\0\0\0\x10abc");
        assert_eq!(decoder.decode(), Ok(None));
        assert_eq!(
            decoder.finish(),
            Err(FrameDecodeError::Truncated { remaining: 8 })
        );

        let mut decoder = FrameDecoder::new();
        decoder.extend(b"R\0\0\0\x02{]");
        assert!(matches!(
            decoder.decode(),
            Err(FrameDecodeError::InvalidRecord { .. })
        ));
    }

    #[proptest(cases = 128)]
    fn arbitrary_error_text_survives(trace: String, #[strategy(1..64_usize)] chunk: usize) {
        let record = record_with_error(&trace);
        let mut encoded = BytesMut::new();
        Frame::Record(record.clone()).encode(&mut encoded).unwrap();

        let mut decoder = FrameDecoder::new();
        let mut decoded = None;
        for piece in encoded.chunks(chunk) {
            decoder.extend(piece);
            if let Some(frame) = decoder.decode().unwrap() {
                decoded = Some(frame);
            }
        }
        proptest::prop_assert_eq!(decoded, Some(Frame::Record(record)));
        proptest::prop_assert!(decoder.finish().is_ok());
    }
}
