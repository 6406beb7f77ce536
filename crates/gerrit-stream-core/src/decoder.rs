//! Newline-delimited JSON framing.
//!
//! The wire format is one JSON object per line, terminated by `\n`. Chunk
//! boundaries from the transport never line up with record boundaries, so
//! bytes are buffered until a terminator arrives and only complete lines are
//! decoded. A malformed line costs exactly that line.
//!
//! [`EventCodec`] is the framing implementation and plugs into
//! [`tokio_util::codec::FramedRead`]. [`StreamDecoder`] wraps it with an
//! owned buffer for push-style use (`feed` then `extract_ready`).

use std::marker::PhantomData;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::{DecodeError, Event};

/// Default cap on a single record: 16 MiB.
///
/// Large `comment-added` events are far below this; anything bigger is a
/// misbehaving peer.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

/// How much of a malformed record is kept in the error.
const EXCERPT_BYTES: usize = 256;

/// Line-framed JSON decoder for a stream of `E`.
///
/// Yields `Ok(event)` or `Err(DecodeError)` per record, in stream order.
/// Blank lines are skipped and a trailing `\r` is ignored.
#[derive(Debug)]
pub struct EventCodec<E> {
    /// Bytes of the buffered partial record already searched for `\n`.
    next_index: usize,
    max_record_bytes: usize,
    /// Set while dropping the rest of an oversized record.
    discarding: bool,
    _event: PhantomData<fn() -> E>,
}

impl<E> EventCodec<E> {
    /// Create a codec with [`DEFAULT_MAX_RECORD_BYTES`].
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_record_bytes(DEFAULT_MAX_RECORD_BYTES)
    }

    /// Create a codec with a custom per-record cap.
    #[must_use]
    pub const fn with_max_record_bytes(max_record_bytes: usize) -> Self {
        Self {
            next_index: 0,
            max_record_bytes,
            discarding: false,
            _event: PhantomData,
        }
    }

    #[must_use]
    pub const fn max_record_bytes(&self) -> usize {
        self.max_record_bytes
    }
}

impl<E> Default for EventCodec<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventCodec<E> {
    /// Take the next complete record out of `src`, if there is one.
    ///
    /// After this returns `None`, `src` holds at most one partial record.
    pub fn next_frame(&mut self, src: &mut BytesMut) -> Option<Result<E, DecodeError>> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_record_bytes {
                    if !self.discarding {
                        tracing::warn!(
                            limit = self.max_record_bytes,
                            "Record exceeds size limit, discarding until next newline"
                        );
                    }
                    src.clear();
                    self.discarding = true;
                    self.next_index = 0;
                } else {
                    self.next_index = src.len();
                }
                return None;
            };

            let end = self.next_index + offset;
            let line = src.split_to(end + 1);
            self.next_index = 0;

            if std::mem::take(&mut self.discarding) {
                return Some(Err(self.too_long()));
            }

            let record = line[..end].strip_suffix(b"\r").unwrap_or(&line[..end]);
            if record.len() > self.max_record_bytes {
                return Some(Err(self.too_long()));
            }
            if record.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(decode_record(record));
        }
    }

    /// Flush state at end of stream.
    ///
    /// Returns the error for an unterminated tail, if any, and leaves `src`
    /// empty.
    pub fn finish(&mut self, src: &mut BytesMut) -> Option<DecodeError> {
        self.next_index = 0;
        let bytes = src.len();
        let blank = src.iter().all(u8::is_ascii_whitespace);
        src.clear();

        if std::mem::take(&mut self.discarding) {
            Some(self.too_long())
        } else if blank {
            None
        } else {
            Some(DecodeError::Truncated { bytes })
        }
    }

    const fn too_long(&self) -> DecodeError {
        DecodeError::TooLong {
            limit: self.max_record_bytes,
        }
    }
}

fn decode_record<E: Event>(record: &[u8]) -> Result<E, DecodeError> {
    serde_json::from_slice(record).map_err(|e| DecodeError::Malformed {
        excerpt: String::from_utf8_lossy(&record[..record.len().min(EXCERPT_BYTES)]).into_owned(),
        reason: e.to_string(),
    })
}

impl<E: Event> Decoder for EventCodec<E> {
    type Item = Result<E, DecodeError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.next_frame(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.next_frame(src) {
            return Ok(Some(item));
        }
        Ok(self.finish(src).map(Err))
    }
}

/// Push-style decoder that owns its frame buffer.
///
/// ```ignore
/// let mut decoder = StreamDecoder::<RawEvent>::new();
/// decoder.feed(b"{\"type\":\"x\"}\n{\"typ");
/// assert_eq!(decoder.extract_ready().len(), 1);
/// ```
#[derive(Debug)]
pub struct StreamDecoder<E> {
    codec: EventCodec<E>,
    buffer: BytesMut,
}

impl<E: Event> StreamDecoder<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(EventCodec::new())
    }

    #[must_use]
    pub fn with_max_record_bytes(max_record_bytes: usize) -> Self {
        Self::with_codec(EventCodec::with_max_record_bytes(max_record_bytes))
    }

    fn with_codec(codec: EventCodec<E>) -> Self {
        Self {
            codec,
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Append a chunk read from the stream.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Decode the next complete record, if one is buffered.
    pub fn next_record(&mut self) -> Option<Result<E, DecodeError>> {
        self.codec.next_frame(&mut self.buffer)
    }

    /// Decode every complete record buffered so far, in order.
    ///
    /// A trailing partial record stays buffered for the next `feed`.
    pub fn extract_ready(&mut self) -> Vec<Result<E, DecodeError>> {
        std::iter::from_fn(|| self.next_record()).collect()
    }

    /// Drain at end of stream: remaining records, then an error for an
    /// unterminated tail.
    pub fn finish(&mut self) -> Vec<Result<E, DecodeError>> {
        let mut out = self.extract_ready();
        if let Some(err) = self.codec.finish(&mut self.buffer) {
            out.push(Err(err));
        }
        out
    }

    /// Bytes held for the current partial record.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl<E: Event> Default for StreamDecoder<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::RawEvent;

    const THREE: &str = "{\"type\":\"a\",\"v\":1}\n{\"type\":\"b\",\"msg\":\"h\u{e9}\u{1f600}\"}\n{\"type\":\"c\"}\n";

    fn decode_chunks<C: AsRef<[u8]>>(chunks: &[C]) -> Vec<Result<RawEvent, DecodeError>> {
        let mut decoder = StreamDecoder::<RawEvent>::new();
        let mut out = Vec::new();
        for chunk in chunks {
            decoder.feed(chunk.as_ref());
            out.extend(decoder.extract_ready());
        }
        out.extend(decoder.finish());
        out
    }

    fn kinds(results: &[Result<RawEvent, DecodeError>]) -> Vec<String> {
        results
            .iter()
            .map(|r| match r {
                Ok(ev) => ev.kind().to_string(),
                Err(e) => format!("error: {e}"),
            })
            .collect()
    }

    #[test]
    fn test_two_chunk_split_mid_record() {
        let mut decoder = StreamDecoder::<RawEvent>::new();
        decoder.feed(b"{\"type\":\"x\"}\n{\"typ");
        let first = decoder.extract_ready();
        assert_eq!(kinds(&first), ["x"]);
        assert_eq!(decoder.buffered_len(), 5);

        decoder.feed(b"e\":\"y\"}\n");
        let second = decoder.extract_ready();
        assert_eq!(kinds(&second), ["y"]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_no_event_before_terminator() {
        let mut decoder = StreamDecoder::<RawEvent>::new();
        decoder.feed(b"{\"type\":\"x\"}");
        assert!(decoder.extract_ready().is_empty());
        decoder.feed(b"\n");
        assert_eq!(kinds(&decoder.extract_ready()), ["x"]);
    }

    #[test]
    fn test_every_two_way_split_yields_same_events() {
        let bytes = THREE.as_bytes();
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            let out = decode_chunks(&[a, b]);
            assert_eq!(kinds(&out), ["a", "b", "c"], "split at {split}");
        }
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let chunks: Vec<&[u8]> = THREE.as_bytes().chunks(1).collect();
        let out = decode_chunks(chunks.as_slice());
        assert_eq!(kinds(&out), ["a", "b", "c"]);
        let b = out[1].as_ref().unwrap();
        assert_eq!(b.get("msg").unwrap(), "h\u{e9}\u{1f600}");
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        assert!(decode_chunks::<&[u8]>(&[]).is_empty());
        assert!(decode_chunks(&[b"", b""]).is_empty());
    }

    #[test]
    fn test_malformed_line_is_isolated() {
        let input = b"{\"type\":\"a\"}\n{\"type\": oops}\n{\"type\":\"c\"}\n";
        let out = decode_chunks(&[input]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap().kind(), "a");
        assert!(matches!(
            &out[1],
            Err(DecodeError::Malformed { excerpt, .. }) if excerpt == "{\"type\": oops}"
        ));
        assert_eq!(out[2].as_ref().unwrap().kind(), "c");
    }

    #[test]
    fn test_record_without_discriminant_is_a_decode_error() {
        let out = decode_chunks(&[b"{\"change\":{}}\n{\"type\":\"z\"}\n"]);
        assert!(matches!(out[0], Err(DecodeError::Malformed { .. })));
        assert_eq!(out[1].as_ref().unwrap().kind(), "z");
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let out = decode_chunks(&[b"\n  \n{\"type\":\"a\"}\r\n\r\n{\"type\":\"b\"}\n"]);
        assert_eq!(kinds(&out), ["a", "b"]);
    }

    #[test]
    fn test_oversized_record_reported_once_then_recovers() {
        let mut decoder = StreamDecoder::<RawEvent>::with_max_record_bytes(32);
        decoder.feed(b"{\"type\":\"big\",\"pad\":\"");
        decoder.feed(&[b'x'; 40]);
        assert!(decoder.extract_ready().is_empty());
        // Nothing of the oversized record is retained.
        assert!(decoder.buffered_len() <= 32);
        decoder.feed(&[b'x'; 40]);
        assert!(decoder.extract_ready().is_empty());
        decoder.feed(b"\"}\n{\"type\":\"ok\"}\n");

        let out = decoder.extract_ready();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Err(DecodeError::TooLong { limit: 32 }));
        assert_eq!(out[1].as_ref().unwrap().kind(), "ok");
    }

    #[test]
    fn test_oversized_complete_line_in_one_chunk() {
        let mut decoder = StreamDecoder::<RawEvent>::with_max_record_bytes(16);
        decoder.feed(b"{\"type\":\"abcdefghijklmnop\"}\n{\"type\":\"s\"}\n");
        let out = decoder.extract_ready();
        assert_eq!(out[0], Err(DecodeError::TooLong { limit: 16 }));
        assert_eq!(out[1].as_ref().unwrap().kind(), "s");
    }

    #[test]
    fn test_unterminated_tail_is_truncated_not_decoded() {
        let out = decode_chunks(&[b"{\"type\":\"a\"}\n{\"type\":\"b\"}"]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().kind(), "a");
        assert_eq!(out[1], Err(DecodeError::Truncated { bytes: 12 }));

        let blank_tail = decode_chunks(&[b"{\"type\":\"a\"}\n  "]);
        assert_eq!(kinds(&blank_tail), ["a"]);
    }

    #[tokio::test]
    async fn test_framed_read_over_chunked_reader() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"x\"}\n{\"typ")
            .read(b"e\":\"y\"}\n{\"type\":")
            .read(b" 1}\n{\"type\":\"z\"}")
            .build();

        let frames: Vec<_> = FramedRead::new(reader, EventCodec::<RawEvent>::new())
            .collect()
            .await;
        let results: Vec<_> = frames.into_iter().map(Result::unwrap).collect();

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().kind(), "x");
        assert_eq!(results[1].as_ref().unwrap().kind(), "y");
        assert!(matches!(results[2], Err(DecodeError::Malformed { .. })));
        assert_eq!(results[3], Err(DecodeError::Truncated { bytes: 12 }));
    }
}
