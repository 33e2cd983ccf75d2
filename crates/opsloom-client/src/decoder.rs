//! Newline-delimited JSON decoder for the `POST /chat` response body.
//!
//! [`LineDecoder`] is the synchronous core: push raw chunks, pull complete
//! records. [`RecordStream`] drives it from a byte stream and honors the
//! cancellation signal once per chunk.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};

use opsloom_core::CancelSignal;

use crate::error::{ClientError, Result};
use crate::types::StreamRecord;

/// Rolling line buffer.
///
/// Lines are cut at `\n` bytes before UTF-8 decoding, so a character split
/// across chunks is reassembled.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    pending: VecDeque<Result<StreamRecord>>,
}

impl LineDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every line it completes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<u8>>();
            if let Some(record) = parse_line(&line[..pos]) {
                self.pending.push_back(record);
            }
        }
    }

    /// Next decoded record, if a complete line is available.
    pub fn next_record(&mut self) -> Option<Result<StreamRecord>> {
        self.pending.pop_front()
    }

    /// Decode whatever remains once the body has ended.
    ///
    /// A non-blank unterminated final line is parsed as a record.
    pub fn finish(&mut self) -> Option<Result<StreamRecord>> {
        if let Some(record) = self.pending.pop_front() {
            return Some(record);
        }
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    /// Whether bytes of an incomplete line are buffered.
    #[must_use]
    pub fn has_partial_line(&self) -> bool {
        !self.buffer.is_empty()
    }
}

fn parse_line(raw: &[u8]) -> Option<Result<StreamRecord>> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            return Some(Err(ClientError::Decode {
                line: String::from_utf8_lossy(raw).into_owned(),
                reason: e.to_string(),
            }))
        }
    };

    if text.trim().is_empty() {
        return None;
    }

    Some(
        serde_json::from_str::<StreamRecord>(text).map_err(|e| ClientError::Decode {
            line: text.to_string(),
            reason: e.to_string(),
        }),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Reading,
    Draining,
    Done,
    Cancelled,
}

/// Lazy, finite sequence of stream records read from a response body.
///
/// Ends at end-of-data, after the first error, or when the cancellation signal
/// is observed before a chunk read. Observing the signal leaves it raised.
#[derive(Debug)]
pub struct RecordStream<S> {
    inner: S,
    decoder: LineDecoder,
    cancel: CancelSignal,
    state: ReadState,
}

impl<S> RecordStream<S> {
    /// Wrap a byte stream.
    pub fn new(inner: S, cancel: CancelSignal) -> Self {
        Self {
            inner,
            decoder: LineDecoder::new(),
            cancel,
            state: ReadState::Reading,
        }
    }

    /// Whether the sequence ended because cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state == ReadState::Cancelled
    }

    fn fail(&mut self, err: ClientError) -> Poll<Option<Result<StreamRecord>>> {
        self.state = ReadState::Done;
        Poll::Ready(Some(Err(err)))
    }
}

impl<S> Stream for RecordStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<StreamRecord>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match this.state {
                ReadState::Done | ReadState::Cancelled => return Poll::Ready(None),
                ReadState::Draining => {
                    return match this.decoder.finish() {
                        Some(Err(err)) => this.fail(err),
                        Some(Ok(record)) => Poll::Ready(Some(Ok(record))),
                        None => {
                            this.state = ReadState::Done;
                            Poll::Ready(None)
                        }
                    };
                }
                ReadState::Reading => {}
            }

            match this.decoder.next_record() {
                Some(Err(err)) => return this.fail(err),
                Some(Ok(record)) => return Poll::Ready(Some(Ok(record))),
                None => {}
            }

            if this.cancel.is_raised() {
                tracing::debug!("Stream read cancelled");
                this.state = ReadState::Cancelled;
                return Poll::Ready(None);
            }

            match this.inner.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => this.decoder.push(&chunk),
                Poll::Ready(Some(Err(err))) => return this.fail(err),
                Poll::Ready(None) => this.state = ReadState::Draining,
            }
        }
    }
}
