//! Incremental decoder for the `data: `-framed event stream.
//!
//! Bytes are buffered and split on `\n` before UTF-8 decoding. A newline byte
//! never occurs inside a multi-byte sequence, so every complete line holds
//! complete characters no matter where the transport split the chunks.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::protocol::StreamEvent;

/// Field prefix carrying one payload per line.
pub const DATA_PREFIX: &str = "data: ";
/// Reserved payload marking deliberate end of stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Raw body bytes of one streamed response.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// Typed events of one streamed response.
///
/// The stream ends (`None`) on the `[DONE]` sentinel or at end of input. An
/// `Err` item is terminal and distinct from normal completion.
pub type EventStream =
    Pin<Box<dyn futures::Stream<Item = Result<StreamEvent, TransportError>> + Send + 'static>>;

/// Payload of a single `data: ` line, prefix stripped and trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub payload: String,
}

impl RawEvent {
    /// Extracts the payload from a line, or `None` if the line is not a data line.
    pub fn from_line(line: &str) -> Option<Self> {
        line.strip_prefix(DATA_PREFIX).map(|rest| Self {
            payload: rest.trim().to_string(),
        })
    }

    pub fn is_termination(&self) -> bool {
        self.payload == DONE_SENTINEL
    }
}

/// Classification of one complete line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// A typed event.
    Event(StreamEvent),
    /// The termination sentinel.
    Done,
    /// Keep-alive, comment or any other non-data line.
    NotData,
    /// A data line whose payload is not a valid event.
    Malformed { payload: String, error: String },
}

/// Classifies one complete line (without its trailing newline).
pub fn parse_line(line: &str) -> LineOutcome {
    let Some(raw) = RawEvent::from_line(line) else {
        return LineOutcome::NotData;
    };
    if raw.is_termination() {
        return LineOutcome::Done;
    }
    match serde_json::from_str::<StreamEvent>(&raw.payload) {
        Ok(event) => LineOutcome::Event(event),
        Err(e) => LineOutcome::Malformed {
            payload: raw.payload,
            error: e.to_string(),
        },
    }
}

/// Items surfaced by [`LineDecoder::push_chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(StreamEvent),
    Done,
}

/// Reassembles lines across arbitrary chunk boundaries.
#[derive(Default)]
pub struct LineDecoder {
    buf: BytesMut,
    finished: bool,
}

impl LineDecoder {
    /// Appends a chunk and returns every event completed by it.
    ///
    /// Once the sentinel is seen the decoder stops: later lines in the same
    /// chunk and any further chunks are ignored.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buf.extend_from_slice(chunk);
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line_bytes = self.buf.split_to(idx + 1);
            let line = String::from_utf8_lossy(&line_bytes[..idx]);
            match parse_line(&line) {
                LineOutcome::Event(event) => out.push(Decoded::Event(event)),
                LineOutcome::Done => {
                    self.finished = true;
                    self.buf.clear();
                    out.push(Decoded::Done);
                    break;
                }
                LineOutcome::NotData => {}
                LineOutcome::Malformed { payload, error } => {
                    warn!(%error, payload = %payload, "discarding malformed stream line");
                }
            }
        }
        out
    }

    /// Whether the termination sentinel has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Marks end of input and returns any incomplete trailing line.
    pub fn finish(&mut self) -> Option<String> {
        self.finished = true;
        if self.buf.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(rest)
    }
}

/// Turns a response body into a lazy, finite stream of typed events.
pub fn decode_event_stream(bytes_stream: ByteStream) -> EventStream {
    struct State {
        bytes_stream: ByteStream,
        decoder: LineDecoder,
        pending: VecDeque<StreamEvent>,
        done: bool,
    }

    Box::pin(stream::try_unfold(
        State {
            bytes_stream,
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for decoded in state.decoder.push_chunk(&chunk) {
                            match decoded {
                                Decoded::Event(event) => state.pending.push_back(event),
                                Decoded::Done => {
                                    debug!("stream termination sentinel received");
                                    state.done = true;
                                }
                            }
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        if let Some(rest) = state.decoder.finish() {
                            warn!(partial = %rest, "stream ended inside a line; dropping it");
                        }
                        debug!("stream ended without termination sentinel");
                        state.done = true;
                    }
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    const BODY: &str = concat!(
        ": keep-alive\n",
        "data: {\"type\":\"thinking\",\"content\":\"思考中\"}\n",
        "\n",
        "data: {\"type\":\"answer\",\"content\":\"héllo 🌿\"}\r\n",
        "data: {not json\n",
        "event: ping\n",
        "data: {\"type\":\"error\",\"content\":\"quota\"}\n",
        "data: [DONE]\n",
    );

    fn expected() -> Vec<Decoded> {
        vec![
            Decoded::Event(StreamEvent::thinking("思考中")),
            Decoded::Event(StreamEvent::answer("héllo 🌿")),
            Decoded::Event(StreamEvent::error("quota")),
            Decoded::Done,
        ]
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<Decoded> {
        let mut decoder = LineDecoder::default();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.push_chunk(chunk));
        }
        out
    }

    fn byte_stream(chunks: Vec<Result<Vec<u8>, TransportError>>) -> ByteStream {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| c.map(Bytes::from)),
        ))
    }

    #[test]
    fn every_single_split_point_yields_the_same_events() {
        let bytes = BODY.as_bytes();
        for i in 0..=bytes.len() {
            let (a, b) = bytes.split_at(i);
            assert_eq!(decode_chunks(&[a, b]), expected(), "split at {i}");
        }
    }

    #[test]
    fn every_pair_of_split_points_yields_the_same_events() {
        let bytes = BODY.as_bytes();
        for i in 0..=bytes.len() {
            for j in i..=bytes.len() {
                let chunks = [&bytes[..i], &bytes[i..j], &bytes[j..]];
                assert_eq!(decode_chunks(&chunks), expected(), "split at {i},{j}");
            }
        }
    }

    #[test]
    fn byte_at_a_time_decoding_matches() {
        let chunks: Vec<&[u8]> = BODY.as_bytes().chunks(1).collect();
        assert_eq!(decode_chunks(&chunks), expected());
    }

    #[test]
    fn sentinel_stops_processing_rest_of_chunk() {
        let mut decoder = LineDecoder::default();
        let out = decoder.push_chunk(
            b"data: {\"type\":\"answer\",\"content\":\"a\"}\ndata: [DONE]\ndata: {\"type\":\"answer\",\"content\":\"b\"}\n",
        );
        assert_eq!(
            out,
            vec![Decoded::Event(StreamEvent::answer("a")), Decoded::Done]
        );
        assert!(decoder.is_finished());
        assert!(
            decoder
                .push_chunk(b"data: {\"type\":\"answer\",\"content\":\"c\"}\n")
                .is_empty()
        );
    }

    #[test]
    fn sentinel_tolerates_surrounding_whitespace() {
        assert_eq!(parse_line("data:  [DONE]  "), LineOutcome::Done);
        assert_eq!(parse_line("data: [DONE]\r"), LineOutcome::Done);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        assert_eq!(parse_line(""), LineOutcome::NotData);
        assert_eq!(parse_line(": comment"), LineOutcome::NotData);
        assert_eq!(parse_line("event: message"), LineOutcome::NotData);
        assert_eq!(parse_line("data:[DONE]"), LineOutcome::NotData);
    }

    #[test]
    fn malformed_payloads_are_reported_not_fatal() {
        assert!(matches!(
            parse_line("data: {not json"),
            LineOutcome::Malformed { payload, .. } if payload == "{not json"
        ));
        assert!(matches!(
            parse_line("data: {\"type\":\"answer\"}"),
            LineOutcome::Malformed { .. }
        ));
        let out = decode_chunks(&[
            b"data: {\"type\":\"answer\",\"content\":\"x\"}\ndata: {not json\ndata: {\"type\":\"answer\",\"content\":\"y\"}\n",
        ]);
        assert_eq!(
            out,
            vec![
                Decoded::Event(StreamEvent::answer("x")),
                Decoded::Event(StreamEvent::answer("y")),
            ]
        );
    }

    #[test]
    fn finish_returns_incomplete_trailing_line() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(b"data: {\"type\":\"ans").is_empty());
        assert_eq!(
            decoder.finish().as_deref(),
            Some("data: {\"type\":\"ans")
        );
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn event_stream_completes_at_end_of_input_without_sentinel() {
        let events: Vec<_> = decode_event_stream(byte_stream(vec![
            Ok(b"data: {\"type\":\"answer\",\"con".to_vec()),
            Ok(b"tent\":\"hi\"}\n".to_vec()),
        ]))
        .collect()
        .await;
        assert_eq!(events, vec![Ok(StreamEvent::answer("hi"))]);
    }

    #[tokio::test]
    async fn event_stream_stops_reading_after_sentinel() {
        let events: Vec<_> = decode_event_stream(byte_stream(vec![
            Ok(b"data: {\"type\":\"thinking\",\"content\":\"a\"}\ndata: [DONE]\n".to_vec()),
            Err(TransportError::Read("must not be polled".into())),
        ]))
        .collect()
        .await;
        assert_eq!(events, vec![Ok(StreamEvent::thinking("a"))]);
    }

    #[tokio::test]
    async fn read_error_terminates_with_transport_failure() {
        let events: Vec<_> = decode_event_stream(byte_stream(vec![
            Ok(b"data: {\"type\":\"answer\",\"content\":\"partial\"}\n".to_vec()),
            Err(TransportError::Read("connection reset".into())),
            Ok(b"data: {\"type\":\"answer\",\"content\":\"late\"}\n".to_vec()),
        ]))
        .collect()
        .await;
        assert_eq!(
            events,
            vec![
                Ok(StreamEvent::answer("partial")),
                Err(TransportError::Read("connection reset".into())),
            ]
        );
    }
}
