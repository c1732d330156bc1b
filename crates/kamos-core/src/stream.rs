//! Stream transport: `data: <json>\n\n` framing on the producer side and an
//! incremental, chunk-boundary-insensitive decoder on the consumer side.

use crate::error::{RelayError, RelayResult};
use crate::event::PhaseEvent;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::pin::Pin;

/// Prefix of every frame line.
pub const FRAME_PREFIX: &str = "data:";

/// Boxed byte stream as produced by an HTTP response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = RelayResult<Bytes>> + Send>>;

/// Serialize one event as a complete frame.
pub fn encode_frame(event: &PhaseEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("{} {}\n\n", FRAME_PREFIX, json)
}

/// Incremental frame decoder. Bytes are buffered until a newline arrives, so a
/// frame (or a multi-byte character) split across reads decodes the same as an
/// unbroken one.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    dropped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<PhaseEvent> {
        self.buffer.extend_from_slice(chunk);
        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
        complete
            .split(|b| *b == b'\n')
            .filter_map(|line| self.decode_line(line))
            .collect()
    }

    /// Flush whatever is left after the underlying stream closed.
    pub fn finish(&mut self) -> Vec<PhaseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&rest).into_iter().collect()
    }

    /// Number of `data:` lines discarded because they were not valid JSON.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<PhaseEvent> {
        let line = String::from_utf8_lossy(raw);
        let payload = line.trim().strip_prefix(FRAME_PREFIX)?.trim();
        if payload.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => {
                let event = PhaseEvent::from_value(value);
                if event.is_none() {
                    tracing::debug!(target: "kamos::stream", payload, "ignoring frame with unknown shape");
                }
                event
            }
            Err(e) => {
                self.dropped += 1;
                tracing::debug!(
                    target: "kamos::stream",
                    error = %e,
                    dropped = self.dropped,
                    "ignoring non-JSON frame"
                );
                None
            }
        }
    }
}

/// Per-stream bookkeeping for phase numbering and termination.
#[derive(Debug, Default)]
pub struct StreamValidator {
    seen: HashSet<u32>,
    finished: bool,
}

impl StreamValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept or reject one event. Phase numbers must be positive and unique;
    /// nothing but progress is accepted after a terminal or error event.
    pub fn check(&mut self, event: &PhaseEvent) -> Result<(), String> {
        match event {
            PhaseEvent::Progress(_) => Ok(()),
            _ if self.finished => Err("event after end of stream".to_string()),
            PhaseEvent::Phase(result) => {
                if result.phase_num == 0 {
                    return Err("phaseNum must be positive".to_string());
                }
                if !self.seen.insert(result.phase_num) {
                    return Err(format!("duplicate phaseNum {}", result.phase_num));
                }
                Ok(())
            }
            PhaseEvent::Final(_) | PhaseEvent::Error(_) => {
                self.finished = true;
                Ok(())
            }
        }
    }

    pub fn phases_seen(&self) -> usize {
        self.seen.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

struct DecodeState {
    inner: ByteStream,
    decoder: FrameDecoder,
    pending: VecDeque<PhaseEvent>,
    done: bool,
}

/// Turn a byte stream into a stream of events. A read error is yielded once and ends the stream.
pub fn decode_stream(bytes: ByteStream) -> impl Stream<Item = RelayResult<PhaseEvent>> + Send {
    let state = DecodeState {
        inner: bytes,
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.decoder.push(&chunk)),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err::<PhaseEvent, RelayError>(e), state));
                }
                None => {
                    state.done = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{PhaseResult, Role};
    use serde_json::json;

    fn sample_stream() -> String {
        let events = vec![
            PhaseEvent::progress(Role::System, "フェーズ 1: \"質問\" を分析します"),
            PhaseEvent::Phase(PhaseResult::phase(1, "質問", json!({"title": "分析", "report": {"A1": "…"}}))),
            PhaseEvent::progress(Role::Gemini, "thinking"),
            PhaseEvent::Phase(PhaseResult::phase(2, "次の問い", json!({"summary": "s"}))),
            PhaseEvent::Final(PhaseResult::wrap_up(2, "まとめ")),
        ];
        let mut body: String = events.iter().map(encode_frame).collect();
        body.insert_str(0, ": keepalive\n\n");
        body
    }

    fn decode_whole(body: &[u8]) -> Vec<PhaseEvent> {
        let mut d = FrameDecoder::new();
        let mut out = d.push(body);
        out.extend(d.finish());
        out
    }

    #[test]
    fn frame_has_prefix_and_blank_line() {
        let frame = encode_frame(&PhaseEvent::error("boom"));
        assert_eq!(frame, "data: {\"error\":\"boom\"}\n\n");
    }

    #[test]
    fn phase_result_round_trips_through_a_frame() {
        let original = PhaseResult::phase(3, "dir", json!({"nested": {"k": [1, 2, 3]}}));
        let frame = encode_frame(&PhaseEvent::Phase(original.clone()));
        let decoded = decode_whole(frame.as_bytes());
        assert_eq!(decoded, vec![PhaseEvent::Phase(original)]);
    }

    #[test]
    fn chunking_at_every_byte_boundary_yields_same_events() {
        let body = sample_stream();
        let bytes = body.as_bytes();
        let expected = decode_whole(bytes);
        assert_eq!(expected.len(), 5);

        for split in 1..bytes.len() {
            let mut d = FrameDecoder::new();
            let mut got = d.push(&bytes[..split]);
            got.extend(d.push(&bytes[split..]));
            got.extend(d.finish());
            assert_eq!(got, expected, "split at byte {}", split);
        }
    }

    #[test]
    fn single_byte_chunks_yield_same_events() {
        let body = sample_stream();
        let expected = decode_whole(body.as_bytes());
        let mut d = FrameDecoder::new();
        let mut got = Vec::new();
        for b in body.as_bytes() {
            got.extend(d.push(std::slice::from_ref(b)));
        }
        got.extend(d.finish());
        assert_eq!(got, expected);
    }

    #[test]
    fn malformed_frames_are_skipped_and_counted() {
        let body = "data: {not json\n\ndata: {\"status\":\"ok\",\"role\":\"system\"}\n\ndata: \n\nevent: x\n";
        let mut d = FrameDecoder::new();
        let events = d.push(body.as_bytes());
        assert_eq!(events, vec![PhaseEvent::progress(Role::System, "ok")]);
        assert_eq!(d.dropped(), 1);
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let body = "data: {\"error\":\"x\"}\r\n\r\n";
        assert_eq!(decode_whole(body.as_bytes()), vec![PhaseEvent::error("x")]);
    }

    #[test]
    fn unterminated_last_line_is_flushed_on_finish() {
        let mut d = FrameDecoder::new();
        assert!(d.push(b"data: {\"phaseNum\":1,\"directorPrompt\":\"p\"}").is_empty());
        let rest = d.finish();
        assert_eq!(rest.len(), 1);
        assert!(matches!(rest[0], PhaseEvent::Phase(ref r) if r.phase_num == 1));
    }

    #[test]
    fn validator_rejects_duplicates_and_zero() {
        let mut v = StreamValidator::new();
        let p1 = PhaseEvent::Phase(PhaseResult::phase(1, "a", json!({})));
        assert!(v.check(&p1).is_ok());
        assert!(v.check(&p1).is_err());
        let p0 = PhaseEvent::Phase(PhaseResult::phase(0, "a", json!({})));
        assert!(v.check(&p0).is_err());
        assert_eq!(v.phases_seen(), 1);
    }

    #[test]
    fn validator_closes_after_terminal() {
        let mut v = StreamValidator::new();
        assert!(v.check(&PhaseEvent::Final(PhaseResult::wrap_up(3, "s"))).is_ok());
        assert!(v.is_finished());
        assert!(v.check(&PhaseEvent::Phase(PhaseResult::phase(2, "a", json!({})))).is_err());
        assert!(v.check(&PhaseEvent::error("late")).is_err());
        assert!(v.check(&PhaseEvent::progress(Role::System, "still fine")).is_ok());
    }

    #[tokio::test]
    async fn decode_stream_matches_decoder_output() {
        let body = sample_stream();
        let expected = decode_whole(body.as_bytes());
        let chunks: Vec<RelayResult<Bytes>> = body
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let events: Vec<PhaseEvent> = decode_stream(Box::pin(futures_util::stream::iter(chunks)))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn decode_stream_surfaces_read_error_then_ends() {
        let chunks: Vec<RelayResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"status\":\"a\",\"role\":\"kamos\"}\n\n")),
            Err(RelayError::timeout(crate::error::Service::Relay, "idle")),
            Ok(Bytes::from_static(b"data: {\"error\":\"never seen\"}\n\n")),
        ];
        let items: Vec<RelayResult<PhaseEvent>> =
            decode_stream(Box::pin(futures_util::stream::iter(chunks))).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
