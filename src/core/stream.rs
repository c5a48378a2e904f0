//! Stream decoding and the transport task feeding it.
//!
//! The backend answers over a chunked body of newline-delimited frames.
//! [`SseDecoder`] reassembles frames from arbitrarily fragmented chunks and
//! maps them to [`StreamEvent`]s; [`ChatStreamService`] owns the HTTP side
//! and forwards decoded events over an unbounded channel tagged with a
//! stream id, so a replaced stream's stragglers can be discarded.

use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{AskRequest, StreamPayload};
use crate::core::constants::{EVENT_MARKER, STREAM_DONE};
use crate::utils::url::construct_api_url;

/// A decoded, semantically meaningful unit of the answer stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental answer fragment.
    Chunk(String),
    /// Server-side progress note (e.g. "processing").
    Status(String),
    /// The answer is complete; carries the full text.
    Completed(String),
    /// Server-reported error; fatal for the session.
    ErrorEvent(String),
    /// Terminal marker. Nothing follows.
    Done,
}

/// Channel-level wrapper around decoded events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Event(StreamEvent),
    /// The transport rejected the connection before any event was produced.
    /// Not an error: the caller should fall back to the traditional path.
    Unsupported,
}

/// Incremental frame decoder. One instance per stream; once `Done` has been
/// produced the decoder stays exhausted.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one transport chunk and return every event completed by it,
    /// in frame order. Chunk boundaries need not align with frames.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            // Non-UTF-8 lines are dropped like any other malformed frame.
            if let Ok(line) = std::str::from_utf8(&self.buffer[..newline_pos]) {
                if let Some(event) = parse_line(line.trim()) {
                    let done = event == StreamEvent::Done;
                    events.push(event);
                    if done {
                        self.finished = true;
                        self.buffer.clear();
                        return events;
                    }
                }
            }
            self.buffer.drain(..=newline_pos);
        }

        events
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

fn parse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(EVENT_MARKER).map(str::trim_start)?;
    if payload == STREAM_DONE {
        return Some(StreamEvent::Done);
    }
    if payload.is_empty() {
        return None;
    }
    parse_payload(payload)
}

/// Map a frame payload to an event. Malformed JSON is keep-alive noise and
/// is dropped without a diagnostic.
fn parse_payload(payload: &str) -> Option<StreamEvent> {
    let parsed: StreamPayload = serde_json::from_str(payload).ok()?;

    if parsed.status.as_deref() == Some("completed") {
        if let Some(response) = parsed.result.and_then(|r| r.response) {
            return Some(StreamEvent::Completed(response));
        }
    }
    if let Some(chunk) = parsed.chunk {
        return Some(StreamEvent::Chunk(chunk));
    }
    if let Some(error) = parsed.error {
        return Some(StreamEvent::ErrorEvent(error));
    }
    parsed.status.map(StreamEvent::Status)
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub request: AskRequest,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

/// Spawns the HTTP read loop and fans decoded events into a channel the
/// orchestrator consumes.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                base_url,
                request,
                cancel_token,
                stream_id,
            } = params;

            tokio::select! {
                _ = run_stream(client, base_url, request, cancel_token.clone(), tx, stream_id) => {}
                _ = cancel_token.cancelled() => {}
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}

async fn run_stream(
    client: reqwest::Client,
    base_url: String,
    request: AskRequest,
    cancel_token: CancellationToken,
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
    stream_id: u64,
) {
    let stream_url = construct_api_url(&base_url, "chat/stream");
    let response = match client.post(stream_url).json(&request).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("streaming request failed before any event: {e}");
            let _ = tx.send((StreamMessage::Unsupported, stream_id));
            return;
        }
    };

    if !response.status().is_success() {
        tracing::debug!(status = %response.status(), "streaming endpoint rejected the request");
        let _ = tx.send((StreamMessage::Unsupported, stream_id));
        return;
    }

    let mut decoder = SseDecoder::new();
    let mut produced_any = false;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        if cancel_token.is_cancelled() {
            return;
        }
        let chunk = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                if produced_any {
                    // Mid-stream transport failure after real events: end the
                    // stream so the accumulated text can finalize.
                    tracing::debug!("transport error mid-stream: {e}");
                    let _ = tx.send((StreamMessage::Event(StreamEvent::Done), stream_id));
                } else {
                    let _ = tx.send((StreamMessage::Unsupported, stream_id));
                }
                return;
            }
        };

        for event in decoder.feed(&chunk) {
            produced_any = true;
            let done = event == StreamEvent::Done;
            let _ = tx.send((StreamMessage::Event(event), stream_id));
            if done {
                return;
            }
        }
    }

    // Body ended without a sentinel; close the stream for the consumer.
    let _ = tx.send((StreamMessage::Event(StreamEvent::Done), stream_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut SseDecoder, input: &str) -> Vec<StreamEvent> {
        decoder.feed(input.as_bytes())
    }

    #[test]
    fn parses_each_recognized_payload_shape() {
        let mut decoder = SseDecoder::new();
        let input = concat!(
            "data: {\"status\": \"processing\"}\n",
            "data: {\"chunk\": \"Hola \"}\n",
            "data: {\"chunk\": \"mundo\"}\n",
            "data: {\"status\": \"completed\", \"result\": {\"response\": \"Hola mundo\"}}\n",
            "data: [DONE]\n",
        );
        let events = decode_all(&mut decoder, input);
        assert_eq!(
            events,
            vec![
                StreamEvent::Status("processing".to_string()),
                StreamEvent::Chunk("Hola ".to_string()),
                StreamEvent::Chunk("mundo".to_string()),
                StreamEvent::Completed("Hola mundo".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn marker_spacing_variants_are_equivalent() {
        let mut decoder = SseDecoder::new();
        let events = decode_all(&mut decoder, "data:{\"chunk\":\"a\"}\n");
        assert_eq!(events, vec![StreamEvent::Chunk("a".to_string())]);

        let mut decoder = SseDecoder::new();
        let events = decode_all(&mut decoder, "data:   {\"chunk\":\"a\"}\n");
        assert_eq!(events, vec![StreamEvent::Chunk("a".to_string())]);
    }

    #[test]
    fn split_points_do_not_change_the_event_sequence() {
        let input = concat!(
            "data: {\"status\": \"processing\"}\n",
            "data: {\"chunk\": \"uno dos \"}\n",
            "data: {\"chunk\": \"tres\"}\n",
            "data: [DONE]\n",
        );

        let mut whole = SseDecoder::new();
        let expected = whole.feed(input.as_bytes());

        // Byte-by-byte.
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for byte in input.as_bytes() {
            events.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(events, expected);

        // Every split position of the input into two chunks.
        for split in 0..input.len() {
            let mut decoder = SseDecoder::new();
            let mut events = decoder.feed(&input.as_bytes()[..split]);
            events.extend(decoder.feed(&input.as_bytes()[split..]));
            assert_eq!(events, expected, "split at byte {split}");
        }
    }

    #[test]
    fn malformed_json_is_dropped_silently() {
        let mut decoder = SseDecoder::new();
        let input = concat!(
            "data: not json at all\n",
            "data: {\"chunk\": \"ok\"}\n",
            "data: {broken\n",
            "data: [DONE]\n",
        );
        let events = decode_all(&mut decoder, input);
        assert_eq!(
            events,
            vec![StreamEvent::Chunk("ok".to_string()), StreamEvent::Done]
        );
    }

    #[test]
    fn non_marker_lines_are_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decode_all(&mut decoder, ": keep-alive\n\ndata: {\"chunk\":\"x\"}\n");
        assert_eq!(events, vec![StreamEvent::Chunk("x".to_string())]);
    }

    #[test]
    fn frames_split_across_chunks_reassemble() {
        let mut decoder = SseDecoder::new();
        let mut events = decoder.feed(b"data: {\"chunk\": \"parcial\"}\ndata: {\"chu");
        assert_eq!(events, vec![StreamEvent::Chunk("parcial".to_string())]);
        events = decoder.feed(b"nk\": \"resto\"}\n");
        assert_eq!(events, vec![StreamEvent::Chunk("resto".to_string())]);
    }

    #[test]
    fn sentinel_terminates_despite_buffered_partial_json() {
        let mut decoder = SseDecoder::new();
        // A frame whose JSON spans lines never parses; each piece is
        // dropped as malformed and the sentinel still terminates.
        let events = decoder.feed(b"data: {\"chunk\":\ndata: [DONE]\n");
        assert_eq!(events, vec![StreamEvent::Done]);
        assert!(decoder.is_finished());
    }

    #[test]
    fn decoder_is_exhausted_after_done() {
        let mut decoder = SseDecoder::new();
        decoder.feed(b"data: [DONE]\n");
        assert!(decoder.is_finished());
        assert!(decoder.feed(b"data: {\"chunk\":\"tarde\"}\n").is_empty());
    }

    #[test]
    fn invalid_utf8_lines_are_dropped() {
        let mut decoder = SseDecoder::new();
        let mut input: Vec<u8> = b"data: \xff\xfe\n".to_vec();
        input.extend_from_slice(b"data: {\"chunk\":\"bien\"}\n");
        let events = decoder.feed(&input);
        assert_eq!(events, vec![StreamEvent::Chunk("bien".to_string())]);
    }

    #[test]
    fn completed_takes_precedence_over_other_fields() {
        let payload = r#"{"status": "completed", "result": {"response": "todo"}, "chunk": "x"}"#;
        assert_eq!(
            parse_payload(payload),
            Some(StreamEvent::Completed("todo".to_string()))
        );
    }

    #[test]
    fn error_field_maps_to_error_event() {
        assert_eq!(
            parse_payload(r#"{"error": "modelo caido"}"#),
            Some(StreamEvent::ErrorEvent("modelo caido".to_string()))
        );
    }

    #[test]
    fn channel_messages_carry_stream_ids() {
        let (service, mut rx) = ChatStreamService::new();
        service.send_for_test(StreamMessage::Event(StreamEvent::Chunk("a".to_string())), 7);
        service.send_for_test(StreamMessage::Unsupported, 8);

        let (message, id) = rx.try_recv().expect("first message");
        assert_eq!(id, 7);
        assert!(matches!(message, StreamMessage::Event(StreamEvent::Chunk(_))));

        let (message, id) = rx.try_recv().expect("second message");
        assert_eq!(id, 8);
        assert_eq!(message, StreamMessage::Unsupported);
    }
}
