use bytes::Bytes;
use futures::Stream;
use relay_core::error::ProxyError;
use std::pin::Pin;
use tokio_stream::StreamExt;

/// Upper bound on a buffered SSE frame. Some providers emit very large
/// reasoning payloads in a single frame.
pub const MAX_EVENT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Parse a byte stream into SSE events.
/// Handles `event:`/`data:` prefixes, multi-line data, comment lines, and
/// enforces the per-frame size limit.
pub fn parse_sse_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> Pin<Box<dyn Stream<Item = Result<SseEvent, ProxyError>> + Send>> {
    Box::pin(event_stream(byte_stream))
}

struct SseState {
    stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: String,
    overflowed: bool,
}

fn event_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<SseEvent, ProxyError>> + Send {
    futures::stream::unfold(
        SseState {
            stream: Box::pin(byte_stream),
            buffer: String::new(),
            overflowed: false,
        },
        |mut state| async move {
            if state.overflowed {
                return None;
            }
            loop {
                // A complete event block ends at a blank line
                if let Some(pos) = find_event_boundary(&state.buffer) {
                    let block = state.buffer[..pos].to_string();
                    let skip = if state.buffer[pos..].starts_with("\r\n\r\n") {
                        4
                    } else {
                        2
                    };
                    state.buffer = state.buffer[pos + skip..].to_string();

                    if let Some(event) = parse_event_block(&block) {
                        return Some((Ok(event), state));
                    }
                    continue;
                }

                if state.buffer.len() > MAX_EVENT_BYTES {
                    state.overflowed = true;
                    return Some((
                        Err(ProxyError::Stream(format!(
                            "SSE frame exceeds {MAX_EVENT_BYTES} bytes"
                        ))),
                        state,
                    ));
                }

                match state.stream.next().await {
                    Some(Ok(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => state.buffer.push_str(text),
                        Err(e) => {
                            return Some((
                                Err(ProxyError::Stream(format!(
                                    "invalid UTF-8 in SSE stream: {e}"
                                ))),
                                state,
                            ));
                        }
                    },
                    Some(Err(e)) => {
                        return Some((Err(ProxyError::Network(e.to_string())), state));
                    }
                    None => {
                        // Stream ended; flush any trailing block
                        if !state.buffer.trim().is_empty() {
                            let block = std::mem::take(&mut state.buffer);
                            if let Some(event) = parse_event_block(&block) {
                                return Some((Ok(event), state));
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

fn find_event_boundary(s: &str) -> Option<usize> {
    if let Some(pos) = s.find("\n\n") {
        return Some(pos);
    }
    if let Some(pos) = s.find("\r\n\r\n") {
        return Some(pos);
    }
    None
}

/// Parse a single SSE event block. Returns None for blank and comment-only
/// blocks; `id:`/`retry:` fields are ignored.
fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event_type: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();

    for line in block.lines() {
        let line = line.trim_start_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start().to_string());
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event: event_type,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_block_basic() {
        let event = parse_event_block("data: {\"hello\": \"world\"}").unwrap();
        assert!(event.event.is_none());
        assert_eq!(event.data, "{\"hello\": \"world\"}");
    }

    #[test]
    fn test_parse_event_block_with_event_type() {
        let event = parse_event_block("event: output\ndata: {\"response\": \"x\"}").unwrap();
        assert_eq!(event.event.as_deref(), Some("output"));
        assert_eq!(event.data, "{\"response\": \"x\"}");
    }

    #[test]
    fn test_parse_event_block_done_sentinel() {
        let event = parse_event_block("data: [DONE]").unwrap();
        assert_eq!(event.data, "[DONE]");
    }

    #[test]
    fn test_parse_event_block_multiline_data() {
        let event = parse_event_block("data: line1\ndata: line2").unwrap();
        assert_eq!(event.data, "line1\nline2");
    }

    #[test]
    fn test_parse_event_block_skips_comments_and_fields() {
        assert!(parse_event_block(": keepalive").is_none());
        assert!(parse_event_block("id: 42\nretry: 100").is_none());
    }

    #[tokio::test]
    async fn test_stream_parses_frames_in_order() {
        let frames: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from("data: one\n\nda")),
            Ok(Bytes::from("ta: two\n\n")),
        ];
        let mut stream = parse_sse_stream(futures::stream::iter(frames));
        assert_eq!(stream.next().await.unwrap().unwrap().data, "one");
        assert_eq!(stream.next().await.unwrap().unwrap().data, "two");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_flushes_trailing_block() {
        let frames: Vec<Result<Bytes, reqwest::Error>> =
            vec![Ok(Bytes::from("data: tail"))];
        let mut stream = parse_sse_stream(futures::stream::iter(frames));
        assert_eq!(stream.next().await.unwrap().unwrap().data, "tail");
        assert!(stream.next().await.is_none());
    }
}
