use relay_core::error::ProxyError;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::time::Duration;

/// Build an SSE response from a stream of data strings.
///
/// Each string can be plain JSON data, multi-line `event:`/`data:` pairs, or
/// empty (skipped). An `event:` line binds to the next `data:` line of the
/// same string. With `terminate_with_done`, a final `data: [DONE]` frame is
/// appended after the stream drains.
pub fn build_sse_response(
    data_stream: impl Stream<Item = Result<String, ProxyError>> + Send + 'static,
    keepalive_seconds: u64,
    terminate_with_done: bool,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = data_stream.flat_map(|result| {
        let items: Vec<Result<Event, Infallible>> = match result {
            Ok(data) => {
                let mut events = Vec::new();
                let mut pending_event: Option<String> = None;
                for line in data.split('\n') {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(rest) = line.strip_prefix("event: ") {
                        pending_event = Some(rest.to_string());
                    } else {
                        let payload = line.strip_prefix("data: ").unwrap_or(line);
                        let mut event = Event::default();
                        if let Some(name) = pending_event.take() {
                            event = event.event(name);
                        }
                        events.push(Ok(event.data(payload)));
                    }
                }
                events
            }
            Err(e) => {
                let error_json = serde_json::json!({"error": {"message": e.to_string()}});
                vec![Ok(Event::default().data(error_json.to_string()))]
            }
        };
        futures::stream::iter(items)
    });

    let terminator = if terminate_with_done {
        Some(Ok(Event::default().data("[DONE]")))
    } else {
        None
    };
    let stream = events.chain(futures::stream::iter(terminator));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(keepalive_seconds.max(1)))
            .text(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(
        input: Vec<Result<String, ProxyError>>,
        done: bool,
    ) -> Vec<String> {
        let sse = build_sse_response(futures::stream::iter(input), 15, done);
        // Sse does not expose its stream; format events through the
        // public Event API instead by reconstructing from the input logic.
        // Kept simple: this test drives the inner splitting helper through
        // the whole response body.
        let body = axum::response::IntoResponse::into_response(sse);
        let bytes = axum::body::to_bytes(body.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_plain_chunks_and_done_terminator() {
        let lines = collect(
            vec![Ok("{\"a\":1}".to_string()), Ok(String::new())],
            true,
        )
        .await;
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: [DONE]"]);
    }

    #[tokio::test]
    async fn test_event_line_binds_to_following_data() {
        let lines = collect(
            vec![Ok("event: message_start\ndata: {\"x\":1}".to_string())],
            false,
        )
        .await;
        assert_eq!(lines, vec!["event: message_start", "data: {\"x\":1}"]);
    }

    #[tokio::test]
    async fn test_errors_become_error_frames() {
        let lines = collect(vec![Err(ProxyError::Stream("broken".into()))], false).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("broken"));
    }
}
