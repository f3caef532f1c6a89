//! Shared SSE plumbing for streaming adapters.
//!
//! The wire is a sequence of `\n\n`-delimited event blocks; only `data:`
//! lines matter here. [`take_data_payloads`] drains complete payloads from
//! a growing buffer, [`event_stream`] turns a `reqwest::Response` plus a
//! payload parser into a `BoxStream` of stream events.

use crate::util::from_reqwest;
use ca_domain::error::Result;
use ca_domain::stream::{BoxStream, StreamEvent};

/// Drain complete `data:` payloads from the buffer, leaving any trailing
/// partial event in place for the next chunk.
pub(crate) fn take_data_payloads(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }

    payloads
}

/// Build a stream of events from an SSE response body.
///
/// `parse` receives each `data:` payload and returns zero or more events;
/// it is `FnMut` so adapters can keep assembly state (tool-call buffers)
/// across payloads. When the body closes, any partial buffer is flushed,
/// and a fallback `Done` is emitted if the parser never produced one.
pub(crate) fn event_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in take_data_payloads(&mut buffer) {
                        for event in parse(&payload) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for payload in take_data_payloads(&mut buffer) {
                            for event in parse(&payload) {
                                if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event() {
        let mut buf = String::from("data: {\"a\":1}\n\n");
        assert_eq!(take_data_payloads(&mut buf), vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut buf = String::from("data: one\n\ndata: two\n\n");
        assert_eq!(take_data_payloads(&mut buf), vec!["one", "two"]);
    }

    #[test]
    fn partial_event_kept_for_next_chunk() {
        let mut buf = String::from("data: whole\n\ndata: par");
        assert_eq!(take_data_payloads(&mut buf), vec!["whole"]);
        assert_eq!(buf, "data: par");

        buf.push_str("tial\n\n");
        assert_eq!(take_data_payloads(&mut buf), vec!["partial"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn non_data_lines_ignored() {
        let mut buf = String::from("event: ping\nid: 3\ndata: payload\n\n");
        assert_eq!(take_data_payloads(&mut buf), vec!["payload"]);
    }

    #[test]
    fn empty_data_skipped() {
        let mut buf = String::from("data:\n\ndata: \n\n");
        assert!(take_data_payloads(&mut buf).is_empty());
    }

    #[test]
    fn done_sentinel_passes_through() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(take_data_payloads(&mut buf), vec!["[DONE]"]);
    }
}
