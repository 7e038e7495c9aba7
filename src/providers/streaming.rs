use bytes::Bytes;
use futures::stream::Stream;
use pin_project::pin_project;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// SSE event from provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// OpenAI-family terminator
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Read the value of an SSE field line, tolerating a missing space after ':'
fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Parse SSE events from text
pub fn parse_sse_events(input: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut current_event: Option<String> = None;
    let mut current_data = String::new();
    let mut has_data = false;

    for line in input.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            // Empty line marks end of event
            if has_data {
                events.push(SseEvent {
                    event: current_event.take(),
                    data: std::mem::take(&mut current_data),
                });
                has_data = false;
            }
            current_event = None;
        } else if let Some(data) = field(line, "data") {
            if has_data {
                current_data.push('\n');
            }
            current_data.push_str(data);
            has_data = true;
        } else if let Some(event) = field(line, "event") {
            current_event = Some(event.to_string());
        }
        // Ignore comments and other fields like "id:", "retry:", etc.
    }

    // Handle case where stream doesn't end with empty line
    if has_data {
        events.push(SseEvent {
            event: current_event,
            data: current_data,
        });
    }

    events
}

/// Position just past the first blank-line separator in `buf`
fn frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}

/// Stream adapter that converts a response byte stream into SSE events.
///
/// Bytes are buffered until a full event frame is available, so events split
/// across network reads (including inside multi-byte characters) decode intact.
#[pin_project]
pub struct SseStream<S> {
    #[pin]
    inner: S,
    buffer: Vec<u8>,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

impl<S> SseStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

                    while let Some(end) = frame_end(this.buffer.as_slice()) {
                        let frame: Vec<u8> = this.buffer.drain(..end).collect();
                        let text = String::from_utf8_lossy(&frame);
                        this.pending.extend(parse_sse_events(&text));
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    // Stream ended - flush whatever is left in the buffer
                    *this.finished = true;
                    if !this.buffer.is_empty() {
                        let text = String::from_utf8_lossy(this.buffer.as_slice()).into_owned();
                        this.buffer.clear();
                        this.pending.extend(parse_sse_events(&text));
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
