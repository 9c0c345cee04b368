//! Incremental Server-Sent Events decoding for streaming API responses.

use futures::{Stream, StreamExt};

use crate::error::ChatError;

/// Splits an HTTP byte stream into SSE `data:` payloads.
///
/// Frames end at a blank line. Carriage returns are dropped so `\r\n`
/// line endings behave like `\n`. Lines other than `data:` (comments,
/// `event:`, `id:`) are ignored; multiple `data:` lines in one frame are
/// joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the payloads of every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut out = Vec::new();
        while let Some(pos) = find_double_newline(&self.buf) {
            let frame = self.buf.drain(..pos + 2).collect::<Vec<_>>();
            if let Some(data) = frame_data(&frame) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let frame = std::mem::take(&mut self.buf);
        frame_data(&frame)
    }
}

/// Stream the `data:` payloads of an SSE response body.
pub fn data_stream(resp: reqwest::Response) -> impl Stream<Item = Result<String, ChatError>> {
    let byte_stream = resp.bytes_stream();

    async_stream::try_stream! {
        let mut decoder = SseDecoder::new();

        futures::pin_mut!(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                yield data;
            }
        }

        if let Some(data) = decoder.finish() {
            yield data;
        }
    }
}

fn frame_data(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let mut data: Option<String> = None;

    for line in text.lines() {
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match &mut data {
            Some(d) => {
                d.push('\n');
                d.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }

    data
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
