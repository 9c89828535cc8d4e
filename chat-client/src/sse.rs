//! Server-sent event framing shared by both clients.

use crate::{Error, TextStream};
use futures::StreamExt;
use std::pin::Pin;
use tokio_stream::Stream;

/// One `data:` frame of an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(String),
    Done,
}

/// Consume every complete line from `buffer` and return the data frames found.
///
/// Incomplete trailing data stays in the buffer for the next chunk. Lines are
/// split on raw bytes so a multi-byte character cut across chunks is decoded
/// only once its line is complete.
pub fn drain_frames(buffer: &mut Vec<u8>) -> Vec<Frame> {
    let mut frames = Vec::new();

    while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches(['\n', '\r']);

        // event:, id:, comments and blank separators carry nothing we need
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim_start();
        if payload == "[DONE]" {
            frames.push(Frame::Done);
        } else if !payload.is_empty() {
            frames.push(Frame::Data(payload.to_string()));
        }
    }

    frames
}

/// Adapt a raw byte stream into text fragments.
///
/// `extract` pulls the text delta out of one data payload; `Ok(None)` skips
/// frames that carry no text. The stream ends at `[DONE]` without reading
/// further from `bytes`, or when the body closes.
pub fn text_stream<S, B, E, F>(bytes: S, extract: F) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + 'static,
    E: std::fmt::Display + 'static,
    F: Fn(&str) -> Result<Option<String>, Error> + Send + 'static,
{
    let state = Reader {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        extract,
        done: false,
    };

    let stream = futures::stream::unfold(state, |mut reader| async move {
        if reader.done {
            return None;
        }
        let items = match reader.bytes.next().await? {
            Ok(chunk) => reader.feed(chunk.as_ref()),
            Err(e) => vec![Err(Error::Network(e.to_string()))],
        };
        Some((items, reader))
    })
    .flat_map(futures::stream::iter);

    Box::pin(stream)
}

struct Reader<S, F> {
    bytes: Pin<Box<S>>,
    buffer: Vec<u8>,
    extract: F,
    done: bool,
}

impl<S, F> Reader<S, F>
where
    F: Fn(&str) -> Result<Option<String>, Error>,
{
    /// Buffer `chunk` and return the text of every complete frame in it.
    fn feed(&mut self, chunk: &[u8]) -> Vec<Result<String, Error>> {
        self.buffer.extend_from_slice(chunk);
        let mut items = Vec::new();
        for frame in drain_frames(&mut self.buffer) {
            match frame {
                Frame::Done => {
                    self.done = true;
                    break;
                }
                Frame::Data(payload) => match (self.extract)(&payload) {
                    Ok(Some(text)) if !text.is_empty() => items.push(Ok(text)),
                    Ok(_) => {}
                    Err(e) => items.push(Err(e)),
                },
            }
        }
        items
    }
}
