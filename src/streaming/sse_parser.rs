use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;

use crate::resilience::errors::TransportError;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Pull-based line reader over a chunked byte stream.
///
/// Lines may span chunks. `\n` and `\r\n` terminators are stripped, and a
/// final unterminated line is still yielded once the stream ends.
pub struct LineSource<S> {
    stream: S,
    buffer: Vec<u8>,
    finished: bool,
    deadline: Option<(Instant, Duration)>,
}

impl<S> LineSource<S>
where
    S: Stream<Item = Result<Vec<u8>, TransportError>> + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            finished: false,
            deadline: None,
        }
    }

    /// Fails reads still pending at `deadline` with
    /// [`TransportError::AttemptTimeout`] carrying `limit`.
    pub fn with_deadline(mut self, deadline: Instant, limit: Duration) -> Self {
        self.deadline = Some((deadline, limit));
        self
    }

    pub async fn next_line(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                return Some(Ok(decode_line(&line[..pos])));
            }

            if self.finished {
                if self.buffer.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut self.buffer);
                return Some(Ok(decode_line(&line)));
            }

            let next = match self.deadline {
                Some((deadline, limit)) => {
                    match tokio::time::timeout_at(deadline, self.stream.next()).await {
                        Ok(next) => next,
                        Err(_) => Some(Err(TransportError::AttemptTimeout(limit))),
                    }
                }
                None => self.stream.next().await,
            };

            match next {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Some(Err(e));
                }
                None => self.finished = true,
            }
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
