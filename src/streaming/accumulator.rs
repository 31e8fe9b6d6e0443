use futures::Stream;
use std::ops::ControlFlow;
use tracing::debug;

use crate::models::stream::StreamChunk;
use crate::resilience::errors::{StreamError, TransportError};
use crate::streaming::sse_parser::LineSource;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Concatenated text fragments of one increment.
    Delta(String),
    Done,
}

/// Parses one line. `None` for lines outside the `data: ` framing, `Some(Err)`
/// for payloads that are not a well-formed increment.
pub fn parse_line(line: &str) -> Option<Result<StreamEvent, serde_json::Error>> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    if payload.trim() == DONE_SENTINEL {
        return Some(Ok(StreamEvent::Done));
    }

    Some(
        serde_json::from_str::<StreamChunk>(payload)
            .map(|chunk| StreamEvent::Delta(chunk.fragments().collect())),
    )
}

/// Running reduction of a streamed response into one text payload.
#[derive(Debug, Default)]
pub struct Accumulator {
    buffer: String,
    increments: usize,
    skipped: usize,
    done: bool,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line; `Break` once the terminator has been seen.
    pub fn push_line(&mut self, line: &str) -> ControlFlow<()> {
        if self.done {
            return ControlFlow::Break(());
        }

        match parse_line(line) {
            None => {}
            Some(Ok(StreamEvent::Done)) => {
                self.done = true;
                return ControlFlow::Break(());
            }
            Some(Ok(StreamEvent::Delta(text))) => {
                self.increments += 1;
                self.buffer.push_str(&text);
            }
            Some(Err(e)) => {
                self.skipped += 1;
                debug!("Skipping malformed stream increment: {}", e);
            }
        }

        ControlFlow::Continue(())
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn increments(&self) -> usize {
        self.increments
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn into_text(self) -> String {
        self.buffer
    }
}

/// Drains `lines` until the terminator or end of stream.
///
/// Nothing past the terminator is read. A read error before the first
/// increment is [`StreamError::Read`]; after it, [`StreamError::Interrupted`].
pub async fn accumulate<S>(lines: &mut LineSource<S>) -> Result<String, StreamError>
where
    S: Stream<Item = Result<Vec<u8>, TransportError>> + Unpin,
{
    let mut acc = Accumulator::new();

    while let Some(line) = lines.next_line().await {
        match line {
            Ok(line) => {
                if acc.push_line(&line).is_break() {
                    break;
                }
            }
            Err(source) if acc.increments() == 0 => return Err(StreamError::Read(source)),
            Err(source) => {
                return Err(StreamError::Interrupted {
                    increments: acc.increments(),
                    source,
                })
            }
        }
    }

    if acc.skipped() > 0 {
        debug!(
            "Stream accumulated {} increment(s), skipped {} malformed",
            acc.increments(),
            acc.skipped()
        );
    }
    Ok(acc.into_text())
}
