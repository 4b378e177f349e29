//! Transport helpers shared by the HTTP adapters.
//!
//! Responses from the supported APIs are line oriented (SSE `data:` frames or
//! newline-delimited JSON). A [`LineBuffer`] reassembles lines that are split
//! across network reads and a reader task feeds them to a [`StreamParser`].

use futures::StreamExt;
use log::{debug, warn};
use reqwest::{RequestBuilder, Response};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::models::{Chunk, CHUNK_CHANNEL_CAPACITY};
use crate::provider::traits::ChunkReceiver;

/// Reassembles complete lines from arbitrary byte chunks.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and drain every complete line, without terminators.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Whatever is left once the body has ended.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Payload of an SSE `data:` line.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|rest| rest.trim_start())
}

/// Turns provider lines into chunks.
///
/// Returning an error ends the stream with that error.
pub(crate) trait StreamParser: Send + 'static {
    fn parse_line(&mut self, line: &str) -> Result<Vec<Chunk>, ProviderError>;

    /// Called once when the body ends without a terminal chunk.
    fn finish(&mut self) -> Option<Chunk> {
        None
    }
}

/// Send `request`, giving up early when `cancel` fires.
pub(crate) async fn send(
    cancel: &CancellationToken,
    request: RequestBuilder,
) -> Result<Response, ProviderError> {
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        result = request.send() => result?,
    };
    check_status(response).await
}

/// Convert a non-success response into the matching error.
pub(crate) async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), &body))
}

/// Spawn the reader task for a streaming response and hand back its receiver.
pub(crate) fn spawn_reader<P: StreamParser>(
    provider: &str,
    response: Response,
    cancel: CancellationToken,
    parser: P,
) -> ChunkReceiver {
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    let provider = provider.to_string();
    tokio::spawn(read_lines(provider, response, cancel, parser, tx));
    rx
}

async fn read_lines<P: StreamParser>(
    provider: String,
    response: Response,
    cancel: CancellationToken,
    mut parser: P,
    tx: mpsc::Sender<Chunk>,
) {
    let mut body = response.bytes_stream();
    let mut buffer = LineBuffer::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("{} stream cancelled", provider);
                let _ = tx.send(Chunk::error(ProviderError::Cancelled)).await;
                return;
            }
            next = body.next() => next,
        };

        let at_end = next.is_none();
        let lines = match next {
            Some(Ok(bytes)) => buffer.push(&bytes),
            Some(Err(err)) => {
                warn!("{} stream broke: {}", provider, err);
                let _ = tx.send(Chunk::error(err.into())).await;
                return;
            }
            None => buffer.finish().into_iter().collect(),
        };

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let chunks = match parser.parse_line(&line) {
                Ok(chunks) => chunks,
                Err(err) => {
                    warn!("{} stream error: {}", provider, err);
                    let _ = tx.send(Chunk::error(err)).await;
                    return;
                }
            };
            for chunk in chunks {
                let terminal = chunk.is_terminal();
                if tx.send(chunk).await.is_err() || terminal {
                    return;
                }
            }
        }

        if at_end {
            if let Some(chunk) = parser.finish() {
                let _ = tx.send(chunk).await;
            }
            return;
        }
    }
}
