//! Line-delimited JSON transport.
//!
//! One request per line in, one response per line out, in order. Bad input
//! produces an error response; only I/O failure on the stream itself ends
//! the loop.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

use crate::domain::{AgentError, AgentResponse, ApiError};
use crate::service::AgentGateway;

/// Longest accepted request line, newline excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Sent if a response cannot be encoded.
const ENCODE_FAILURE: &str =
    r#"{"ok":false,"error":{"code":-32603,"message":"Internal error: response encoding failed"}}"#;

/// Serve requests from `reader` until end of input.
///
/// Returns the number of requests answered.
pub async fn serve<R, W>(gateway: &AgentGateway, mut reader: R, mut writer: W) -> Result<u64, AgentError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut answered = 0u64;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            break;
        }
        let too_long = buf.len() > MAX_LINE_BYTES && buf.last() != Some(&b'\n');
        let response = if too_long {
            discard_line(&mut reader).await?;
            warn!(limit = MAX_LINE_BYTES, "[arena-agent] Dropped over-long request line");
            AgentResponse::failure(None, ApiError::parse_error("request line too long"))
        } else {
            match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => answer(gateway, line.trim()).await,
                Err(_) => AgentResponse::failure(None, ApiError::parse_error("request is not UTF-8")),
            }
        };
        writer.write_all(&encode_line(&response)).await?;
        writer.flush().await?;
        answered += 1;
    }
    info!(answered, "[arena-agent] Input closed, transport stopped");
    Ok(answered)
}

/// Skip the rest of the current line without buffering it.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(());
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = chunk.len();
                reader.consume(len);
            }
        }
    }
}

/// Handle one line. A panicking handler becomes an internal error.
async fn answer(gateway: &AgentGateway, line: &str) -> AgentResponse {
    match AssertUnwindSafe(gateway.handle_json(line)).catch_unwind().await {
        Ok(response) => response,
        Err(_) => {
            error!("[arena-agent] Command handler panicked");
            AgentResponse::failure(None, ApiError::internal("command handler panicked"))
        }
    }
}

fn encode_line(response: &AgentResponse) -> Vec<u8> {
    let mut line = serde_json::to_vec(response).unwrap_or_else(|e| {
        error!(error = %e, "[arena-agent] Response encoding failed");
        ENCODE_FAILURE.as_bytes().to_vec()
    });
    line.push(b'\n');
    line
}
