//! DAP `Content-Length` framing.
//!
//! A message is an HTTP-like header section terminated by a blank line,
//! followed by exactly `Content-Length` bytes of JSON. The reader treats
//! the header section as one block: bytes accumulate until the blank-line
//! terminator is seen (which may span buffered reads), then the length
//! field is parsed out of the block. Both the header block and the body
//! are size-capped before anything is allocated for them.

use std::io::{self, BufRead, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::{MAX_HEADER_BYTES, MAX_MESSAGE_BYTES};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed DAP header: {0}")]
    Header(String),
    #[error("DAP message body of {declared} bytes exceeds the {limit}-byte limit")]
    Oversized { declared: usize, limit: usize },
    #[error("invalid DAP payload: {0}")]
    Json(String),
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> io::Error {
        match err {
            CodecError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// Read one framed message. `Ok(None)` on a clean end of stream (no bytes
/// after the previous message).
pub fn read_message<R: BufRead, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<Option<T>, CodecError> {
    let Some(header) = read_header_block(reader)? else {
        return Ok(None);
    };

    let declared = content_length(&header)?;
    if declared > MAX_MESSAGE_BYTES {
        return Err(CodecError::Oversized { declared, limit: MAX_MESSAGE_BYTES });
    }

    let mut body = vec![0u8; declared];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|err| CodecError::Json(redact_json_error(&err.to_string())))
}

/// Write one framed message and flush.
pub fn write_message<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), CodecError> {
    let payload = serde_json::to_vec(message)
        .map_err(|err| CodecError::Json(redact_json_error(&err.to_string())))?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Accumulate the header section through the `\r\n\r\n` terminator, which
/// may straddle buffered reads. Consumes nothing past the terminator.
fn read_header_block<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError> {
    let mut block: Vec<u8> = Vec::new();
    loop {
        let (chunk_len, terminator_end) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                if block.is_empty() {
                    return Ok(None);
                }
                return Err(CodecError::Header(
                    "stream ended inside the header section".to_string(),
                ));
            }
            // Re-scan the tail of what we already have in case the
            // terminator straddles the chunk boundary.
            let overlap = block.len().saturating_sub(3);
            block.extend_from_slice(available);
            (available.len(), blank_line_end(&block[overlap..]).map(|end| overlap + end))
        };

        match terminator_end {
            Some(end) => {
                let beyond = block.len() - end;
                reader.consume(chunk_len - beyond);
                block.truncate(end);
                return Ok(Some(block));
            }
            None => {
                reader.consume(chunk_len);
                if block.len() > MAX_HEADER_BYTES {
                    return Err(CodecError::Header(format!(
                        "header section exceeds {MAX_HEADER_BYTES} bytes"
                    )));
                }
            }
        }
    }
}

fn blank_line_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn content_length(header: &[u8]) -> Result<usize, CodecError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| CodecError::Header("header section is not UTF-8".to_string()))?;
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("Content-Length") {
            return value
                .trim()
                .parse()
                .map_err(|err| CodecError::Header(format!("bad Content-Length: {err}")));
        }
    }
    Err(CodecError::Header("missing Content-Length".to_string()))
}

/// Mask every quoted and backticked segment of a `serde_json` error string.
///
/// Those segments echo scalar values and field names from the payload, and
/// DAP payloads carry things like launch arguments and evaluated
/// expressions. A single-pass state machine keeps everything between a
/// pair of delimiters out of the result.
pub(crate) fn redact_json_error(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut masking: Option<char> = None;
    for ch in message.chars() {
        match masking {
            Some(delimiter) if ch == delimiter => {
                out.push_str("<hidden>");
                out.push(ch);
                masking = None;
            }
            Some(_) => {}
            None if ch == '"' || ch == '`' => {
                out.push(ch);
                masking = Some(ch);
            }
            None => out.push(ch),
        }
    }
    if masking.is_some() {
        out.push_str("<hidden>");
    }
    out
}
