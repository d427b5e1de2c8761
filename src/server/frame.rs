//! RESP wire encoding and incremental request parsing.
//!
//! Requests arrive either as RESP arrays of bulk strings (what client
//! libraries send) or as inline whitespace-separated text (telnet
//! convenience). Replies follow the Redis conventions: simple strings, bulk
//! strings, integers, arrays, nil, and error lines.

use bytes::Buf;
use bytes::BytesMut;

use crate::constants::MAX_REQUEST_SIZE;
use crate::error::ServerError;
use crate::reply::Reply;

/// Upper bound on argument count in one request frame.
const MAX_ARGS: usize = 1024 * 1024;

/// Try to parse one complete command from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; on success the consumed
/// bytes are removed from `buf`. An empty inline line parses to an empty
/// argument vector, which callers skip.
pub fn parse_command(buf: &mut BytesMut) -> Result<Option<Vec<String>>, ServerError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] == b'*' {
        parse_array(buf)
    } else {
        parse_inline(buf)
    }
}

fn parse_inline(buf: &mut BytesMut) -> Result<Option<Vec<String>>, ServerError> {
    let Some(end) = buf.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let line = buf.split_to(end + 1);
    let line = &line[..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line).map_err(|_| ServerError::Protocol {
        message: "invalid utf-8 in inline command".to_string(),
    })?;
    Ok(Some(text.split_whitespace().map(str::to_string).collect()))
}

fn parse_array(buf: &mut BytesMut) -> Result<Option<Vec<String>>, ServerError> {
    // Scan without consuming; only a complete frame advances the buffer.
    let mut pos = 0usize;
    let Some(line) = peek_line(buf, &mut pos) else {
        return Ok(None);
    };
    let count = parse_int(&line[1..])?;
    if count < 0 || count as usize > MAX_ARGS {
        return Err(ServerError::Protocol {
            message: format!("invalid multibulk length {count}"),
        });
    }
    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let Some(header) = peek_line(buf, &mut pos) else {
            return Ok(None);
        };
        if header.first() != Some(&b'$') {
            return Err(ServerError::Protocol {
                message: "expected bulk string".to_string(),
            });
        }
        let len = parse_int(&header[1..])?;
        if len < 0 || len as usize > MAX_REQUEST_SIZE {
            return Err(ServerError::Protocol {
                message: format!("invalid bulk length {len}"),
            });
        }
        let len = len as usize;
        if buf.len() < pos + len + 2 {
            return Ok(None);
        }
        let arg = String::from_utf8(buf[pos..pos + len].to_vec()).map_err(|_| ServerError::Protocol {
            message: "invalid utf-8 in argument".to_string(),
        })?;
        if &buf[pos + len..pos + len + 2] != b"\r\n" {
            return Err(ServerError::Protocol {
                message: "bulk string missing terminator".to_string(),
            });
        }
        pos += len + 2;
        args.push(arg);
    }
    buf.advance(pos);
    Ok(Some(args))
}

/// Peek the line starting at `*pos`; on success `*pos` moves past its CRLF
/// and the line bytes (without CRLF) are returned.
fn peek_line(buf: &BytesMut, pos: &mut usize) -> Option<Vec<u8>> {
    let rest = &buf[*pos..];
    let end = rest.iter().position(|&b| b == b'\n')?;
    let line = &rest[..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let out = line.to_vec();
    *pos += end + 1;
    Some(out)
}

fn parse_int(digits: &[u8]) -> Result<i64, ServerError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ServerError::Protocol {
            message: "invalid length prefix".to_string(),
        })
}

/// Append the RESP encoding of `reply` to `buf`.
pub fn encode_reply(reply: &Reply, buf: &mut BytesMut) {
    match reply {
        Reply::Simple(s) => {
            buf.extend_from_slice(b"+");
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(s) => {
            buf.extend_from_slice(format!("${}\r\n", s.len()).as_bytes());
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Integer(i) => {
            buf.extend_from_slice(format!(":{i}\r\n").as_bytes());
        }
        Reply::Array(items) => {
            buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode_reply(item, buf);
            }
        }
        Reply::Nil => buf.extend_from_slice(b"$-1\r\n"),
    }
}

/// Append a RESP error line to `buf`. `message` must already carry its wire
/// prefix (`ERR …`, `MOVED …`, `TRY …`).
pub fn encode_error(message: &str, buf: &mut BytesMut) {
    buf.extend_from_slice(b"-");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
}
