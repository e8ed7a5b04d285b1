//! Response framing
//!
//! Every reply is a header line followed by a payload:
//!
//! ```text
//! <seq> <chunk_count> <payload_bytes>\n
//! <payload_bytes bytes>
//! ```
//!
//! Text-only replies use a chunk count of 0.

use std::fmt;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use winnow::ascii::{digit1, space1};
use winnow::combinator::{eof, opt, terminated};
use winnow::prelude::*;
use winnow::token::take_till;

type PResult<T> = winnow::ModalResult<T>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message too short: need at least {0} bytes")]
    TooShort(usize),
    #[error("Invalid response header '{0}'")]
    BadHeader(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub seq: String,
    pub chunks: usize,
    pub bytes: usize,
}

impl ResponseHeader {
    /// Parse a header line, with or without its line terminator.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let mut input = trimmed;
        header
            .parse_next(&mut input)
            .map_err(|_| ProtocolError::BadHeader(trimmed.to_string()))
    }
}

impl fmt::Display for ResponseHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.seq, self.chunks, self.bytes)
    }
}

fn header(input: &mut &str) -> PResult<ResponseHeader> {
    let seq = take_till(1.., |c: char| c.is_ascii_whitespace()).parse_next(input)?;
    space1.parse_next(input)?;
    let chunks = digit1.parse_to().parse_next(input)?;
    space1.parse_next(input)?;
    let bytes = terminated(digit1.parse_to(), (opt(space1), eof)).parse_next(input)?;
    Ok(ResponseHeader {
        seq: seq.to_string(),
        chunks,
        bytes,
    })
}

/// A reply to one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub seq: String,
    pub chunks: usize,
    pub payload: Vec<u8>,
}

impl Response {
    /// No data: `<seq> 0 0`.
    pub fn empty(seq: &str) -> Self {
        Self::chunks(seq, 0, Vec::new())
    }

    pub fn text(seq: &str, text: impl Into<String>) -> Self {
        Self::chunks(seq, 0, text.into().into_bytes())
    }

    pub fn chunks(seq: &str, chunks: usize, payload: Vec<u8>) -> Self {
        Self {
            seq: seq.to_string(),
            chunks,
            payload,
        }
    }

    pub fn header(&self) -> ResponseHeader {
        ResponseHeader {
            seq: self.seq.clone(),
            chunks: self.chunks,
            bytes: self.payload.len(),
        }
    }

    /// Header line and payload as written to the socket.
    pub fn encode(&self) -> Vec<u8> {
        let header = format!("{}\n", self.header());
        let mut buf = Vec::with_capacity(header.len() + self.payload.len());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Split an encoded response into its header and payload.
pub fn decode_response(data: &[u8]) -> Result<(ResponseHeader, &[u8]), ProtocolError> {
    let newline = data
        .iter()
        .position(|b| *b == b'\n')
        .ok_or(ProtocolError::TooShort(data.len() + 1))?;
    let line = String::from_utf8_lossy(&data[..newline]);
    let header = ResponseHeader::parse(&line)?;

    let start = newline + 1;
    let end = start + header.bytes;
    if data.len() < end {
        return Err(ProtocolError::TooShort(end));
    }
    Ok((header, &data[start..end]))
}

/// Read one framed response from a stream. `None` on a clean end of stream.
pub async fn read_response<R>(reader: &mut R) -> Result<Option<(ResponseHeader, Vec<u8>)>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let header = ResponseHeader::parse(&line)?;
    let mut payload = vec![0u8; header.bytes];
    reader.read_exact(&mut payload).await?;
    Ok(Some((header, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_frame() {
        assert_eq!(Response::empty("17").encode(), b"17 0 0\n");
    }

    #[test]
    fn decode_splits_header_and_payload() {
        let mut data = Response::text("3", "PROTOCOL_VERSION: 3\n").encode();
        data.extend_from_slice(b"next");
        let (header, payload) = decode_response(&data).unwrap();
        assert_eq!(
            header,
            ResponseHeader {
                seq: "3".into(),
                chunks: 0,
                bytes: 20
            }
        );
        assert_eq!(payload, b"PROTOCOL_VERSION: 3\n");
    }

    #[test]
    fn decode_rejects_short_and_bad_frames() {
        assert!(matches!(decode_response(b"1 1 10\nabc"), Err(ProtocolError::TooShort(17))));
        assert!(matches!(decode_response(b"1 x 10\n"), Err(ProtocolError::BadHeader(_))));
        assert!(matches!(decode_response(b"1 1 10"), Err(ProtocolError::TooShort(_))));
    }

    #[tokio::test]
    async fn read_response_from_stream() {
        let mut data = Response::chunks("9", 1, vec![1, 2, 3]).encode();
        data.extend(Response::empty("10").encode());
        let mut reader = tokio::io::BufReader::new(&data[..]);

        let (first, payload) = read_response(&mut reader).await.unwrap().unwrap();
        assert_eq!((first.seq.as_str(), first.chunks, payload), ("9", 1, vec![1, 2, 3]));
        let (second, _) = read_response(&mut reader).await.unwrap().unwrap();
        assert_eq!(second.seq, "10");
        assert!(read_response(&mut reader).await.unwrap().is_none());
    }
}
