//! Chunk encodings for the wire
//!
//! Binary record, big-endian:
//!
//! ```text
//! [u8 kind][u8 len][STA][u8 len][CHA][u8 len][NET][u8 len][LOC]
//! [f64 first][f64 last][u16 count][count x 4-byte value]
//! ```
//!
//! Raw values are `i32`, RSAM values are `f32`.
//!
//! Text form is a header line `STA CHA NET LOC first last count` followed by
//! one line of space-separated values.

use std::fmt::Write as _;

use thiserror::Error;

use crate::chunk::{MAX_CHUNK_SAMPLES, WaveformChunk};
use crate::model::{QueryKind, Scnl};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("chunk truncated: need {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("unknown chunk kind {0}")]
    BadKind(u8),
    #[error("code '{0}' is longer than 255 bytes")]
    CodeTooLong(String),
    #[error("code is not valid UTF-8")]
    BadCode,
    #[error("chunk carries {0} values, limit is {MAX_CHUNK_SAMPLES}")]
    TooManyValues(usize),
}

/// Append the binary form of each chunk to `out`.
pub fn encode_binary(chunks: &[WaveformChunk], out: &mut Vec<u8>) -> Result<(), CodecError> {
    for chunk in chunks {
        encode_binary_chunk(chunk, out)?;
    }
    Ok(())
}

fn encode_binary_chunk(chunk: &WaveformChunk, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let count = u16::try_from(chunk.values.len())
        .ok()
        .filter(|n| usize::from(*n) <= MAX_CHUNK_SAMPLES)
        .ok_or(CodecError::TooManyValues(chunk.values.len()))?;

    out.push(chunk.kind.code());
    let scnl = &chunk.scnl;
    for code in [&scnl.station, &scnl.channel, &scnl.network, &scnl.location] {
        let len = u8::try_from(code.len()).map_err(|_| CodecError::CodeTooLong(code.clone()))?;
        out.push(len);
        out.extend_from_slice(code.as_bytes());
    }
    out.extend_from_slice(&chunk.first.to_be_bytes());
    out.extend_from_slice(&chunk.last.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());

    out.reserve(chunk.values.len() * 4);
    match chunk.kind {
        QueryKind::Raw => {
            for value in &chunk.values {
                out.extend_from_slice(&(value.round() as i32).to_be_bytes());
            }
        }
        QueryKind::Rsam => {
            for value in &chunk.values {
                out.extend_from_slice(&(*value as f32).to_be_bytes());
            }
        }
    }
    Ok(())
}

/// Append the text form of each chunk to `out`.
pub fn encode_text(chunks: &[WaveformChunk], out: &mut String) {
    for chunk in chunks {
        let scnl = &chunk.scnl;
        let _ = writeln!(
            out,
            "{} {} {} {} {:.6} {:.6} {}",
            scnl.station,
            scnl.channel,
            scnl.network,
            scnl.location,
            chunk.first,
            chunk.last,
            chunk.values.len()
        );
        for (i, value) in chunk.values.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = match chunk.kind {
                QueryKind::Raw => write!(out, "{}", value.round() as i32),
                QueryKind::Rsam => write!(out, "{}", *value as f32),
            };
        }
        out.push('\n');
    }
}

/// Decode a payload of back-to-back binary chunk records.
pub fn decode_binary_chunks(data: &[u8]) -> Result<Vec<WaveformChunk>, CodecError> {
    let mut reader = Reader { data, offset: 0 };
    let mut chunks = Vec::new();
    while !reader.is_empty() {
        chunks.push(reader.chunk()?);
    }
    Ok(chunks)
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.offset + n;
        let bytes = self.data.get(self.offset..end).ok_or(CodecError::Truncated {
            offset: self.offset,
            needed: end - self.data.len().min(end),
        })?;
        self.offset = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn code(&mut self) -> Result<String, CodecError> {
        let [len] = self.array::<1>()?;
        let bytes = self.take(usize::from(len))?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::BadCode)
    }

    fn chunk(&mut self) -> Result<WaveformChunk, CodecError> {
        let [kind] = self.array::<1>()?;
        let kind = QueryKind::from_code(kind).ok_or(CodecError::BadKind(kind))?;
        let scnl = Scnl::new(self.code()?, self.code()?, self.code()?, self.code()?);
        let first = f64::from_be_bytes(self.array()?);
        let last = f64::from_be_bytes(self.array()?);
        let count = usize::from(u16::from_be_bytes(self.array()?));

        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let raw: [u8; 4] = self.array()?;
            values.push(match kind {
                QueryKind::Raw => f64::from(i32::from_be_bytes(raw)),
                QueryKind::Rsam => f64::from(f32::from_be_bytes(raw)),
            });
        }

        Ok(WaveformChunk {
            scnl,
            kind,
            first,
            last,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(kind: QueryKind, values: Vec<f64>) -> WaveformChunk {
        WaveformChunk {
            scnl: Scnl::new("STA1", "EHZ", "NW", "--"),
            kind,
            first: 1000.0,
            last: 1010.0,
            values,
        }
    }

    #[test]
    fn binary_layout() {
        let mut out = Vec::new();
        encode_binary(&[chunk(QueryKind::Raw, vec![1.0, -2.0])], &mut out).unwrap();

        // kind + codes (1+4, 1+3, 1+2, 1+2) + two f64 + u16 + 2 values
        assert_eq!(out.len(), 1 + 15 + 16 + 2 + 8);
        assert_eq!(out[0], 0);
        assert_eq!(&out[1..6], b"\x04STA1");
        assert_eq!(&out[32..34], &2u16.to_be_bytes());
        assert_eq!(&out[38..42], &(-2i32).to_be_bytes());
    }

    #[test]
    fn decode_recovers_chunks() {
        let chunks = vec![
            chunk(QueryKind::Raw, vec![1.0, 2.0, 3.0]),
            chunk(QueryKind::Rsam, vec![0.5, f64::from(f32::MAX)]),
        ];
        let mut out = Vec::new();
        encode_binary(&chunks, &mut out).unwrap();
        assert_eq!(decode_binary_chunks(&out).unwrap(), chunks);
    }

    #[test]
    fn decode_rejects_truncation_and_bad_kind() {
        let mut out = Vec::new();
        encode_binary(&[chunk(QueryKind::Raw, vec![7.0])], &mut out).unwrap();
        assert!(matches!(
            decode_binary_chunks(&out[..out.len() - 1]),
            Err(CodecError::Truncated { needed: 1, .. })
        ));

        out[0] = 9;
        assert_eq!(decode_binary_chunks(&out), Err(CodecError::BadKind(9)));
    }

    #[test]
    fn oversized_chunk_is_refused() {
        let mut out = Vec::new();
        let big = chunk(QueryKind::Raw, vec![0.0; MAX_CHUNK_SAMPLES + 1]);
        assert_eq!(
            encode_binary(&[big], &mut out),
            Err(CodecError::TooManyValues(MAX_CHUNK_SAMPLES + 1))
        );
    }

    #[test]
    fn text_form() {
        let mut out = String::new();
        encode_text(&[chunk(QueryKind::Raw, vec![1.0, 2.4, -3.0])], &mut out);
        assert_eq!(out, "STA1 EHZ NW -- 1000.000000 1010.000000 3\n1 2 -3\n");
    }
}
