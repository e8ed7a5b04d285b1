//! Parser for wave-server request lines
//!
//! ```text
//! <OPCODE> <SEQ> [<STA> <CHA> <NET> [<LOC>]] [<T1> <T2>] [<DS>] [<BINARY_FLAG>]
//! ```
//!
//! Which of the bracketed groups are present is decided per opcode by a
//! [`Grammar`]; the dispatcher owns that mapping.

use thiserror::Error;
use winnow::ascii::{Caseless, digit1, multispace0};
use winnow::combinator::{alt, eof, opt, preceded, repeat, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{one_of, take_till, take_while};

use crate::model::{QueryKind, RequestSpan, Scnl, TimeBound};

type PResult<T> = winnow::ModalResult<T>;

/// Longest station/channel/network/location code accepted.
pub const MAX_CODE_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("missing {what} (token {position})")]
    Missing { what: &'static str, position: usize },
    #[error("invalid {what} '{token}' (token {position})")]
    Invalid {
        what: &'static str,
        token: String,
        position: usize,
    },
    #[error("unexpected trailing token '{token}' (token {position})")]
    Trailing { token: String, position: usize },
}

/// Argument layout expected after `<OPCODE> <SEQ>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    /// No structured arguments; everything after the seq lands in `args`.
    Bare,
    /// `STA CHA NET LOC T1 T2 [DS] [FLAG]`
    Scnl,
    /// `STA CHA NET T1 T2 [DS] [FLAG]`, location `--`
    Scn,
    /// `STA CHA NET LOC T1 T2 DS FLAG`, all required; amplitude series
    Rsam,
}

/// A parsed request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub opcode: String,
    pub seq: String,
    /// Raw tokens following the seq.
    pub args: Vec<String>,
    pub scnl: Option<Scnl>,
    pub span: Option<RequestSpan>,
    pub downsample: Option<i32>,
    pub binary: bool,
    pub kind: QueryKind,
}

impl Command {
    /// Downsample factor, `0` when absent. Anything below 2 means no reduction.
    pub fn downsample_factor(&self) -> i32 {
        self.downsample.unwrap_or(0)
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// Extract the upper-cased opcode of a request line, without parsing the rest.
pub fn opcode_of(line: &str) -> Option<String> {
    let mut input = line;
    preceded(multispace0, opcode)
        .parse_next(&mut input)
        .ok()
        .map(|op| op.to_ascii_uppercase())
}

/// Parse a request line according to `grammar`.
pub fn parse(line: &str, grammar: Grammar) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut cursor = Cursor::new(line);
    let opcode = cursor.field("opcode", opcode)?.to_ascii_uppercase();
    let seq = cursor.field("request id", raw_token)?.to_string();
    let args = cursor.remaining()?;

    let mut command = Command {
        opcode,
        seq,
        args,
        scnl: None,
        span: None,
        downsample: None,
        binary: true,
        kind: QueryKind::Raw,
    };

    if grammar == Grammar::Bare {
        return Ok(command);
    }

    let station = cursor.field("station", code)?;
    let channel = cursor.field("channel", code)?;
    let network = cursor.field("network", code)?;
    command.scnl = Some(match grammar {
        Grammar::Scn => Scnl::scn(station, channel, network),
        _ => Scnl::new(station, channel, network, cursor.field("location", code)?),
    });

    let start = cursor.field("start time", time_bound)?;
    let end = cursor.field("end time", time_bound)?;
    command.span = Some(RequestSpan::new(start, end));

    if grammar == Grammar::Rsam {
        command.kind = QueryKind::Rsam;
        command.downsample = Some(cursor.field("downsample factor", integer)?);
        command.binary = cursor.field("binary flag", flag)?;
    } else {
        command.downsample = cursor.optional_field("downsample factor", integer)?;
        if let Some(binary) = cursor.optional_field("binary flag", flag)? {
            command.binary = binary;
        }
    }

    cursor.finish()?;
    Ok(command)
}

// ============ Token cursor ============

struct Cursor<'a> {
    rest: &'a str,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            rest: input,
            position: 0,
        }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        let mut input = self.rest;
        let token = preceded(multispace0, raw_token)
            .parse_next(&mut input)
            .ok()?;
        self.rest = input;
        self.position += 1;
        Some(token)
    }

    fn field<O, P>(&mut self, what: &'static str, parser: P) -> Result<O, ParseError>
    where
        P: Parser<&'a str, O, ErrMode<ContextError>>,
    {
        let position = self.position;
        let token = self
            .next_token()
            .ok_or(ParseError::Missing { what, position })?;
        whole_token(what, token, position, parser)
    }

    fn optional_field<O, P>(&mut self, what: &'static str, parser: P) -> Result<Option<O>, ParseError>
    where
        P: Parser<&'a str, O, ErrMode<ContextError>>,
    {
        let position = self.position;
        match self.next_token() {
            Some(token) => whole_token(what, token, position, parser).map(Some),
            None => Ok(None),
        }
    }

    /// Tokens not yet consumed, without consuming them.
    fn remaining(&self) -> Result<Vec<String>, ParseError> {
        let mut input = self.rest;
        let tokens: Vec<&str> = terminated(tokens, multispace0)
            .parse_next(&mut input)
            .map_err(|_| ParseError::Invalid {
                what: "arguments",
                token: self.rest.to_string(),
                position: self.position,
            })?;
        Ok(tokens.into_iter().map(str::to_string).collect())
    }

    fn finish(mut self) -> Result<(), ParseError> {
        let position = self.position;
        match self.next_token() {
            Some(token) => Err(ParseError::Trailing {
                token: token.to_string(),
                position,
            }),
            None => Ok(()),
        }
    }
}

/// Run `parser` over a single token, requiring it to consume all of it.
fn whole_token<'a, O, P>(
    what: &'static str,
    token: &'a str,
    position: usize,
    parser: P,
) -> Result<O, ParseError>
where
    P: Parser<&'a str, O, ErrMode<ContextError>>,
{
    let mut input = token;
    terminated(parser, eof)
        .parse_next(&mut input)
        .map_err(|_| ParseError::Invalid {
            what,
            token: token.to_string(),
            position,
        })
}

// ============ Tokens ============

fn raw_token<'a>(input: &mut &'a str) -> PResult<&'a str> {
    take_till(1.., |c: char| c.is_ascii_whitespace()).parse_next(input)
}

fn tokens<'a>(input: &mut &'a str) -> PResult<Vec<&'a str>> {
    repeat(0.., preceded(multispace0, raw_token)).parse_next(input)
}

/// Opcode word; a trailing `:` (Earthworm style, `MENU:`) is tolerated.
fn opcode<'a>(input: &mut &'a str) -> PResult<&'a str> {
    terminated(
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
        opt(':'),
    )
    .parse_next(input)
}

fn code<'a>(input: &mut &'a str) -> PResult<&'a str> {
    take_while(1..=MAX_CODE_LEN, |c: char| c.is_ascii_graphic()).parse_next(input)
}

// ============ Numbers ============

fn float(input: &mut &str) -> PResult<f64> {
    take_while(1.., |c: char| {
        c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')
    })
    .try_map(str::parse::<f64>)
    .verify(|t: &f64| t.is_finite())
    .parse_next(input)
}

fn integer(input: &mut &str) -> PResult<i32> {
    (opt(one_of(['-', '+'])), digit1)
        .take()
        .try_map(str::parse::<i32>)
        .parse_next(input)
}

/// `now` (any case), `0` for an open bound, or epoch seconds.
fn time_bound(input: &mut &str) -> PResult<TimeBound> {
    alt((
        Caseless("now").value(TimeBound::Now),
        float.map(|t| {
            if t == 0.0 {
                TimeBound::Open
            } else {
                TimeBound::At(t)
            }
        }),
    ))
    .parse_next(input)
}

/// `1` selects binary framing; any other token selects text.
fn flag(input: &mut &str) -> PResult<bool> {
    raw_token.map(|t| t == "1").parse_next(input)
}
