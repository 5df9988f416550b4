//! Text trace of memory accesses, one per line:
//!
//! ```text
//! load  0x<address> <size>
//! store 0x<address> <size> <data as 2*size hex digits>
//! ```

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use nom::{
    bytes::complete::{tag_no_case, take_till1},
    character::complete::{digit1, hex_digit1, space0, space1},
    combinator::{eof, map, map_res, opt},
    error::{context, VerboseError, VerboseErrorKind},
    sequence::preceded,
    IResult,
};
use thiserror::Error;

use crate::memory::Addr;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to open trace file {}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read trace at line {line}")]
    Io {
        line: usize,
        #[source]
        source: io::Error,
    },
    #[error("invalid trace file access type `{keyword}` at line {line}")]
    UnknownOperation { line: usize, keyword: String },
    #[error("malformed {what} at line {line}: `{text}`")]
    Malformed {
        line: usize,
        what: &'static str,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessKind {
    Load,
    Store(Vec<u8>),
}

/// One access of the trace. For stores `size` equals the data length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub addr: Addr,
    pub size: usize,
    pub kind: AccessKind,
}

impl AccessRecord {
    pub fn load(addr: Addr, size: usize) -> Self {
        Self {
            addr,
            size,
            kind: AccessKind::Load,
        }
    }
    pub fn store(addr: Addr, data: Vec<u8>) -> Self {
        Self {
            addr,
            size: data.len(),
            kind: AccessKind::Store(data),
        }
    }
    pub fn is_store(&self) -> bool {
        matches!(self.kind, AccessKind::Store(_))
    }
}

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

fn keyword(input: &str) -> Res<&str> {
    context(
        "access type",
        preceded(space0, take_till1(|c: char| c.is_whitespace())),
    )(input)
}

fn address(input: &str) -> Res<Addr> {
    context(
        "address",
        preceded(
            space1,
            map_res(preceded(opt(tag_no_case("0x")), hex_digit1), |h| {
                usize::from_str_radix(h, 16).map(Addr::new)
            }),
        ),
    )(input)
}

fn size(input: &str) -> Res<usize> {
    context("access size", preceded(space1, map_res(digit1, str::parse)))(input)
}

fn data(input: &str) -> Res<&str> {
    context("store data", preceded(space1, hex_digit1))(input)
}

fn end_of_line(input: &str) -> Res<()> {
    context("end of line", map(preceded(space0, eof), |_| ()))(input)
}

fn decode_hex(digits: &str) -> Option<Vec<u8>> {
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok())
        .collect()
}

/// parse one trace line. `line` is the 1-based line number used in errors.
/// Blank lines yield `Ok(None)`.
pub fn parse_access(input: &str, line: usize) -> Result<Option<AccessRecord>, TraceError> {
    let text = input.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let malformed = |e: nom::Err<VerboseError<&str>>| {
        let what = match &e {
            nom::Err::Error(v) | nom::Err::Failure(v) => v.errors.iter().find_map(|(_, k)| match k {
                VerboseErrorKind::Context(c) => Some(*c),
                _ => None,
            }),
            nom::Err::Incomplete(_) => None,
        };
        TraceError::Malformed {
            line,
            what: what.unwrap_or("access"),
            text: text.to_owned(),
        }
    };
    let (rest, op) = keyword(text).map_err(malformed)?;
    let is_store = match op {
        "store" => true,
        "load" => false,
        _ => {
            return Err(TraceError::UnknownOperation {
                line,
                keyword: op.to_owned(),
            })
        }
    };
    let (rest, addr) = address(rest).map_err(malformed)?;
    let (rest, size) = size(rest).map_err(malformed)?;
    let (rest, record) = if is_store {
        let (rest, digits) = data(rest).map_err(malformed)?;
        let bytes = decode_hex(digits)
            .filter(|b| b.len() == size)
            .ok_or_else(|| TraceError::Malformed {
                line,
                what: "store data",
                text: text.to_owned(),
            })?;
        (rest, AccessRecord::store(addr, bytes))
    } else {
        (rest, AccessRecord::load(addr, size))
    };
    end_of_line(rest).map_err(malformed)?;
    Ok(Some(record))
}

/// Lazily parsed, non-restartable sequence of accesses. Stops after the
/// first error.
pub struct TraceReader<R> {
    lines: io::Lines<R>,
    line: usize,
    finished: bool,
}

impl TraceReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TraceError::Unreadable {
            path: path.to_owned(),
            source,
        })?;
        log::info!("opened trace {}", path.display());
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            finished: false,
        }
    }
    /// number of lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<AccessRecord, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let Some(read) = self.lines.next() else {
                self.finished = true;
                break;
            };
            self.line += 1;
            let parsed = read
                .map_err(|source| TraceError::Io {
                    line: self.line,
                    source,
                })
                .and_then(|text| parse_access(&text, self.line));
            match parsed {
                Ok(None) => continue,
                Ok(Some(record)) => return Some(Ok(record)),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
