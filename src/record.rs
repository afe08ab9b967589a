//! Motorola S-record codec.
//!
//! Line framing, hex pairs and checksums are handled by the `srec` crate.
//! This module adds what a patch loader needs on top: line numbers and raw
//! text for diagnostics, the address space bound, S5/S6 count checks and
//! the end of stream at the terminator.

use crate::error::{RecordError, RecordErrorKind};

/// Largest payload an S3 line can carry (count byte minus address and checksum).
pub const MAX_S3_PAYLOAD: usize = 255 - 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// S0: free-form header text.
    Header,
    /// S1/S2/S3: payload bytes at an address.
    Data,
    /// S5/S6: number of data records so far, stored in `address`.
    Count,
    /// S7/S8/S9: end of the record stream.
    Terminator,
}

/// One decoded transport line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub line: usize,
    pub raw: String,
    pub kind: RecordKind,
    pub address: u32,
    pub data: Vec<u8>,
}

impl Record {
    /// First address past the payload. Only meaningful for data records.
    pub fn end(&self) -> u64 {
        self.address as u64 + self.data.len() as u64
    }
}

/// Flattens a parsed `srec` record into kind, address and payload.
#[allow(unreachable_patterns)]
fn split(record: srec::Record) -> Result<(RecordKind, u32, Vec<u8>), RecordErrorKind> {
    let parts = match record {
        srec::Record::S0(text) => (RecordKind::Header, 0, text.into_bytes()),
        srec::Record::S1(d) => (RecordKind::Data, u32::from(d.address.0), d.data),
        srec::Record::S2(d) => (RecordKind::Data, u32::from(d.address.0), d.data),
        srec::Record::S3(d) => (RecordKind::Data, u32::from(d.address.0), d.data),
        srec::Record::S5(c) => (RecordKind::Count, u32::from(c.0), Vec::new()),
        srec::Record::S6(c) => (RecordKind::Count, u32::from(c.0), Vec::new()),
        srec::Record::S7(a) => (RecordKind::Terminator, u32::from(a.0), Vec::new()),
        srec::Record::S8(a) => (RecordKind::Terminator, u32::from(a.0), Vec::new()),
        srec::Record::S9(a) => (RecordKind::Terminator, u32::from(a.0), Vec::new()),
        other => return Err(RecordErrorKind::Malformed(format!("{:?}", other))),
    };
    Ok(parts)
}

/// Decodes a single transport line. `line` is only used for diagnostics.
pub fn decode(line: usize, text: &str) -> Result<Record, RecordError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    let fail = |kind| RecordError {
        line,
        raw: raw.to_string(),
        kind,
    };

    // S4 is reserved and has no layout to parse.
    if let [b'S', digit, ..] = raw.as_bytes() {
        if !matches!(digit, b'0'..=b'3' | b'5'..=b'9') {
            return Err(fail(RecordErrorKind::UnsupportedType(*digit as char)));
        }
    }

    let parsed = srec::reader::read_records(raw)
        .next()
        .ok_or_else(|| fail(RecordErrorKind::Malformed("empty record".to_string())))?
        .map_err(|err| fail(RecordErrorKind::Malformed(format!("{:?}", err))))?;
    let (kind, address, data) = split(parsed).map_err(fail)?;

    let record = Record {
        line,
        raw: raw.to_string(),
        kind,
        address,
        data,
    };
    if kind == RecordKind::Data && record.end() > 1u64 << 32 {
        return Err(fail(RecordErrorKind::AddressOverflow));
    }
    Ok(record)
}

fn render(record: srec::Record) -> String {
    srec::writer::generate_srec_file(&[record])
        .trim_end()
        .to_string()
}

/// Splits `data` into S3 lines of at most `width` payload bytes, in
/// ascending address order.
pub fn encode_data(address: u32, data: &[u8], width: usize) -> Vec<String> {
    let width = width.clamp(1, MAX_S3_PAYLOAD);
    data.chunks(width)
        .enumerate()
        .map(|(i, chunk)| {
            render(srec::Record::S3(srec::Data {
                address: srec::Address32(address.wrapping_add((i * width) as u32)),
                data: chunk.to_vec(),
            }))
        })
        .collect()
}

pub fn encode_header(text: &str) -> String {
    let mut end = text.len().min(MAX_S3_PAYLOAD);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    render(srec::Record::S0(text[..end].to_string()))
}

/// S5 or S6 record for `count` data records, or `None` past 24 bits.
pub fn encode_count(count: u32) -> Option<String> {
    if count <= 0xFFFF {
        Some(render(srec::Record::S5(srec::Count16(count as u16))))
    } else if count <= 0xFF_FFFF {
        Some(render(srec::Record::S6(srec::Count24(count))))
    } else {
        None
    }
}

pub fn encode_terminator(entry: u32) -> String {
    render(srec::Record::S7(srec::Address32(entry)))
}

/// Streams records out of transport text.
///
/// Blank lines are skipped. The first bad line ends the stream with an
/// error. Anything after a terminator is ignored.
pub struct RecordReader<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    data_records: u32,
    done: bool,
}

impl<'a> RecordReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate(),
            data_records: 0,
            done: false,
        }
    }
}

impl Iterator for RecordReader<'_> {
    type Item = Result<Record, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (index, text) = loop {
            let (index, text) = self.lines.next()?;
            if !text.trim().is_empty() {
                break (index, text);
            }
        };

        let record = match decode(index + 1, text) {
            Ok(record) => record,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };

        match record.kind {
            RecordKind::Data => self.data_records += 1,
            RecordKind::Count if record.address != self.data_records => {
                self.done = true;
                return Some(Err(RecordError {
                    line: record.line,
                    raw: record.raw,
                    kind: RecordErrorKind::CountMismatch {
                        declared: record.address,
                        actual: self.data_records,
                    },
                }));
            }
            RecordKind::Terminator => {
                self.done = true;
                let trailing = self.lines.by_ref().filter(|(_, l)| !l.trim().is_empty()).count();
                if trailing > 0 {
                    tracing::warn!(
                        "ignoring {} line(s) after terminator on line {}",
                        trailing,
                        record.line
                    );
                }
            }
            _ => {}
        }
        Some(Ok(record))
    }
}
