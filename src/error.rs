//! Error types.
//!
//! Library entry points return these typed errors; the binary wraps them in
//! `anyhow` with context about which file and which step failed.

use thiserror::Error;

use crate::blob::Side;

/// A transport line that could not be turned into a usable record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}: `{raw}`")]
pub struct RecordError {
    /// 1-based line number in the transport file.
    pub line: usize,
    /// The offending line, without its line terminator.
    pub raw: String,
    pub kind: RecordErrorKind,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordErrorKind {
    #[error("unsupported record type S{0}")]
    UnsupportedType(char),

    /// Framing, hex or checksum error reported by the S-record parser.
    #[error("malformed record ({0})")]
    Malformed(String),

    #[error("payload runs past the end of the 32-bit address space")]
    AddressOverflow,

    #[error("record straddles the address boundary 0x{0:08X}")]
    StraddlesBoundary(u32),

    #[error("count record declares {declared} data records, {actual} seen")]
    CountMismatch { declared: u32, actual: u32 },

    #[error("{side} bytes at 0x{address:08X} conflict with an earlier record")]
    ConflictingOverlap { side: Side, address: u32 },
}

/// Structural problems in the metadata blob.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("no metadata range at 0x{0:08X}")]
    Missing(u32),

    #[error("metadata truncated at offset {0}")]
    Truncated(usize),

    #[error("unknown field cookie 0x{cookie:08X} at offset {offset}")]
    UnknownCookie { cookie: u32, offset: usize },

    #[error("{field} field not allowed at offset {offset}")]
    UnexpectedField { field: &'static str, offset: usize },

    #[error("version field missing")]
    MissingVersion,

    #[error("patch requires engine version {found}, this engine is version {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("calibration field missing")]
    MissingCalibration,

    #[error("calibration length {0} exceeds identity size")]
    CalibrationTooLong(u32),

    #[error("patch range 0x{start:08X}-0x{end:08X} is inverted")]
    InvertedRange { start: u32, end: u32 },

    #[error("patch range 0x{start:08X}-0x{end:08X} reaches past the patchable address space")]
    OutOfRange { start: u32, end: u32 },

    #[error("metadata contains no patches")]
    NoPatches,
}

/// A descriptor that no aggregated range fully covers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoverageError {
    #[error("no {side} range holds 0x{address:08X}")]
    Uncovered { side: Side, address: u32 },

    #[error("{side} range at 0x{address:08X} holds {available} of {required} bytes")]
    Short {
        side: Side,
        address: u32,
        required: usize,
        available: usize,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("coverage error: {0}")]
    Coverage(#[from] CoverageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
