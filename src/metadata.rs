//! Patch metadata.
//!
//! The metadata blob is a sequence of fields, each opened by a big-endian
//! 32-bit cookie. The sequence is fixed: a version field, a calibration
//! field, any number of patch and word fields, then a terminator.

use object::endian::{BigEndian, U32Bytes};
use object::pod::bytes_of;
use object::read::Bytes;

use crate::blob::{Blob, Side};
use crate::config::PatchConfig;
use crate::error::MetadataError;

type E = BigEndian;

pub const COOKIE_VERSION: u32 = 0x5645_5253; // "VERS"
pub const COOKIE_CALIBRATION: u32 = 0x4341_4C42; // "CALB"
pub const COOKIE_PATCH: u32 = 0x5054_4348; // "PTCH"
pub const COOKIE_WORD: u32 = 0x574F_5244; // "WORD"
pub const COOKIE_END: u32 = 0x454E_4421; // "END!"

/// Size of each calibration identity, NUL padded.
pub const CALIBRATION_ID_LEN: usize = 16;

fn u32(v: u32) -> U32Bytes<E> {
    U32Bytes::new(BigEndian, v)
}

fn put(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(bytes_of(&u32(v)));
}

/// Reads a big-endian word of the field starting at `offset`.
fn read_u32(bytes: &mut Bytes<'_>, offset: usize) -> Result<u32, MetadataError> {
    let word = bytes
        .read::<U32Bytes<E>>()
        .map_err(|()| MetadataError::Truncated(offset))?;
    Ok(word.get(BigEndian))
}

fn read_id(bytes: &mut Bytes<'_>, offset: usize) -> Result<[u8; CALIBRATION_ID_LEN], MetadataError> {
    bytes
        .read_bytes(CALIBRATION_ID_LEN)
        .ok()
        .and_then(|id| id.0.try_into().ok())
        .ok_or(MetadataError::Truncated(offset))
}

/// An inclusive address interval the patch mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub start: u32,
    pub end: u32,
}

impl Descriptor {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }
}

/// Image identities before and after the patch, and where the identity
/// string lives in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub address: u32,
    /// Number of identity bytes rewritten in the image. Zero leaves the
    /// identity untouched.
    pub length: u32,
    pub source: [u8; CALIBRATION_ID_LEN],
    pub target: [u8; CALIBRATION_ID_LEN],
}

fn identity(raw: &[u8; CALIBRATION_ID_LEN]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Pads `id` with NULs, truncating past the field size.
pub fn identity_bytes(id: &str) -> [u8; CALIBRATION_ID_LEN] {
    let mut out = [0u8; CALIBRATION_ID_LEN];
    let n = id.len().min(CALIBRATION_ID_LEN);
    out[..n].copy_from_slice(&id.as_bytes()[..n]);
    out
}

impl Calibration {
    pub fn source_id(&self) -> String {
        identity(&self.source)
    }

    pub fn target_id(&self) -> String {
        identity(&self.target)
    }
}

/// One decoded metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Version(u32),
    Calibration(Calibration),
    Patch(Descriptor),
    /// A 4-byte patch carrying its own old and new values.
    Word { address: u32, old: u32, new: u32 },
    Terminator,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Version(_) => "version",
            Field::Calibration(_) => "calibration",
            Field::Patch(_) => "patch",
            Field::Word { .. } => "word",
            Field::Terminator => "terminator",
        }
    }

    /// Decodes the field at the front of `bytes`. `total` is the size of the
    /// whole blob and only serves to report offsets.
    pub fn decode(bytes: &mut Bytes<'_>, total: usize) -> Result<Field, MetadataError> {
        let offset = total - bytes.len();
        let field = match read_u32(bytes, offset)? {
            COOKIE_VERSION => Field::Version(read_u32(bytes, offset)?),
            COOKIE_CALIBRATION => Field::Calibration(Calibration {
                address: read_u32(bytes, offset)?,
                length: read_u32(bytes, offset)?,
                source: read_id(bytes, offset)?,
                target: read_id(bytes, offset)?,
            }),
            COOKIE_PATCH => Field::Patch(Descriptor {
                start: read_u32(bytes, offset)?,
                end: read_u32(bytes, offset)?,
            }),
            COOKIE_WORD => Field::Word {
                address: read_u32(bytes, offset)?,
                old: read_u32(bytes, offset)?,
                new: read_u32(bytes, offset)?,
            },
            COOKIE_END => Field::Terminator,
            cookie => return Err(MetadataError::UnknownCookie { cookie, offset }),
        };
        Ok(field)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            Field::Version(version) => {
                put(out, COOKIE_VERSION);
                put(out, version);
            }
            Field::Calibration(c) => {
                put(out, COOKIE_CALIBRATION);
                put(out, c.address);
                put(out, c.length);
                out.extend_from_slice(&c.source);
                out.extend_from_slice(&c.target);
            }
            Field::Patch(d) => {
                put(out, COOKIE_PATCH);
                put(out, d.start);
                put(out, d.end);
            }
            Field::Word { address, old, new } => {
                put(out, COOKIE_WORD);
                put(out, address);
                put(out, old);
                put(out, new);
            }
            Field::Terminator => put(out, COOKIE_END),
        }
    }
}

pub fn encode_fields(fields: &[Field]) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        field.encode(&mut out);
    }
    out
}

/// Everything the metadata blob says about a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchMetadata {
    pub version: u32,
    pub calibration: Calibration,
    pub descriptors: Vec<Descriptor>,
    /// Blobs implied by calibration and word fields.
    pub synthesized: Vec<Blob>,
}

fn checked_descriptor(
    start: u32,
    len: u32,
    config: &PatchConfig,
) -> Result<Descriptor, MetadataError> {
    let end = start
        .checked_add(len - 1)
        .ok_or(MetadataError::OutOfRange { start, end: u32::MAX })?;
    validate(Descriptor { start, end }, config)
}

fn validate(d: Descriptor, config: &PatchConfig) -> Result<Descriptor, MetadataError> {
    if d.end < d.start {
        return Err(MetadataError::InvertedRange {
            start: d.start,
            end: d.end,
        });
    }
    if d.end >= config.metadata_address.min(config.baseline_offset) {
        return Err(MetadataError::OutOfRange {
            start: d.start,
            end: d.end,
        });
    }
    Ok(d)
}

/// Parses a metadata blob, rejecting any version other than
/// `config.engine_version`.
pub fn parse(data: &[u8], config: &PatchConfig) -> Result<PatchMetadata, MetadataError> {
    let total = data.len();
    let mut bytes = Bytes(data);

    let version = match Field::decode(&mut bytes, total)? {
        Field::Version(v) => v,
        _ => return Err(MetadataError::MissingVersion),
    };
    if version != config.engine_version {
        return Err(MetadataError::VersionMismatch {
            found: version,
            expected: config.engine_version,
        });
    }

    let calibration = match Field::decode(&mut bytes, total)? {
        Field::Calibration(c) => c,
        _ => return Err(MetadataError::MissingCalibration),
    };
    if calibration.length as usize > CALIBRATION_ID_LEN {
        return Err(MetadataError::CalibrationTooLong(calibration.length));
    }

    let mut descriptors = Vec::new();
    let mut synthesized = Vec::new();
    if calibration.length > 0 {
        let d = checked_descriptor(calibration.address, calibration.length, config)?;
        let n = calibration.length as usize;
        synthesized.push(Blob::new(Side::Before, d.start, calibration.source[..n].to_vec()));
        synthesized.push(Blob::new(Side::After, d.start, calibration.target[..n].to_vec()));
        descriptors.push(d);
    }

    loop {
        let offset = total - bytes.len();
        match Field::decode(&mut bytes, total)? {
            Field::Patch(d) => descriptors.push(validate(d, config)?),
            Field::Word { address, old, new } => {
                let d = checked_descriptor(address, 4, config)?;
                synthesized.push(Blob::new(Side::Before, address, old.to_be_bytes().to_vec()));
                synthesized.push(Blob::new(Side::After, address, new.to_be_bytes().to_vec()));
                descriptors.push(d);
            }
            Field::Terminator => break,
            other => {
                return Err(MetadataError::UnexpectedField {
                    field: other.name(),
                    offset,
                })
            }
        }
    }

    if !bytes.is_empty() {
        tracing::debug!("{} bytes of padding after metadata terminator", bytes.len());
    }
    if descriptors.is_empty() {
        return Err(MetadataError::NoPatches);
    }

    Ok(PatchMetadata {
        version,
        calibration,
        descriptors,
        synthesized,
    })
}
