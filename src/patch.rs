//! Patch file loading.
//!
//! Reads S-record transport text, folds the data records into blobs, detaches
//! the metadata blob and decodes it, then merges the blobs the metadata
//! implies.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::blob::{BlobSet, Side};
use crate::config::PatchConfig;
use crate::error::{MetadataError, RecordError, RecordErrorKind};
use crate::metadata::{self, PatchMetadata};
use crate::record::{RecordKind, RecordReader};

/// A fully decoded patch.
#[derive(Debug, Clone)]
pub struct PatchFile {
    /// Text of the S0 header records, if any.
    pub header: String,
    /// Number of data records read.
    pub data_records: usize,
    pub metadata: PatchMetadata,
    pub blobs: BlobSet,
}

/// Transport text folded into blobs, before the metadata is decoded.
#[derive(Debug, Clone, Default)]
pub struct Transport {
    pub header: String,
    pub data_records: usize,
    /// Patch and baseline bytes.
    pub blobs: BlobSet,
    /// Bytes in the metadata window, kept apart so patch ranges next to the
    /// window never merge into it.
    pub metadata: BlobSet,
}

/// Folds transport text into blobs.
///
/// Records must not cross the start of the metadata window or the start of
/// the baseline half, and overlapping records must agree byte for byte.
pub fn aggregate(text: &str, config: &PatchConfig) -> Result<Transport, RecordError> {
    let mut transport = Transport::default();
    let region = |address: u32| (config.classify(address).0, config.is_metadata(address));

    for record in RecordReader::new(text) {
        let record = record?;
        match record.kind {
            RecordKind::Header => {
                transport
                    .header
                    .push_str(String::from_utf8_lossy(&record.data).trim_end_matches('\0'));
            }
            RecordKind::Data => {
                let (side, address) = config.classify(record.address);
                let first = region(record.address);
                let last = region(record.end().saturating_sub(1) as u32);
                if !record.data.is_empty() && first != last {
                    let boundary = if first.0 != last.0 {
                        config.baseline_offset
                    } else {
                        config.metadata_address
                    };
                    return Err(RecordError {
                        line: record.line,
                        raw: record.raw,
                        kind: RecordErrorKind::StraddlesBoundary(boundary),
                    });
                }
                tracing::trace!(
                    "line {}: {} bytes at 0x{:08X} ({})",
                    record.line,
                    record.data.len(),
                    address,
                    side
                );
                let target = if first.1 {
                    &mut transport.metadata
                } else {
                    &mut transport.blobs
                };
                if let Err(at) = target.insert(side, address, &record.data) {
                    return Err(RecordError {
                        line: record.line,
                        raw: record.raw,
                        kind: RecordErrorKind::ConflictingOverlap { side, address: at },
                    });
                }
                transport.data_records += 1;
            }
            RecordKind::Count | RecordKind::Terminator => {}
        }
    }
    Ok(transport)
}

impl PatchFile {
    /// Decodes patch transport text.
    pub fn parse(text: &str, config: &PatchConfig) -> Result<Self> {
        let Transport {
            header,
            data_records,
            mut blobs,
            metadata: mut window,
        } = aggregate(text, config).context("failed to decode patch records")?;

        let meta_blob = window
            .take(Side::After, config.metadata_address)
            .ok_or(MetadataError::Missing(config.metadata_address))?;
        if !window.is_empty() {
            tracing::warn!(
                "ignoring {} range(s) in the metadata window outside the metadata blob",
                window.len(Side::After)
            );
        }
        let metadata =
            metadata::parse(&meta_blob.data, config).context("failed to decode patch metadata")?;

        // Calibration and word fields are authoritative over transport bytes.
        for blob in &metadata.synthesized {
            blobs.overlay(blob.side, blob.base, &blob.data);
        }

        tracing::debug!(
            "patch: {} data records, {} patch / {} baseline blobs, {} descriptors",
            data_records,
            blobs.len(Side::After),
            blobs.len(Side::Before),
            metadata.descriptors.len()
        );

        Ok(Self {
            header,
            data_records,
            metadata,
            blobs,
        })
    }

    pub fn load(path: &Path, config: &PatchConfig) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read patch file {}", path.display()))?;
        Self::parse(&text, config).with_context(|| format!("invalid patch file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{encode_fields, identity_bytes, Calibration, Descriptor, Field};
    use crate::record::{encode_data, encode_header, encode_terminator};

    fn transport(config: &PatchConfig, fields: &[Field], blobs: &[(u32, &[u8])]) -> String {
        let mut lines = vec![encode_header("unit")];
        lines.extend(encode_data(
            config.metadata_address,
            &encode_fields(fields),
            config.record_width,
        ));
        for (address, data) in blobs {
            lines.extend(encode_data(*address, data, config.record_width));
        }
        lines.push(encode_terminator(0));
        lines.join("\n")
    }

    fn fields(extra: Field) -> Vec<Field> {
        vec![
            Field::Version(crate::config::ENGINE_VERSION),
            Field::Calibration(Calibration {
                address: 0,
                length: 0,
                source: identity_bytes("A"),
                target: identity_bytes("B"),
            }),
            extra,
            Field::Terminator,
        ]
    }

    #[test]
    fn splits_sides_and_detaches_metadata() {
        let config = PatchConfig::default();
        let text = transport(
            &config,
            &fields(Field::Patch(Descriptor { start: 0x100, end: 0x103 })),
            &[(0x100, &[1u8, 2, 3, 4][..]), (0x8000_0100, &[0u8; 4][..])],
        );
        let patch = PatchFile::parse(&text, &config).unwrap();

        assert_eq!(patch.header, "unit");
        assert_eq!(patch.blobs.len(Side::After), 1);
        assert_eq!(patch.blobs.find(Side::After, 0x100, 4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(patch.blobs.find(Side::Before, 0x100, 4).unwrap(), &[0, 0, 0, 0]);
        assert!(patch
            .blobs
            .find(Side::After, config.metadata_address, 1)
            .is_err());
    }

    #[test]
    fn word_fields_add_blobs() {
        let config = PatchConfig::default();
        let text = transport(
            &config,
            &fields(Field::Word {
                address: 0x40,
                old: 0xAABB_CCDD,
                new: 0x0102_0304,
            }),
            &[],
        );
        let patch = PatchFile::parse(&text, &config).unwrap();
        assert_eq!(
            patch.blobs.find(Side::Before, 0x40, 4).unwrap(),
            &[0xAA, 0xBB, 0xCC, 0xDD]
        );
        assert_eq!(patch.blobs.find(Side::After, 0x40, 4).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn missing_metadata_is_reported() {
        let config = PatchConfig::default();
        let text = encode_data(0x100, &[1], 16).join("\n");
        let err = PatchFile::parse(&text, &config).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MetadataError>(),
            Some(&MetadataError::Missing(config.metadata_address))
        );
    }

    #[test]
    fn records_straddling_baseline_are_rejected() {
        let config = PatchConfig::default();
        let text = encode_data(0x7FFF_FFFE, &[1, 2, 3, 4], 16).join("\n");
        let err = aggregate(&text, &config).unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.kind, RecordErrorKind::StraddlesBoundary(config.baseline_offset));

        let text = encode_data(0x7FFE_FFFE, &[1, 2, 3, 4], 16).join("\n");
        let err = aggregate(&text, &config).unwrap_err();
        assert_eq!(err.kind, RecordErrorKind::StraddlesBoundary(config.metadata_address));
    }

    #[test]
    fn patch_range_next_to_metadata_window() {
        let config = PatchConfig::default();
        let text = transport(
            &config,
            &fields(Field::Patch(Descriptor {
                start: 0x7FFE_FFFC,
                end: 0x7FFE_FFFF,
            })),
            &[
                (0x7FFE_FFFC, &[1u8, 2, 3, 4][..]),
                (0xFFFE_FFFC, &[0u8; 4][..]),
            ],
        );
        let patch = PatchFile::parse(&text, &config).unwrap();
        assert_eq!(
            patch.blobs.find(Side::After, 0x7FFE_FFFC, 4).unwrap(),
            &[1, 2, 3, 4]
        );
        assert_eq!(patch.blobs.len(Side::After), 1);
    }

    #[test]
    fn conflicting_records_fail_in_either_order() {
        let config = PatchConfig::default();
        let a = encode_data(0x10, &[1, 1], 16).remove(0);
        let b = encode_data(0x11, &[2, 2], 16).remove(0);

        for (first, second) in [(&a, &b), (&b, &a)] {
            let text = format!("{}\n{}\n", first, second);
            let err = aggregate(&text, &config).unwrap_err();
            assert_eq!(err.line, 2);
            assert_eq!(err.raw, *second);
            assert_eq!(
                err.kind,
                RecordErrorKind::ConflictingOverlap {
                    side: Side::After,
                    address: 0x11
                }
            );
        }

        let text = format!("{}\n{}\n", a, encode_data(0x11, &[1, 5], 16)[0]);
        let transport = aggregate(&text, &config).unwrap();
        assert_eq!(transport.blobs.find(Side::After, 0x10, 3).unwrap(), &[1, 1, 5]);
    }

    #[test]
    fn bad_line_aborts_with_line_number() {
        let config = PatchConfig::default();
        let text = format!(
            "{}\nS1050000zz\n{}",
            encode_header("bad"),
            transport(&config, &fields(Field::Patch(Descriptor { start: 0, end: 0 })), &[])
        );
        let err = PatchFile::parse(&text, &config).unwrap_err();
        let record = err.downcast_ref::<RecordError>().unwrap();
        assert!(matches!(record.kind, RecordErrorKind::Malformed(_)));
        assert_eq!(record.line, 2);
    }
}
