//! Helpers for building patch files and images on disk.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rompatch::config::{PatchConfig, ENGINE_VERSION};
use rompatch::metadata::{encode_fields, identity_bytes, Calibration, Descriptor, Field};
use rompatch::record::{encode_data, encode_header, encode_terminator};

/// Calibration naming the stock and patched images, rewriting `length`
/// identity bytes at `address`.
pub fn calibration(address: u32, length: u32) -> Calibration {
    Calibration {
        address,
        length,
        source: identity_bytes("STOCK-01"),
        target: identity_bytes("STOCK-01-P"),
    }
}

/// S-record text for a patch with the given metadata fields (version and
/// terminator added) and transport blobs.
pub fn patch_text(version: u32, fields: &[Field], blobs: &[(u32, &[u8])]) -> String {
    patch_text_with(calibration(0, 0), version, fields, blobs)
}

pub fn patch_text_with(
    calibration: Calibration,
    version: u32,
    fields: &[Field],
    blobs: &[(u32, &[u8])],
) -> String {
    let config = PatchConfig::default();
    let mut all = vec![Field::Version(version), Field::Calibration(calibration)];
    all.extend_from_slice(fields);
    all.push(Field::Terminator);

    let mut lines = vec![encode_header("test patch")];
    lines.extend(encode_data(
        config.metadata_address,
        &encode_fields(&all),
        config.record_width,
    ));
    for (address, data) in blobs {
        lines.extend(encode_data(*address, data, config.record_width));
    }
    lines.push(encode_terminator(0));
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Patch writing {1, 2, 3, 4} over {0, 0, 0, 0} at 0x100.
pub fn simple_patch(version: u32) -> String {
    patch_text(
        version,
        &[Field::Patch(Descriptor {
            start: 0x100,
            end: 0x103,
        })],
        &[
            (0x100, &[1u8, 2, 3, 4][..]),
            (0x8000_0100, &[0u8; 4][..]),
        ],
    )
}

pub fn current_patch() -> String {
    simple_patch(ENGINE_VERSION)
}

pub fn write(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("Failed to write test file");
    path
}

pub fn zero_image(dir: &Path) -> PathBuf {
    write(dir, "rom.bin", vec![0u8; 0x400])
}
