//! Utility functions.

use std::fmt::Write;

/// Bytes shown by [`hex_bytes`] before it elides the rest.
const HEX_PREVIEW: usize = 32;

/// Formats bytes as space-separated hex pairs for diagnostics, eliding
/// anything past the first 32 bytes.
pub fn hex_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().min(HEX_PREVIEW) * 3 + 4);
    for (i, b) in data.iter().take(HEX_PREVIEW).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    if data.len() > HEX_PREVIEW {
        let _ = write!(out, " .. (+{})", data.len() - HEX_PREVIEW);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_and_long_buffers() {
        assert_eq!(hex_bytes(&[]), "");
        assert_eq!(hex_bytes(&[0x01, 0xAB]), "01 AB");
        let long = hex_bytes(&[0u8; 40]);
        assert!(long.ends_with(" .. (+8)"));
    }
}
