//! Range aggregation.
//!
//! Data records are folded into maximal contiguous runs of bytes ("blobs").
//! Every blob carries the side of the patch it belongs to: the bytes a
//! patched image must hold afterwards, or the bytes it must hold before.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::CoverageError;

/// Which snapshot of a patched region a blob describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Expected image content before the patch is applied (the baseline).
    Before,
    /// Content the patch writes.
    After,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Before => f.write_str("baseline"),
            Side::After => f.write_str("patch"),
        }
    }
}

/// A contiguous run of bytes at a base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub side: Side,
    /// Address of the first byte.
    pub base: u32,
    /// Bytes in ascending address order, no gaps.
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(side: Side, base: u32, data: Vec<u8>) -> Self {
        Self { side, base, data }
    }

    /// Inclusive end address. Empty blobs report their base.
    pub fn end(&self) -> u32 {
        self.base + (self.data.len() as u32).saturating_sub(1)
    }
}

/// The aggregated, non-overlapping blobs of both sides.
///
/// Within one side no two blobs overlap or touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobSet {
    before: BTreeMap<u32, Vec<u8>>,
    after: BTreeMap<u32, Vec<u8>>,
}

fn span_end(base: u32, len: usize) -> u64 {
    base as u64 + len as u64
}

impl BlobSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn side(&self, side: Side) -> &BTreeMap<u32, Vec<u8>> {
        match side {
            Side::Before => &self.before,
            Side::After => &self.after,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<u32, Vec<u8>> {
        match side {
            Side::Before => &mut self.before,
            Side::After => &mut self.after,
        }
    }

    /// Merges `data` at `address` into the blobs of `side`.
    ///
    /// Any blobs the new bytes touch or overlap, including two previously
    /// separate blobs that the new bytes bridge, are fused into one. Bytes
    /// that overlap existing content must agree with it; otherwise the set
    /// is left unchanged and the first conflicting address is returned.
    pub fn insert(&mut self, side: Side, address: u32, data: &[u8]) -> Result<(), u32> {
        self.merge(side, address, data, false)
    }

    /// Like [`insert`](Self::insert), but `data` replaces whatever it
    /// overlaps.
    pub fn overlay(&mut self, side: Side, address: u32, data: &[u8]) {
        // Never fails when overwriting.
        let _ = self.merge(side, address, data, true);
    }

    fn merge(&mut self, side: Side, address: u32, data: &[u8], overwrite: bool) -> Result<(), u32> {
        if data.is_empty() {
            return Ok(());
        }
        let map = self.side_mut(side);
        let new_end = span_end(address, data.len());

        let neighbours: Vec<u32> = map
            .range(..=new_end.min(u32::MAX as u64) as u32)
            .rev()
            .take_while(|(base, bytes)| span_end(**base, bytes.len()) >= address as u64)
            .filter(|(base, _)| (**base as u64) <= new_end)
            .map(|(base, _)| *base)
            .collect();

        if !overwrite {
            let conflict = neighbours
                .iter()
                .filter_map(|base| map.get(base).map(|bytes| (*base, bytes)))
                .filter_map(|(base, bytes)| first_difference(base, bytes, address, data))
                .min();
            if let Some(at) = conflict {
                return Err(at);
            }
        }

        let mut start = address;
        let mut end = new_end;
        let mut parts = Vec::with_capacity(neighbours.len());
        for base in neighbours {
            if let Some(bytes) = map.remove(&base) {
                start = start.min(base);
                end = end.max(span_end(base, bytes.len()));
                parts.push((base, bytes));
            }
        }

        let mut merged = vec![0u8; (end - start as u64) as usize];
        for (base, bytes) in &parts {
            let at = (base - start) as usize;
            merged[at..at + bytes.len()].copy_from_slice(bytes);
        }
        let at = (address - start) as usize;
        merged[at..at + data.len()].copy_from_slice(data);

        tracing::trace!(
            "{} blob 0x{:08X}-0x{:08X} after merging {} neighbour(s)",
            side,
            start,
            end - 1,
            parts.len()
        );
        map.insert(start, merged);
        Ok(())
    }

    /// Bytes for `[address, address + len)` on `side`, taken from the single
    /// blob that holds all of them.
    pub fn find(&self, side: Side, address: u32, len: usize) -> Result<&[u8], CoverageError> {
        let map = self.side(side);
        let (base, bytes) = map
            .range(..=address)
            .next_back()
            .filter(|(base, bytes)| span_end(**base, bytes.len()) > address as u64)
            .ok_or(CoverageError::Uncovered { side, address })?;
        let offset = (address - base) as usize;
        let available = bytes.len() - offset;
        if available < len {
            return Err(CoverageError::Short {
                side,
                address,
                required: len,
                available,
            });
        }
        Ok(&bytes[offset..offset + len])
    }

    /// Removes and returns the blob of `side` that starts exactly at `base`.
    pub fn take(&mut self, side: Side, base: u32) -> Option<Blob> {
        self.side_mut(side)
            .remove(&base)
            .map(|data| Blob::new(side, base, data))
    }

    /// Exchanges the roles of the two sides.
    pub fn swap_sides(&mut self) {
        std::mem::swap(&mut self.before, &mut self.after);
    }

    /// Blobs of `side` in ascending address order.
    pub fn blobs(&self, side: Side) -> impl Iterator<Item = Blob> + '_ {
        self.side(side)
            .iter()
            .map(move |(base, data)| Blob::new(side, *base, data.clone()))
    }

    pub fn len(&self, side: Side) -> usize {
        self.side(side).len()
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// Lowest address where `bytes` at `base` and `data` at `address` both
/// have a byte and the two differ.
fn first_difference(base: u32, bytes: &[u8], address: u32, data: &[u8]) -> Option<u32> {
    let lo = base.max(address) as u64;
    let hi = span_end(base, bytes.len()).min(span_end(address, data.len()));
    (lo..hi)
        .find(|a| bytes[(a - base as u64) as usize] != data[(a - address as u64) as usize])
        .map(|a| a as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn after(set: &BlobSet) -> Vec<(u32, Vec<u8>)> {
        set.blobs(Side::After).map(|b| (b.base, b.data)).collect()
    }

    #[test]
    fn touching_records_extend() {
        let mut set = BlobSet::new();
        set.insert(Side::After, 0x10, &[1, 2]).unwrap();
        set.insert(Side::After, 0x12, &[3, 4]).unwrap();
        set.insert(Side::After, 0x0E, &[9, 9]).unwrap();
        assert_eq!(after(&set), vec![(0x0E, vec![9, 9, 1, 2, 3, 4])]);
    }

    #[test]
    fn gaps_start_new_blobs() {
        let mut set = BlobSet::new();
        set.insert(Side::After, 0x10, &[1]).unwrap();
        set.insert(Side::After, 0x20, &[2]).unwrap();
        assert_eq!(set.len(Side::After), 2);
        assert_eq!(set.len(Side::Before), 0);
    }

    #[test]
    fn agreeing_overlap_bridges() {
        let mut set = BlobSet::new();
        set.insert(Side::After, 0x00, &[1, 1, 1, 1]).unwrap();
        set.insert(Side::After, 0x08, &[3, 3, 3, 3]).unwrap();
        set.insert(Side::After, 0x03, &[1, 2, 2, 2, 2, 3]).unwrap();
        assert_eq!(
            after(&set),
            vec![(0x00, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3])]
        );
    }

    #[test]
    fn conflicting_overlap_is_rejected_in_any_order() {
        let first: (u32, &[u8]) = (0x10, &[1, 1]);
        let second: (u32, &[u8]) = (0x11, &[2, 2]);

        let mut set = BlobSet::new();
        set.insert(Side::After, first.0, first.1).unwrap();
        assert_eq!(set.insert(Side::After, second.0, second.1), Err(0x11));
        assert_eq!(after(&set), vec![(0x10, vec![1, 1])]);

        let mut set = BlobSet::new();
        set.insert(Side::After, second.0, second.1).unwrap();
        assert_eq!(set.insert(Side::After, first.0, first.1), Err(0x11));
        assert_eq!(after(&set), vec![(0x11, vec![2, 2])]);
    }

    #[test]
    fn overlay_overwrites_and_bridges() {
        let mut set = BlobSet::new();
        set.insert(Side::After, 0x00, &[1, 1, 1, 1]).unwrap();
        set.insert(Side::After, 0x08, &[3, 3, 3, 3]).unwrap();
        set.overlay(Side::After, 0x03, &[2, 2, 2, 2, 2, 2]);
        assert_eq!(
            after(&set),
            vec![(0x00, vec![1, 1, 1, 2, 2, 2, 2, 2, 2, 3, 3, 3])]
        );
    }

    #[test]
    fn new_record_swallowing_several_blobs() {
        let mut set = BlobSet::new();
        set.insert(Side::After, 0x02, &[7]).unwrap();
        set.insert(Side::After, 0x05, &[8]).unwrap();
        set.overlay(Side::After, 0x00, &[0; 8]);
        assert_eq!(after(&set), vec![(0x00, vec![0; 8])]);
    }

    #[test]
    fn result_is_independent_of_record_order() {
        let records: Vec<(u32, Vec<u8>)> = vec![
            (0x100, vec![1, 2, 3, 4]),
            (0x104, vec![5, 6]),
            (0x102, vec![3, 4, 5]),
            (0x200, vec![9]),
            (0x0FE, vec![0xA, 0xB]),
            (0x201, vec![8, 7]),
        ];
        let build = |order: &[usize]| {
            let mut set = BlobSet::new();
            for i in order {
                let (addr, data) = &records[*i];
                set.insert(Side::After, *addr, data).unwrap();
            }
            set
        };

        let reference = build(&[0, 1, 2, 3, 4, 5]);
        for order in [
            [5, 4, 3, 2, 1, 0],
            [2, 0, 5, 1, 3, 4],
            [3, 5, 1, 4, 0, 2],
            [4, 2, 0, 3, 5, 1],
        ] {
            assert_eq!(build(&order), reference);
        }
        assert_eq!(
            after(&reference),
            vec![(0x0FE, vec![0xA, 0xB, 1, 2, 3, 4, 5, 6]), (0x200, vec![9, 8, 7])]
        );
    }

    #[test]
    fn sides_never_merge() {
        let mut set = BlobSet::new();
        set.insert(Side::After, 0x10, &[1]).unwrap();
        set.insert(Side::Before, 0x11, &[2]).unwrap();
        assert_eq!(set.len(Side::After), 1);
        assert_eq!(set.len(Side::Before), 1);
    }

    #[test]
    fn find_requires_full_coverage() {
        let mut set = BlobSet::new();
        set.insert(Side::After, 0x100, &[1, 2, 3]).unwrap();
        set.insert(Side::After, 0x104, &[5]).unwrap();

        assert_eq!(set.find(Side::After, 0x101, 2).unwrap(), &[2, 3]);
        assert_eq!(
            set.find(Side::After, 0x101, 4).unwrap_err(),
            CoverageError::Short {
                side: Side::After,
                address: 0x101,
                required: 4,
                available: 2
            }
        );
        assert_eq!(
            set.find(Side::After, 0x103, 1).unwrap_err(),
            CoverageError::Uncovered {
                side: Side::After,
                address: 0x103
            }
        );
        assert!(set.find(Side::Before, 0x100, 1).is_err());
    }

    #[test]
    fn swap_twice_is_identity() {
        let mut set = BlobSet::new();
        set.insert(Side::After, 0x10, &[1]).unwrap();
        set.insert(Side::Before, 0x10, &[0]).unwrap();
        let original = set.clone();
        set.swap_sides();
        assert_eq!(set.find(Side::After, 0x10, 1).unwrap(), &[0]);
        set.swap_sides();
        assert_eq!(set, original);
    }

    #[test]
    fn blob_at_top_of_address_space() {
        let mut set = BlobSet::new();
        set.insert(Side::Before, 0xFFFF_FFFE, &[1, 2]).unwrap();
        set.insert(Side::Before, 0xFFFF_FFFC, &[3, 4]).unwrap();
        let blob = set.blobs(Side::Before).next().unwrap();
        assert_eq!(blob.base, 0xFFFF_FFFC);
        assert_eq!(blob.end(), 0xFFFF_FFFF);
    }

    #[test]
    fn take_detaches_exact_base() {
        let mut set = BlobSet::new();
        set.insert(Side::After, 0x40, &[1, 2]).unwrap();
        assert!(set.take(Side::After, 0x41).is_none());
        let blob = set.take(Side::After, 0x40).unwrap();
        assert_eq!(blob.data, vec![1, 2]);
        assert!(set.is_empty());
    }
}
