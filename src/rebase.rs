//! Index Rebaser
//!
//! An index buffer like 500, 501, 502, 501, 503, 502 can't be used against a
//! capture of unique vertices without padding 500 slots. Instead the capture
//! streams out the sorted unique indices only, and the original index buffer
//! is rewritten to point into that dense buffer: 0, 1, 2, 1, 3, 2. Gaps
//! (500, 510, ...) are closed up the same way.

use std::collections::BTreeMap;

use crate::desc::{IndexFormat, StripCut, VEC4F_BYTES};

/// Original index value to dense rebased index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRemap {
    // sparse: an index like 0xCCCCCCCC must not size an array
    map: BTreeMap<u32, u32>,
}

impl IndexRemap {
    fn from_unique(unique: &[u32]) -> Self {
        let map = unique
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, new as u32))
            .collect();
        Self { map }
    }

    pub fn get(&self, old: u32) -> Option<u32> {
        self.map.get(&old).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebasedIndices {
    /// Sorted unique indices referenced by the draw
    pub unique: Vec<u32>,
    pub remap: IndexRemap,
    /// Copy of the original index bytes with every value remapped
    pub rewritten: Vec<u8>,
    pub format: IndexFormat,
    /// Indices actually present in the source bytes
    pub read_count: u32,
}

fn read_index(data: &[u8], format: IndexFormat, i: usize) -> u32 {
    match format {
        IndexFormat::Uint16 => u32::from(u16::from_le_bytes([data[i * 2], data[i * 2 + 1]])),
        IndexFormat::Uint32 => u32::from_le_bytes([
            data[i * 4],
            data[i * 4 + 1],
            data[i * 4 + 2],
            data[i * 4 + 3],
        ]),
    }
}

fn write_index(data: &mut [u8], format: IndexFormat, i: usize, value: u32) {
    match format {
        IndexFormat::Uint16 => {
            data[i * 2..i * 2 + 2].copy_from_slice(&(value as u16).to_le_bytes());
        }
        IndexFormat::Uint32 => {
            data[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Rebase `index_count` indices read from `data`. Primitive-restart values
/// are neither captured nor remapped.
pub fn rebase(data: &[u8], format: IndexFormat, index_count: u32, strip_cut: StripCut) -> RebasedIndices {
    let width = format.width() as usize;
    let available = (data.len() / width).min(index_count as usize);
    let sentinel = strip_cut.sentinel();

    let mut unique: Vec<u32> = Vec::new();
    for i in 0..available {
        let value = read_index(data, format, i);
        if Some(value) == sentinel {
            continue;
        }
        if let Err(pos) = unique.binary_search(&value) {
            unique.insert(pos, value);
        }
    }

    // reading past the end of the buffer fetches index 0
    if available < index_count as usize && unique.first() != Some(&0) {
        unique.insert(0, 0);
    }

    let remap = IndexRemap::from_unique(&unique);

    let mut rewritten = data.to_vec();
    for i in 0..available {
        let value = read_index(data, format, i);
        if Some(value) == sentinel {
            continue;
        }
        if let Some(new) = remap.get(value) {
            write_index(&mut rewritten, format, i, new);
        }
    }

    RebasedIndices {
        unique,
        remap,
        rewritten,
        format,
        read_count: available as u32,
    }
}

impl RebasedIndices {
    /// The unique indices as a tightly packed u32 index buffer.
    pub fn patched_index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.unique)
    }

    /// Scratch capacity needed so the patched index buffer fits.
    pub fn required_capacity(&self) -> u64 {
        self.unique.len() as u64 * std::mem::size_of::<u32>() as u64 * VEC4F_BYTES
    }
}
