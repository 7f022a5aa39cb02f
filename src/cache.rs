//! Result Cache
//!
//! Two-level lookup: the alias table maps a draw to the draw whose output it
//! shares, then the canonical draw maps to its captured results. Entries are
//! written once per session and only go away with the whole frame.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::{debug, warn};

use crate::device::GpuDevice;
use crate::replay::DrawId;
use crate::result::PostVsData;

#[derive(Debug, Default)]
pub struct ResultCache {
    aliases: BTreeMap<DrawId, DrawId>,
    entries: BTreeMap<DrawId, PostVsData>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The draw whose entry `draw` reads through.
    pub fn resolve(&self, draw: DrawId) -> DrawId {
        self.aliases.get(&draw).copied().unwrap_or(draw)
    }

    /// Make `alias` read through `primary`'s entry.
    pub fn alias(&mut self, primary: DrawId, alias: DrawId) {
        if primary == alias {
            return;
        }
        // never chain: point straight at the canonical draw
        let canonical = self.resolve(primary);
        if canonical == alias {
            return;
        }
        debug!("Aliasing draw {} to {}", alias, canonical);
        for target in self.aliases.values_mut() {
            if *target == alias {
                *target = canonical;
            }
        }
        self.aliases.insert(alias, canonical);
    }

    pub fn contains(&self, draw: DrawId) -> bool {
        self.entries.contains_key(&self.resolve(draw))
    }

    pub fn get(&self, draw: DrawId) -> Option<&PostVsData> {
        self.entries.get(&self.resolve(draw))
    }

    /// Store the results for `draw`. An existing entry is kept and the new
    /// one handed back so the caller can release its buffers.
    pub fn insert(&mut self, draw: DrawId, data: PostVsData) -> Option<PostVsData> {
        match self.entries.entry(self.resolve(draw)) {
            Entry::Vacant(slot) => {
                slot.insert(data);
                None
            }
            Entry::Occupied(slot) => {
                warn!("Draw {} already has captured output", slot.key());
                Some(data)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every cached buffer and forget all entries and aliases.
    pub fn clear<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        for data in self.entries.values_mut() {
            data.release(device);
        }
        self.entries.clear();
        self.aliases.clear();
    }
}
