//! Occupancy of the token's fixed slots

use tracing::debug;

use crate::model::{SlotId, NUM_SLOTS};

/// What the allocator saw in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    /// Token objects carrying this slot's id (certificate, keys).
    pub objects: usize,
}

/// One entry per hardware slot, filled from the token's object ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotTable {
    slots: [Option<Occupancy>; NUM_SLOTS],
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object's raw `CKA_ID`.
    ///
    /// Empty ids (container entries on some drivers) and ids outside the slot
    /// domain are ignored so that odd objects never abort allocation.
    pub fn mark_token_id(&mut self, raw_id: &[u8]) {
        match SlotId::from_token_id(raw_id) {
            Ok(slot) => self.mark(slot),
            Err(e) => debug!("Ignoring object id {:02x?}: {}", raw_id, e),
        }
    }

    pub fn mark(&mut self, slot: SlotId) {
        let entry = &mut self.slots[slot.index()];
        match entry {
            Some(occupancy) => occupancy.objects += 1,
            None => *entry = Some(Occupancy { objects: 1 }),
        }
    }

    pub fn occupancy(&self, slot: SlotId) -> Option<Occupancy> {
        self.slots[slot.index()]
    }

    pub fn is_taken(&self, slot: SlotId) -> bool {
        self.slots[slot.index()].is_some()
    }

    /// First free slot in [`SlotId::PREFERENCE`] order.
    pub fn first_free(&self) -> Option<SlotId> {
        SlotId::PREFERENCE
            .into_iter()
            .find(|slot| !self.is_taken(*slot))
    }
}
