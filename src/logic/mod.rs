//! Pure policy on top of the token's object model

pub mod key_record;
pub mod public_key;
mod slot_allocator;

pub use key_record::KeyRecord;
pub use slot_allocator::{Occupancy, SlotTable};
