use super::{Role, SlotId};

/// One logical key on the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareSlot {
    pub role: Role,
    pub slot_id: SlotId,
    /// Hex SHA-256 of the key's SubjectPublicKeyInfo; empty when not yet known.
    pub key_fingerprint: String,
}

impl HardwareSlot {
    pub fn new(role: Role, slot_id: SlotId, key_fingerprint: impl Into<String>) -> Self {
        Self {
            role,
            slot_id,
            key_fingerprint: key_fingerprint.into(),
        }
    }

    /// Descriptor for a slot whose key has not been read back yet.
    pub fn unassigned(role: Role, slot_id: SlotId) -> Self {
        Self::new(role, slot_id, String::new())
    }
}
