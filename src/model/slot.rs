use std::fmt;

use thiserror::Error;

/// Number of key slots a YubiKey exposes through ykcs11.
pub const NUM_SLOTS: usize = 4;

/// Identifier of one of the token's fixed key slots.
///
/// On the token this is the `CKA_ID` attribute shared by a certificate and
/// its private key. Only values below [`NUM_SLOTS`] can be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u8);

impl SlotId {
    /// Order in which free slots are handed out: 9c, 9e, 9d, 9a.
    pub const PREFERENCE: [SlotId; NUM_SLOTS] = [SlotId(2), SlotId(1), SlotId(3), SlotId(0)];

    pub fn new(id: u8) -> Result<Self, SlotError> {
        if usize::from(id) >= NUM_SLOTS {
            return Err(SlotError::OutOfRange { id });
        }
        Ok(Self(id))
    }

    /// Interpret a `CKA_ID` value read from the token.
    ///
    /// A single byte is enough to address every slot, so only the first byte
    /// is considered.
    pub fn from_token_id(raw: &[u8]) -> Result<Self, SlotError> {
        match raw.first() {
            Some(&id) => Self::new(id),
            None => Err(SlotError::Empty),
        }
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Encoding used for the `CKA_ID` attribute.
    pub fn to_token_id(self) -> Vec<u8> {
        vec![self.0]
    }

    pub fn piv_slot(self) -> PivSlot {
        match self.0 {
            0 => PivSlot::Authentication,
            1 => PivSlot::CardAuthentication,
            2 => PivSlot::Signature,
            _ => PivSlot::KeyManagement,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for SlotId {
    type Error = SlotError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

/// PIV slot backing a [`SlotId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PivSlot {
    Authentication,
    Signature,
    KeyManagement,
    CardAuthentication,
}

impl PivSlot {
    pub fn hex(self) -> &'static str {
        match self {
            PivSlot::Authentication => "9a",
            PivSlot::Signature => "9c",
            PivSlot::KeyManagement => "9d",
            PivSlot::CardAuthentication => "9e",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("Slot id {id} is outside the token's {NUM_SLOTS} slots")]
    OutOfRange { id: u8 },

    #[error("Slot id is empty")]
    Empty,
}
