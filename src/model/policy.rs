use std::fmt;
use std::os::raw::c_ulong;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinPolicy {
    Never,
    Once,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TouchPolicy {
    Never,
    Always,
}

/// Human-presence policy the token enforces when a provisioned key signs.
///
/// Bitmask understood by ykcs11 in the vendor-defined attribute of a private
/// key object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyMode(u8);

impl KeyMode {
    pub const NONE: KeyMode = KeyMode(0);
    pub const TOUCH: KeyMode = KeyMode(1);
    pub const PIN_ONCE: KeyMode = KeyMode(2);
    pub const PIN_ALWAYS: KeyMode = KeyMode(4);

    /// Largest accepted raw value. `PIN_ONCE | PIN_ALWAYS` is not a mode.
    const MAX: u8 = 5;

    pub fn new(bits: u8) -> Result<Self, PolicyError> {
        if bits > Self::MAX {
            return Err(PolicyError::InvalidKeyMode { bits });
        }
        Ok(Self(bits))
    }

    pub fn from_policies(pin: PinPolicy, touch: TouchPolicy) -> Self {
        let pin_bits = match pin {
            PinPolicy::Never => Self::NONE.0,
            PinPolicy::Once => Self::PIN_ONCE.0,
            PinPolicy::Always => Self::PIN_ALWAYS.0,
        };
        let touch_bits = match touch {
            TouchPolicy::Never => Self::NONE.0,
            TouchPolicy::Always => Self::TOUCH.0,
        };
        Self(pin_bits | touch_bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: KeyMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn pin_policy(self) -> PinPolicy {
        if self.contains(Self::PIN_ALWAYS) {
            PinPolicy::Always
        } else if self.contains(Self::PIN_ONCE) {
            PinPolicy::Once
        } else {
            PinPolicy::Never
        }
    }

    pub fn touch_policy(self) -> TouchPolicy {
        if self.contains(Self::TOUCH) {
            TouchPolicy::Always
        } else {
            TouchPolicy::Never
        }
    }

    /// Attribute value as a native `CK_ULONG`.
    pub fn to_attribute_value(self) -> Vec<u8> {
        c_ulong::from(self.0).to_ne_bytes().to_vec()
    }
}

impl Default for KeyMode {
    fn default() -> Self {
        Self::from_policies(PinPolicy::Once, TouchPolicy::Always)
    }
}

impl fmt::Debug for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyMode({:#x}, pin={:?}, touch={:?})",
            self.0,
            self.pin_policy(),
            self.touch_policy()
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid key mode {bits:#x}: PIN once and PIN always are exclusive")]
    InvalidKeyMode { bits: u8 },
}
