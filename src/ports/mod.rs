//! Ports for talking to the token
//!
//! The key store depends on [`TokenInterface`], never on a concrete driver.
//! Adapters implement it for a real ykcs11 library or an in-memory fake.

mod token;

pub use token::{
    attribute_bytes, Attribute, AttributeKind, Mechanism, ObjectClass, TokenError,
    TokenInterface, TokenResult,
};
