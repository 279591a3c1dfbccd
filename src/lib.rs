//! Key store for YubiKey-held P-256 signing keys
//!
//! Keys live in the four PIV slots of a YubiKey and are reached through
//! Yubico's ykcs11 PKCS#11 module. Each key is paired with a self-signed
//! certificate naming its role, so the token itself records which key is
//! which.

mod adapters;
pub mod api;
pub mod config;
pub mod error;
pub mod key_store;
pub mod logic;
pub mod model;
pub mod ports;

// Re-export commonly used types
pub use adapters::{Pkcs11Session, Pkcs11Token};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use key_store::KeyStore;

pub use api::{open_default_store, open_store};
