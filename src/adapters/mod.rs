//! Adapters - concrete implementations of ports (traits)

mod pkcs11_token;

#[cfg(test)]
pub mod fake_token;

// Re-export for convenience
pub use pkcs11_token::{Pkcs11Session, Pkcs11Token};
