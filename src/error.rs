//! Error types for ykstore
//!
//! Errors are grouped by concern and wrapped by [`StoreError`]. Token-level
//! failures arrive as [`TokenError`] from the token port and surface as
//! [`DeviceError`].

use thiserror::Error;

use crate::ports::TokenError;

/// Result type alias for key store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Top-level error type for all key store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Token and driver errors
    #[error("Token device error: {0}")]
    Device(#[from] DeviceError),

    /// Cryptographic operation errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    /// Domain validation errors
    #[error("Domain validation error: {0}")]
    Domain(#[from] DomainError),

    /// Key lookup and slot errors
    #[error("Key management error: {0}")]
    KeyManagement(#[from] KeyManagementError),

    /// Key record (certificate) decoding errors
    #[error("Key record error: {0}")]
    Record(#[from] RecordError),

    /// Authentication policy lookup errors
    #[error("Policy error: {0}")]
    Policy(#[from] crate::model::OperationError),
}

/// Token device errors
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No driver library found, or the driver reports no token
    #[error("No YubiKey present: {reason}")]
    NotPresent { reason: String },

    /// Login rejected by the token
    #[error("Token authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Any other token command failure
    #[error("Token command failed: {reason}")]
    Token { reason: String },
}

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Token declined to sign or returned nothing
    #[error("Failed to generate signature: {reason}")]
    SignatureFailed { reason: String },

    /// Key bytes could not be interpreted
    #[error("Invalid key format: {format}")]
    InvalidKeyFormat { format: String },

    /// Building the key record certificate failed
    #[error("Failed to build certificate: {reason}")]
    CertificateEncoding { reason: String },
}

/// Key lookup and allocation errors
#[derive(Error, Debug)]
pub enum KeyManagementError {
    /// No token object matched
    #[error("No {object} found in slot {slot}")]
    ObjectNotFound { object: String, slot: String },

    /// More than one token object matched where exactly one is required
    #[error("Expected one {object} in slot {slot}, found {count}")]
    AmbiguousObject {
        object: String,
        slot: String,
        count: usize,
    },

    /// Every slot is occupied
    #[error("YubiKey has no available slots")]
    NoAvailableSlots,

    /// Listing found no usable key
    #[error("No keys found in YubiKey")]
    NoKeysFound,
}

/// Errors decoding a key record certificate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Common name is not a recognized role
    #[error("Certificate does not name a known role: {name:?}")]
    InvalidRole { name: String },

    /// Certified key is not a P-256 EC key
    #[error("Unsupported public key algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// Bytes are not a parsable certificate
    #[error("Malformed certificate: {reason}")]
    Malformed { reason: String },
}

/// Domain validation errors
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Slot error: {0}")]
    Slot(#[from] crate::model::SlotError),

    #[error("Role error: {0}")]
    Role(#[from] crate::model::RoleError),

    #[error("Policy error: {0}")]
    Policy(#[from] crate::model::PolicyError),

    #[error("Credential error: {0}")]
    Credential(#[from] crate::model::CredentialError),
}

impl From<crate::model::SlotError> for StoreError {
    fn from(err: crate::model::SlotError) -> Self {
        StoreError::Domain(DomainError::Slot(err))
    }
}

impl From<crate::model::RoleError> for StoreError {
    fn from(err: crate::model::RoleError) -> Self {
        StoreError::Domain(DomainError::Role(err))
    }
}

impl From<crate::model::PolicyError> for StoreError {
    fn from(err: crate::model::PolicyError) -> Self {
        StoreError::Domain(DomainError::Policy(err))
    }
}

impl From<crate::model::CredentialError> for StoreError {
    fn from(err: crate::model::CredentialError) -> Self {
        StoreError::Domain(DomainError::Credential(err))
    }
}

/// Convert token port errors to our error type
impl From<TokenError> for StoreError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::AuthenticationFailed { reason } => {
                StoreError::Device(DeviceError::AuthenticationFailed { reason })
            }
            TokenError::NotInitialized => StoreError::Device(DeviceError::NotPresent {
                reason: err.to_string(),
            }),
            TokenError::LibraryNotFound => StoreError::Device(DeviceError::NotPresent {
                reason: err.to_string(),
            }),
            TokenError::Command { .. } | TokenError::UnknownHandle { .. } => {
                StoreError::Device(DeviceError::Token {
                    reason: err.to_string(),
                })
            }
        }
    }
}
