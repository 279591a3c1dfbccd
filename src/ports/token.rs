//! TokenInterface trait - the PKCS#11-style command set of the token driver

use std::fmt;

use thiserror::Error;

use crate::model::{Credential, UserRole};

pub type TokenResult<T> = Result<T, TokenError>;

/// Failure reported by the token driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("no token driver library found")]
    LibraryNotFound,

    #[error("token context is not initialized")]
    NotInitialized,

    #[error("login rejected: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("{command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },

    #[error("unknown {kind} handle")]
    UnknownHandle { kind: &'static str },
}

impl TokenError {
    pub fn command(command: &'static str, reason: impl fmt::Display) -> Self {
        TokenError::Command {
            command,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Certificate,
    PublicKey,
    PrivateKey,
}

/// Object attribute, used both in templates and in read-back values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Class(ObjectClass),
    /// Persistent (token) object.
    Token(bool),
    Id(Vec<u8>),
    Value(Vec<u8>),
    /// `CKA_KEY_TYPE` = `CKK_EC`.
    EcKeyType,
    EcParams(Vec<u8>),
    EcPoint(Vec<u8>),
    /// Vendor-defined touch/PIN policy of a private key.
    KeyMode(Vec<u8>),
}

impl Attribute {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Attribute::Class(_) => AttributeKind::Class,
            Attribute::Token(_) => AttributeKind::Token,
            Attribute::Id(_) => AttributeKind::Id,
            Attribute::Value(_) => AttributeKind::Value,
            Attribute::EcKeyType => AttributeKind::KeyType,
            Attribute::EcParams(_) => AttributeKind::EcParams,
            Attribute::EcPoint(_) => AttributeKind::EcPoint,
            Attribute::KeyMode(_) => AttributeKind::KeyMode,
        }
    }

    /// Byte payload of a byte-valued attribute.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Attribute::Id(v)
            | Attribute::Value(v)
            | Attribute::EcParams(v)
            | Attribute::EcPoint(v)
            | Attribute::KeyMode(v) => Some(v),
            Attribute::Class(_) | Attribute::Token(_) | Attribute::EcKeyType => None,
        }
    }
}

/// Find the bytes of the first attribute of `kind` in a read-back list.
pub fn attribute_bytes(attributes: &[Attribute], kind: AttributeKind) -> Option<&[u8]> {
    attributes
        .iter()
        .find(|attr| attr.kind() == kind)
        .and_then(Attribute::bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Class,
    Token,
    Id,
    Value,
    KeyType,
    EcParams,
    EcPoint,
    KeyMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Raw ECDSA over a caller-supplied digest.
    Ecdsa,
}

/// Capability to drive a PKCS#11 token
///
/// Methods mirror the driver's commands one to one. Implementations keep
/// the driver's own state (login, find cursor) per session and do not
/// serialize callers; that is the key store's job.
pub trait TokenInterface {
    /// Handle of an open session
    type Session: Copy + Eq + fmt::Debug;
    /// Handle of an object stored on the token
    type Object: Copy + Eq + fmt::Debug;
    /// Driver slot a token sits in
    type Device: Copy + fmt::Debug;

    /// Load and initialize the driver context
    fn initialize(&self) -> TokenResult<()>;

    /// Finalize the driver context, dropping every session
    fn finalize(&self) -> TokenResult<()>;

    /// Driver slots that currently hold a token
    fn device_slots(&self) -> TokenResult<Vec<Self::Device>>;

    /// Open a read/write serial session
    fn open_session(&self, device: Self::Device) -> TokenResult<Self::Session>;

    fn close_session(&self, session: Self::Session) -> TokenResult<()>;

    /// # Errors
    ///
    /// Returns `TokenError::AuthenticationFailed` when the credential is rejected
    fn login(
        &self,
        session: Self::Session,
        role: UserRole,
        credential: &Credential,
    ) -> TokenResult<()>;

    fn logout(&self, session: Self::Session) -> TokenResult<()>;

    fn create_object(
        &self,
        session: Self::Session,
        template: &[Attribute],
    ) -> TokenResult<Self::Object>;

    fn destroy_object(&self, session: Self::Session, object: Self::Object) -> TokenResult<()>;

    /// Start a search for objects matching every attribute of `template`
    fn find_objects_init(&self, session: Self::Session, template: &[Attribute])
        -> TokenResult<()>;

    /// Next page of at most `max` results; empty once the search is exhausted
    fn find_objects(&self, session: Self::Session, max: usize) -> TokenResult<Vec<Self::Object>>;

    fn find_objects_final(&self, session: Self::Session) -> TokenResult<()>;

    /// Read the requested attributes; kinds the object lacks are left out
    fn attributes(
        &self,
        session: Self::Session,
        object: Self::Object,
        kinds: &[AttributeKind],
    ) -> TokenResult<Vec<Attribute>>;

    fn sign(
        &self,
        session: Self::Session,
        mechanism: Mechanism,
        key: Self::Object,
        data: &[u8],
    ) -> TokenResult<Vec<u8>>;
}
