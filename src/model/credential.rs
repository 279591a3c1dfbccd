use std::fmt;

use thiserror::Error;

/// Which of the token's two login identities a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserRole {
    /// Provisioning and removal authority (the PIV management key).
    SecurityOfficer,
    /// Signing authority (the PIV PIN).
    User,
}

/// Secret used to log into the token.
///
/// Never stored by the key store; passed in for each call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Factory PIN of a YubiKey.
    pub const DEFAULT_USER: &'static str = "123456";

    /// Factory PIV management key, hex encoded as ykcs11 expects it for SO login.
    pub const DEFAULT_SECURITY_OFFICER: &'static str =
        "010203040506070801020304050607080102030405060708";

    pub fn new(secret: impl Into<String>) -> Result<Self, CredentialError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(CredentialError::Empty);
        }
        Ok(Self(secret))
    }

    pub fn default_user() -> Self {
        Self(Self::DEFAULT_USER.to_string())
    }

    pub fn default_security_officer() -> Self {
        Self(Self::DEFAULT_SECURITY_OFFICER.to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential must not be empty")]
    Empty,
}
