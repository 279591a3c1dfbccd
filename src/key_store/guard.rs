use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::model::{Credential, UserRole};
use crate::ports::TokenInterface;

/// A login that is undone when the guard goes out of scope.
///
/// Logout failures are logged and dropped; the operation's own result wins.
#[must_use = "dropping the guard logs out immediately"]
pub(super) struct LoginGuard<'a, T: TokenInterface> {
    token: &'a T,
    session: T::Session,
    role: UserRole,
}

impl<'a, T: TokenInterface> LoginGuard<'a, T> {
    pub(super) fn login(
        token: &'a T,
        session: T::Session,
        role: UserRole,
        credential: &Credential,
    ) -> StoreResult<Self> {
        token.login(session, role, credential).map_err(|e| {
            debug!("Login as {:?} failed: {}", role, e);
            e
        })?;
        Ok(Self {
            token,
            session,
            role,
        })
    }
}

impl<T: TokenInterface> Drop for LoginGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.token.logout(self.session) {
            warn!("Logout after {:?} login failed: {}", self.role, e);
        }
    }
}
