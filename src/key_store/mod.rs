//! Key store engine
//!
//! [`KeyStore`] owns a token adapter and runs every operation as one
//! uninterrupted command sequence on it: login, token commands, logout.
//! Operations on different sessions are serialized by an engine-wide lock,
//! since the driver's login state and find cursor are shared.

mod guard;
mod objects;
mod ops;


use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{DeviceError, StoreError, StoreResult};
use crate::model::{KeyMode, LoginRequirement, Operation};
use crate::ports::TokenInterface;

#[derive(Debug, Default)]
struct ContextState {
    initialized: bool,
}

/// Key store over one token
#[derive(Debug)]
pub struct KeyStore<T: TokenInterface> {
    token: T,
    key_mode: KeyMode,
    context: Mutex<ContextState>,
}

impl<T: TokenInterface> KeyStore<T> {
    pub const NAME: &'static str = "yubikey";

    /// Wrap `token`; every key provisioned through this store gets `key_mode`.
    pub fn new(token: T, key_mode: KeyMode) -> Self {
        Self {
            token,
            key_mode,
            context: Mutex::new(ContextState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn key_mode(&self) -> KeyMode {
        self.key_mode
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    /// Hold the operation lock, taking it over if poisoned.
    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a read/write session on the first token.
    ///
    /// Initializes the driver context on first use. If this call initialized
    /// it and then fails, the context is finalized again before returning.
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::NotPresent` when no driver library was found or
    /// no token is plugged in.
    pub fn setup_session(&self) -> StoreResult<T::Session> {
        let mut context = self.lock();

        let initialized_here = !context.initialized;
        if initialized_here {
            self.token.initialize()?;
            context.initialized = true;
            debug!("Token context initialized");
        }

        match self.open_first_session() {
            Ok(session) => {
                info!("Opened token session {:?}", session);
                Ok(session)
            }
            Err(e) => {
                if initialized_here {
                    if let Err(teardown) = self.token.finalize() {
                        warn!("Failed to finalize token context: {}", teardown);
                    }
                    context.initialized = false;
                }
                Err(e)
            }
        }
    }

    fn open_first_session(&self) -> StoreResult<T::Session> {
        let devices = self.token.device_slots()?;
        let device = devices
            .first()
            .copied()
            .ok_or_else(|| DeviceError::NotPresent {
                reason: "no token in any driver slot".to_string(),
            })?;
        debug!("Opening session on {:?}", device);
        Ok(self.token.open_session(device)?)
    }

    /// Close `session`.
    ///
    /// Failures are logged; the returned error is diagnostic only and
    /// callers are free to ignore it.
    pub fn close_session(&self, session: T::Session) -> StoreResult<()> {
        let _context = self.lock();
        self.token.close_session(session).map_err(|e| {
            warn!("Failed to close token session {:?}: {}", session, e);
            StoreError::from(e)
        })
    }

    /// Finalize the driver context. Idempotent; the next
    /// [`setup_session`](Self::setup_session) initializes it again.
    pub fn cleanup(&self) -> StoreResult<()> {
        let mut context = self.lock();
        if !context.initialized {
            return Ok(());
        }
        context.initialized = false;
        self.token.finalize().map_err(|e| {
            warn!("Failed to finalize token context: {}", e);
            StoreError::from(e)
        })?;
        info!("Token context finalized");
        Ok(())
    }

    /// Login an operation needs, by operation id.
    pub fn authentication_policy(&self, operation_id: u32) -> StoreResult<LoginRequirement> {
        let operation = Operation::try_from(operation_id)?;
        Ok(operation.login_requirement())
    }
}
