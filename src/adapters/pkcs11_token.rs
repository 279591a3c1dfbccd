//! ykcs11 implementation of the token port
//!
//! Drives a YubiKey through Yubico's PKCS#11 module using the cryptoki crate.
//! Handles handed to the key store are plain ids; the cryptoki sessions they
//! name live in the adapter.

use std::collections::{HashMap, VecDeque};
use std::ffi::c_ulong;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::mechanism::Mechanism as CkMechanism;
use cryptoki::object::{
    Attribute as CkAttribute, AttributeType, KeyType, ObjectClass as CkObjectClass, ObjectHandle,
};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use tracing::debug;

use crate::model::{Credential, UserRole};
use crate::ports::{
    Attribute, AttributeKind, Mechanism, ObjectClass, TokenError, TokenInterface, TokenResult,
};

/// `CKA_VENDOR_DEFINED`, where ykcs11 reads the PIN/touch policy of an imported key.
const YKCS11_KEY_MODE: c_ulong = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pkcs11Session(u64);

#[derive(Default)]
struct DriverState {
    context: Option<Pkcs11>,
    sessions: HashMap<u64, Session>,
    cursors: HashMap<u64, VecDeque<ObjectHandle>>,
    next_session: u64,
}

/// Token reached through a ykcs11 shared library.
pub struct Pkcs11Token {
    library: Option<PathBuf>,
    state: Mutex<DriverState>,
}

impl std::fmt::Debug for Pkcs11Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11Token")
            .field("library", &self.library)
            .finish_non_exhaustive()
    }
}

impl Pkcs11Token {
    /// Use the driver at `library`.
    pub fn new(library: impl Into<PathBuf>) -> Self {
        Self {
            library: Some(library.into()),
            state: Mutex::new(DriverState::default()),
        }
    }

    /// Pick the first candidate that exists and loads.
    ///
    /// With no usable candidate the adapter is still built; initializing it
    /// then reports [`TokenError::LibraryNotFound`].
    pub fn discover<P: AsRef<Path>>(candidates: &[P]) -> Self {
        let library = candidates
            .iter()
            .map(AsRef::as_ref)
            .find(|path| loads(path))
            .map(Path::to_path_buf);

        match &library {
            Some(path) => debug!("Using token driver {}", path.display()),
            None => debug!("No token driver among {} candidates", candidates.len()),
        }

        Self {
            library,
            state: Mutex::new(DriverState::default()),
        }
    }

    pub fn library(&self) -> Option<&Path> {
        self.library.as_deref()
    }

    fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<R>(
        &self,
        session: Pkcs11Session,
        f: impl FnOnce(&Session) -> TokenResult<R>,
    ) -> TokenResult<R> {
        let state = self.state();
        if state.context.is_none() {
            return Err(TokenError::NotInitialized);
        }
        let session = state
            .sessions
            .get(&session.0)
            .ok_or(TokenError::UnknownHandle { kind: "session" })?;
        f(session)
    }
}

fn loads(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match Pkcs11::new(path) {
        Ok(_) => true,
        Err(e) => {
            debug!("Cannot load {}: {}", path.display(), e);
            false
        }
    }
}

fn command_error(command: &'static str) -> impl FnOnce(CryptokiError) -> TokenError {
    move |e| TokenError::command(command, e)
}

fn login_error(e: CryptokiError) -> TokenError {
    match e {
        CryptokiError::Pkcs11(
            RvError::PinIncorrect
            | RvError::PinInvalid
            | RvError::PinLenRange
            | RvError::PinLocked
            | RvError::PinExpired,
            ..,
        ) => TokenError::AuthenticationFailed {
            reason: e.to_string(),
        },
        other => TokenError::command("C_Login", other),
    }
}

fn to_cryptoki(attribute: &Attribute) -> CkAttribute {
    match attribute {
        Attribute::Class(class) => CkAttribute::Class(match class {
            ObjectClass::Certificate => CkObjectClass::CERTIFICATE,
            ObjectClass::PublicKey => CkObjectClass::PUBLIC_KEY,
            ObjectClass::PrivateKey => CkObjectClass::PRIVATE_KEY,
        }),
        Attribute::Token(persistent) => CkAttribute::Token(*persistent),
        Attribute::Id(id) => CkAttribute::Id(id.clone()),
        Attribute::Value(value) => CkAttribute::Value(value.clone()),
        Attribute::EcKeyType => CkAttribute::KeyType(KeyType::EC),
        Attribute::EcParams(params) => CkAttribute::EcParams(params.clone()),
        Attribute::EcPoint(point) => CkAttribute::EcPoint(point.clone()),
        Attribute::KeyMode(mode) => CkAttribute::VendorDefined((
            AttributeType::VendorDefined(YKCS11_KEY_MODE),
            mode.clone(),
        )),
    }
}

fn from_cryptoki(attribute: CkAttribute) -> Option<Attribute> {
    match attribute {
        CkAttribute::Class(class) if class == CkObjectClass::CERTIFICATE => {
            Some(Attribute::Class(ObjectClass::Certificate))
        }
        CkAttribute::Class(class) if class == CkObjectClass::PUBLIC_KEY => {
            Some(Attribute::Class(ObjectClass::PublicKey))
        }
        CkAttribute::Class(class) if class == CkObjectClass::PRIVATE_KEY => {
            Some(Attribute::Class(ObjectClass::PrivateKey))
        }
        CkAttribute::Token(persistent) => Some(Attribute::Token(persistent)),
        CkAttribute::Id(id) => Some(Attribute::Id(id)),
        CkAttribute::Value(value) => Some(Attribute::Value(value)),
        CkAttribute::KeyType(key_type) if key_type == KeyType::EC => Some(Attribute::EcKeyType),
        CkAttribute::EcParams(params) => Some(Attribute::EcParams(params)),
        CkAttribute::EcPoint(point) => Some(Attribute::EcPoint(point)),
        CkAttribute::VendorDefined((kind, mode))
            if kind == AttributeType::VendorDefined(YKCS11_KEY_MODE) =>
        {
            Some(Attribute::KeyMode(mode))
        }
        _ => None,
    }
}

fn attribute_type(kind: AttributeKind) -> AttributeType {
    match kind {
        AttributeKind::Class => AttributeType::Class,
        AttributeKind::Token => AttributeType::Token,
        AttributeKind::Id => AttributeType::Id,
        AttributeKind::Value => AttributeType::Value,
        AttributeKind::KeyType => AttributeType::KeyType,
        AttributeKind::EcParams => AttributeType::EcParams,
        AttributeKind::EcPoint => AttributeType::EcPoint,
        AttributeKind::KeyMode => AttributeType::VendorDefined(YKCS11_KEY_MODE),
    }
}

fn template(attributes: &[Attribute]) -> Vec<CkAttribute> {
    attributes.iter().map(to_cryptoki).collect()
}

impl TokenInterface for Pkcs11Token {
    type Session = Pkcs11Session;
    type Object = ObjectHandle;
    type Device = Slot;

    fn initialize(&self) -> TokenResult<()> {
        let mut state = self.state();
        if state.context.is_some() {
            return Err(TokenError::command(
                "C_Initialize",
                "CKR_CRYPTOKI_ALREADY_INITIALIZED",
            ));
        }
        let library = self.library.as_ref().ok_or(TokenError::LibraryNotFound)?;

        let context = Pkcs11::new(library).map_err(command_error("C_GetFunctionList"))?;
        context
            .initialize(CInitializeArgs::OsThreads)
            .map_err(command_error("C_Initialize"))?;

        debug!("Initialized token driver {}", library.display());
        state.context = Some(context);
        Ok(())
    }

    fn finalize(&self) -> TokenResult<()> {
        let mut state = self.state();
        state.cursors.clear();
        state.sessions.clear();
        // Dropping the context runs C_Finalize.
        state.context.take().map(drop).ok_or(TokenError::NotInitialized)
    }

    fn device_slots(&self) -> TokenResult<Vec<Slot>> {
        let state = self.state();
        let context = state.context.as_ref().ok_or(TokenError::NotInitialized)?;
        context
            .get_slots_with_token()
            .map_err(command_error("C_GetSlotList"))
    }

    fn open_session(&self, device: Slot) -> TokenResult<Pkcs11Session> {
        let mut state = self.state();
        let context = state.context.as_ref().ok_or(TokenError::NotInitialized)?;
        let session = context
            .open_rw_session(device)
            .map_err(command_error("C_OpenSession"))?;

        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(id, session);
        Ok(Pkcs11Session(id))
    }

    fn close_session(&self, session: Pkcs11Session) -> TokenResult<()> {
        let mut state = self.state();
        if state.context.is_none() {
            return Err(TokenError::NotInitialized);
        }
        state.cursors.remove(&session.0);
        // Dropping the cryptoki session runs C_CloseSession.
        state
            .sessions
            .remove(&session.0)
            .map(drop)
            .ok_or(TokenError::UnknownHandle { kind: "session" })
    }

    fn login(
        &self,
        session: Pkcs11Session,
        role: UserRole,
        credential: &Credential,
    ) -> TokenResult<()> {
        let user_type = match role {
            UserRole::SecurityOfficer => UserType::So,
            UserRole::User => UserType::User,
        };
        let pin = AuthPin::new(credential.expose().into());
        self.with_session(session, |s| {
            s.login(user_type, Some(&pin)).map_err(login_error)
        })
    }

    fn logout(&self, session: Pkcs11Session) -> TokenResult<()> {
        self.with_session(session, |s| s.logout().map_err(command_error("C_Logout")))
    }

    fn create_object(
        &self,
        session: Pkcs11Session,
        attributes: &[Attribute],
    ) -> TokenResult<ObjectHandle> {
        let template = template(attributes);
        self.with_session(session, |s| {
            s.create_object(&template)
                .map_err(command_error("C_CreateObject"))
        })
    }

    fn destroy_object(&self, session: Pkcs11Session, object: ObjectHandle) -> TokenResult<()> {
        self.with_session(session, |s| {
            s.destroy_object(object)
                .map_err(command_error("C_DestroyObject"))
        })
    }

    fn find_objects_init(
        &self,
        session: Pkcs11Session,
        attributes: &[Attribute],
    ) -> TokenResult<()> {
        let template = template(attributes);
        let mut state = self.state();
        if state.context.is_none() {
            return Err(TokenError::NotInitialized);
        }
        if state.cursors.contains_key(&session.0) {
            return Err(TokenError::command("C_FindObjectsInit", "CKR_OPERATION_ACTIVE"));
        }

        // cryptoki runs the whole C_FindObjects loop; results are paged out from here.
        let found = state
            .sessions
            .get(&session.0)
            .ok_or(TokenError::UnknownHandle { kind: "session" })?
            .find_objects(&template)
            .map_err(command_error("C_FindObjects"))?;
        state.cursors.insert(session.0, found.into());
        Ok(())
    }

    fn find_objects(&self, session: Pkcs11Session, max: usize) -> TokenResult<Vec<ObjectHandle>> {
        let mut state = self.state();
        let cursor = state.cursors.get_mut(&session.0).ok_or_else(|| {
            TokenError::command("C_FindObjects", "CKR_OPERATION_NOT_INITIALIZED")
        })?;
        let take = max.min(cursor.len());
        Ok(cursor.drain(..take).collect())
    }

    fn find_objects_final(&self, session: Pkcs11Session) -> TokenResult<()> {
        self.state()
            .cursors
            .remove(&session.0)
            .map(drop)
            .ok_or_else(|| {
                TokenError::command("C_FindObjectsFinal", "CKR_OPERATION_NOT_INITIALIZED")
            })
    }

    fn attributes(
        &self,
        session: Pkcs11Session,
        object: ObjectHandle,
        kinds: &[AttributeKind],
    ) -> TokenResult<Vec<Attribute>> {
        let types: Vec<AttributeType> = kinds.iter().copied().map(attribute_type).collect();
        self.with_session(session, |s| {
            let found = s
                .get_attributes(object, &types)
                .map_err(command_error("C_GetAttributeValue"))?;
            Ok(found.into_iter().filter_map(from_cryptoki).collect())
        })
    }

    fn sign(
        &self,
        session: Pkcs11Session,
        mechanism: Mechanism,
        key: ObjectHandle,
        data: &[u8],
    ) -> TokenResult<Vec<u8>> {
        let mechanism = match mechanism {
            Mechanism::Ecdsa => CkMechanism::Ecdsa,
        };
        self.with_session(session, |s| {
            s.sign(&mechanism, key, data).map_err(command_error("C_Sign"))
        })
    }
}
