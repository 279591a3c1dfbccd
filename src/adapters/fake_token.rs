//! In-memory token for tests
//!
//! Emulates the parts of a ykcs11 token the key store relies on: persistent
//! objects tagged with slot ids, a public key object derived from each stored
//! certificate, token-wide SO/User login, a paged find cursor per session and
//! real P-256 signing over a supplied digest.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use p256::SecretKey;

use crate::logic::{key_record, public_key};
use crate::model::{Credential, UserRole};
use crate::ports::{
    attribute_bytes, Attribute, AttributeKind, Mechanism, ObjectClass, TokenError,
    TokenInterface, TokenResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FakeSession(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FakeObject(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeDevice(u32);

/// Failures the fake can be told to produce.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// `logout` clears the login but reports an error.
    pub fail_logout: bool,
    /// `close_session` drops the session but reports an error.
    pub fail_close: bool,
    /// Private key objects cannot be created.
    pub refuse_private_key_create: bool,
    /// Private key objects cannot be destroyed.
    pub refuse_private_key_destroy: bool,
    /// `sign` succeeds with an empty signature.
    pub empty_signature: bool,
    /// Every `find_objects` call after the first page of a search fails.
    pub fail_find_after_first_page: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    cursor: Option<VecDeque<FakeObject>>,
    pages_served: usize,
}

#[derive(Debug)]
struct FakeState {
    initialized: bool,
    initialize_calls: usize,
    login: Option<UserRole>,
    sessions: HashMap<u64, SessionState>,
    objects: BTreeMap<FakeObject, Vec<Attribute>>,
    /// Certificate handle to the public key object derived from it.
    derived: HashMap<FakeObject, FakeObject>,
    next_handle: u64,
}

#[derive(Debug)]
pub struct FakeToken {
    devices: Vec<FakeDevice>,
    user_credential: Credential,
    so_credential: Credential,
    page_limit: Option<usize>,
    faults: Faults,
    state: Mutex<FakeState>,
}

impl Default for FakeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeToken {
    /// One token with factory credentials.
    pub fn new() -> Self {
        Self {
            devices: vec![FakeDevice(0)],
            user_credential: Credential::default_user(),
            so_credential: Credential::default_security_officer(),
            page_limit: None,
            faults: Faults::default(),
            state: Mutex::new(FakeState {
                initialized: false,
                initialize_calls: 0,
                login: None,
                sessions: HashMap::new(),
                objects: BTreeMap::new(),
                derived: HashMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// Driver loaded but no token plugged in.
    pub fn without_devices() -> Self {
        Self {
            devices: Vec::new(),
            ..Self::new()
        }
    }

    /// Return at most `limit` handles per `find_objects` call.
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Store an object directly, as if written by another tool.
    pub fn insert_object(&self, template: &[Attribute]) -> FakeObject {
        let mut state = self.state();
        state.store(template.to_vec())
    }

    /// Current token-wide login.
    pub fn logged_in(&self) -> Option<UserRole> {
        self.state().login
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn initialize_calls(&self) -> usize {
        self.state().initialize_calls
    }

    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    /// Classes of the objects tagged with `id`, in creation order.
    pub fn classes_with_id(&self, id: &[u8]) -> Vec<ObjectClass> {
        let state = self.state();
        state
            .objects
            .values()
            .filter(|attrs| attribute_bytes(attrs, AttributeKind::Id) == Some(id))
            .filter_map(|attrs| class_of(attrs))
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_state(&self) -> TokenResult<MutexGuard<'_, FakeState>> {
        let state = self.state();
        if !state.initialized {
            return Err(TokenError::NotInitialized);
        }
        Ok(state)
    }
}

impl FakeState {
    fn store(&mut self, mut attrs: Vec<Attribute>) -> FakeObject {
        if !attrs.iter().any(|a| a.kind() == AttributeKind::Token) {
            attrs.push(Attribute::Token(true));
        }

        let handle = self.allocate();
        let derived = match class_of(&attrs) {
            Some(ObjectClass::Certificate) => derive_public_key(&attrs),
            _ => None,
        };
        self.objects.insert(handle, attrs);

        if let Some(public) = derived {
            let public_handle = self.allocate();
            self.objects.insert(public_handle, public);
            self.derived.insert(handle, public_handle);
        }
        handle
    }

    fn allocate(&mut self) -> FakeObject {
        let handle = FakeObject(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn session(&mut self, session: FakeSession) -> TokenResult<&mut SessionState> {
        self.sessions
            .get_mut(&session.0)
            .ok_or(TokenError::UnknownHandle { kind: "session" })
    }

    fn require_login(&self, role: UserRole, command: &'static str) -> TokenResult<()> {
        if self.login == Some(role) {
            Ok(())
        } else {
            Err(TokenError::command(command, "CKR_USER_NOT_LOGGED_IN"))
        }
    }
}

fn class_of(attrs: &[Attribute]) -> Option<ObjectClass> {
    attrs.iter().find_map(|attr| match attr {
        Attribute::Class(class) => Some(*class),
        _ => None,
    })
}

/// Public key object the driver exposes next to a stored certificate.
fn derive_public_key(cert: &[Attribute]) -> Option<Vec<Attribute>> {
    let der = attribute_bytes(cert, AttributeKind::Value)?;
    let key = key_record::decode_public_key(der).ok()?;
    let id = attribute_bytes(cert, AttributeKind::Id).unwrap_or_default();
    Some(vec![
        Attribute::Class(ObjectClass::PublicKey),
        Attribute::Token(true),
        Attribute::Id(id.to_vec()),
        Attribute::EcKeyType,
        Attribute::EcParams(public_key::P256_EC_PARAMS.to_vec()),
        Attribute::EcPoint(public_key::to_ec_point(&key)),
    ])
}

impl TokenInterface for FakeToken {
    type Session = FakeSession;
    type Object = FakeObject;
    type Device = FakeDevice;

    fn initialize(&self) -> TokenResult<()> {
        let mut state = self.state();
        if state.initialized {
            return Err(TokenError::command(
                "C_Initialize",
                "CKR_CRYPTOKI_ALREADY_INITIALIZED",
            ));
        }
        state.initialized = true;
        state.initialize_calls += 1;
        Ok(())
    }

    fn finalize(&self) -> TokenResult<()> {
        let mut state = self.live_state()?;
        state.initialized = false;
        state.login = None;
        state.sessions.clear();
        Ok(())
    }

    fn device_slots(&self) -> TokenResult<Vec<FakeDevice>> {
        let _state = self.live_state()?;
        Ok(self.devices.clone())
    }

    fn open_session(&self, device: FakeDevice) -> TokenResult<FakeSession> {
        let mut state = self.live_state()?;
        if !self.devices.contains(&device) {
            return Err(TokenError::UnknownHandle { kind: "device" });
        }
        let id = state.next_handle;
        state.next_handle += 1;
        state.sessions.insert(id, SessionState::default());
        Ok(FakeSession(id))
    }

    fn close_session(&self, session: FakeSession) -> TokenResult<()> {
        let mut state = self.live_state()?;
        state
            .sessions
            .remove(&session.0)
            .ok_or(TokenError::UnknownHandle { kind: "session" })?;
        if state.sessions.is_empty() {
            state.login = None;
        }
        if self.faults.fail_close {
            return Err(TokenError::command("C_CloseSession", "CKR_DEVICE_ERROR"));
        }
        Ok(())
    }

    fn login(
        &self,
        session: FakeSession,
        role: UserRole,
        credential: &Credential,
    ) -> TokenResult<()> {
        let mut state = self.live_state()?;
        state.session(session)?;
        if state.login.is_some() {
            return Err(TokenError::command("C_Login", "CKR_USER_ALREADY_LOGGED_IN"));
        }

        let expected = match role {
            UserRole::SecurityOfficer => &self.so_credential,
            UserRole::User => &self.user_credential,
        };
        if credential != expected {
            return Err(TokenError::AuthenticationFailed {
                reason: "CKR_PIN_INCORRECT".to_string(),
            });
        }

        state.login = Some(role);
        Ok(())
    }

    fn logout(&self, session: FakeSession) -> TokenResult<()> {
        let mut state = self.live_state()?;
        state.session(session)?;
        if state.login.take().is_none() {
            return Err(TokenError::command("C_Logout", "CKR_USER_NOT_LOGGED_IN"));
        }
        if self.faults.fail_logout {
            return Err(TokenError::command("C_Logout", "CKR_DEVICE_ERROR"));
        }
        Ok(())
    }

    fn create_object(&self, session: FakeSession, template: &[Attribute]) -> TokenResult<FakeObject> {
        let mut state = self.live_state()?;
        state.session(session)?;
        state.require_login(UserRole::SecurityOfficer, "C_CreateObject")?;
        match class_of(template) {
            None => {
                return Err(TokenError::command("C_CreateObject", "CKR_TEMPLATE_INCOMPLETE"))
            }
            Some(ObjectClass::PrivateKey) if self.faults.refuse_private_key_create => {
                return Err(TokenError::command("C_CreateObject", "CKR_DEVICE_MEMORY"))
            }
            Some(_) => {}
        }
        Ok(state.store(template.to_vec()))
    }

    fn destroy_object(&self, session: FakeSession, object: FakeObject) -> TokenResult<()> {
        let mut state = self.live_state()?;
        state.session(session)?;
        state.require_login(UserRole::SecurityOfficer, "C_DestroyObject")?;

        let class = state
            .objects
            .get(&object)
            .map(|attrs| class_of(attrs))
            .ok_or(TokenError::UnknownHandle { kind: "object" })?;
        if class == Some(ObjectClass::PrivateKey) && self.faults.refuse_private_key_destroy {
            return Err(TokenError::command("C_DestroyObject", "CKR_ACTION_PROHIBITED"));
        }

        state.objects.remove(&object);
        if let Some(public) = state.derived.remove(&object) {
            state.objects.remove(&public);
        }
        Ok(())
    }

    fn find_objects_init(&self, session: FakeSession, template: &[Attribute]) -> TokenResult<()> {
        let mut state = self.live_state()?;
        let matches: VecDeque<FakeObject> = state
            .objects
            .iter()
            .filter(|(_, attrs)| template.iter().all(|wanted| attrs.contains(wanted)))
            .map(|(handle, _)| *handle)
            .collect();

        let session = state.session(session)?;
        if session.cursor.is_some() {
            return Err(TokenError::command("C_FindObjectsInit", "CKR_OPERATION_ACTIVE"));
        }
        session.cursor = Some(matches);
        session.pages_served = 0;
        Ok(())
    }

    fn find_objects(&self, session: FakeSession, max: usize) -> TokenResult<Vec<FakeObject>> {
        let page = self.page_limit.map_or(max, |limit| limit.min(max));
        let mut state = self.live_state()?;
        let session = state.session(session)?;
        if self.faults.fail_find_after_first_page && session.pages_served > 0 {
            return Err(TokenError::command("C_FindObjects", "CKR_DEVICE_REMOVED"));
        }
        let cursor = session
            .cursor
            .as_mut()
            .ok_or_else(|| TokenError::command("C_FindObjects", "CKR_OPERATION_NOT_INITIALIZED"))?;
        let take = page.min(cursor.len());
        let found: Vec<FakeObject> = cursor.drain(..take).collect();
        session.pages_served += 1;
        Ok(found)
    }

    fn find_objects_final(&self, session: FakeSession) -> TokenResult<()> {
        let mut state = self.live_state()?;
        state
            .session(session)?
            .cursor
            .take()
            .map(|_| ())
            .ok_or_else(|| {
                TokenError::command("C_FindObjectsFinal", "CKR_OPERATION_NOT_INITIALIZED")
            })
    }

    fn attributes(
        &self,
        session: FakeSession,
        object: FakeObject,
        kinds: &[AttributeKind],
    ) -> TokenResult<Vec<Attribute>> {
        let mut state = self.live_state()?;
        state.session(session)?;
        let attrs = state
            .objects
            .get(&object)
            .ok_or(TokenError::UnknownHandle { kind: "object" })?;
        let sensitive = class_of(attrs) == Some(ObjectClass::PrivateKey);

        Ok(kinds
            .iter()
            .filter(|kind| !(sensitive && **kind == AttributeKind::Value))
            .filter_map(|kind| attrs.iter().find(|attr| attr.kind() == *kind).cloned())
            .collect())
    }

    fn sign(
        &self,
        session: FakeSession,
        mechanism: Mechanism,
        key: FakeObject,
        data: &[u8],
    ) -> TokenResult<Vec<u8>> {
        let mut state = self.live_state()?;
        state.session(session)?;
        state.require_login(UserRole::User, "C_Sign")?;

        let attrs = state
            .objects
            .get(&key)
            .ok_or(TokenError::UnknownHandle { kind: "object" })?;
        if class_of(attrs) != Some(ObjectClass::PrivateKey) {
            return Err(TokenError::command("C_SignInit", "CKR_KEY_TYPE_INCONSISTENT"));
        }
        if self.faults.empty_signature {
            return Ok(Vec::new());
        }

        let Mechanism::Ecdsa = mechanism;
        let scalar = attribute_bytes(attrs, AttributeKind::Value)
            .ok_or_else(|| TokenError::command("C_Sign", "CKR_KEY_HANDLE_INVALID"))?;
        let secret = SecretKey::from_slice(scalar)
            .map_err(|e| TokenError::command("C_Sign", e))?;
        let signature: Signature = SigningKey::from(secret)
            .sign_prehash(data)
            .map_err(|e| TokenError::command("C_Sign", e))?;
        Ok(signature.to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_tests_for;
    use crate::ports::contract_tests::token_contract;

    contract_tests_for!(
        fake_token_contract,
        make = FakeToken::new,
        tests = {
            test_open_session_on_first_device => token_contract::test_open_session_on_first_device,
            test_requires_initialize => token_contract::test_requires_initialize,
            test_initialize_twice_is_rejected => token_contract::test_initialize_twice_is_rejected,
            test_login_wrong_credential => token_contract::test_login_wrong_credential,
            test_login_logout_cycle => token_contract::test_login_logout_cycle,
            test_create_requires_security_officer => token_contract::test_create_requires_security_officer,
            test_certificate_exposes_public_key => token_contract::test_certificate_exposes_public_key,
            test_find_pages_until_exhausted => token_contract::test_find_pages_until_exhausted,
            test_find_cursor_is_exclusive => token_contract::test_find_cursor_is_exclusive,
            test_private_key_value_is_sensitive => token_contract::test_private_key_value_is_sensitive,
            test_sign_digest_verifies => token_contract::test_sign_digest_verifies,
            test_sign_requires_user_login => token_contract::test_sign_requires_user_login,
            test_destroy_certificate => token_contract::test_destroy_certificate,
        }
    );

    #[test]
    fn test_short_pages() {
        let token = FakeToken::new().with_page_limit(1);
        token.initialize().unwrap();
        let session = token.open_session(FakeDevice(0)).unwrap();
        for id in 0..3u8 {
            token.insert_object(&[
                Attribute::Class(ObjectClass::Certificate),
                Attribute::Id(vec![id]),
            ]);
        }

        token.find_objects_init(session, &[Attribute::Token(true)]).unwrap();
        assert_eq!(token.find_objects(session, 4).unwrap().len(), 1);
        assert_eq!(token.find_objects(session, 4).unwrap().len(), 1);
        assert_eq!(token.find_objects(session, 4).unwrap().len(), 1);
        assert!(token.find_objects(session, 4).unwrap().is_empty());
        token.find_objects_final(session).unwrap();
    }

    #[test]
    fn test_faulty_logout_still_clears_login() {
        let token = FakeToken::new().with_faults(Faults {
            fail_logout: true,
            ..Faults::default()
        });
        token.initialize().unwrap();
        let session = token.open_session(FakeDevice(0)).unwrap();
        token
            .login(session, UserRole::User, &Credential::default_user())
            .unwrap();

        assert!(token.logout(session).is_err());
        assert_eq!(token.logged_in(), None);
    }

    #[test]
    fn test_refused_private_key_destroy() {
        let token = FakeToken::new().with_faults(Faults {
            refuse_private_key_destroy: true,
            ..Faults::default()
        });
        token.initialize().unwrap();
        let session = token.open_session(FakeDevice(0)).unwrap();
        let key = token.insert_object(&[
            Attribute::Class(ObjectClass::PrivateKey),
            Attribute::Id(vec![2]),
        ]);
        token
            .login(
                session,
                UserRole::SecurityOfficer,
                &Credential::default_security_officer(),
            )
            .unwrap();

        assert!(token.destroy_object(session, key).is_err());
        assert_eq!(token.classes_with_id(&[2]), vec![ObjectClass::PrivateKey]);
    }

    #[test]
    fn test_finalize_drops_sessions() {
        let token = FakeToken::new();
        token.initialize().unwrap();
        token.open_session(FakeDevice(0)).unwrap();
        token.finalize().unwrap();
        assert!(!token.is_initialized());
        assert_eq!(token.open_sessions(), 0);
        assert_eq!(token.finalize(), Err(TokenError::NotInitialized));
    }
}
