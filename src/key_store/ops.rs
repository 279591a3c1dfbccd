//! Key operations of the store
//!
//! Each public operation takes the engine lock for its whole command
//! sequence. The private `*_held` variants assume the caller already holds
//! it, which lets [`KeyStore::allocate_and_provision`] run two steps as one.

use std::collections::BTreeMap;

use p256::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::guard::LoginGuard;
use super::objects::{find_all, find_all_lenient, find_one, read_bytes};
use super::KeyStore;
use crate::error::{CryptoError, KeyManagementError, RecordError, StoreError, StoreResult};
use crate::logic::{key_record, public_key, SlotTable};
use crate::model::{Credential, HardwareSlot, Role, SlotId, UserRole};
use crate::ports::{
    attribute_bytes, Attribute, AttributeKind, Mechanism, ObjectClass, TokenInterface,
};

fn certificate_template(slot: SlotId) -> Vec<Attribute> {
    vec![
        Attribute::Token(true),
        Attribute::Class(ObjectClass::Certificate),
        Attribute::Id(slot.to_token_id()),
    ]
}

impl<T: TokenInterface> KeyStore<T> {
    /// Next free slot in preference order.
    ///
    /// Looks at every persistent object, not only certificates, since
    /// private keys occupy slot ids too. Nothing is reserved: a concurrent
    /// caller may be handed the same slot until one of them provisions it.
    /// Use [`allocate_and_provision`](Self::allocate_and_provision) to close
    /// that window.
    ///
    /// # Errors
    ///
    /// Returns `KeyManagementError::NoAvailableSlots` when all four are taken.
    pub fn find_empty_slot(&self, session: T::Session) -> StoreResult<SlotId> {
        let _context = self.lock();
        self.find_empty_slot_held(session)
    }

    fn find_empty_slot_held(&self, session: T::Session) -> StoreResult<SlotId> {
        let objects = find_all(&self.token, session, &[Attribute::Token(true)])?;

        let mut table = SlotTable::new();
        for object in objects {
            match read_bytes(&self.token, session, object, AttributeKind::Id) {
                Ok(Some(id)) => table.mark_token_id(&id),
                Ok(None) => debug!("Object {:?} has no id", object),
                Err(e) => debug!("Failed to read id of {:?}: {}", object, e),
            }
        }

        let slot = table
            .first_free()
            .ok_or(KeyManagementError::NoAvailableSlots)?;
        debug!("Next free slot is {} ({})", slot, slot.piv_slot().hex());
        Ok(slot)
    }

    /// Write `private_key` and its role certificate into `target`'s slot.
    ///
    /// Does not check that the slot is free; see
    /// [`find_empty_slot`](Self::find_empty_slot).
    pub fn provision_key(
        &self,
        session: T::Session,
        private_key: &SecretKey,
        target: &HardwareSlot,
        so_credential: &Credential,
        role: Role,
    ) -> StoreResult<()> {
        let _context = self.lock();
        self.provision_key_held(session, private_key, target.slot_id, so_credential, role)
    }

    fn provision_key_held(
        &self,
        session: T::Session,
        private_key: &SecretKey,
        slot: SlotId,
        so_credential: &Credential,
        role: Role,
    ) -> StoreResult<()> {
        let _login =
            LoginGuard::login(&self.token, session, UserRole::SecurityOfficer, so_credential)?;

        let certificate = key_record::encode(role, private_key)?;
        let mut cert_template = certificate_template(slot);
        cert_template.push(Attribute::Value(certificate));

        let private_template = [
            Attribute::Token(true),
            Attribute::Class(ObjectClass::PrivateKey),
            Attribute::EcKeyType,
            Attribute::Id(slot.to_token_id()),
            Attribute::EcParams(public_key::P256_EC_PARAMS.to_vec()),
            Attribute::Value(private_key.to_bytes().to_vec()),
            Attribute::KeyMode(self.key_mode.to_attribute_value()),
        ];

        let cert = self.token.create_object(session, &cert_template)?;
        if let Err(e) = self.token.create_object(session, &private_template) {
            if let Err(rollback) = self.token.destroy_object(session, cert) {
                warn!(
                    "Failed to remove certificate from slot {} after failed import: {}",
                    slot, rollback
                );
            }
            return Err(e.into());
        }

        info!(
            "Provisioned {} key in slot {} with {:?}",
            role, slot, self.key_mode
        );
        Ok(())
    }

    /// Pick the next free slot and provision into it, as one operation.
    pub fn allocate_and_provision(
        &self,
        session: T::Session,
        private_key: &SecretKey,
        so_credential: &Credential,
        role: Role,
    ) -> StoreResult<HardwareSlot> {
        let _context = self.lock();
        let slot = self.find_empty_slot_held(session)?;
        self.provision_key_held(session, private_key, slot, so_credential, role)?;

        let fingerprint = public_key::fingerprint(&private_key.public_key())?;
        Ok(HardwareSlot::new(role, slot, fingerprint))
    }

    /// Public key and role stored in `slot`. Needs no login.
    ///
    /// # Errors
    ///
    /// Returns `KeyManagementError::ObjectNotFound` or `AmbiguousObject` unless
    /// exactly one public key and one certificate carry the slot's id.
    pub fn retrieve_key(
        &self,
        session: T::Session,
        slot: &HardwareSlot,
    ) -> StoreResult<(PublicKey, Role)> {
        let _context = self.lock();
        let id = slot.slot_id.to_token_id();

        let public = find_one(
            &self.token,
            session,
            &[
                Attribute::Token(true),
                Attribute::Class(ObjectClass::PublicKey),
                Attribute::Id(id),
            ],
            "public key",
            slot.slot_id,
        )?;
        let point = read_bytes(&self.token, session, public, AttributeKind::EcPoint)?.ok_or(
            CryptoError::InvalidKeyFormat {
                format: "public key without EC point".to_string(),
            },
        )?;
        let key = public_key::from_ec_point(&point)?;

        let cert = find_one(
            &self.token,
            session,
            &certificate_template(slot.slot_id),
            "certificate",
            slot.slot_id,
        )?;
        let der = read_bytes(&self.token, session, cert, AttributeKind::Value)?.unwrap_or_default();
        let record = key_record::decode(&der)?;
        if record.public_key != key {
            warn!(
                "Certificate in slot {} certifies a different key than the one stored",
                slot.slot_id
            );
        }

        debug!("Retrieved {} key from slot {}", record.role, slot.slot_id);
        Ok((key, record.role))
    }

    /// ECDSA signature (r‖s) over the SHA-256 digest of `payload`.
    pub fn sign(
        &self,
        session: T::Session,
        slot: &HardwareSlot,
        user_credential: &Credential,
        payload: &[u8],
    ) -> StoreResult<Vec<u8>> {
        let _context = self.lock();
        let _login = LoginGuard::login(&self.token, session, UserRole::User, user_credential)?;

        let key = find_one(
            &self.token,
            session,
            &[
                Attribute::Class(ObjectClass::PrivateKey),
                Attribute::EcKeyType,
                Attribute::Id(slot.slot_id.to_token_id()),
            ],
            "private key",
            slot.slot_id,
        )?;

        let digest = Sha256::digest(payload);
        let signature = self
            .token
            .sign(session, Mechanism::Ecdsa, key, &digest)
            .map_err(|e| CryptoError::SignatureFailed {
                reason: e.to_string(),
            })?;
        if signature.is_empty() {
            return Err(CryptoError::SignatureFailed {
                reason: "token returned no signature".to_string(),
            }
            .into());
        }

        debug!("Signed {} bytes with slot {}", payload.len(), slot.slot_id);
        Ok(signature)
    }

    /// Delete the key in `slot`.
    ///
    /// The certificate goes first, which drops the key from listings. The
    /// private key is destroyed next; a token that refuses is logged and the
    /// removal still succeeds. `key_id` is only used in diagnostics.
    pub fn remove_key(
        &self,
        session: T::Session,
        slot: &HardwareSlot,
        so_credential: &Credential,
        key_id: &str,
    ) -> StoreResult<()> {
        let _context = self.lock();
        let _login =
            LoginGuard::login(&self.token, session, UserRole::SecurityOfficer, so_credential)?;

        let cert = find_one(
            &self.token,
            session,
            &certificate_template(slot.slot_id),
            "certificate",
            slot.slot_id,
        )?;
        self.token.destroy_object(session, cert)?;
        debug!("Deleted certificate of key {} in slot {}", key_id, slot.slot_id);

        let private_template = [
            Attribute::Token(true),
            Attribute::Class(ObjectClass::PrivateKey),
            Attribute::Id(slot.slot_id.to_token_id()),
        ];
        let private_keys = find_all(&self.token, session, &private_template).unwrap_or_else(|e| {
            warn!("Failed to look up private key in slot {}: {}", slot.slot_id, e);
            Vec::new()
        });
        for private in private_keys {
            if let Err(e) = self.token.destroy_object(session, private) {
                warn!(
                    "Token kept the private key in slot {}: {}",
                    slot.slot_id, e
                );
            }
        }

        info!("Removed key {} from slot {}", key_id, slot.slot_id);
        Ok(())
    }

    /// Every key with a readable role certificate, by fingerprint.
    ///
    /// Certificates that fail to parse, certify a non-P-256 key or name an
    /// unknown role are skipped, and so is whatever a failing later page of
    /// the search would have returned.
    ///
    /// # Errors
    ///
    /// Returns a `DeviceError` when the search cannot be started or closed,
    /// and `KeyManagementError::NoKeysFound` if nothing usable is left.
    pub fn list_keys(&self, session: T::Session) -> StoreResult<BTreeMap<String, HardwareSlot>> {
        let _context = self.lock();
        let certificates = find_all_lenient(
            &self.token,
            session,
            &[
                Attribute::Token(true),
                Attribute::Class(ObjectClass::Certificate),
            ],
        )?;

        let mut keys = BTreeMap::new();
        for cert in certificates {
            match self.describe(session, cert) {
                Ok(slot) => {
                    keys.insert(slot.key_fingerprint.clone(), slot);
                }
                Err(e) => debug!("Skipping certificate {:?}: {}", cert, e),
            }
        }

        if keys.is_empty() {
            return Err(KeyManagementError::NoKeysFound.into());
        }
        Ok(keys)
    }

    fn describe(&self, session: T::Session, cert: T::Object) -> StoreResult<HardwareSlot> {
        let attrs = self
            .token
            .attributes(session, cert, &[AttributeKind::Id, AttributeKind::Value])?;
        let slot =
            SlotId::from_token_id(attribute_bytes(&attrs, AttributeKind::Id).unwrap_or_default())?;
        let der = attribute_bytes(&attrs, AttributeKind::Value).ok_or_else(|| {
            StoreError::from(RecordError::Malformed {
                reason: "certificate without value".to_string(),
            })
        })?;

        let record = key_record::decode(der)?;
        let fingerprint = public_key::fingerprint(&record.public_key)?;
        Ok(HardwareSlot::new(record.role, slot, fingerprint))
    }
}
