use crate::adapters::Pkcs11Token;
use crate::config::StoreConfig;
use crate::key_store::KeyStore;

pub use crate::model::*;

/// Key store on the ykcs11 driver found from `config`.
///
/// Library discovery happens here, once. No token is touched until the
/// first [`KeyStore::setup_session`].
pub fn open_store(config: &StoreConfig) -> KeyStore<Pkcs11Token> {
    let token = Pkcs11Token::discover(&config.library_candidates);
    KeyStore::new(token, config.key_mode)
}

/// Key store on the first ykcs11 driver found in the well-known locations.
pub fn open_default_store() -> KeyStore<Pkcs11Token> {
    open_store(&StoreConfig::default())
}
