//! P-256 public key encodings used on the token

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePublicKey;
use p256::PublicKey;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// DER OID of prime256v1, the value of `CKA_EC_PARAMS` for P-256 keys.
pub const P256_EC_PARAMS: [u8; 10] = [0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

/// Length of an uncompressed P-256 point: format tag plus two coordinates.
const UNCOMPRESSED_POINT_LEN: usize = 1 + 2 * 32;

const DER_OCTET_STRING: u8 = 0x04;

/// Rebuild a public key from a `CKA_EC_POINT` value.
///
/// Drivers return the uncompressed point wrapped in a DER OCTET STRING; the
/// bare point is accepted as well.
pub fn from_ec_point(raw: &[u8]) -> Result<PublicKey, CryptoError> {
    let point = match raw {
        [DER_OCTET_STRING, len, rest @ ..]
            if usize::from(*len) == UNCOMPRESSED_POINT_LEN && rest.len() == UNCOMPRESSED_POINT_LEN =>
        {
            rest
        }
        _ => raw,
    };

    if point.len() != UNCOMPRESSED_POINT_LEN {
        return Err(CryptoError::InvalidKeyFormat {
            format: format!(
                "EC point of {} bytes, expected {}",
                point.len(),
                UNCOMPRESSED_POINT_LEN
            ),
        });
    }

    PublicKey::from_sec1_bytes(point).map_err(|e| CryptoError::InvalidKeyFormat {
        format: format!("Invalid P-256 point: {}", e),
    })
}

/// `CKA_EC_POINT` value for a public key, DER wrapped.
pub fn to_ec_point(public_key: &PublicKey) -> Vec<u8> {
    let encoded = public_key.to_encoded_point(false);
    let point = encoded.as_bytes();
    let mut out = Vec::with_capacity(point.len() + 2);
    out.push(DER_OCTET_STRING);
    out.push(point.len() as u8);
    out.extend_from_slice(point);
    out
}

/// Key identifier: hex SHA-256 of the DER SubjectPublicKeyInfo.
pub fn fingerprint(public_key: &PublicKey) -> Result<String, CryptoError> {
    let spki = public_key
        .to_public_key_der()
        .map_err(|e| CryptoError::InvalidKeyFormat {
            format: format!("Failed to encode public key: {}", e),
        })?;
    Ok(hex::encode(Sha256::digest(spki.as_bytes())))
}
