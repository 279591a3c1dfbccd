//! Role metadata stored as a self-signed certificate
//!
//! The token's object model has no place for a role, so each provisioned key
//! is accompanied by an X.509 certificate whose subject (and issuer) common
//! name is the role, signed by the key it certifies.

use p256::pkcs8::{EncodePrivateKey, LineEnding};
use p256::{PublicKey, SecretKey};
use rcgen::{CertificateParams, DistinguishedName, DnType};
use ::time::{Duration, OffsetDateTime};
use x509_parser::oid_registry::{OID_EC_P256, OID_KEY_TYPE_EC_PUBLIC_KEY};
use x509_parser::prelude::*;

use crate::error::{CryptoError, RecordError};
use crate::logic::public_key;
use crate::model::Role;

/// Years a key record certificate stays valid.
const VALIDITY_YEARS: i32 = 10;

/// Decoded contents of a key record certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub role: Role,
    pub public_key: PublicKey,
}

/// Build the DER certificate recording `role` for `private_key`.
pub fn encode(role: Role, private_key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, role.as_str());
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now
        .replace_year(now.year() + VALIDITY_YEARS)
        .unwrap_or_else(|_| now + Duration::days(365 * i64::from(VALIDITY_YEARS) + 3));

    let pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKeyFormat {
            format: format!("PKCS8: {}", e),
        })?;
    let key_pair =
        rcgen::KeyPair::from_pem(&pem).map_err(|e| CryptoError::CertificateEncoding {
            reason: format!("Failed to load signing key: {}", e),
        })?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CryptoError::CertificateEncoding {
            reason: e.to_string(),
        })?;

    Ok(cert.der().to_vec())
}

/// Recover role and public key from a key record certificate.
pub fn decode(der: &[u8]) -> Result<KeyRecord, RecordError> {
    let cert = parse(der)?;
    let public_key = certified_key(&cert)?;

    let name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default();
    let role = name
        .parse::<Role>()
        .map_err(|_| RecordError::InvalidRole {
            name: name.to_string(),
        })?;

    Ok(KeyRecord { role, public_key })
}

/// Role named by a key record certificate.
pub fn decode_role(der: &[u8]) -> Result<Role, RecordError> {
    decode(der).map(|record| record.role)
}

/// Certified P-256 key of any certificate, whatever its subject.
pub fn decode_public_key(der: &[u8]) -> Result<PublicKey, RecordError> {
    let cert = parse(der)?;
    certified_key(&cert)
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>, RecordError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| RecordError::Malformed {
        reason: e.to_string(),
    })?;
    Ok(cert)
}

fn certified_key(cert: &X509Certificate<'_>) -> Result<PublicKey, RecordError> {
    let spki = cert.public_key();
    let algorithm = &spki.algorithm;

    if algorithm.algorithm != OID_KEY_TYPE_EC_PUBLIC_KEY {
        return Err(RecordError::UnsupportedAlgorithm {
            algorithm: algorithm.algorithm.to_id_string(),
        });
    }

    let curve = algorithm
        .parameters
        .as_ref()
        .and_then(|params| params.as_oid().ok());
    if !matches!(curve, Some(ref oid) if *oid == OID_EC_P256) {
        return Err(RecordError::UnsupportedAlgorithm {
            algorithm: curve.map_or_else(|| "EC without curve".to_string(), |oid| {
                format!("EC curve {}", oid.to_id_string())
            }),
        });
    }

    public_key::from_ec_point(&spki.subject_public_key.data).map_err(|e| {
        RecordError::Malformed {
            reason: e.to_string(),
        }
    })
}
