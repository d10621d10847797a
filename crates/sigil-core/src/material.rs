//! Key-material plumbing shared by the operation modules.
//!
//! Centralizes Base64 handling at the service boundary and the at-rest
//! unwrap of server private keys, so the operation code reads as protocol
//! steps rather than byte shuffling.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use sigil_common::error::{SigilError, SigilResult};
use sigil_common::models::activation::{ActivationRecord, KeyEncryption};
use sigil_crypto::kdf::DerivedKeys;
use sigil_crypto::{at_rest, keys};

use crate::Services;

/// Decode a Base64 field, mapping failure to a 400-class input error.
pub(crate) fn b64_field(value: &str, field: &'static str) -> SigilResult<Vec<u8>> {
    B64.decode(value).map_err(|_| SigilError::InvalidInput {
        message: format!("{field} is not valid Base64"),
    })
}

pub(crate) fn b64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// The server-wide database encryption key, decoded and validated.
pub(crate) fn master_db_key(services: &Services) -> SigilResult<Vec<u8>> {
    let encoded = &services.config.security.master_db_encryption_key;
    if encoded.is_empty() {
        return Err(SigilError::Config {
            message: "masterDbEncryptionKey is required for AES_HMAC mode".into(),
        });
    }
    B64.decode(encoded).map_err(|_| SigilError::Config {
        message: "masterDbEncryptionKey is not valid Base64".into(),
    })
}

/// Decode the stored master private scalar. A malformed row is a deployment
/// problem, not a client one.
pub(crate) fn master_private_bytes(
    master: &sigil_common::models::application::MasterKeyPair,
) -> SigilResult<Vec<u8>> {
    B64.decode(&master.private_key).map_err(|_| SigilError::Config {
        message: format!("master keypair {} has a malformed private key", master.id),
    })
}

/// Wrap a freshly generated server private key for storage, honouring the
/// configured at-rest mode.
pub(crate) fn protect_server_private_key(
    services: &Services,
    user_id: &str,
    activation_id: &str,
    private_key: &[u8],
) -> SigilResult<(String, KeyEncryption)> {
    match services.config.security.server_private_key_encryption {
        KeyEncryption::NoEncryption => Ok((b64(private_key), KeyEncryption::NoEncryption)),
        KeyEncryption::AesHmac => {
            let master = master_db_key(services)?;
            Ok((
                at_rest::encrypt_server_private_key(&master, user_id, activation_id, private_key),
                KeyEncryption::AesHmac,
            ))
        }
    }
}

/// Recover the raw server private key of a record, unwrapping the at-rest
/// envelope when one is in place.
pub(crate) fn server_private_key(
    services: &Services,
    record: &ActivationRecord,
) -> SigilResult<Vec<u8>> {
    let stored = record
        .server_private_key
        .as_deref()
        .ok_or(SigilError::InvalidActivationState)?;
    match record.server_private_key_encryption {
        KeyEncryption::NoEncryption => b64_field(stored, "serverPrivateKey"),
        KeyEncryption::AesHmac => {
            let master = master_db_key(services)?;
            Ok(at_rest::decrypt_server_private_key(
                &master,
                &record.user_id,
                &record.activation_id.to_string(),
                stored,
            )?)
        }
    }
}

/// Derive the full shared key family for a record: unwrap the server private
/// key, run ECDH against the device public key, expand.
pub(crate) fn derived_keys(
    services: &Services,
    record: &ActivationRecord,
) -> SigilResult<DerivedKeys> {
    let device_public = record
        .device_public_key
        .as_deref()
        .ok_or(SigilError::InvalidActivationState)?;
    let device_public = b64_field(device_public, "devicePublicKey")?;
    let private = server_private_key(services, record)?;
    let shared = keys::ecdh_shared_secret(&private, &device_public)?;
    Ok(DerivedKeys::from_shared_secret(&shared))
}
