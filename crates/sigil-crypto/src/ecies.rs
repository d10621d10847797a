//! The ECIES-style envelope protecting key exchange.
//!
//! The v3 `prepareActivation` request carries the device public key inside an
//! envelope keyed by the application's master public key; the response
//! protecting the server public key reuses the request's envelope key, so no
//! second ephemeral keypair is needed.
//!
//! Construction:
//! - sender generates an ephemeral P-256 keypair and computes
//!   `secret = ECDH(ephemeral_priv, master_pub)`;
//! - `envelope_key = KDF_X9.63(secret, ephemeral_pub_sec1, 32)` splits into
//!   `k_enc = [0..16]` and `k_mac = [16..32]`;
//! - `encrypted_data = AES-128-CBC(k_enc, IV=0, PKCS7(payload))`;
//! - `mac = HMAC-SHA-256(k_mac, encrypted_data)`.
//!
//! The MAC is checked before any decryption is attempted.

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aes_cbc;
use crate::error::CryptoError;
use crate::kdf::{hmac_sha256, kdf_x963};
use crate::keys;

/// Wire form of the envelope. All members are raw bytes; the transport layer
/// Base64s them.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub ephemeral_public_key: Vec<u8>,
    pub encrypted_data: Vec<u8>,
    pub mac: Vec<u8>,
}

/// Derived encryption/MAC key pair, kept for the response direction.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EnvelopeKey {
    k_enc: [u8; 16],
    k_mac: [u8; 16],
}

impl EnvelopeKey {
    fn derive(shared_secret: &[u8; 32], ephemeral_public_sec1: &[u8]) -> Self {
        let material = kdf_x963(shared_secret, ephemeral_public_sec1, 32);
        let mut k_enc = [0u8; 16];
        let mut k_mac = [0u8; 16];
        k_enc.copy_from_slice(&material[..16]);
        k_mac.copy_from_slice(&material[16..]);
        Self { k_enc, k_mac }
    }

    /// Protect a payload in the response direction (no new ephemeral key).
    pub fn encrypt(&self, payload: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let encrypted = aes_cbc::encrypt(&self.k_enc, &aes_cbc::ZERO_IV, payload);
        let mac = hmac_sha256(&self.k_mac, &encrypted).to_vec();
        (encrypted, mac)
    }

    /// Open a payload protected with [`EnvelopeKey::encrypt`].
    pub fn decrypt(&self, encrypted_data: &[u8], mac: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let expected = hmac_sha256(&self.k_mac, encrypted_data);
        if !bool::from(expected.as_slice().ct_eq(mac)) {
            return Err(CryptoError::MacMismatch);
        }
        aes_cbc::decrypt(&self.k_enc, &aes_cbc::ZERO_IV, encrypted_data)
    }
}

/// Seal a payload for the holder of `master_private`. Sender side — used by
/// clients and by the test suite.
pub fn seal(master_public_sec1: &[u8], payload: &[u8]) -> Result<(Envelope, EnvelopeKey), CryptoError> {
    let (ephemeral_private, ephemeral_public) = keys::generate_keypair();
    let shared = keys::ecdh_shared_secret(&ephemeral_private, master_public_sec1)?;
    let key = EnvelopeKey::derive(&shared, &ephemeral_public);
    let (encrypted_data, mac) = key.encrypt(payload);
    Ok((
        Envelope {
            ephemeral_public_key: ephemeral_public,
            encrypted_data,
            mac,
        },
        key,
    ))
}

/// Open an envelope with the master private key. Returns the payload and the
/// envelope key, which the caller keeps to protect the response.
pub fn open(
    master_private: &[u8],
    envelope: &Envelope,
) -> Result<(Vec<u8>, EnvelopeKey), CryptoError> {
    keys::validate_public_key(&envelope.ephemeral_public_key)?;
    let shared = keys::ecdh_shared_secret(master_private, &envelope.ephemeral_public_key)?;
    let key = EnvelopeKey::derive(&shared, &envelope.ephemeral_public_key);
    let payload = key.decrypt(&envelope.encrypted_data, &envelope.mac)?;
    Ok((payload, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let (master_private, master_public) = keys::generate_keypair();
        let (envelope, _) = seal(&master_public, b"device public key bytes").unwrap();
        let (payload, _) = open(&master_private, &envelope).unwrap();
        assert_eq!(payload, b"device public key bytes");
    }

    #[test]
    fn response_direction_reuses_envelope_key() {
        let (master_private, master_public) = keys::generate_keypair();
        let (envelope, client_key) = seal(&master_public, b"request").unwrap();
        let (_, server_key) = open(&master_private, &envelope).unwrap();

        let (encrypted, mac) = server_key.encrypt(b"response");
        assert_eq!(client_key.decrypt(&encrypted, &mac).unwrap(), b"response");
    }

    #[test]
    fn tampered_ciphertext_fails_mac_check() {
        let (master_private, master_public) = keys::generate_keypair();
        let (mut envelope, _) = seal(&master_public, b"payload").unwrap();
        envelope.encrypted_data[0] ^= 0x01;
        assert!(matches!(
            open(&master_private, &envelope),
            Err(CryptoError::MacMismatch)
        ));
    }

    #[test]
    fn wrong_master_key_fails() {
        let (_, master_public) = keys::generate_keypair();
        let (other_private, _) = keys::generate_keypair();
        let (envelope, _) = seal(&master_public, b"payload").unwrap();
        assert!(open(&other_private, &envelope).is_err());
    }
}
