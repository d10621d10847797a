//! At-rest protection for server private keys (`AES_HMAC` mode).
//!
//! Each activation's private key is wrapped under a key-encryption key bound
//! to that activation:
//!
//! `KEK = HMAC-SHA-256(master_db_key, user_id ‖ activation_id)[0..16]`
//!
//! so a leaked row from one user cannot be unwrapped with material recovered
//! for another. The envelope is encrypt-then-MAC:
//!
//! `IV(16) ‖ AES-128-CBC(KEK, IV, PKCS7(key)) ‖ HMAC-SHA-256(KEK, IV ‖ ct)[0..16]`
//!
//! transported Base64. The MAC is checked before decryption.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::aes_cbc;
use crate::error::CryptoError;
use crate::kdf::hmac_sha256;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

fn derive_kek(master_db_key: &[u8], user_id: &str, activation_id: &str) -> [u8; 16] {
    let mut context = Vec::with_capacity(user_id.len() + activation_id.len());
    context.extend_from_slice(user_id.as_bytes());
    context.extend_from_slice(activation_id.as_bytes());
    let mac = hmac_sha256(master_db_key, &context);
    let mut kek = [0u8; 16];
    kek.copy_from_slice(&mac[..16]);
    kek
}

/// Wrap a server private key for storage.
pub fn encrypt_server_private_key(
    master_db_key: &[u8],
    user_id: &str,
    activation_id: &str,
    private_key: &[u8],
) -> String {
    let kek = derive_kek(master_db_key, user_id, activation_id);

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let ciphertext = aes_cbc::encrypt(&kek, &iv, private_key);

    let mut tag_input = Vec::with_capacity(IV_LEN + ciphertext.len());
    tag_input.extend_from_slice(&iv);
    tag_input.extend_from_slice(&ciphertext);
    let tag = hmac_sha256(&kek, &tag_input);

    let mut envelope = tag_input;
    envelope.extend_from_slice(&tag[..TAG_LEN]);
    B64.encode(envelope)
}

/// Unwrap a stored server private key.
pub fn decrypt_server_private_key(
    master_db_key: &[u8],
    user_id: &str,
    activation_id: &str,
    stored: &str,
) -> Result<Vec<u8>, CryptoError> {
    let envelope = B64
        .decode(stored)
        .map_err(|_| CryptoError::InvalidEncoding("at-rest envelope"))?;
    if envelope.len() < IV_LEN + TAG_LEN + 16 {
        return Err(CryptoError::InvalidEncoding("at-rest envelope"));
    }

    let kek = derive_kek(master_db_key, user_id, activation_id);
    let (body, tag) = envelope.split_at(envelope.len() - TAG_LEN);
    let expected = hmac_sha256(&kek, body);
    if !bool::from(expected[..TAG_LEN].ct_eq(tag)) {
        return Err(CryptoError::MacMismatch);
    }

    let (iv, ciphertext) = body.split_at(IV_LEN);
    let iv: [u8; IV_LEN] = iv.try_into().expect("split at IV_LEN");
    aes_cbc::decrypt(&kek, &iv, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let master = [5u8; 32];
        let stored = encrypt_server_private_key(&master, "user-1", "act-1", &[7u8; 32]);
        let recovered = decrypt_server_private_key(&master, "user-1", "act-1", &stored).unwrap();
        assert_eq!(recovered, vec![7u8; 32]);
    }

    #[test]
    fn kek_is_bound_to_user_and_activation() {
        let master = [5u8; 32];
        let stored = encrypt_server_private_key(&master, "user-1", "act-1", &[7u8; 32]);
        assert!(matches!(
            decrypt_server_private_key(&master, "user-2", "act-1", &stored),
            Err(CryptoError::MacMismatch)
        ));
        assert!(matches!(
            decrypt_server_private_key(&master, "user-1", "act-2", &stored),
            Err(CryptoError::MacMismatch)
        ));
    }

    #[test]
    fn tampering_is_detected_before_decryption() {
        let master = [5u8; 32];
        let stored = encrypt_server_private_key(&master, "user-1", "act-1", &[7u8; 32]);
        let mut raw = B64.decode(&stored).unwrap();
        raw[IV_LEN] ^= 0x01;
        let tampered = B64.encode(&raw);
        assert!(matches!(
            decrypt_server_private_key(&master, "user-1", "act-1", &tampered),
            Err(CryptoError::MacMismatch)
        ));
    }

    #[test]
    fn fresh_iv_per_wrap() {
        let master = [5u8; 32];
        let a = encrypt_server_private_key(&master, "u", "a", &[7u8; 32]);
        let b = encrypt_server_private_key(&master, "u", "a", &[7u8; 32]);
        assert_ne!(a, b);
    }
}
