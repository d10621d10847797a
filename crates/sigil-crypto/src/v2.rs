//! Legacy (v2) activation transport.
//!
//! Kept alive because devices upgrade gradually: a v2 record stays v2 for its
//! whole life, and the server cannot drop this path until the last v2 device
//! has re-activated. Do not extend it.
//!
//! The device public key travels AES-128-CBC encrypted (zero IV) under a key
//! derived from an ephemeral ECDH exchange with the application master key
//! plus the short activation identifier and OTP. An HMAC by the application
//! secret binds the envelope to the presenting application version.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::aes_cbc;
use crate::error::CryptoError;
use crate::kdf::{hmac_sha256, kdf_x963};
use crate::keys;

/// Length of the random blob substituted for a signature when legacy DER
/// signing fails (maximum DER length of a P-256 signature minus one; the
/// historical value, preserved bit-for-bit).
const FALLBACK_SIGNATURE_LEN: usize = 71;

/// Derive the v2 envelope key from the master-key ECDH and the typed-in
/// activation material.
pub fn derive_envelope_key(
    master_private: &[u8],
    ephemeral_public_sec1: &[u8],
    activation_id_short: &str,
    activation_otp: &str,
) -> Result<[u8; 16], CryptoError> {
    keys::validate_public_key(ephemeral_public_sec1)?;
    let shared = keys::ecdh_shared_secret(master_private, ephemeral_public_sec1)?;
    let mut info = Vec::with_capacity(activation_id_short.len() + activation_otp.len());
    info.extend_from_slice(activation_id_short.as_bytes());
    info.extend_from_slice(activation_otp.as_bytes());
    let material = kdf_x963(&shared, &info, 16);
    let mut key = [0u8; 16];
    key.copy_from_slice(&material);
    Ok(key)
}

/// Sender-side envelope key derivation (ephemeral private half). Used by
/// clients and the test suite.
pub fn derive_envelope_key_client(
    ephemeral_private: &[u8],
    master_public_sec1: &[u8],
    activation_id_short: &str,
    activation_otp: &str,
) -> Result<[u8; 16], CryptoError> {
    let shared = keys::ecdh_shared_secret(ephemeral_private, master_public_sec1)?;
    let mut info = Vec::with_capacity(activation_id_short.len() + activation_otp.len());
    info.extend_from_slice(activation_id_short.as_bytes());
    info.extend_from_slice(activation_otp.as_bytes());
    let material = kdf_x963(&shared, &info, 16);
    let mut key = [0u8; 16];
    key.copy_from_slice(&material);
    Ok(key)
}

/// Decrypt the transported device public key.
pub fn decrypt_device_public_key(
    envelope_key: &[u8; 16],
    encrypted_device_public_key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let device_public = aes_cbc::decrypt(envelope_key, &aes_cbc::ZERO_IV, encrypted_device_public_key)?;
    keys::validate_public_key(&device_public)?;
    Ok(device_public)
}

/// Encrypt a device public key for transport. Sender side.
pub fn encrypt_device_public_key(envelope_key: &[u8; 16], device_public_sec1: &[u8]) -> Vec<u8> {
    aes_cbc::encrypt(envelope_key, &aes_cbc::ZERO_IV, device_public_sec1)
}

/// Application signature over the envelope:
/// `HMAC-SHA-256(application_secret, id_short & nonce_b64 & c_device_key_b64 & application_key)`.
///
/// All components are the Base64 / typed string forms the client holds; the
/// HMAC key is the UTF-8 bytes of the Base64 application secret.
pub fn application_signature(
    application_secret: &str,
    activation_id_short: &str,
    activation_nonce: &[u8],
    encrypted_device_public_key: &[u8],
    application_key: &str,
) -> [u8; 32] {
    let data = [
        activation_id_short.to_owned(),
        B64.encode(activation_nonce),
        B64.encode(encrypted_device_public_key),
        application_key.to_owned(),
    ]
    .join("&");
    hmac_sha256(application_secret.as_bytes(), data.as_bytes())
}

/// Verify an application signature in constant time.
pub fn verify_application_signature(
    expected: &[u8; 32],
    presented: &[u8],
) -> bool {
    expected.as_slice().ct_eq(presented).into()
}

/// ECDSA-sign `data`, falling back to random noise when signing fails.
///
/// Historical quirk: the legacy path never surfaced signing errors; clients
/// received 71 random bytes in place of a DER signature. Preserved because
/// deployed v2 clients may depend on getting *a* value here.
pub fn sign_or_noise(private_scalar: &[u8], data: &[u8]) -> Vec<u8> {
    match keys::ecdsa_sign(private_scalar, data) {
        Ok(signature) => signature,
        Err(_) => {
            let mut noise = vec![0u8; FALLBACK_SIGNATURE_LEN];
            OsRng.fill_bytes(&mut noise);
            noise
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_key_agreement_both_sides() {
        let (master_private, master_public) = keys::generate_keypair();
        let (ephemeral_private, ephemeral_public) = keys::generate_keypair();

        let server_key =
            derive_envelope_key(&master_private, &ephemeral_public, "ABCDE-FGHIJ", "KLMNO-PQRST")
                .unwrap();
        let client_key = derive_envelope_key_client(
            &ephemeral_private,
            &master_public,
            "ABCDE-FGHIJ",
            "KLMNO-PQRST",
        )
        .unwrap();
        assert_eq!(server_key, client_key);
    }

    #[test]
    fn envelope_key_depends_on_otp() {
        let (master_private, _) = keys::generate_keypair();
        let (_, ephemeral_public) = keys::generate_keypair();
        let a = derive_envelope_key(&master_private, &ephemeral_public, "ABCDE-FGHIJ", "11111-11111")
            .unwrap();
        let b = derive_envelope_key(&master_private, &ephemeral_public, "ABCDE-FGHIJ", "22222-22222")
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn device_key_transport_round_trip() {
        let (master_private, master_public) = keys::generate_keypair();
        let (ephemeral_private, ephemeral_public) = keys::generate_keypair();
        let (_, device_public) = keys::generate_keypair();

        let client_key = derive_envelope_key_client(
            &ephemeral_private,
            &master_public,
            "ABCDE-FGHIJ",
            "KLMNO-PQRST",
        )
        .unwrap();
        let encrypted = encrypt_device_public_key(&client_key, &device_public);

        let server_key =
            derive_envelope_key(&master_private, &ephemeral_public, "ABCDE-FGHIJ", "KLMNO-PQRST")
                .unwrap();
        let decrypted = decrypt_device_public_key(&server_key, &encrypted).unwrap();
        assert_eq!(decrypted, device_public);
    }

    #[test]
    fn application_signature_binds_all_fields() {
        let baseline =
            application_signature("secret", "ABCDE-FGHIJ", &[1, 2, 3], &[4, 5, 6], "key");
        let changed_nonce =
            application_signature("secret", "ABCDE-FGHIJ", &[9, 9, 9], &[4, 5, 6], "key");
        let changed_key =
            application_signature("secret", "ABCDE-FGHIJ", &[1, 2, 3], &[4, 5, 6], "other");
        assert_ne!(baseline, changed_nonce);
        assert_ne!(baseline, changed_key);
        assert!(verify_application_signature(&baseline, &baseline.clone()));
        assert!(!verify_application_signature(&baseline, &changed_nonce));
    }

    #[test]
    fn sign_or_noise_signs_with_a_good_key() {
        let (private, public) = keys::generate_keypair();
        let signature = sign_or_noise(&private, b"status blob");
        assert!(keys::ecdsa_verify(&public, b"status blob", &signature).unwrap());
    }

    #[test]
    fn sign_or_noise_falls_back_to_71_bytes() {
        // An all-zero scalar is invalid, forcing the fallback path.
        let noise = sign_or_noise(&[0u8; 32], b"status blob");
        assert_eq!(noise.len(), 71);
    }
}
