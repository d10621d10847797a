//! AES-128-CBC with PKCS#7 padding.
//!
//! The protocol fixes a zero IV wherever the key itself is single-use (vault
//! unlock, the key-exchange envelopes); the at-rest envelope uses a random IV
//! because its key is long-lived.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};

use crate::error::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const ZERO_IV: [u8; IV_LEN] = [0u8; IV_LEN];

/// Encrypt `plaintext` under AES-128-CBC with PKCS#7 padding.
pub fn encrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt AES-128-CBC ciphertext and strip PKCS#7 padding.
pub fn decrypt(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CryptoError::DecryptionFailed);
    }
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_one_block() {
        let key = [0x42u8; 16];
        let ct = encrypt(&key, &ZERO_IV, b"sixteen byte msg");
        // PKCS#7 always pads, so exactly one block of input yields two blocks.
        assert_eq!(ct.len(), 32);
        assert_eq!(decrypt(&key, &ZERO_IV, &ct).unwrap(), b"sixteen byte msg");
    }

    #[test]
    fn round_trip_arbitrary_length() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let msg = b"an odd-length plaintext spanning blocks";
        let ct = encrypt(&key, &iv, msg);
        assert_eq!(decrypt(&key, &iv, &ct).unwrap(), msg);
    }

    #[test]
    fn wrong_key_fails_or_garbles() {
        let ct = encrypt(&[1u8; 16], &ZERO_IV, b"payload");
        // Wrong key: either padding breaks (error) or output differs.
        match decrypt(&[2u8; 16], &ZERO_IV, &ct) {
            Ok(pt) => assert_ne!(pt, b"payload"),
            Err(e) => assert!(matches!(e, CryptoError::DecryptionFailed)),
        }
    }

    #[test]
    fn rejects_unaligned_ciphertext() {
        assert!(decrypt(&[0u8; 16], &ZERO_IV, &[1, 2, 3]).is_err());
        assert!(decrypt(&[0u8; 16], &ZERO_IV, &[]).is_err());
    }
}
