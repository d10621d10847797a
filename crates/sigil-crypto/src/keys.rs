//! P-256 key handling — generation, encoding, ECDH, ECDSA.
//!
//! All functions speak raw bytes at the boundary: 32-byte private scalars and
//! 65-byte uncompressed SEC1 points, which is exactly what the persistence
//! layer stores (Base64) and the wire carries. `p256` types never escape this
//! module.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// Byte length of an uncompressed SEC1 P-256 point.
pub const PUBLIC_KEY_LEN: usize = 65;
/// Byte length of a P-256 private scalar.
pub const PRIVATE_KEY_LEN: usize = 32;

/// Generate a fresh P-256 keypair.
///
/// Returns `(private_scalar, public_sec1)` — 32 and 65 bytes respectively.
pub fn generate_keypair() -> (Vec<u8>, Vec<u8>) {
    let secret = SecretKey::random(&mut OsRng);
    let public = secret.public_key();
    (
        secret.to_bytes().to_vec(),
        public.to_encoded_point(false).as_bytes().to_vec(),
    )
}

fn parse_private(private_scalar: &[u8]) -> Result<SecretKey, CryptoError> {
    SecretKey::from_slice(private_scalar).map_err(|_| CryptoError::InvalidKey("private scalar"))
}

fn parse_public(public_sec1: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_sec1_bytes(public_sec1).map_err(|_| CryptoError::InvalidKey("SEC1 point"))
}

/// Derive the public SEC1 point for a stored private scalar.
pub fn public_from_private(private_scalar: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let secret = parse_private(private_scalar)?;
    Ok(secret.public_key().to_encoded_point(false).as_bytes().to_vec())
}

/// ECDH shared secret: the 32-byte x-coordinate of `private * peer_public`.
pub fn ecdh_shared_secret(
    private_scalar: &[u8],
    peer_public_sec1: &[u8],
) -> Result<[u8; 32], CryptoError> {
    let secret = parse_private(private_scalar)?;
    let peer = parse_public(peer_public_sec1)?;
    let shared =
        p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    Ok(out)
}

/// ECDSA-sign `data` with SHA-256; returns the DER-encoded signature.
pub fn ecdsa_sign(private_scalar: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = SigningKey::from_slice(private_scalar)
        .map_err(|_| CryptoError::InvalidKey("private scalar"))?;
    let signature: Signature = key.sign(data);
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Verify a DER-encoded ECDSA signature over `data`.
///
/// A malformed signature or point is an error; a well-formed signature that
/// simply does not verify returns `Ok(false)`.
pub fn ecdsa_verify(
    public_sec1: &[u8],
    data: &[u8],
    der_signature: &[u8],
) -> Result<bool, CryptoError> {
    let key = VerifyingKey::from_sec1_bytes(public_sec1)
        .map_err(|_| CryptoError::InvalidKey("SEC1 point"))?;
    let signature = Signature::from_der(der_signature)
        .map_err(|_| CryptoError::InvalidEncoding("DER signature"))?;
    Ok(key.verify(data, &signature).is_ok())
}

/// Check that bytes parse as a valid point on the curve.
pub fn validate_public_key(public_sec1: &[u8]) -> Result<(), CryptoError> {
    if public_sec1.len() != PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidKey("SEC1 point"));
    }
    parse_public(public_sec1).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_expected_lengths() {
        let (private, public) = generate_keypair();
        assert_eq!(private.len(), PRIVATE_KEY_LEN);
        assert_eq!(public.len(), PUBLIC_KEY_LEN);
        assert_eq!(public[0], 0x04, "uncompressed SEC1 prefix");
    }

    #[test]
    fn ecdh_is_symmetric() {
        let (priv_a, pub_a) = generate_keypair();
        let (priv_b, pub_b) = generate_keypair();
        let ab = ecdh_shared_secret(&priv_a, &pub_b).unwrap();
        let ba = ecdh_shared_secret(&priv_b, &pub_a).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn ecdsa_round_trip() {
        let (private, public) = generate_keypair();
        let sig = ecdsa_sign(&private, b"approve op 42").unwrap();
        assert!(ecdsa_verify(&public, b"approve op 42", &sig).unwrap());
        assert!(!ecdsa_verify(&public, b"approve op 43", &sig).unwrap());
    }

    #[test]
    fn ecdsa_rejects_garbage_der() {
        let (_, public) = generate_keypair();
        let err = ecdsa_verify(&public, b"data", &[0u8; 10]);
        assert!(err.is_err());
    }

    #[test]
    fn public_from_private_matches_generation() {
        let (private, public) = generate_keypair();
        assert_eq!(public_from_private(&private).unwrap(), public);
    }

    #[test]
    fn rejects_off_curve_point() {
        let mut bogus = [0u8; 65];
        bogus[0] = 0x04;
        bogus[64] = 0x01;
        assert!(validate_public_key(&bogus).is_err());
    }
}
