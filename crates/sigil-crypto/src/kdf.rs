//! Key derivation — `KDF_INTERNAL`, KDF X9.63, and the derived key family.
//!
//! `KDF_INTERNAL(K, i) = HMAC-SHA-256(K, be64(i))[0..16]` is the protocol's
//! workhorse: every key a device and the server share is some index applied
//! to the activation master secret. The index map is a wire contract:
//!
//! | index | key |
//! |---|---|
//! | 0 (from the ECDH secret) | `KEY_MASTER_SECRET` |
//! | 1 | `KEY_SIGNATURE_POSSESSION` |
//! | 2 | `KEY_SIGNATURE_KNOWLEDGE` |
//! | 3 | `KEY_SIGNATURE_BIOMETRY` |
//! | 1000 | `KEY_TRANSPORT` |
//! | 2000 | `KEY_ENCRYPTED_VAULT` |

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

pub const INDEX_MASTER_SECRET: u64 = 0;
pub const INDEX_POSSESSION: u64 = 1;
pub const INDEX_KNOWLEDGE: u64 = 2;
pub const INDEX_BIOMETRY: u64 = 3;
pub const INDEX_TRANSPORT: u64 = 1000;
pub const INDEX_VAULT: u64 = 2000;

/// HMAC-SHA-256. Key length is unrestricted for HMAC, so this cannot fail.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `KDF_INTERNAL(K, index)` — first 16 bytes of `HMAC-SHA-256(K, be64(index))`.
pub fn kdf_internal(key: &[u8], index: u64) -> [u8; 16] {
    let mac = hmac_sha256(key, &index.to_be_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac[..16]);
    out
}

/// KDF X9.63 with SHA-256: counter-mode expansion of a shared secret.
///
/// `out = SHA-256(secret ‖ be32(1) ‖ info) ‖ SHA-256(secret ‖ be32(2) ‖ info) ‖ …`
/// truncated to `out_len`.
pub fn kdf_x963(secret: &[u8], shared_info: &[u8], out_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_len);
    let mut counter: u32 = 1;
    while out.len() < out_len {
        let mut hasher = Sha256::new();
        hasher.update(secret);
        hasher.update(counter.to_be_bytes());
        hasher.update(shared_info);
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(out_len);
    out
}

/// The complete family of 16-byte subkeys shared by a device and the server
/// for one activation. Derived once per operation from the stored key halves
/// and wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    pub master_secret: [u8; 16],
    pub possession: [u8; 16],
    pub knowledge: [u8; 16],
    pub biometry: [u8; 16],
    pub transport: [u8; 16],
    pub vault: [u8; 16],
}

impl DerivedKeys {
    /// Derive the whole family from a raw ECDH shared secret.
    pub fn from_shared_secret(ecdh_secret: &[u8]) -> Self {
        let master_secret = kdf_internal(ecdh_secret, INDEX_MASTER_SECRET);
        Self {
            possession: kdf_internal(&master_secret, INDEX_POSSESSION),
            knowledge: kdf_internal(&master_secret, INDEX_KNOWLEDGE),
            biometry: kdf_internal(&master_secret, INDEX_BIOMETRY),
            transport: kdf_internal(&master_secret, INDEX_TRANSPORT),
            vault: kdf_internal(&master_secret, INDEX_VAULT),
            master_secret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // KDF_INTERNAL vectors computed independently (Python hmac/hashlib):
    //   HMAC-SHA-256(0x000102..0f, be64(0))[0..16]
    //   HMAC-SHA-256(0x000102..0f, be64(1000))[0..16]
    #[test]
    fn kdf_internal_vectors() {
        let key: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            hex::encode(kdf_internal(&key, 0)),
            "c6b0c5d1fb6453704bbc7024fa5bca77"
        );
        assert_eq!(
            hex::encode(kdf_internal(&key, 1000)),
            "41a4f5563311543fcbed78cfe207cb80"
        );
    }

    #[test]
    fn kdf_internal_is_deterministic_and_index_sensitive() {
        let key = [7u8; 32];
        assert_eq!(kdf_internal(&key, 1), kdf_internal(&key, 1));
        assert_ne!(kdf_internal(&key, 1), kdf_internal(&key, 2));
    }

    #[test]
    fn kdf_x963_lengths_and_prefix_property() {
        let secret = [1u8; 32];
        let short = kdf_x963(&secret, b"info", 16);
        let long = kdf_x963(&secret, b"info", 48);
        assert_eq!(short.len(), 16);
        assert_eq!(long.len(), 48);
        // Counter-mode expansion: longer output extends the shorter one.
        assert_eq!(&long[..16], &short[..]);
        // Different shared info, different stream.
        assert_ne!(kdf_x963(&secret, b"other", 16), short);
    }

    #[test]
    fn derived_keys_are_pairwise_distinct() {
        let keys = DerivedKeys::from_shared_secret(&[9u8; 32]);
        let all = [
            keys.master_secret,
            keys.possession,
            keys.knowledge,
            keys.biometry,
            keys.transport,
            keys.vault,
        ];
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i], all[j], "keys {i} and {j} collide");
            }
        }
    }
}
