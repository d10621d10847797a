//! The multifactor request signature.
//!
//! Base string: `data ‖ "&" ‖ Base64(counter_bytes) ‖ "&" ‖ application_secret`
//! where `application_secret` is the Base64 form the client holds. v2 derives
//! `counter_bytes` from the integer counter; v3 substitutes the 16-byte
//! hash-chain value.
//!
//! For each enabled factor, in the fixed order possession → knowledge →
//! biometry, the component is `HMAC-SHA-256(factor_key, base)` reduced to 8
//! decimal digits. Components join with `-`, e.g. `32240585-58473198`.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::kdf::hmac_sha256;

/// Decimal digits per signature component.
const COMPONENT_DIGITS: u32 = 8;

/// v2 counter bytes: 16 bytes with the big-endian u64 counter in the final
/// eight. Same width as the v3 `ctr_data` so the base-string layout is
/// identical across versions.
pub fn counter_bytes_v2(counter: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[8..].copy_from_slice(&counter.to_be_bytes());
    out
}

/// v3 hash-chain advance: `ctr_data' = SHA-256(ctr_data)[0..16]`.
pub fn advance_ctr_data(ctr_data: &[u8; 16]) -> [u8; 16] {
    let digest = Sha256::digest(ctr_data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// Fresh random `ctr_data` for a new v3 activation.
pub fn generate_ctr_data() -> [u8; 16] {
    let mut out = [0u8; 16];
    rand::Rng::fill(&mut rand::thread_rng(), &mut out[..]);
    out
}

/// Canonical signature base string.
pub fn signature_base(data: &[u8], counter_bytes: &[u8; 16], application_secret: &str) -> Vec<u8> {
    let mut base = Vec::with_capacity(data.len() + 64);
    base.extend_from_slice(data);
    base.push(b'&');
    base.extend_from_slice(B64.encode(counter_bytes).as_bytes());
    base.push(b'&');
    base.extend_from_slice(application_secret.as_bytes());
    base
}

/// Reduce a MAC to one 8-digit decimal component: final 4 bytes, big-endian,
/// masked to 31 bits, modulo 10^8, zero-padded.
fn decimalize(mac: &[u8; 32]) -> String {
    let tail: [u8; 4] = mac[28..].try_into().expect("4-byte slice");
    let n = u32::from_be_bytes(tail) & 0x7fff_ffff;
    format!("{:08}", n % 10u32.pow(COMPONENT_DIGITS))
}

/// Compute the signature string for an ordered set of factor keys.
///
/// Callers pass the keys already filtered and ordered by the signature type
/// (possession first, then knowledge, then biometry).
pub fn compute(factor_keys: &[&[u8; 16]], base: &[u8]) -> String {
    factor_keys
        .iter()
        .map(|key| decimalize(&hmac_sha256(&key[..], base)))
        .collect::<Vec<_>>()
        .join("-")
}

/// Constant-time comparison of two signature strings.
///
/// Length differs only when the factor count differs, which the caller has
/// already validated, so the early-out on length is not an oracle.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::DerivedKeys;

    #[test]
    fn counter_bytes_layout() {
        let bytes = counter_bytes_v2(0x0102_0304_0506_0708);
        assert_eq!(&bytes[..8], &[0u8; 8]);
        assert_eq!(&bytes[8..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn base_string_layout() {
        let base = signature_base(b"POST&/pa/vault/unlock", &[0u8; 16], "c2VjcmV0");
        let s = String::from_utf8(base).unwrap();
        assert_eq!(
            s,
            "POST&/pa/vault/unlock&AAAAAAAAAAAAAAAAAAAAAA==&c2VjcmV0"
        );
    }

    #[test]
    fn component_format() {
        let keys = DerivedKeys::from_shared_secret(&[3u8; 32]);
        let base = signature_base(b"data", &counter_bytes_v2(0), "c2VjcmV0");
        let sig = compute(&[&keys.possession, &keys.knowledge], &base);
        let parts: Vec<&str> = sig.split('-').collect();
        assert_eq!(parts.len(), 2);
        for part in parts {
            assert_eq!(part.len(), 8);
            assert!(part.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn signature_changes_with_counter() {
        let keys = DerivedKeys::from_shared_secret(&[3u8; 32]);
        let sig_at = |ctr: u64| {
            let base = signature_base(b"data", &counter_bytes_v2(ctr), "c2VjcmV0");
            compute(&[&keys.possession], &base)
        };
        assert_ne!(sig_at(0), sig_at(1));
        assert_eq!(sig_at(5), sig_at(5));
    }

    #[test]
    fn hash_chain_advance_is_deterministic_and_one_way() {
        let start = [0xABu8; 16];
        let next = advance_ctr_data(&start);
        assert_eq!(next, advance_ctr_data(&start));
        assert_ne!(next, start);
        assert_ne!(advance_ctr_data(&next), next);
    }

    #[test]
    fn constant_time_eq_semantics() {
        assert!(constant_time_eq("12345678-87654321", "12345678-87654321"));
        assert!(!constant_time_eq("12345678-87654321", "12345678-87654322"));
        assert!(!constant_time_eq("12345678", "12345678-87654321"));
    }
}
