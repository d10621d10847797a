//! Activation code and OTP generation.
//!
//! A v3 activation code is 20 Base32 symbols (RFC 4648 alphabet, no padding)
//! in four dash-separated groups of five: `XXXXX-XXXXX-XXXXX-XXXXX`. The
//! first 19 symbols are random; the last is a Luhn mod-32 check symbol, so a
//! single mistyped character is caught client-side before any network round
//! trip.
//!
//! v2 uses a 2×5 short identifier plus a 2×5 OTP, both plain random.

use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// RFC 4648 Base32 alphabet, also the Luhn mod-32 code-point table.
const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Symbols in a full activation code (without dashes).
const CODE_SYMBOLS: usize = 20;

fn code_point(symbol: u8) -> Option<u32> {
    ALPHABET.iter().position(|&c| c == symbol).map(|i| i as u32)
}

/// Luhn mod-32 check symbol for a run of data symbols.
fn luhn_check_symbol(data: &[u8]) -> u8 {
    let n = 32u32;
    let mut factor = 2u32;
    let mut sum = 0u32;
    for &symbol in data.iter().rev() {
        let cp = code_point(symbol).expect("data symbols come from the alphabet");
        let addend = factor * cp;
        factor = if factor == 2 { 1 } else { 2 };
        sum += addend / n + addend % n;
    }
    ALPHABET[((n - sum % n) % n) as usize]
}

/// Validate a full symbol run including its trailing check symbol.
fn luhn_valid(symbols: &[u8]) -> bool {
    let n = 32u32;
    let mut factor = 1u32;
    let mut sum = 0u32;
    for &symbol in symbols.iter().rev() {
        let Some(cp) = code_point(symbol) else {
            return false;
        };
        let addend = factor * cp;
        factor = if factor == 1 { 2 } else { 1 };
        sum += addend / n + addend % n;
    }
    sum % n == 0
}

fn grouped(symbols: &[u8]) -> String {
    symbols
        .chunks(5)
        .map(|chunk| std::str::from_utf8(chunk).expect("alphabet is ASCII"))
        .collect::<Vec<_>>()
        .join("-")
}

/// Generate a fresh v3 activation code.
pub fn generate_activation_code() -> String {
    // 12 random bytes give 19 uniform Base32 symbols (the 20th encoded
    // symbol is discarded in favour of the check symbol).
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    let encoded = BASE32_NOPAD.encode(&bytes);
    let mut symbols = encoded.into_bytes();
    symbols.truncate(CODE_SYMBOLS - 1);
    symbols.push(luhn_check_symbol(&symbols));
    grouped(&symbols)
}

/// Validate shape and check symbol of a v3 activation code.
pub fn validate_activation_code(code: &str) -> bool {
    let groups: Vec<&str> = code.split('-').collect();
    if groups.len() != 4 || groups.iter().any(|g| g.len() != 5) {
        return false;
    }
    let symbols: Vec<u8> = groups.concat().into_bytes();
    symbols.len() == CODE_SYMBOLS && luhn_valid(&symbols)
}

fn random_groups(count: usize) -> String {
    // 7 random bytes yield at least 10 uniform symbols per pair of groups.
    let mut out = Vec::with_capacity(count * 5);
    while out.len() < count * 5 {
        let mut bytes = [0u8; 7];
        OsRng.fill_bytes(&mut bytes);
        let encoded = BASE32_NOPAD.encode(&bytes);
        out.extend_from_slice(&encoded.as_bytes()[..(count * 5 - out.len()).min(10)]);
    }
    grouped(&out)
}

/// Generate a v2 short activation identifier (`XXXXX-XXXXX`).
pub fn generate_short_id() -> String {
    random_groups(2)
}

/// Generate an activation OTP (`XXXXX-XXXXX`).
pub fn generate_otp() -> String {
    random_groups(2)
}
