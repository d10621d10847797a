//! # sigil-crypto
//!
//! Protocol cryptography for Sigil. Pure functions over byte slices — no I/O,
//! no async, no persistence. The service layer owns all key *storage*; this
//! crate owns the bit-exact formats clients depend on:
//!
//! - P-256 key agreement and ECDSA (DER signatures, uncompressed SEC1 points)
//! - `KDF_INTERNAL` (HMAC-SHA-256 indexed subkeys) and KDF X9.63 (SHA-256)
//! - AES-128-CBC with PKCS#7 padding
//! - the multifactor request signature (8-digit decimalized HMAC groups)
//! - activation codes (Base32 with a Luhn mod-32 check symbol)
//! - the ECIES-style envelope protecting key exchange (v3) and the legacy
//!   v2 transport format
//! - the at-rest envelope for server private keys

pub mod aes_cbc;
pub mod at_rest;
pub mod code;
pub mod ecies;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod signature;
pub mod v2;

pub use error::CryptoError;
