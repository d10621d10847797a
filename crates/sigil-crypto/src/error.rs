//! Crypto-layer error type.

/// Failure in a cryptographic primitive or a protocol envelope.
///
/// Variants are deliberately coarse: callers map them to generic client-facing
/// errors, and the precise cause goes to the server log only.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    InvalidKey(&'static str),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(&'static str),

    #[error("MAC mismatch")]
    MacMismatch,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Signing failed")]
    SigningFailed,
}
