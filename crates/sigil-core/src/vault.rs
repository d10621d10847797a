//! Vault unlock.
//!
//! The vault key never travels in the clear: a verified request gets
//! `AES-128-CBC(KEY_TRANSPORT, IV=0, PKCS7(KEY_ENCRYPTED_VAULT))`, which only
//! the device holding the same master secret can open. An invalid signature
//! still advances the counter (the shared verification engine does that) and
//! yields the coarse failure shape.
//!
//! Unknown activations are answered, not erred: status `REMOVED`, user
//! `"UNKNOWN"`, no key — indistinguishable from a genuinely removed record.

use sigil_common::error::{SigilError, SigilResult};
use sigil_common::models::activation::ActivationStatus;
use sigil_crypto::aes_cbc;

use crate::Services;
use crate::material::b64;
use crate::signature::VerifySignatureRequest;

#[derive(Debug, Clone)]
pub struct VaultUnlockResponse {
    pub activation_id: uuid::Uuid,
    pub signature_valid: bool,
    pub activation_status: ActivationStatus,
    pub remaining_attempts: i64,
    pub user_id: String,
    /// Present only when the inbound signature verified.
    pub encrypted_vault_encryption_key: Option<String>,
}

impl Services {
    /// Verify the inbound signature and, on success, release the transport-
    /// encrypted vault key.
    pub async fn unlock_vault(
        &self,
        req: VerifySignatureRequest,
    ) -> SigilResult<VaultUnlockResponse> {
        let activation_id = req.activation_id;
        let outcome = match self.verify_signature_internal(req).await {
            Ok(outcome) => outcome,
            // Anti-oracle shape for activations that were never here.
            Err(SigilError::ActivationNotFound) => {
                return Ok(VaultUnlockResponse {
                    activation_id,
                    signature_valid: false,
                    activation_status: ActivationStatus::Removed,
                    remaining_attempts: 0,
                    user_id: "UNKNOWN".into(),
                    encrypted_vault_encryption_key: None,
                });
            }
            Err(other) => return Err(other),
        };

        let encrypted_vault_encryption_key = outcome.keys.as_ref().map(|keys| {
            b64(&aes_cbc::encrypt(
                &keys.transport,
                &aes_cbc::ZERO_IV,
                &keys.vault,
            ))
        });

        let response = outcome.response;
        Ok(VaultUnlockResponse {
            activation_id: response.activation_id,
            signature_valid: response.signature_valid,
            activation_status: response.activation_status,
            remaining_attempts: response.remaining_attempts,
            user_id: response.user_id,
            encrypted_vault_encryption_key,
        })
    }
}
