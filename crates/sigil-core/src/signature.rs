//! Signature verification engine.
//!
//! One verification is one atomic read-modify-write of the activation row:
//! the counter always advances — by the matched distance plus one on
//! success, by exactly one on failure, so a rejected request still burns its
//! base string and can never be replayed. The audit row commits in the same
//! transaction, which is what makes the audit order agree with the counter
//! order.
//!
//! Failure responses are deliberately coarse: `signatureValid`,
//! `activationStatus` and `remainingAttempts`, nothing that would reveal
//! *why* a signature missed.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sigil_common::error::{SigilError, SigilResult};
use sigil_common::models::activation::{ActivationStatus, SignatureType};
use sigil_common::models::audit::AuditResult;
use sigil_crypto::kdf::DerivedKeys;
use sigil_crypto::signature as sigcrypto;
use sigil_db::repository::{activations, audit, history};
use uuid::Uuid;

use crate::callback::ActivationEvent;
use crate::material::{b64, b64_field};
use crate::{Services, material};

#[derive(Debug, Clone)]
pub struct VerifySignatureRequest {
    pub activation_id: Uuid,
    pub application_key: String,
    /// Normalized request data the client signed; opaque to the server.
    pub data: String,
    pub signature: String,
    pub signature_type: SignatureType,
    /// Protocol generation the client computed with (2 or 3).
    pub signature_version: i64,
    /// Mid-upgrade override: compute with this generation instead, without
    /// touching the record's pinned version.
    pub forced_signature_version: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct VerifySignatureResponse {
    pub activation_id: Uuid,
    pub signature_valid: bool,
    pub activation_status: ActivationStatus,
    pub remaining_attempts: i64,
    pub user_id: String,
    pub application_id: Option<Uuid>,
}

/// Verification result plus, on success, the derived key family — the vault
/// endpoint needs the transport and vault keys of the same derivation.
pub(crate) struct VerificationOutcome {
    pub response: VerifySignatureResponse,
    pub keys: Option<DerivedKeys>,
}

/// Presented signatures are dash-joined groups of exactly eight digits, one
/// per factor.
fn signature_format_valid(signature: &str, signature_type: SignatureType) -> bool {
    let components: Vec<&str> = signature.split('-').collect();
    components.len() == signature_type.component_count()
        && components
            .iter()
            .all(|c| c.len() == 8 && c.chars().all(|ch| ch.is_ascii_digit()))
}

fn data_fingerprint(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

impl Services {
    /// Verify a multifactor signature and advance the counter state.
    pub async fn verify_signature(
        &self,
        req: VerifySignatureRequest,
    ) -> SigilResult<VerifySignatureResponse> {
        Ok(self.verify_signature_internal(req).await?.response)
    }

    pub(crate) async fn verify_signature_internal(
        &self,
        req: VerifySignatureRequest,
    ) -> SigilResult<VerificationOutcome> {
        // Malformed input is rejected before any state is touched.
        if !signature_format_valid(&req.signature, req.signature_type) {
            return Err(SigilError::InvalidInput {
                message: "signature does not match the declared signature type".into(),
            });
        }
        let effective_version = req
            .forced_signature_version
            .unwrap_or(req.signature_version);
        if effective_version != 2 && effective_version != 3 {
            return Err(SigilError::InvalidInput {
                message: "unknown signature version".into(),
            });
        }

        let version = self.version_by_key(&req.application_key).await?;
        if !version.supported {
            return Err(SigilError::InvalidInput {
                message: "application version is not supported".into(),
            });
        }

        let lock = self.activation_lock(req.activation_id).await;
        let _guard = lock.lock().await;

        let record = activations::find(&self.db.pool, req.activation_id)
            .await?
            .ok_or(SigilError::ActivationNotFound)?;

        // A caller presenting another application's key gets the coarse
        // failure shape and mutates nothing.
        if version.application_id != record.application_id {
            return Ok(VerificationOutcome {
                response: VerifySignatureResponse {
                    activation_id: record.activation_id,
                    signature_valid: false,
                    activation_status: record.activation_status,
                    remaining_attempts: record.remaining_attempts(),
                    user_id: record.user_id.clone(),
                    application_id: Some(record.application_id),
                },
                keys: None,
            });
        }

        let now = Utc::now();
        let fingerprint = data_fingerprint(&req.data);

        // Non-active records do not advance counters; the attempt is still
        // on the audit books.
        if record.activation_status != ActivationStatus::Active {
            audit::append(
                &self.db.pool,
                record.activation_id,
                record.application_id,
                &record.user_id,
                req.signature_type.as_str(),
                effective_version,
                &fingerprint,
                AuditResult::Failed,
                Some("activation not active"),
                record.counter,
                record.ctr_data.as_deref(),
                now,
            )
            .await?;
            return Ok(VerificationOutcome {
                response: VerifySignatureResponse {
                    activation_id: record.activation_id,
                    signature_valid: false,
                    activation_status: record.activation_status,
                    remaining_attempts: record.remaining_attempts(),
                    user_id: record.user_id.clone(),
                    application_id: Some(record.application_id),
                },
                keys: None,
            });
        }

        let derived = match material::derived_keys(self, &record) {
            Ok(keys) => keys,
            Err(SigilError::Crypto(cause)) => {
                // Unusable key material on a live record: remove and degrade
                // to the generic expiry error (§ error policy).
                return Err(self.fail_crypto(&record, cause).await?);
            }
            Err(other) => return Err(other),
        };

        let (_, knowledge, biometry) = req.signature_type.factors();
        let mut factor_keys: Vec<&[u8; 16]> = vec![&derived.possession];
        if knowledge {
            factor_keys.push(&derived.knowledge);
        }
        if biometry {
            factor_keys.push(&derived.biometry);
        }

        // Walk the acceptance window.
        let lookahead = self.config.signature.validation_lookahead as i64;
        let mut matched_offset: Option<i64> = None;
        match effective_version {
            3 => {
                let ctr_data = record
                    .ctr_data
                    .as_deref()
                    .ok_or(SigilError::InvalidActivationState)?;
                let decoded = b64_field(ctr_data, "ctrData")?;
                let mut ctr: [u8; 16] =
                    decoded
                        .as_slice()
                        .try_into()
                        .map_err(|_| SigilError::InvalidActivationState)?;
                for offset in 0..=lookahead {
                    let base = sigcrypto::signature_base(
                        req.data.as_bytes(),
                        &ctr,
                        &version.application_secret,
                    );
                    let expected = sigcrypto::compute(&factor_keys, &base);
                    if sigcrypto::constant_time_eq(&expected, &req.signature) {
                        matched_offset = Some(offset);
                        break;
                    }
                    ctr = sigcrypto::advance_ctr_data(&ctr);
                }
            }
            _ => {
                for offset in 0..=lookahead {
                    let counter_bytes =
                        sigcrypto::counter_bytes_v2((record.counter + offset) as u64);
                    let base = sigcrypto::signature_base(
                        req.data.as_bytes(),
                        &counter_bytes,
                        &version.application_secret,
                    );
                    let expected = sigcrypto::compute(&factor_keys, &base);
                    if sigcrypto::constant_time_eq(&expected, &req.signature) {
                        matched_offset = Some(offset);
                        break;
                    }
                }
            }
        }

        // Commit the outcome: counter, failures, status and the audit row in
        // one transaction.
        let valid = matched_offset.is_some();
        let advance_by = matched_offset.map(|o| o + 1).unwrap_or(1);
        let new_counter = record.counter + advance_by;
        let new_ctr_data = match record.ctr_data.as_deref() {
            Some(encoded) => {
                let decoded = b64_field(encoded, "ctrData")?;
                let mut ctr: [u8; 16] = decoded
                    .as_slice()
                    .try_into()
                    .map_err(|_| SigilError::InvalidActivationState)?;
                for _ in 0..advance_by {
                    ctr = sigcrypto::advance_ctr_data(&ctr);
                }
                Some(b64(&ctr))
            }
            None => None,
        };
        let new_failed = if valid { 0 } else { record.failed_attempts + 1 };
        let blocked = !valid && new_failed >= record.max_failed_attempts;
        let new_status = if blocked {
            ActivationStatus::Blocked
        } else {
            ActivationStatus::Active
        };

        let mut tx = self.db.pool.begin().await?;
        activations::update_verification_state(
            &mut *tx,
            record.activation_id,
            new_counter,
            new_ctr_data.as_deref(),
            new_failed,
            new_status,
            blocked.then_some("MAX_FAILED_ATTEMPTS"),
            now,
        )
        .await?;
        audit::append(
            &mut *tx,
            record.activation_id,
            record.application_id,
            &record.user_id,
            req.signature_type.as_str(),
            effective_version,
            &fingerprint,
            if valid { AuditResult::Ok } else { AuditResult::Failed },
            (!valid).then_some("signature mismatch"),
            record.counter,
            record.ctr_data.as_deref(),
            now,
        )
        .await?;
        if blocked {
            history::append(
                &mut *tx,
                record.activation_id,
                ActivationStatus::Blocked,
                Some("MAX_FAILED_ATTEMPTS"),
                None,
                now,
            )
            .await?;
        }
        tx.commit().await?;
        if blocked {
            self.callbacks.notify(ActivationEvent {
                activation_id: record.activation_id,
                application_id: record.application_id,
                status: ActivationStatus::Blocked,
            });
            tracing::warn!(activation_id = %record.activation_id, "activation blocked after repeated signature failures");
        }

        Ok(VerificationOutcome {
            response: VerifySignatureResponse {
                activation_id: record.activation_id,
                signature_valid: valid,
                activation_status: new_status,
                remaining_attempts: (record.max_failed_attempts - new_failed).max(0),
                user_id: record.user_id.clone(),
                application_id: Some(record.application_id),
            },
            keys: valid.then_some(derived),
        })
    }

    /// Verify a plain ECDSA device signature over arbitrary data — the
    /// out-of-band approval path. No counter state is involved.
    pub async fn verify_ecdsa_signature(
        &self,
        activation_id: Uuid,
        data: &str,
        signature: &str,
    ) -> SigilResult<bool> {
        let record = activations::find(&self.db.pool, activation_id)
            .await?
            .ok_or(SigilError::ActivationNotFound)?;
        if record.activation_status != ActivationStatus::Active {
            return Err(SigilError::InvalidActivationState);
        }
        let device_public = record
            .device_public_key
            .as_deref()
            .ok_or(SigilError::InvalidActivationState)?;
        let device_public = b64_field(device_public, "devicePublicKey")?;
        let data = b64_field(data, "data")?;
        let der_signature = b64_field(signature, "signature")?;

        // A malformed DER blob is just an invalid signature to the caller.
        match sigil_crypto::keys::ecdsa_verify(&device_public, &data, &der_signature) {
            Ok(valid) => Ok(valid),
            Err(_) => Ok(false),
        }
    }
}
