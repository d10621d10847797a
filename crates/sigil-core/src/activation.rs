//! Activation lifecycle operations.
//!
//! Drives a record through `CREATED → PENDING_COMMIT → ACTIVE → (BLOCKED |
//! REMOVED)`. Every transition appends a history row inside the same
//! transaction as the status change, and the callback sink is notified only
//! after that transaction commits — history is durable before anything
//! leaves the process.
//!
//! Key exchange comes in two generations: the current envelope flow
//! ([`Services::prepare_activation`] / [`Services::create_activation`]) and
//! the legacy short-identifier flow ([`Services::prepare_activation_v2`]).
//! A record's generation is pinned at init.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sigil_common::error::{SigilError, SigilResult};
use sigil_common::models::activation::{
    ActivationRecord, ActivationStatus, OtpValidation, ProtocolVersion,
};
use sigil_common::models::history::ActivationHistoryEntry;
use sigil_crypto::ecies::{Envelope, EnvelopeKey};
use sigil_crypto::{code, ecies, keys, signature as sigcrypto, v2};
use sigil_db::repository::{activations, applications, history};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::callback::ActivationEvent;
use crate::material::{b64, b64_field};
use crate::{Services, material};

// ============================================================
// Requests / responses
// ============================================================

#[derive(Debug, Clone)]
pub struct InitActivationRequest {
    pub user_id: String,
    pub application_id: Uuid,
    pub protocol_version: ProtocolVersion,
    pub otp_validation: OtpValidation,
    pub activation_otp: Option<String>,
    pub max_failed_attempts: Option<i64>,
    /// Explicit expiry override; defaults to now + configured validity.
    pub activation_expire: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct InitActivationResponse {
    pub activation_id: Uuid,
    pub user_id: String,
    pub application_id: Uuid,
    /// v3 code (`XXXXX-XXXXX-XXXXX-XXXXX`).
    pub activation_code: Option<String>,
    /// v2 short identifier plus its generated OTP.
    pub activation_id_short: Option<String>,
    pub activation_otp: Option<String>,
    /// ECDSA signature over the advertised code by the current master key.
    pub activation_signature: String,
    pub expires_at: DateTime<Utc>,
}

/// v3 key exchange request: the envelope fields arrive Base64.
#[derive(Debug, Clone)]
pub struct PrepareActivationRequest {
    pub activation_code: String,
    pub application_key: String,
    pub ephemeral_public_key: String,
    pub encrypted_data: String,
    pub mac: String,
}

#[derive(Debug, Clone)]
pub struct PrepareActivationResponse {
    pub activation_id: Uuid,
    pub encrypted_data: String,
    pub mac: String,
}

/// Payload inside the request envelope. JSON, camelCase — wire contract.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangePayload {
    pub device_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_otp: Option<String>,
}

/// Payload inside the response envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyExchangeResponsePayload {
    pub server_public_key: String,
    pub ctr_data: String,
}

/// Legacy v2 key exchange request.
#[derive(Debug, Clone)]
pub struct PrepareActivationV2Request {
    pub activation_id_short: String,
    pub application_key: String,
    pub activation_nonce: String,
    pub ephemeral_public_key: String,
    pub encrypted_device_public_key: String,
    pub application_signature: String,
}

#[derive(Debug, Clone)]
pub struct PrepareActivationV2Response {
    pub activation_id: Uuid,
    pub c_server_public_key: String,
    pub c_server_public_key_signature: String,
}

/// Server-initiated activation for a known user: init and key exchange in
/// one step, no out-of-band code.
#[derive(Debug, Clone)]
pub struct CreateActivationRequest {
    pub user_id: String,
    pub application_key: String,
    pub ephemeral_public_key: String,
    pub encrypted_data: String,
    pub mac: String,
    pub otp_validation: OtpValidation,
    pub activation_otp: Option<String>,
    pub max_failed_attempts: Option<i64>,
    pub activation_expire: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateActivationResponse {
    pub activation_id: Uuid,
    pub encrypted_data: String,
    pub mac: String,
}

#[derive(Debug, Clone)]
pub struct CommitActivationResponse {
    pub activation_id: Uuid,
    pub activated: bool,
}

/// Snapshot of one record's externally visible state. After removal every
/// key field is `None`; for an unknown activation the whole response
/// degrades to `REMOVED` / `"UNKNOWN"` so callers cannot probe which IDs
/// ever existed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationStatusResponse {
    pub activation_id: Uuid,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub user_id: String,
    pub application_id: Option<Uuid>,
    pub protocol_version: Option<i64>,
    pub activation_code: Option<String>,
    pub device_public_key: Option<String>,
    pub server_public_key: Option<String>,
    pub failed_attempts: i64,
    pub max_failed_attempts: i64,
    pub activation_flags: Vec<String>,
    pub timestamp_created: Option<DateTime<Utc>>,
    pub timestamp_last_used: Option<DateTime<Utc>>,
}

impl ActivationStatusResponse {
    pub(crate) fn from_record(record: &ActivationRecord) -> Self {
        Self {
            activation_id: record.activation_id,
            activation_status: record.activation_status,
            blocked_reason: record.blocked_reason.clone(),
            user_id: record.user_id.clone(),
            application_id: Some(record.application_id),
            protocol_version: Some(record.protocol_version.as_i64()),
            activation_code: record.activation_code.clone(),
            device_public_key: record.device_public_key.clone(),
            server_public_key: record.server_public_key.clone(),
            failed_attempts: record.failed_attempts,
            max_failed_attempts: record.max_failed_attempts,
            activation_flags: record.activation_flags.clone(),
            timestamp_created: Some(record.timestamp_created),
            timestamp_last_used: Some(record.timestamp_last_used),
        }
    }

    /// Anti-oracle response for activations this server has never seen.
    pub(crate) fn unknown(activation_id: Uuid) -> Self {
        Self {
            activation_id,
            activation_status: ActivationStatus::Removed,
            blocked_reason: None,
            user_id: "UNKNOWN".into(),
            application_id: None,
            protocol_version: None,
            activation_code: None,
            device_public_key: None,
            server_public_key: None,
            failed_attempts: 0,
            max_failed_attempts: 0,
            activation_flags: vec![],
            timestamp_created: None,
            timestamp_last_used: None,
        }
    }
}

/// Conjunctive filters for the back-office lookup.
#[derive(Debug, Clone, Default)]
pub struct LookupFilters {
    pub user_ids: Vec<String>,
    pub application_ids: Vec<Uuid>,
    pub statuses: Vec<ActivationStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// Constant-time OTP comparison.
fn otp_matches(stored: &str, presented: &str) -> bool {
    stored.len() == presented.len()
        && bool::from(stored.as_bytes().ct_eq(presented.as_bytes()))
}

// ============================================================
// Operations
// ============================================================

impl Services {
    /// Initialize a new activation: mint identifiers, generate the server
    /// keypair, snapshot the current master keypair, and hand back the code
    /// the user will type into the device.
    pub async fn init_activation(
        &self,
        req: InitActivationRequest,
    ) -> SigilResult<InitActivationResponse> {
        let application = applications::find_application(&self.db.pool, req.application_id)
            .await?
            .ok_or(SigilError::ApplicationNotFound)?;
        let master = self.current_master_keypair(application.id).await?;
        let master_private = material::master_private_bytes(&master)?;

        let now = Utc::now();
        let expires_at = req.activation_expire.unwrap_or_else(|| {
            now + Duration::milliseconds(self.config.activation.validity_ms as i64)
        });

        // Mint a collision-free activation ID.
        let mut activation_id = None;
        for _ in 0..self.config.activation.id_generation_max_attempts {
            let candidate = Uuid::new_v4();
            if activations::find(&self.db.pool, candidate).await?.is_none() {
                activation_id = Some(candidate);
                break;
            }
        }
        let activation_id = activation_id.ok_or(SigilError::UnableToGenerateActivationId)?;

        // Mint a code unique among records that still hold theirs (I5).
        let mut activation_code = None;
        let mut activation_id_short = None;
        for _ in 0..self.config.activation.code_generation_max_attempts {
            let candidate = match req.protocol_version {
                ProtocolVersion::V3 => code::generate_activation_code(),
                ProtocolVersion::V2 => code::generate_short_id(),
            };
            if !activations::code_in_use(&self.db.pool, &candidate).await? {
                match req.protocol_version {
                    ProtocolVersion::V3 => activation_code = Some(candidate),
                    ProtocolVersion::V2 => activation_id_short = Some(candidate),
                }
                break;
            }
        }
        if activation_code.is_none() && activation_id_short.is_none() {
            return Err(SigilError::UnableToGenerateActivationCode);
        }

        // OTP policy is frozen here. The legacy flow always carries an OTP:
        // it enters the envelope key derivation.
        let (otp_validation, activation_otp) = match req.protocol_version {
            ProtocolVersion::V3 => {
                if req.otp_validation != OtpValidation::None && req.activation_otp.is_none() {
                    return Err(SigilError::InvalidInput {
                        message: "activationOtp is required for the selected validation mode"
                            .into(),
                    });
                }
                (req.otp_validation, req.activation_otp)
            }
            ProtocolVersion::V2 => (OtpValidation::OnKeyExchange, Some(code::generate_otp())),
        };

        let (server_private, server_public) = keys::generate_keypair();
        let (stored_private, encryption_mode) = material::protect_server_private_key(
            self,
            &req.user_id,
            &activation_id.to_string(),
            &server_private,
        )?;

        // Sign the advertised code so the device can authenticate the server
        // before any network exchange.
        let activation_signature = match req.protocol_version {
            ProtocolVersion::V3 => {
                let code = activation_code.as_deref().expect("v3 generates a code");
                keys::ecdsa_sign(&master_private, code.as_bytes())?
            }
            ProtocolVersion::V2 => {
                let short = activation_id_short.as_deref().expect("v2 generates a short id");
                let otp = activation_otp.as_deref().expect("v2 generates an OTP");
                v2::sign_or_noise(&master_private, format!("{short}-{otp}").as_bytes())
            }
        };

        let ctr_data = match req.protocol_version {
            ProtocolVersion::V3 => Some(b64(&sigcrypto::generate_ctr_data())),
            ProtocolVersion::V2 => None,
        };

        let record = ActivationRecord {
            activation_id,
            activation_code: activation_code.clone(),
            activation_id_short: activation_id_short.clone(),
            application_id: application.id,
            user_id: req.user_id.clone(),
            master_keypair_id: master.id,
            server_public_key: Some(b64(&server_public)),
            server_private_key: Some(stored_private),
            server_private_key_encryption: encryption_mode,
            device_public_key: None,
            counter: 0,
            ctr_data,
            failed_attempts: 0,
            max_failed_attempts: req
                .max_failed_attempts
                .unwrap_or(self.config.signature.max_failed_attempts as i64),
            activation_status: ActivationStatus::Created,
            blocked_reason: None,
            activation_otp: activation_otp.clone(),
            activation_otp_validation: otp_validation,
            protocol_version: req.protocol_version,
            activation_flags: vec![],
            timestamp_created: now,
            timestamp_activation_expire: expires_at,
            timestamp_last_used: now,
        };

        activations::create(&self.db.pool, &record).await?;
        let mut tx = self.db.pool.begin().await?;
        history::append(
            &mut *tx,
            activation_id,
            ActivationStatus::Created,
            None,
            None,
            now,
        )
        .await?;
        tx.commit().await?;
        self.callbacks.notify(ActivationEvent {
            activation_id,
            application_id: application.id,
            status: ActivationStatus::Created,
        });

        tracing::info!(%activation_id, user_id = %req.user_id, "activation initialized");

        Ok(InitActivationResponse {
            activation_id,
            user_id: req.user_id,
            application_id: application.id,
            activation_code,
            activation_id_short,
            activation_otp: match req.protocol_version {
                ProtocolVersion::V2 => activation_otp,
                ProtocolVersion::V3 => None,
            },
            activation_signature: b64(&activation_signature),
            expires_at,
        })
    }

    /// v3 key exchange: open the envelope, store the device key, and return
    /// the server key half protected under the same envelope key.
    pub async fn prepare_activation(
        &self,
        req: PrepareActivationRequest,
    ) -> SigilResult<PrepareActivationResponse> {
        let version = self.version_by_key(&req.application_key).await?;
        if !version.supported {
            return Err(SigilError::InvalidInput {
                message: "application version is not supported".into(),
            });
        }

        let found = activations::find_by_code_pending(
            &self.db.pool,
            version.application_id,
            &req.activation_code,
        )
        .await?
        .ok_or(SigilError::ActivationNotFound)?;

        let lock = self.activation_lock(found.activation_id).await;
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent prepare may have advanced it.
        let record = activations::find(&self.db.pool, found.activation_id)
            .await?
            .ok_or(SigilError::ActivationNotFound)?;
        self.reject_if_expired(&record).await?;
        if record.activation_status != ActivationStatus::Created {
            return Err(SigilError::InvalidActivationState);
        }
        if record.protocol_version != ProtocolVersion::V3 {
            return Err(SigilError::InvalidActivationState);
        }

        let master = self.master_keypair(record.master_keypair_id).await?;
        let master_private = material::master_private_bytes(&master)?;

        let envelope = Envelope {
            ephemeral_public_key: b64_field(&req.ephemeral_public_key, "ephemeralPublicKey")?,
            encrypted_data: b64_field(&req.encrypted_data, "encryptedData")?,
            mac: b64_field(&req.mac, "mac")?,
        };
        let (payload_bytes, envelope_key) = match ecies::open(&master_private, &envelope) {
            Ok(opened) => opened,
            Err(cause) => return Err(self.fail_crypto(&record, cause).await?),
        };
        let payload: KeyExchangePayload =
            serde_json::from_slice(&payload_bytes).map_err(|_| SigilError::InvalidInput {
                message: "malformed key exchange payload".into(),
            })?;

        let device_public = b64_field(&payload.device_public_key, "devicePublicKey")?;
        if let Err(cause) = keys::validate_public_key(&device_public) {
            return Err(self.fail_crypto(&record, cause).await?);
        }

        if record.activation_otp_validation == OtpValidation::OnKeyExchange {
            let stored = record.activation_otp.as_deref().unwrap_or("");
            let presented = payload.activation_otp.as_deref().unwrap_or("");
            if !otp_matches(stored, presented) {
                return Err(self.fail_key_exchange_otp(&record).await?);
            }
        }

        self.complete_key_exchange(&record, &device_public).await?;

        let response = self.seal_key_exchange_response(&record, &envelope_key)?;
        Ok(PrepareActivationResponse {
            activation_id: record.activation_id,
            encrypted_data: response.0,
            mac: response.1,
        })
    }

    /// Legacy v2 key exchange. The envelope key mixes the master-key ECDH
    /// with the short identifier and OTP the user typed in; an HMAC by the
    /// application secret authenticates the envelope before decryption.
    pub async fn prepare_activation_v2(
        &self,
        req: PrepareActivationV2Request,
    ) -> SigilResult<PrepareActivationV2Response> {
        let version = self.version_by_key(&req.application_key).await?;
        if !version.supported {
            return Err(SigilError::InvalidInput {
                message: "application version is not supported".into(),
            });
        }

        let found = activations::find_by_short_id_pending(
            &self.db.pool,
            version.application_id,
            &req.activation_id_short,
        )
        .await?
        .ok_or(SigilError::ActivationNotFound)?;

        let lock = self.activation_lock(found.activation_id).await;
        let _guard = lock.lock().await;

        let record = activations::find(&self.db.pool, found.activation_id)
            .await?
            .ok_or(SigilError::ActivationNotFound)?;
        self.reject_if_expired(&record).await?;
        if record.activation_status != ActivationStatus::Created
            || record.protocol_version != ProtocolVersion::V2
        {
            return Err(SigilError::InvalidActivationState);
        }

        let nonce = b64_field(&req.activation_nonce, "activationNonce")?;
        let ephemeral_public = b64_field(&req.ephemeral_public_key, "ephemeralPublicKey")?;
        let encrypted_device_key =
            b64_field(&req.encrypted_device_public_key, "encryptedDevicePublicKey")?;
        let presented_signature = b64_field(&req.application_signature, "applicationSignature")?;

        let expected_signature = v2::application_signature(
            &version.application_secret,
            &req.activation_id_short,
            &nonce,
            &encrypted_device_key,
            &version.application_key,
        );
        if !v2::verify_application_signature(&expected_signature, &presented_signature) {
            return Err(self
                .fail_crypto(&record, sigil_crypto::CryptoError::MacMismatch)
                .await?);
        }

        let master = self.master_keypair(record.master_keypair_id).await?;
        let master_private = material::master_private_bytes(&master)?;
        let otp = record.activation_otp.as_deref().unwrap_or("");

        let envelope_key = match v2::derive_envelope_key(
            &master_private,
            &ephemeral_public,
            &req.activation_id_short,
            otp,
        ) {
            Ok(key) => key,
            Err(cause) => return Err(self.fail_crypto(&record, cause).await?),
        };
        let device_public = match v2::decrypt_device_public_key(&envelope_key, &encrypted_device_key)
        {
            Ok(key) => key,
            Err(cause) => return Err(self.fail_crypto(&record, cause).await?),
        };

        self.complete_key_exchange(&record, &device_public).await?;

        let server_public =
            b64_field(record.server_public_key.as_deref().unwrap_or(""), "serverPublicKey")?;
        let c_server_public_key = v2::encrypt_device_public_key(&envelope_key, &server_public);
        let c_server_public_key_signature =
            v2::sign_or_noise(&master_private, &c_server_public_key);

        Ok(PrepareActivationV2Response {
            activation_id: record.activation_id,
            c_server_public_key: b64(&c_server_public_key),
            c_server_public_key_signature: b64(&c_server_public_key_signature),
        })
    }

    /// Server-initiated activation for a known user: no out-of-band code,
    /// the record lands directly in `PENDING_COMMIT`.
    pub async fn create_activation(
        &self,
        req: CreateActivationRequest,
    ) -> SigilResult<CreateActivationResponse> {
        let version = self.version_by_key(&req.application_key).await?;
        if !version.supported {
            return Err(SigilError::InvalidInput {
                message: "application version is not supported".into(),
            });
        }
        let master = self.current_master_keypair(version.application_id).await?;
        let master_private = material::master_private_bytes(&master)?;

        if req.otp_validation == OtpValidation::OnKeyExchange {
            return Err(SigilError::InvalidInput {
                message: "key-exchange OTP validation is not available for direct creation".into(),
            });
        }
        if req.otp_validation == OtpValidation::OnCommit && req.activation_otp.is_none() {
            return Err(SigilError::InvalidInput {
                message: "activationOtp is required for the selected validation mode".into(),
            });
        }

        // Open the envelope before any record exists: a bad envelope must
        // not leave half-provisioned rows behind.
        let envelope = Envelope {
            ephemeral_public_key: b64_field(&req.ephemeral_public_key, "ephemeralPublicKey")?,
            encrypted_data: b64_field(&req.encrypted_data, "encryptedData")?,
            mac: b64_field(&req.mac, "mac")?,
        };
        let (payload_bytes, envelope_key) = ecies::open(&master_private, &envelope)?;
        let payload: KeyExchangePayload =
            serde_json::from_slice(&payload_bytes).map_err(|_| SigilError::InvalidInput {
                message: "malformed key exchange payload".into(),
            })?;
        let device_public = b64_field(&payload.device_public_key, "devicePublicKey")?;
        keys::validate_public_key(&device_public)?;

        let now = Utc::now();
        let expires_at = req.activation_expire.unwrap_or_else(|| {
            now + Duration::milliseconds(self.config.activation.validity_ms as i64)
        });

        let mut activation_id = None;
        for _ in 0..self.config.activation.id_generation_max_attempts {
            let candidate = Uuid::new_v4();
            if activations::find(&self.db.pool, candidate).await?.is_none() {
                activation_id = Some(candidate);
                break;
            }
        }
        let activation_id = activation_id.ok_or(SigilError::UnableToGenerateActivationId)?;

        let (server_private, server_public) = keys::generate_keypair();
        let (stored_private, encryption_mode) = material::protect_server_private_key(
            self,
            &req.user_id,
            &activation_id.to_string(),
            &server_private,
        )?;

        let record = ActivationRecord {
            activation_id,
            activation_code: None,
            activation_id_short: None,
            application_id: version.application_id,
            user_id: req.user_id.clone(),
            master_keypair_id: master.id,
            server_public_key: Some(b64(&server_public)),
            server_private_key: Some(stored_private),
            server_private_key_encryption: encryption_mode,
            device_public_key: Some(b64(&device_public)),
            counter: 0,
            ctr_data: Some(b64(&sigcrypto::generate_ctr_data())),
            failed_attempts: 0,
            max_failed_attempts: req
                .max_failed_attempts
                .unwrap_or(self.config.signature.max_failed_attempts as i64),
            activation_status: ActivationStatus::PendingCommit,
            blocked_reason: None,
            activation_otp: req.activation_otp.clone(),
            activation_otp_validation: req.otp_validation,
            protocol_version: ProtocolVersion::V3,
            activation_flags: vec![],
            timestamp_created: now,
            timestamp_activation_expire: expires_at,
            timestamp_last_used: now,
        };

        activations::create(&self.db.pool, &record).await?;
        // The record passed through CREATED conceptually; both events are on
        // the books so the history never skips a state (I4).
        let mut tx = self.db.pool.begin().await?;
        history::append(&mut *tx, activation_id, ActivationStatus::Created, None, None, now)
            .await?;
        history::append(
            &mut *tx,
            activation_id,
            ActivationStatus::PendingCommit,
            None,
            None,
            now,
        )
        .await?;
        tx.commit().await?;
        for status in [ActivationStatus::Created, ActivationStatus::PendingCommit] {
            self.callbacks.notify(ActivationEvent {
                activation_id,
                application_id: version.application_id,
                status,
            });
        }

        tracing::info!(%activation_id, user_id = %req.user_id, "activation created directly");

        let response = self.seal_key_exchange_response(&record, &envelope_key)?;
        Ok(CreateActivationResponse {
            activation_id,
            encrypted_data: response.0,
            mac: response.1,
        })
    }

    /// Commit a prepared activation. Idempotent on `ACTIVE`; with OTP mode
    /// `ON_COMMIT` the presented OTP gates the transition and failures count
    /// toward the lockout bound.
    pub async fn commit_activation(
        &self,
        activation_id: Uuid,
        activation_otp: Option<&str>,
        external_user_id: Option<&str>,
    ) -> SigilResult<CommitActivationResponse> {
        let lock = self.activation_lock(activation_id).await;
        let _guard = lock.lock().await;

        let record = activations::find(&self.db.pool, activation_id)
            .await?
            .ok_or(SigilError::ActivationNotFound)?;
        self.reject_if_expired(&record).await?;

        match record.activation_status {
            // Repeated commit is success without mutation.
            ActivationStatus::Active => {
                return Ok(CommitActivationResponse {
                    activation_id,
                    activated: true,
                });
            }
            ActivationStatus::PendingCommit => {}
            _ => return Err(SigilError::InvalidActivationState),
        }

        if record.activation_otp_validation == OtpValidation::OnCommit {
            let stored = record.activation_otp.as_deref().unwrap_or("");
            let presented = activation_otp.unwrap_or("");
            if !otp_matches(stored, presented) {
                return Err(self.fail_commit_otp(&record, external_user_id).await?);
            }
        }

        let now = Utc::now();
        let mut tx = self.db.pool.begin().await?;
        activations::update_status(&mut *tx, activation_id, ActivationStatus::Active, None).await?;
        activations::reset_failed_attempts(&mut *tx, activation_id).await?;
        history::append(
            &mut *tx,
            activation_id,
            ActivationStatus::Active,
            None,
            external_user_id,
            now,
        )
        .await?;
        tx.commit().await?;
        self.callbacks.notify(ActivationEvent {
            activation_id,
            application_id: record.application_id,
            status: ActivationStatus::Active,
        });

        tracing::info!(%activation_id, "activation committed");
        Ok(CommitActivationResponse {
            activation_id,
            activated: true,
        })
    }

    /// Externally visible state of an activation. Unknown IDs yield the
    /// `REMOVED` / `"UNKNOWN"` shape rather than an error.
    pub async fn get_activation_status(
        &self,
        activation_id: Uuid,
    ) -> SigilResult<ActivationStatusResponse> {
        match activations::find(&self.db.pool, activation_id).await? {
            Some(record) => Ok(ActivationStatusResponse::from_record(&record)),
            None => Ok(ActivationStatusResponse::unknown(activation_id)),
        }
    }

    /// Remove an activation from any non-terminal state, tombstoning all key
    /// material (I6).
    pub async fn remove_activation(
        &self,
        activation_id: Uuid,
        external_user_id: Option<&str>,
    ) -> SigilResult<()> {
        let lock = self.activation_lock(activation_id).await;
        let _guard = lock.lock().await;

        let record = activations::find(&self.db.pool, activation_id)
            .await?
            .ok_or(SigilError::ActivationNotFound)?;
        if record.activation_status == ActivationStatus::Removed {
            return Err(SigilError::InvalidActivationState);
        }
        self.remove_record(&record, None, external_user_id).await?;
        tracing::info!(%activation_id, "activation removed");
        Ok(())
    }

    /// Block an active activation.
    pub async fn block_activation(
        &self,
        activation_id: Uuid,
        reason: Option<&str>,
        external_user_id: Option<&str>,
    ) -> SigilResult<()> {
        let lock = self.activation_lock(activation_id).await;
        let _guard = lock.lock().await;

        let record = activations::find(&self.db.pool, activation_id)
            .await?
            .ok_or(SigilError::ActivationNotFound)?;
        if record.activation_status != ActivationStatus::Active {
            return Err(SigilError::InvalidActivationState);
        }

        let reason = reason.unwrap_or("NOT_SPECIFIED");
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await?;
        activations::update_status(
            &mut *tx,
            activation_id,
            ActivationStatus::Blocked,
            Some(reason),
        )
        .await?;
        history::append(
            &mut *tx,
            activation_id,
            ActivationStatus::Blocked,
            Some(reason),
            external_user_id,
            now,
        )
        .await?;
        tx.commit().await?;
        self.callbacks.notify(ActivationEvent {
            activation_id,
            application_id: record.application_id,
            status: ActivationStatus::Blocked,
        });
        tracing::info!(%activation_id, reason, "activation blocked");
        Ok(())
    }

    /// Unblock a blocked activation; the failure counter starts fresh.
    pub async fn unblock_activation(
        &self,
        activation_id: Uuid,
        external_user_id: Option<&str>,
    ) -> SigilResult<()> {
        let lock = self.activation_lock(activation_id).await;
        let _guard = lock.lock().await;

        let record = activations::find(&self.db.pool, activation_id)
            .await?
            .ok_or(SigilError::ActivationNotFound)?;
        if record.activation_status != ActivationStatus::Blocked {
            return Err(SigilError::InvalidActivationState);
        }

        let now = Utc::now();
        let mut tx = self.db.pool.begin().await?;
        activations::update_status(&mut *tx, activation_id, ActivationStatus::Active, None).await?;
        activations::reset_failed_attempts(&mut *tx, activation_id).await?;
        history::append(
            &mut *tx,
            activation_id,
            ActivationStatus::Active,
            None,
            external_user_id,
            now,
        )
        .await?;
        tx.commit().await?;
        self.callbacks.notify(ActivationEvent {
            activation_id,
            application_id: record.application_id,
            status: ActivationStatus::Active,
        });
        tracing::info!(%activation_id, "activation unblocked");
        Ok(())
    }

    /// Rotate the activation OTP before commit. Only legal while the record
    /// is pre-commit and validation mode is `ON_COMMIT`.
    pub async fn update_activation_otp(
        &self,
        activation_id: Uuid,
        activation_otp: &str,
        external_user_id: Option<&str>,
    ) -> SigilResult<()> {
        if activation_otp.is_empty() {
            return Err(SigilError::InvalidInput {
                message: "activationOtp must not be empty".into(),
            });
        }

        let lock = self.activation_lock(activation_id).await;
        let _guard = lock.lock().await;

        let record = activations::find(&self.db.pool, activation_id)
            .await?
            .ok_or(SigilError::ActivationNotFound)?;
        let pre_commit = matches!(
            record.activation_status,
            ActivationStatus::Created | ActivationStatus::PendingCommit
        );
        if !pre_commit || record.activation_otp_validation != OtpValidation::OnCommit {
            return Err(SigilError::InvalidActivationState);
        }

        activations::update_otp(&self.db.pool, activation_id, activation_otp).await?;
        tracing::info!(%activation_id, external_user_id, "activation OTP rotated");
        Ok(())
    }

    /// All activations of a user, optionally narrowed to one application.
    pub async fn list_activations(
        &self,
        user_id: &str,
        application_id: Option<Uuid>,
    ) -> SigilResult<Vec<ActivationStatusResponse>> {
        let records = activations::list_by_user(&self.db.pool, user_id, application_id).await?;
        Ok(records
            .iter()
            .map(ActivationStatusResponse::from_record)
            .collect())
    }

    /// Back-office multi-criteria lookup.
    pub async fn lookup_activations(
        &self,
        filters: LookupFilters,
    ) -> SigilResult<Vec<ActivationStatusResponse>> {
        let records = activations::lookup(
            &self.db.pool,
            &filters.user_ids,
            &filters.application_ids,
            &filters.statuses,
            filters.created_after,
            filters.created_before,
        )
        .await?;
        Ok(records
            .iter()
            .map(ActivationStatusResponse::from_record)
            .collect())
    }

    /// State-transition log for one activation.
    pub async fn activation_history(
        &self,
        activation_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> SigilResult<Vec<ActivationHistoryEntry>> {
        Ok(history::list_by_activation(&self.db.pool, activation_id, from, to).await?)
    }

    // ========================================================
    // Shared transition plumbing
    // ========================================================

    /// Lazy expiry check: a pre-commit record past its expiry is removed on
    /// sight and the caller gets the expiry error. Callers hold the
    /// activation lock.
    pub(crate) async fn reject_if_expired(&self, record: &ActivationRecord) -> SigilResult<()> {
        let pending = matches!(
            record.activation_status,
            ActivationStatus::Created | ActivationStatus::PendingCommit
        );
        if pending && Utc::now() > record.timestamp_activation_expire {
            self.remove_record(record, Some("expired"), None).await?;
            return Err(SigilError::ActivationExpired);
        }
        Ok(())
    }

    /// Tombstone a record and put the REMOVED event on the books.
    pub(crate) async fn remove_record(
        &self,
        record: &ActivationRecord,
        reason: Option<&str>,
        external_user_id: Option<&str>,
    ) -> SigilResult<()> {
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await?;
        activations::tombstone(&mut *tx, record.activation_id).await?;
        history::append(
            &mut *tx,
            record.activation_id,
            ActivationStatus::Removed,
            reason,
            external_user_id,
            now,
        )
        .await?;
        tx.commit().await?;
        self.callbacks.notify(ActivationEvent {
            activation_id: record.activation_id,
            application_id: record.application_id,
            status: ActivationStatus::Removed,
        });
        Ok(())
    }

    /// Crypto failure against a specific activation: remove it and surface
    /// the generic expiry error, so protocol probing cannot distinguish a
    /// bad MAC from a stale code. The precise cause stays in the log.
    pub(crate) async fn fail_crypto(
        &self,
        record: &ActivationRecord,
        cause: sigil_crypto::CryptoError,
    ) -> SigilResult<SigilError> {
        tracing::warn!(
            activation_id = %record.activation_id,
            %cause,
            "key exchange crypto failure; removing activation"
        );
        self.remove_record(record, Some("crypto failure"), None).await?;
        Ok(SigilError::ActivationExpired)
    }

    /// Failed key-exchange OTP: count it, remove the record once the bound
    /// is hit.
    async fn fail_key_exchange_otp(&self, record: &ActivationRecord) -> SigilResult<SigilError> {
        let failed = record.failed_attempts + 1;
        if failed >= record.max_failed_attempts {
            tracing::warn!(
                activation_id = %record.activation_id,
                "key-exchange OTP attempts exhausted; removing activation"
            );
            self.remove_record(record, Some("otp attempts exhausted"), None).await?;
            return Ok(SigilError::ActivationExpired);
        }
        activations::increment_failed_attempts(&self.db.pool, record.activation_id, failed).await?;
        Ok(SigilError::InvalidInput {
            message: "invalid activation OTP".into(),
        })
    }

    /// Failed commit OTP: count it, block the record once the bound is hit.
    async fn fail_commit_otp(
        &self,
        record: &ActivationRecord,
        external_user_id: Option<&str>,
    ) -> SigilResult<SigilError> {
        let failed = record.failed_attempts + 1;
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await?;
        activations::increment_failed_attempts(&mut *tx, record.activation_id, failed).await?;
        let blocked = failed >= record.max_failed_attempts;
        if blocked {
            activations::update_status(
                &mut *tx,
                record.activation_id,
                ActivationStatus::Blocked,
                Some("MAX_FAILED_ATTEMPTS"),
            )
            .await?;
            history::append(
                &mut *tx,
                record.activation_id,
                ActivationStatus::Blocked,
                Some("MAX_FAILED_ATTEMPTS"),
                external_user_id,
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
            tracing::warn!(activation_id = %record.activation_id, "commit OTP attempts exhausted");
        }
        Ok(SigilError::InvalidInput {
            message: "invalid activation OTP".into(),
        })
    }

    /// Store the device key and move CREATED → PENDING_COMMIT.
    async fn complete_key_exchange(
        &self,
        record: &ActivationRecord,
        device_public: &[u8],
    ) -> SigilResult<()> {
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await?;
        activations::set_device_key(&mut *tx, record.activation_id, &b64(device_public), now)
            .await?;
        activations::reset_failed_attempts(&mut *tx, record.activation_id).await?;
        history::append(
            &mut *tx,
            record.activation_id,
            ActivationStatus::PendingCommit,
            None,
            None,
            now,
        )
        .await?;
        tx.commit().await?;
        self.callbacks.notify(ActivationEvent {
            activation_id: record.activation_id,
            application_id: record.application_id,
            status: ActivationStatus::PendingCommit,
        });
        tracing::info!(activation_id = %record.activation_id, "key exchange complete");
        Ok(())
    }

    /// Protect the server key half and v3 counter seed under the envelope
    /// key of the request.
    fn seal_key_exchange_response(
        &self,
        record: &ActivationRecord,
        envelope_key: &EnvelopeKey,
    ) -> SigilResult<(String, String)> {
        let payload = KeyExchangeResponsePayload {
            server_public_key: record
                .server_public_key
                .clone()
                .ok_or(SigilError::InvalidActivationState)?,
            ctr_data: record
                .ctr_data
                .clone()
                .ok_or(SigilError::InvalidActivationState)?,
        };
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| SigilError::Internal(anyhow::anyhow!(e)))?;
        let (encrypted, mac) = envelope_key.encrypt(&bytes);
        Ok((b64(&encrypted), b64(&mac)))
    }
}
