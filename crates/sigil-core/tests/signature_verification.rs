//! Signature engine: counter window, lockout, replay protection, audit,
//! vault unlock, ECDSA approvals.

mod common;

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use common::{TestDevice, TestEnv, start_key_exchange, test_env, test_env_with_config};
use sigil_common::error::SigilError;
use sigil_common::models::activation::{
    ActivationStatus, OtpValidation, ProtocolVersion, SignatureType,
};
use sigil_common::models::audit::AuditResult;
use sigil_core::activation::{InitActivationRequest, PrepareActivationRequest};
use sigil_core::signature::VerifySignatureRequest;
use sigil_db::repository::audit;
use sigil_crypto::{aes_cbc, keys, signature as sigcrypto};
use uuid::Uuid;

const DATA: &str = "POST&L3BhL3NpZ25hdHVyZS92YWxpZGF0ZQ==&1234";

/// Provision one committed v3 activation and return its device state.
async fn activated_device(env: &TestEnv, max_failed_attempts: Option<i64>) -> (Uuid, TestDevice) {
    let init = env
        .services
        .init_activation(InitActivationRequest {
            user_id: "user-1".into(),
            application_id: env.app.application_id,
            protocol_version: ProtocolVersion::V3,
            otp_validation: OtpValidation::None,
            activation_otp: None,
            max_failed_attempts,
            activation_expire: None,
        })
        .await
        .unwrap();

    let client = start_key_exchange(&env.app.master_public, None);
    let prepared = env
        .services
        .prepare_activation(PrepareActivationRequest {
            activation_code: init.activation_code.clone().unwrap(),
            application_key: env.app.application_key.clone(),
            ephemeral_public_key: client.ephemeral_public_key.clone(),
            encrypted_data: client.encrypted_data.clone(),
            mac: client.mac.clone(),
        })
        .await
        .unwrap();
    let device = client.finish(&prepared.encrypted_data, &prepared.mac);

    env.services
        .commit_activation(init.activation_id, None, None)
        .await
        .unwrap();

    (init.activation_id, device)
}

fn verify_request(
    env: &TestEnv,
    activation_id: Uuid,
    signature: String,
    signature_type: SignatureType,
) -> VerifySignatureRequest {
    VerifySignatureRequest {
        activation_id,
        application_key: env.app.application_key.clone(),
        data: DATA.into(),
        signature,
        signature_type,
        signature_version: 3,
        forced_signature_version: None,
    }
}

#[tokio::test]
async fn valid_signature_advances_counter() {
    let env = test_env().await;
    let (activation_id, device) = activated_device(&env, None).await;

    let signature = device.sign(
        DATA,
        SignatureType::PossessionKnowledge,
        0,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            signature,
            SignatureType::PossessionKnowledge,
        ))
        .await
        .unwrap();
    assert!(response.signature_valid);
    assert_eq!(response.activation_status, ActivationStatus::Active);

    // The stored counter is now 1: counter value 1 verifies, counter value 0
    // is burned (replay refused).
    let replay = device.sign(
        DATA,
        SignatureType::PossessionKnowledge,
        0,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            replay,
            SignatureType::PossessionKnowledge,
        ))
        .await
        .unwrap();
    assert!(!response.signature_valid, "counter 0 must not verify twice");
}

#[tokio::test]
async fn lookahead_window_tolerates_skipped_counters() {
    let env = test_env().await;
    let (activation_id, device) = activated_device(&env, None).await;

    // Client skipped ahead to counter 5 (lost responses).
    let signature = device.sign(
        DATA,
        SignatureType::Possession,
        5,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            signature,
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(response.signature_valid);

    // Stored counter resynchronised to 6.
    let next = device.sign(
        DATA,
        SignatureType::Possession,
        6,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            next,
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(response.signature_valid);
}

#[tokio::test]
async fn counter_beyond_lookahead_is_rejected() {
    let env = test_env().await;
    let (activation_id, device) = activated_device(&env, None).await;

    // Default lookahead is 20; counter 21 is out of the window.
    let signature = device.sign(
        DATA,
        SignatureType::Possession,
        21,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            signature,
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(!response.signature_valid);
}

#[tokio::test]
async fn failed_verification_advances_counter_by_one() {
    let env = test_env().await;
    let (activation_id, device) = activated_device(&env, None).await;

    let garbage = "00000000-00000000".to_string();
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            garbage,
            SignatureType::PossessionKnowledge,
        ))
        .await
        .unwrap();
    assert!(!response.signature_valid);

    // The stored counter moved to 1 even though the attempt failed: the old
    // base string is burned, and counter value 1 is the next to verify.
    let stale = device.sign(
        DATA,
        SignatureType::Possession,
        0,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            stale,
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(!response.signature_valid, "counter 0 burned by the failure");

    // Two attempts so far, so the stored counter is 2.
    let fresh = device.sign(
        DATA,
        SignatureType::Possession,
        2,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            fresh,
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(response.signature_valid);
    assert_eq!(response.remaining_attempts, 5, "success resets failures");
}

#[tokio::test]
async fn lockout_after_max_failed_attempts() {
    let env = test_env().await;
    let (activation_id, _device) = activated_device(&env, Some(3)).await;

    let mut remaining = Vec::new();
    for _ in 0..3 {
        let response = env
            .services
            .verify_signature(verify_request(
                &env,
                activation_id,
                "00000000".to_string(),
                SignatureType::Possession,
            ))
            .await
            .unwrap();
        assert!(!response.signature_valid);
        remaining.push(response.remaining_attempts);
    }
    assert_eq!(remaining, vec![2, 1, 0]);

    let status = env
        .services
        .get_activation_status(activation_id)
        .await
        .unwrap();
    assert_eq!(status.activation_status, ActivationStatus::Blocked);

    // The lockout transition reached the callback sink.
    assert!(
        env.sink
            .events()
            .iter()
            .any(|e| e.status == ActivationStatus::Blocked)
    );

    // Further attempts get the coarse shape, no error, no counter movement.
    let after = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            "00000000".to_string(),
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(!after.signature_valid);
    assert_eq!(after.activation_status, ActivationStatus::Blocked);
}

#[tokio::test]
async fn signature_component_count_must_match_type() {
    let env = test_env().await;
    let (activation_id, device) = activated_device(&env, None).await;

    // Two components presented for a single-factor type: rejected as input,
    // nothing burned.
    let two_factor = device.sign(
        DATA,
        SignatureType::PossessionKnowledge,
        0,
        &env.app.application_secret,
    );
    let err = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            two_factor,
            SignatureType::Possession,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SigilError::InvalidInput { .. }));

    // Counter untouched: counter value 0 still verifies.
    let valid = device.sign(
        DATA,
        SignatureType::Possession,
        0,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            valid,
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(response.signature_valid);
}

#[tokio::test]
async fn audit_log_orders_attempts_with_counters() {
    let env = test_env().await;
    let (activation_id, device) = activated_device(&env, None).await;

    let valid = device.sign(
        DATA,
        SignatureType::Possession,
        0,
        &env.app.application_secret,
    );
    env.services
        .verify_signature(verify_request(
            &env,
            activation_id,
            valid,
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    env.services
        .verify_signature(verify_request(
            &env,
            activation_id,
            "00000000".to_string(),
            SignatureType::Possession,
        ))
        .await
        .unwrap();

    let entries = audit::list_by_activation(&env.services.db.pool, activation_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].result, AuditResult::Ok);
    assert_eq!(entries[1].result, AuditResult::Failed);
    // Audit order agrees with committed counter order.
    assert!(entries[0].counter < entries[1].counter);
    assert_eq!(entries[0].signature_type, "possession");
    assert!(entries[1].note.is_some());
}

#[tokio::test]
async fn vault_unlock_round_trip_and_failure_shape() {
    let env = test_env().await;
    let (activation_id, device) = activated_device(&env, None).await;

    // Valid signature: the transported key opens with KEY_TRANSPORT and
    // matches the client's own KEY_ENCRYPTED_VAULT derivation.
    let signature = device.sign(
        DATA,
        SignatureType::PossessionKnowledge,
        0,
        &env.app.application_secret,
    );
    let response = env
        .services
        .unlock_vault(verify_request(
            &env,
            activation_id,
            signature,
            SignatureType::PossessionKnowledge,
        ))
        .await
        .unwrap();
    assert!(response.signature_valid);
    let encrypted = B64
        .decode(response.encrypted_vault_encryption_key.unwrap())
        .unwrap();
    let vault_key = aes_cbc::decrypt(&device.derived.transport, &aes_cbc::ZERO_IV, &encrypted)
        .unwrap();
    assert_eq!(vault_key, device.derived.vault);

    // Invalid signature: no key, counter still advanced by exactly one.
    let response = env
        .services
        .unlock_vault(verify_request(
            &env,
            activation_id,
            "00000000".to_string(),
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(!response.signature_valid);
    assert!(response.encrypted_vault_encryption_key.is_none());
    assert_eq!(response.remaining_attempts, 4);

    // Stored counter is 2 now (one success, one failure).
    let next = device.sign(
        DATA,
        SignatureType::PossessionKnowledge,
        2,
        &env.app.application_secret,
    );
    let response = env
        .services
        .unlock_vault(verify_request(
            &env,
            activation_id,
            next,
            SignatureType::PossessionKnowledge,
        ))
        .await
        .unwrap();
    assert!(response.signature_valid);
}

#[tokio::test]
async fn vault_unlock_on_unknown_activation_does_not_leak() {
    let env = test_env().await;
    let response = env
        .services
        .unlock_vault(verify_request(
            &env,
            Uuid::new_v4(),
            "00000000".to_string(),
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(!response.signature_valid);
    assert_eq!(response.activation_status, ActivationStatus::Removed);
    assert_eq!(response.user_id, "UNKNOWN");
    assert!(response.encrypted_vault_encryption_key.is_none());
}

#[tokio::test]
async fn ecdsa_device_signature_verification() {
    let env = test_env().await;

    // Build an activation whose device key we control end to end.
    let init = env
        .services
        .init_activation(InitActivationRequest {
            user_id: "user-1".into(),
            application_id: env.app.application_id,
            protocol_version: ProtocolVersion::V3,
            otp_validation: OtpValidation::None,
            activation_otp: None,
            max_failed_attempts: None,
            activation_expire: None,
        })
        .await
        .unwrap();
    let (device_private, device_public) = keys::generate_keypair();
    let payload = sigil_core::activation::KeyExchangePayload {
        device_public_key: B64.encode(&device_public),
        activation_otp: None,
    };
    let (envelope, _) = sigil_crypto::ecies::seal(
        &env.app.master_public,
        &serde_json::to_vec(&payload).unwrap(),
    )
    .unwrap();
    env.services
        .prepare_activation(PrepareActivationRequest {
            activation_code: init.activation_code.clone().unwrap(),
            application_key: env.app.application_key.clone(),
            ephemeral_public_key: B64.encode(&envelope.ephemeral_public_key),
            encrypted_data: B64.encode(&envelope.encrypted_data),
            mac: B64.encode(&envelope.mac),
        })
        .await
        .unwrap();
    env.services
        .commit_activation(init.activation_id, None, None)
        .await
        .unwrap();

    let data = b"approve operation 42";
    let der = keys::ecdsa_sign(&device_private, data).unwrap();
    assert!(
        env.services
            .verify_ecdsa_signature(init.activation_id, &B64.encode(data), &B64.encode(&der))
            .await
            .unwrap()
    );
    assert!(
        !env.services
            .verify_ecdsa_signature(
                init.activation_id,
                &B64.encode(b"approve operation 43"),
                &B64.encode(&der)
            )
            .await
            .unwrap()
    );
    // Garbage DER is just an invalid signature.
    assert!(
        !env.services
            .verify_ecdsa_signature(init.activation_id, &B64.encode(data), &B64.encode([1u8; 8]))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn direct_creation_yields_a_working_device() {
    let env = test_env().await;

    let client = start_key_exchange(&env.app.master_public, None);
    let created = env
        .services
        .create_activation(sigil_core::activation::CreateActivationRequest {
            user_id: "user-9".into(),
            application_key: env.app.application_key.clone(),
            ephemeral_public_key: client.ephemeral_public_key.clone(),
            encrypted_data: client.encrypted_data.clone(),
            mac: client.mac.clone(),
            otp_validation: OtpValidation::None,
            activation_otp: None,
            max_failed_attempts: None,
            activation_expire: None,
        })
        .await
        .unwrap();
    let device = client.finish(&created.encrypted_data, &created.mac);

    let status = env
        .services
        .get_activation_status(created.activation_id)
        .await
        .unwrap();
    assert_eq!(status.activation_status, ActivationStatus::PendingCommit);
    assert!(status.activation_code.is_none(), "no out-of-band code");

    env.services
        .commit_activation(created.activation_id, None, None)
        .await
        .unwrap();

    let signature = device.sign(
        DATA,
        SignatureType::Possession,
        0,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            created.activation_id,
            signature,
            SignatureType::Possession,
        ))
        .await
        .unwrap();
    assert!(response.signature_valid);
}

#[tokio::test]
async fn at_rest_key_encryption_is_transparent_to_the_protocol() {
    let mut config = sigil_core::ServiceConfig::default();
    config.security.server_private_key_encryption =
        sigil_common::models::activation::KeyEncryption::AesHmac;
    config.security.master_db_encryption_key = B64.encode([0x5Au8; 16]);
    let env = test_env_with_config(config).await;

    let (activation_id, device) = activated_device(&env, None).await;

    // The stored private key is an opaque envelope, not the raw Base64 scalar.
    let record = sigil_db::repository::activations::find(&env.services.db.pool, activation_id)
        .await
        .unwrap()
        .unwrap();
    let stored = record.server_private_key.unwrap();
    assert!(
        B64.decode(&stored).unwrap().len() > 48,
        "envelope carries IV and tag"
    );

    // Verification still works end to end.
    let signature = device.sign(
        DATA,
        SignatureType::PossessionKnowledge,
        0,
        &env.app.application_secret,
    );
    let response = env
        .services
        .verify_signature(verify_request(
            &env,
            activation_id,
            signature,
            SignatureType::PossessionKnowledge,
        ))
        .await
        .unwrap();
    assert!(response.signature_valid);
}

#[tokio::test]
async fn v2_signature_verification_uses_integer_counter() {
    let env = test_env().await;
    let init = env
        .services
        .init_activation(InitActivationRequest {
            user_id: "user-1".into(),
            application_id: env.app.application_id,
            protocol_version: ProtocolVersion::V2,
            otp_validation: OtpValidation::None,
            activation_otp: None,
            max_failed_attempts: None,
            activation_expire: None,
        })
        .await
        .unwrap();

    let short_id = init.activation_id_short.clone().unwrap();
    let otp = init.activation_otp.clone().unwrap();
    let (device_private, device_public) = keys::generate_keypair();
    let (ephemeral_private, ephemeral_public) = keys::generate_keypair();
    let envelope_key = sigil_crypto::v2::derive_envelope_key_client(
        &ephemeral_private,
        &env.app.master_public,
        &short_id,
        &otp,
    )
    .unwrap();
    let encrypted_device_key =
        sigil_crypto::v2::encrypt_device_public_key(&envelope_key, &device_public);
    let nonce = [3u8; 16];
    let app_signature = sigil_crypto::v2::application_signature(
        &env.app.application_secret,
        &short_id,
        &nonce,
        &encrypted_device_key,
        &env.app.application_key,
    );
    let prepared = env
        .services
        .prepare_activation_v2(sigil_core::activation::PrepareActivationV2Request {
            activation_id_short: short_id,
            application_key: env.app.application_key.clone(),
            activation_nonce: B64.encode(nonce),
            ephemeral_public_key: B64.encode(&ephemeral_public),
            encrypted_device_public_key: B64.encode(&encrypted_device_key),
            application_signature: B64.encode(app_signature),
        })
        .await
        .unwrap();
    env.services
        .commit_activation(init.activation_id, None, None)
        .await
        .unwrap();

    // Device-side key family from the transported server key.
    let c_server = B64.decode(&prepared.c_server_public_key).unwrap();
    let server_public =
        aes_cbc::decrypt(&envelope_key, &aes_cbc::ZERO_IV, &c_server).unwrap();
    let shared = keys::ecdh_shared_secret(&device_private, &server_public).unwrap();
    let derived = sigil_crypto::kdf::DerivedKeys::from_shared_secret(&shared);

    // v2 signature over integer counter 0.
    let base = sigcrypto::signature_base(
        DATA.as_bytes(),
        &sigcrypto::counter_bytes_v2(0),
        &env.app.application_secret,
    );
    let signature = sigcrypto::compute(&[&derived.possession, &derived.knowledge], &base);

    let response = env
        .services
        .verify_signature(VerifySignatureRequest {
            activation_id: init.activation_id,
            application_key: env.app.application_key.clone(),
            data: DATA.into(),
            signature,
            signature_type: SignatureType::PossessionKnowledge,
            signature_version: 2,
            forced_signature_version: None,
        })
        .await
        .unwrap();
    assert!(response.signature_valid);
    assert_eq!(response.activation_status, ActivationStatus::Active);
}
