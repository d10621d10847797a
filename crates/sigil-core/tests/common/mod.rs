//! Shared test fixture: an in-memory SQLite deployment plus a minimal
//! protocol client that performs the device side of key exchange and
//! signature computation.

// Not every suite uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::Utc;
use sigil_common::models::activation::SignatureType;
use sigil_core::activation::{KeyExchangePayload, KeyExchangeResponsePayload};
use sigil_core::callback::RecordingCallbackSink;
use sigil_core::{ServiceConfig, Services};
use sigil_crypto::kdf::DerivedKeys;
use sigil_crypto::{ecies, keys, signature as sigcrypto};
use sigil_db::Database;
use sigil_db::repository::applications;
use uuid::Uuid;

/// Provisioned application fixture.
pub struct TestApp {
    pub application_id: Uuid,
    pub application_key: String,
    pub application_secret: String,
    pub master_public: Vec<u8>,
}

pub struct TestEnv {
    pub services: Arc<Services>,
    pub sink: Arc<RecordingCallbackSink>,
    pub app: TestApp,
}

/// Fresh in-memory deployment with one application, one version and one
/// master keypair.
pub async fn test_env() -> TestEnv {
    test_env_with_config(ServiceConfig::default()).await
}

pub async fn test_env_with_config(config: ServiceConfig) -> TestEnv {
    let db = Database::connect("sqlite::memory:", 1, 1)
        .await
        .expect("in-memory database");
    db.migrate().await.expect("migrations");

    let now = Utc::now();
    let application_id = Uuid::new_v4();
    applications::create_application(&db.pool, application_id, "test-app", now)
        .await
        .expect("application");

    let application_key = B64.encode([0x11u8; 16]);
    let application_secret = B64.encode([0x22u8; 16]);
    applications::create_version(
        &db.pool,
        Uuid::new_v4(),
        application_id,
        "test-app-v1",
        &application_key,
        &application_secret,
        now,
    )
    .await
    .expect("application version");

    let (master_private, master_public) = keys::generate_keypair();
    applications::create_master_keypair(
        &db.pool,
        Uuid::new_v4(),
        application_id,
        &B64.encode(&master_public),
        &B64.encode(&master_private),
        now,
    )
    .await
    .expect("master keypair");

    let sink = Arc::new(RecordingCallbackSink::new());
    let services = Arc::new(Services::new(db, config, sink.clone()));

    TestEnv {
        services,
        sink,
        app: TestApp {
            application_id,
            application_key,
            application_secret,
            master_public,
        },
    }
}

/// Device-side state after a completed v3 key exchange.
pub struct TestDevice {
    pub derived: DerivedKeys,
    pub ctr_data: [u8; 16],
}

impl TestDevice {
    /// Compute the signature a client would send for counter value `counter`
    /// (0-based distance from the ctr_data received at key exchange).
    pub fn sign(
        &self,
        data: &str,
        signature_type: SignatureType,
        counter: u64,
        application_secret: &str,
    ) -> String {
        let mut ctr = self.ctr_data;
        for _ in 0..counter {
            ctr = sigcrypto::advance_ctr_data(&ctr);
        }
        let base = sigcrypto::signature_base(data.as_bytes(), &ctr, application_secret);
        let (_, knowledge, biometry) = signature_type.factors();
        let mut factor_keys: Vec<&[u8; 16]> = vec![&self.derived.possession];
        if knowledge {
            factor_keys.push(&self.derived.knowledge);
        }
        if biometry {
            factor_keys.push(&self.derived.biometry);
        }
        sigcrypto::compute(&factor_keys, &base)
    }
}

/// Client half of the v3 key exchange: build the envelope for
/// `prepareActivation` / `createActivation`.
pub struct KeyExchangeClient {
    pub device_private: Vec<u8>,
    pub envelope_key: ecies::EnvelopeKey,
    pub ephemeral_public_key: String,
    pub encrypted_data: String,
    pub mac: String,
}

pub fn start_key_exchange(master_public: &[u8], activation_otp: Option<&str>) -> KeyExchangeClient {
    let (device_private, device_public) = keys::generate_keypair();
    let payload = KeyExchangePayload {
        device_public_key: B64.encode(&device_public),
        activation_otp: activation_otp.map(str::to_owned),
    };
    let payload_bytes = serde_json::to_vec(&payload).expect("payload json");
    let (envelope, envelope_key) =
        ecies::seal(master_public, &payload_bytes).expect("seal envelope");

    KeyExchangeClient {
        device_private,
        envelope_key,
        ephemeral_public_key: B64.encode(&envelope.ephemeral_public_key),
        encrypted_data: B64.encode(&envelope.encrypted_data),
        mac: B64.encode(&envelope.mac),
    }
}

impl KeyExchangeClient {
    /// Open the server's response and derive the shared key family.
    pub fn finish(&self, encrypted_data: &str, mac: &str) -> TestDevice {
        let encrypted = B64.decode(encrypted_data).expect("response base64");
        let mac = B64.decode(mac).expect("mac base64");
        let payload_bytes = self
            .envelope_key
            .decrypt(&encrypted, &mac)
            .expect("open response envelope");
        let payload: KeyExchangeResponsePayload =
            serde_json::from_slice(&payload_bytes).expect("response payload json");

        let server_public = B64
            .decode(&payload.server_public_key)
            .expect("server key base64");
        let shared = keys::ecdh_shared_secret(&self.device_private, &server_public)
            .expect("device-side ECDH");
        let ctr_data: [u8; 16] = B64
            .decode(&payload.ctr_data)
            .expect("ctr_data base64")
            .as_slice()
            .try_into()
            .expect("ctr_data is 16 bytes");

        TestDevice {
            derived: DerivedKeys::from_shared_secret(&shared),
            ctr_data,
        }
    }
}
