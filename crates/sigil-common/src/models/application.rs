//! Application, version, master keypair and integration models.
//!
//! These are the read-mostly collaborators of the activation subsystem:
//! clients present an `application_key`/`application_secret` pair to prove
//! which application build they are, and the newest master keypair of that
//! application signs the server side of new activations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered application (one per mobile product).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One distributable build of an application.
///
/// `application_key` and `application_secret` are 16 random bytes each,
/// stored Base64. The key identifies the version on the wire; the secret
/// enters the signature base string and the v2 envelope MAC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationVersion {
    pub id: Uuid,
    pub application_id: Uuid,
    pub name: String,
    pub application_key: String,
    pub application_secret: String,
    /// Unsupported versions are rejected before any crypto runs.
    pub supported: bool,
    pub created_at: DateTime<Utc>,
}

/// Application-wide long-term EC keypair.
///
/// Only the newest keypair per application is used to sign *new*
/// activations; existing records keep their snapshot reference and stay
/// valid across rotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterKeyPair {
    pub id: Uuid,
    pub application_id: Uuid,
    /// Base64 uncompressed SEC1 point.
    pub public_key: String,
    /// Base64 raw scalar.
    pub private_key: String,
    pub timestamp_created: DateTime<Utc>,
}

/// Server-to-server caller credentials for HTTP Basic gating.
/// Administration of this table is out of scope; the middleware only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    pub name: String,
    pub client_token: String,
    pub client_secret: String,
    pub created_at: DateTime<Utc>,
}
