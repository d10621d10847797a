//! Application, version, master keypair and integration repositories.
//!
//! Read-mostly lookups on the hot path (every activation and signature
//! verification resolves an application version); the create functions exist
//! for provisioning and the test suites — administrative CRUD beyond that is
//! not part of this crate.

use chrono::{DateTime, Utc};
use sigil_common::models::application::{
    Application, ApplicationVersion, Integration, MasterKeyPair,
};
use uuid::Uuid;

use crate::fmt_ts;

// ============================================================
// Applications
// ============================================================

pub async fn create_application(
    pool: &sqlx::AnyPool,
    id: Uuid,
    name: &str,
    created_at: DateTime<Utc>,
) -> Result<Application, sqlx::Error> {
    sqlx::query_as::<_, Application>(
        "INSERT INTO pa_application (id, name, created_at) VALUES (?, ?, ?) RETURNING *",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(fmt_ts(created_at))
    .fetch_one(pool)
    .await
}

pub async fn find_application(
    pool: &sqlx::AnyPool,
    id: Uuid,
) -> Result<Option<Application>, sqlx::Error> {
    sqlx::query_as::<_, Application>("SELECT * FROM pa_application WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
}

// ============================================================
// Application versions
// ============================================================

pub async fn create_version(
    pool: &sqlx::AnyPool,
    id: Uuid,
    application_id: Uuid,
    name: &str,
    application_key: &str,
    application_secret: &str,
    created_at: DateTime<Utc>,
) -> Result<ApplicationVersion, sqlx::Error> {
    sqlx::query_as::<_, ApplicationVersion>(
        r#"
        INSERT INTO pa_application_version
            (id, application_id, name, application_key, application_secret, supported, created_at)
        VALUES (?, ?, ?, ?, ?, TRUE, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(application_id.to_string())
    .bind(name)
    .bind(application_key)
    .bind(application_secret)
    .bind(fmt_ts(created_at))
    .fetch_one(pool)
    .await
}

/// Resolve the version a client presented. The application key is unique
/// across all applications, so no application scope is needed.
pub async fn find_version_by_key(
    pool: &sqlx::AnyPool,
    application_key: &str,
) -> Result<Option<ApplicationVersion>, sqlx::Error> {
    sqlx::query_as::<_, ApplicationVersion>(
        "SELECT * FROM pa_application_version WHERE application_key = ?",
    )
    .bind(application_key)
    .fetch_optional(pool)
    .await
}

// ============================================================
// Master keypairs
// ============================================================

pub async fn create_master_keypair(
    pool: &sqlx::AnyPool,
    id: Uuid,
    application_id: Uuid,
    public_key: &str,
    private_key: &str,
    timestamp_created: DateTime<Utc>,
) -> Result<MasterKeyPair, sqlx::Error> {
    sqlx::query_as::<_, MasterKeyPair>(
        r#"
        INSERT INTO pa_master_keypair
            (id, application_id, public_key, private_key, timestamp_created)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(application_id.to_string())
    .bind(public_key)
    .bind(private_key)
    .bind(fmt_ts(timestamp_created))
    .fetch_one(pool)
    .await
}

/// The keypair that signs *new* activations: newest first. Existing records
/// keep their snapshot reference and ignore later rotations.
pub async fn newest_master_keypair(
    pool: &sqlx::AnyPool,
    application_id: Uuid,
) -> Result<Option<MasterKeyPair>, sqlx::Error> {
    sqlx::query_as::<_, MasterKeyPair>(
        r#"
        SELECT * FROM pa_master_keypair
        WHERE application_id = ?
        ORDER BY timestamp_created DESC
        LIMIT 1
        "#,
    )
    .bind(application_id.to_string())
    .fetch_optional(pool)
    .await
}

pub async fn master_keypair_by_id(
    pool: &sqlx::AnyPool,
    id: Uuid,
) -> Result<Option<MasterKeyPair>, sqlx::Error> {
    sqlx::query_as::<_, MasterKeyPair>("SELECT * FROM pa_master_keypair WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
}

// ============================================================
// Integrations (HTTP Basic gating)
// ============================================================

pub async fn create_integration(
    pool: &sqlx::AnyPool,
    id: Uuid,
    name: &str,
    client_token: &str,
    client_secret: &str,
    created_at: DateTime<Utc>,
) -> Result<Integration, sqlx::Error> {
    sqlx::query_as::<_, Integration>(
        r#"
        INSERT INTO pa_integration (id, name, client_token, client_secret, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(name)
    .bind(client_token)
    .bind(client_secret)
    .bind(fmt_ts(created_at))
    .fetch_one(pool)
    .await
}

pub async fn find_integration_by_token(
    pool: &sqlx::AnyPool,
    client_token: &str,
) -> Result<Option<Integration>, sqlx::Error> {
    sqlx::query_as::<_, Integration>("SELECT * FROM pa_integration WHERE client_token = ?")
        .bind(client_token)
        .fetch_optional(pool)
        .await
}
