//! # sigil-core
//!
//! The service façade. Every documented operation is an async method on
//! [`Services`], a plain function from request to result — no framework
//! types, no transport concerns. The REST layer is a thin shell over this
//! crate, and the integration tests drive it directly.
//!
//! `Services` carries all collaborators explicitly: the database handle, a
//! configuration snapshot, the outbound callback sink, the read-mostly
//! application caches, and the per-activation lock registry that serializes
//! counter updates.

pub mod activation;
pub mod callback;
mod material;
pub mod signature;
pub mod sweep;
pub mod vault;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sigil_common::config::{ActivationConfig, SecurityConfig, SignatureConfig};
use sigil_common::error::{SigilError, SigilResult};
use sigil_common::models::application::{ApplicationVersion, MasterKeyPair};
use sigil_db::Database;
use sigil_db::repository::applications;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::callback::CallbackSink;

/// How long cached application versions and master keypairs stay fresh.
/// Stale reads are tolerated: activation records snapshot their master
/// keypair reference, and version rows change rarely.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Configuration slice the service layer needs. The server binary populates
/// it from the global [`sigil_common::config::AppConfig`]; tests construct it
/// directly.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub activation: ActivationConfig,
    pub signature: SignatureConfig,
    pub security: SecurityConfig,
}

/// All collaborators of the activation & signature subsystem, injected once
/// at startup.
pub struct Services {
    pub db: Database,
    pub config: ServiceConfig,
    pub callbacks: Arc<dyn CallbackSink>,
    /// Per-activation write locks: all mutations of one record serialize.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    version_cache: Mutex<HashMap<String, (Instant, ApplicationVersion)>>,
    keypair_cache: Mutex<HashMap<Uuid, (Instant, MasterKeyPair)>>,
}

impl Services {
    pub fn new(db: Database, config: ServiceConfig, callbacks: Arc<dyn CallbackSink>) -> Self {
        Self {
            db,
            config,
            callbacks,
            locks: Mutex::new(HashMap::new()),
            version_cache: Mutex::new(HashMap::new()),
            keypair_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The write lock for one activation. Two concurrent verifications of the
    /// same activation must produce a strict sequence of counter values, so
    /// every read-modify-write holds this for its full duration.
    pub(crate) async fn activation_lock(&self, activation_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(activation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolve an application version by the key the client presented,
    /// through the read-mostly cache.
    pub(crate) async fn version_by_key(
        &self,
        application_key: &str,
    ) -> SigilResult<ApplicationVersion> {
        {
            let cache = self.version_cache.lock().await;
            if let Some((cached_at, version)) = cache.get(application_key) {
                if cached_at.elapsed() < CACHE_TTL {
                    return Ok(version.clone());
                }
            }
        }
        let version = applications::find_version_by_key(&self.db.pool, application_key)
            .await?
            .ok_or(SigilError::ApplicationNotFound)?;
        self.version_cache.lock().await.insert(
            application_key.to_owned(),
            (Instant::now(), version.clone()),
        );
        Ok(version)
    }

    /// Resolve a master keypair by ID through the cache. Rows are immutable,
    /// so the TTL only bounds memory staleness, not correctness.
    pub(crate) async fn master_keypair(&self, id: Uuid) -> SigilResult<MasterKeyPair> {
        {
            let cache = self.keypair_cache.lock().await;
            if let Some((cached_at, keypair)) = cache.get(&id) {
                if cached_at.elapsed() < CACHE_TTL {
                    return Ok(keypair.clone());
                }
            }
        }
        let keypair = applications::master_keypair_by_id(&self.db.pool, id)
            .await?
            .ok_or(SigilError::Config {
                message: format!("master keypair {id} missing"),
            })?;
        self.keypair_cache
            .lock()
            .await
            .insert(id, (Instant::now(), keypair.clone()));
        Ok(keypair)
    }

    /// Newest master keypair for an application — signs new activations.
    pub(crate) async fn current_master_keypair(
        &self,
        application_id: Uuid,
    ) -> SigilResult<MasterKeyPair> {
        applications::newest_master_keypair(&self.db.pool, application_id)
            .await?
            .ok_or(SigilError::Config {
                message: format!("no master keypair for application {application_id}"),
            })
    }
}
