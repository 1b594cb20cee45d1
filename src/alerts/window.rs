use crate::error::{AppError, Result};
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::{Duration, Instant};

/// Time-boxed claim on a fingerprint.
///
/// `claim_for` is a single atomic check-and-set: of many concurrent callers
/// for one fingerprint, exactly one gets `true` until the entry expires
/// or is released.
#[async_trait]
pub trait DedupWindow: Send + Sync {
    /// Default window length
    fn window(&self) -> Duration;

    /// Claim for an explicit window length
    async fn claim_for(&self, fingerprint: &str, window: Duration) -> Result<bool>;

    async fn claim(&self, fingerprint: &str) -> Result<bool> {
        self.claim_for(fingerprint, self.window()).await
    }

    /// Forget the fingerprint so the next trigger claims afresh
    async fn release(&self, fingerprint: &str) -> Result<()>;
}

/// Each claim expires after the window it was made with
struct ClaimExpiry;

impl Expiry<String, Duration> for ClaimExpiry {
    fn expire_after_create(&self, _key: &String, window: &Duration, _created_at: Instant) -> Option<Duration> {
        Some(*window)
    }
}

/// In-process window on a moka cache with a per-entry time-to-live
#[derive(Clone)]
pub struct MokaDedupWindow {
    claims: Cache<String, Duration>,
    window: Duration,
}

impl MokaDedupWindow {
    pub fn new(window: Duration, capacity: u64) -> Self {
        Self {
            claims: Cache::builder()
                .max_capacity(capacity)
                .expire_after(ClaimExpiry)
                .build(),
            window,
        }
    }
}

#[async_trait]
impl DedupWindow for MokaDedupWindow {
    fn window(&self) -> Duration {
        self.window
    }

    async fn claim_for(&self, fingerprint: &str, window: Duration) -> Result<bool> {
        let entry = self
            .claims
            .entry(fingerprint.to_string())
            .or_insert_with(async move { window })
            .await;
        Ok(entry.is_fresh())
    }

    async fn release(&self, fingerprint: &str) -> Result<()> {
        self.claims.invalidate(fingerprint).await;
        Ok(())
    }
}

/// Window shared between replicas through Redis `SET NX EX`
#[derive(Clone)]
pub struct RedisDedupWindow {
    connection: ConnectionManager,
    window_secs: u64,
    key_prefix: String,
}

impl RedisDedupWindow {
    pub async fn new(redis_url: &str, window: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::Configuration(format!("Invalid Redis URL: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Unavailable(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(window_secs = window.as_secs(), "Initialized Redis dedup window");

        Ok(Self {
            connection,
            window_secs: window.as_secs().max(1),
            key_prefix: "opsgraph:dedup".to_string(),
        })
    }

    fn key(&self, fingerprint: &str) -> String {
        format!("{}:{}", self.key_prefix, fingerprint)
    }
}

#[async_trait]
impl DedupWindow for RedisDedupWindow {
    fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    async fn claim_for(&self, fingerprint: &str, window: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(fingerprint))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(window.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, fingerprint: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(fingerprint)).await?;
        Ok(())
    }
}
