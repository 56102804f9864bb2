use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::job::JobType;

/// Publish attempts before a job is declared undeliverable.
pub const MAX_PUBLISH_ATTEMPTS: u32 = 3;

/// Fixed backoff between publish attempts.
pub const PUBLISH_BACKOFF: Duration = Duration::from_secs(2);

const QUEUE_KEY_PREFIX: &str = "image_toolkit:jobs";

/// Job-execution request serialized onto the channel for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: Uuid,
    pub original_image_id: Uuid,
    /// Storage URL of the source image, fetchable by the worker.
    pub image_storage_path: String,
    pub job_type: JobType,
    pub job_config: Option<serde_json::Value>,
}

/// Routing keys per job type, sourced from configuration. A job type without
/// an entry is a deployment error, reported as `UnsupportedJobType` and never
/// retried.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    keys: HashMap<JobType, String>,
}

impl RoutingTable {
    pub fn from_config(config: &AppConfig) -> Self {
        let keys = JobType::ALL
            .into_iter()
            .map(|t| (t, config.routing_key(t).to_string()))
            .collect();
        Self { keys }
    }

    pub fn key_for(&self, job_type: JobType) -> Option<&str> {
        self.keys.get(&job_type).map(String::as_str)
    }

    #[cfg(test)]
    pub fn from_entries(entries: impl IntoIterator<Item = (JobType, &'static str)>) -> Self {
        Self {
            keys: entries
                .into_iter()
                .map(|(t, k)| (t, k.to_string()))
                .collect(),
        }
    }
}

/// Redis-backed dispatch channel carrying job-execution requests to the
/// per-type worker pools. Delivery is at-least-once; status ingestion owns
/// the idempotency that makes redelivery safe.
pub struct DispatchChannel {
    client: redis::Client,
    routing: RoutingTable,
}

impl DispatchChannel {
    pub fn new(redis_url: &str, routing: RoutingTable) -> Result<Self, DispatchError> {
        let client = redis::Client::open(redis_url).map_err(DispatchError::Redis)?;
        Ok(Self { client, routing })
    }

    /// Publish a job message to its worker queue, retrying transient channel
    /// failures up to `MAX_PUBLISH_ATTEMPTS` with fixed backoff. The caller
    /// must have committed the job row before calling this: the worker may
    /// look the job up independently.
    pub async fn publish(&self, message: &JobMessage) -> Result<(), DispatchError> {
        let routing_key = self
            .routing
            .key_for(message.job_type)
            .ok_or_else(|| DispatchError::UnsupportedJobType(message.job_type.to_string()))?;

        let queue_key = format!("{QUEUE_KEY_PREFIX}:{routing_key}");
        let payload = serde_json::to_string(message).map_err(DispatchError::Serialize)?;

        tracing::info!(
            job_id = %message.job_id,
            routing_key = %routing_key,
            "publishing job message"
        );

        retry_with_backoff(
            || self.push_once(&queue_key, &payload),
            MAX_PUBLISH_ATTEMPTS,
            PUBLISH_BACKOFF,
            DispatchError::is_transient,
        )
        .await
    }

    async fn push_once(&self, queue_key: &str, payload: &str) -> Result<(), DispatchError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(DispatchError::Redis)?;
        conn.lpush::<_, _, ()>(queue_key, payload)
            .await
            .map_err(DispatchError::Redis)?;
        Ok(())
    }

    /// Check channel connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), DispatchError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(DispatchError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(DispatchError::Redis)?;
        Ok(())
    }
}

/// Bounded retry with a fixed backoff schedule. Retries only while
/// `retryable` holds and attempts remain; the final error is returned
/// unchanged so the caller can classify it.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    backoff: Duration,
    retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && retryable(&err) => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "operation failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no routing key configured for job type {0}")]
    UnsupportedJobType(String),
}

impl DispatchError {
    /// Broker-level failures are worth retrying; a missing routing key or a
    /// message that cannot serialize is a programming error and is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Redis(_))
    }
}
