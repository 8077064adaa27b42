//! Redis-backed job hand-off between admission and the worker pool.
//!
//! At-least-once delivery: messages are pushed onto a pending list, moved
//! to a processing list while a worker holds them, and removed on ack.
//! Redelivery is safe because the worker early-exits on terminal records.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

const PENDING_LIST: &str = "analysis:jobs";
const PROCESSING_LIST: &str = "analysis:jobs:processing";

/// Wire format of a queued analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub analysis_id: Uuid,
    pub request_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub version: u32,
}

impl JobMessage {
    pub fn new(analysis_id: Uuid, request_id: Uuid) -> Self {
        JobMessage {
            analysis_id,
            request_id,
            enqueued_at: Utc::now(),
            version: 1,
        }
    }
}

/// A message a worker is currently holding. Keeps the exact wire bytes so
/// the ack can remove the right list entry.
#[derive(Debug)]
pub struct ClaimedMessage {
    pub message: JobMessage,
    raw: String,
}

#[derive(Clone)]
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    /// Enqueues one job. Transport failures surface to the caller; no
    /// internal retry (the record stays QUEUED and is worker-recoverable).
    pub async fn send(&self, message: &JobMessage) -> Result<(), AppError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| AppError::Queue(format!("message serialization failed: {e}")))?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Queue(format!("redis connection failed: {e}")))?;

        conn.lpush::<_, _, ()>(PENDING_LIST, payload)
            .await
            .map_err(|e| AppError::Queue(format!("enqueue failed: {e}")))?;

        Ok(())
    }

    /// Blocks up to `timeout_secs` for the next job, moving it onto the
    /// processing list. Returns `None` on timeout.
    pub async fn receive(&self, timeout_secs: f64) -> anyhow::Result<Option<ClaimedMessage>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let raw: Option<String> = conn
            .brpoplpush(PENDING_LIST, PROCESSING_LIST, timeout_secs)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<JobMessage>(&raw) {
            Ok(message) => Ok(Some(ClaimedMessage { message, raw })),
            Err(e) => {
                // A message that cannot parse can never be processed;
                // drop it instead of handing it back forever.
                conn.lrem::<_, _, ()>(PROCESSING_LIST, 1, &raw).await?;
                Err(anyhow::anyhow!("malformed job message dropped: {e}"))
            }
        }
    }

    /// Acknowledges a processed message by dropping it from the
    /// processing list.
    pub async fn ack(&self, claimed: &ClaimedMessage) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lrem::<_, _, ()>(PROCESSING_LIST, 1, &claimed.raw).await?;
        Ok(())
    }
}
