use std::sync::Arc;

use sqlx::PgPool;

use crate::analysis::admission::PollLimiter;
use crate::analysis::queue::JobQueue;
use crate::config::Config;
use crate::llm_client::LlmGateway;
use crate::storage::ObjectStore;
use crate::usage::QuotaGate;

/// Shared application state injected into route handlers and workers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: JobQueue,
    pub object_store: Arc<ObjectStore>,
    pub llm: LlmGateway,
    pub quota: Arc<dyn QuotaGate>,
    pub poll_limiter: Arc<PollLimiter>,
    pub config: Config,
}
