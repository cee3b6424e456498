//! Lossy background queue for usage bookkeeping.
//!
//! Jobs are dropped when the queue is full and never retried; nothing on the
//! request path waits for them.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::store::CredentialStore;

#[derive(Debug, Clone)]
pub enum TelemetryJob {
    ApiKeyUsed { key_id: Uuid, at: DateTime<Utc> },
    SessionTouched { session_id: Uuid, at: DateTime<Utc> },
}

#[derive(Clone)]
pub struct TelemetryQueue {
    tx: mpsc::Sender<TelemetryJob>,
}

impl TelemetryQueue {
    /// Start the worker on the current runtime. It exits once every queue
    /// handle is dropped.
    pub fn spawn(store: Arc<dyn CredentialStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<TelemetryJob>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                run_job(store.as_ref(), job).await;
            }
            tracing::debug!("Telemetry queue closed");
        });

        Self { tx }
    }

    /// Enqueue without waiting. Returns false when the job was dropped.
    pub fn dispatch(&self, job: TelemetryJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::debug!(?job, "Telemetry queue full; dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Telemetry queue closed; dropping job");
                false
            }
        }
    }
}

async fn run_job(store: &dyn CredentialStore, job: TelemetryJob) {
    let result = match &job {
        TelemetryJob::ApiKeyUsed { key_id, at } => {
            store.update_api_key_last_used(*key_id, *at).await
        }
        TelemetryJob::SessionTouched { session_id, at } => {
            store.touch_session(*session_id, *at).await
        }
    };

    match result {
        Ok(()) => {}
        // The record was deleted after the job was queued.
        Err(e) if e.is_not_found() => {}
        Err(e) => tracing::warn!(?job, error = %e, "Telemetry job failed"),
    }
}
