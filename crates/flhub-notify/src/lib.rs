//! Notification run orchestration: two bulk reads, one pure match, then a
//! concurrent best-effort fan-out.

use std::sync::Arc;

use flhub_core::match_opportunities;
use flhub_mailer::{DeliveryOutcome, Mailer};
use flhub_store::{OpportunityStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "flhub-notify";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("newOpportunityIds must be a non-empty list of identifiers")]
    InvalidInput,
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

/// Per-recipient outcome of one run. Failures are recorded here, never
/// propagated; the run itself reports success once matching completed.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub user_id: Uuid,
    pub email: String,
    pub matched: usize,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Number of users with a non-empty matched set, independent of whether
    /// their digest was actually delivered.
    pub notifications_sent: usize,
    pub deliveries: Vec<DeliveryReport>,
}

/// Wires the store and mailer collaborators through one notification pass.
pub struct NotificationService {
    store: Arc<dyn OpportunityStore>,
    mailer: Arc<dyn Mailer>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn OpportunityStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { store, mailer }
    }

    /// Evaluate the supplied opportunity ids against every registered
    /// keyword and send one digest per matched user.
    ///
    /// Matching runs to completion before any send is issued. Sends are
    /// dispatched as independent tasks with no ordering guarantee and the
    /// run completes when all have settled. Re-running with the same ids
    /// re-sends; there is no idempotency key.
    pub async fn run(&self, ids: &[Uuid]) -> Result<RunSummary, NotifyError> {
        if ids.is_empty() {
            return Err(NotifyError::InvalidInput);
        }

        let opportunities = self.store.opportunities_by_ids(ids).await?;
        if opportunities.is_empty() {
            info!(requested = ids.len(), "no opportunities resolved, nothing to send");
            return Ok(RunSummary {
                notifications_sent: 0,
                deliveries: Vec::new(),
            });
        }

        let keywords = self.store.keywords_with_emails().await?;
        let batch = match_opportunities(&opportunities, &keywords);
        let notifications_sent = batch.len();
        info!(
            opportunities = opportunities.len(),
            keywords = keywords.len(),
            matched_users = notifications_sent,
            "matching complete"
        );

        let mut handles = Vec::with_capacity(batch.len());
        for (user_id, digest) in batch {
            let mailer = Arc::clone(&self.mailer);
            handles.push(tokio::spawn(async move {
                let outcome = mailer.send_digest(&digest.email, &digest.opportunities).await;
                DeliveryReport {
                    user_id,
                    email: digest.email,
                    matched: digest.opportunities.len(),
                    outcome,
                }
            }));
        }

        let mut deliveries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => deliveries.push(report),
                Err(err) => warn!(error = %err, "delivery task aborted"),
            }
        }

        info!(notifications_sent, "notification run complete");
        Ok(RunSummary {
            notifications_sent,
            deliveries,
        })
    }
}
