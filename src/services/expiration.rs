//! Expiration scheduler: enforces the 24-hour approval SLA on pending
//! requests, releasing their soft reservations when staff never acted.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{self, MissedTickBehavior};

use crate::{
    error::AppResult,
    models::{
        derive_overall_status,
        request::{BorrowRequest, LineItemStatus, RequestStatus},
    },
    repository::Repository,
    services::notifications::AvailabilityNotifier,
};

const EXPIRED_REASON: &str =
    "Request expired automatically: no staff decision within 24 hours of submission";

pub struct ExpirationScheduler {
    repository: Repository,
    notifier: Arc<AvailabilityNotifier>,
    interval_secs: u64,
}

impl ExpirationScheduler {
    pub fn new(
        repository: Repository,
        notifier: Arc<AvailabilityNotifier>,
        interval_secs: u64,
    ) -> Self {
        Self {
            repository,
            notifier,
            interval_secs,
        }
    }

    /// Run indefinitely. The first tick fires immediately, then on the
    /// fixed interval; a failing pass is logged and never ends the loop.
    pub async fn run_loop(self: Arc<Self>) {
        tracing::info!(
            "Expiration scheduler started (every {}s)",
            self.interval_secs
        );
        let mut interval = time::interval(time::Duration::from_secs(self.interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            match self.process_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Expired {} pending request(s)", n),
                Err(e) => tracing::error!("Expiration pass failed: {}", e),
            }
        }
    }

    /// One pass: expire every pending request past its deadline.
    /// Failures are isolated per request; the batch continues and the
    /// next tick retries whatever still matches the scan.
    pub async fn process_expired(&self) -> AppResult<u32> {
        let now = Utc::now();
        let candidates = self.repository.requests.find_expired_pending(now).await?;

        let mut expired = 0u32;
        let mut released_equipment: HashSet<i32> = HashSet::new();

        for request in candidates {
            match self.expire_one(&request).await {
                Ok(ids) => {
                    expired += 1;
                    released_equipment.extend(ids);
                }
                Err(e) => {
                    tracing::error!("Failed to expire request {}: {}", request.request_id, e);
                }
            }
        }

        if !released_equipment.is_empty() {
            let notifier = Arc::clone(&self.notifier);
            let ids: Vec<i32> = released_equipment.into_iter().collect();
            tokio::spawn(async move {
                notifier.notify_equipment_available(&ids).await;
            });
        }

        Ok(expired)
    }

    /// Expire a single request in its own transaction: release every
    /// still-pending item, flip statuses, and record a system-attributed
    /// history entry (by convention the actor is the request's owner).
    async fn expire_one(&self, request: &BorrowRequest) -> AppResult<Vec<i32>> {
        let mut tx = self.repository.pool.begin().await?;

        let flipped = self
            .repository
            .requests
            .transition_items(
                &mut tx,
                request.id,
                &[LineItemStatus::Pending],
                LineItemStatus::Expired,
                None,
            )
            .await?;

        let mut released = Vec::new();
        for item in &flipped {
            if let Some(equipment_id) = item.equipment_id {
                self.repository
                    .equipment
                    .release(&mut tx, equipment_id, item.quantity)
                    .await?;
                released.push(equipment_id);
            }
        }

        let all = self.repository.requests.items_in_tx(&mut tx, request.id).await?;
        let statuses: Vec<LineItemStatus> = all.iter().map(|i| i.status).collect();
        let overall = derive_overall_status(&statuses);

        self.repository
            .requests
            .update_status_fields(
                &mut tx,
                request.id,
                overall,
                None,
                None,
                None,
                Some(EXPIRED_REASON),
            )
            .await?;

        self.repository
            .requests
            .append_history(
                &mut tx,
                request.id,
                RequestStatus::Expired,
                Some(request.user_id),
                Some(EXPIRED_REASON),
            )
            .await?;

        tx.commit().await?;
        tracing::info!(
            "Request {} expired, released {} line item(s)",
            request.request_id,
            flipped.len()
        );
        Ok(released)
    }
}
