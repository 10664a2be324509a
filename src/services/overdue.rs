//! Overdue monitor: flags approved line items whose return date has
//! passed. No inventory change happens here, the equipment is still
//! legitimately out.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{self, MissedTickBehavior};

use crate::{
    error::AppResult,
    models::{derive_overall_status, request::BorrowRequest, LineItemStatus, RequestStatus},
    repository::Repository,
};

pub struct OverdueMonitor {
    repository: Repository,
    interval_secs: u64,
}

impl OverdueMonitor {
    pub fn new(repository: Repository, interval_secs: u64) -> Self {
        Self {
            repository,
            interval_secs,
        }
    }

    pub async fn run_loop(self: Arc<Self>) {
        tracing::info!("Overdue monitor started (every {}s)", self.interval_secs);
        let mut interval = time::interval(time::Duration::from_secs(self.interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            match self.process_overdue().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Flagged {} request(s) overdue", n),
                Err(e) => tracing::error!("Overdue pass failed: {}", e),
            }
        }
    }

    /// One pass. Idempotent: only approved items are scanned, so items
    /// already flipped to overdue fall out of the query.
    pub async fn process_overdue(&self) -> AppResult<u32> {
        let now = Utc::now();
        let candidates = self.repository.requests.find_overdue_candidates(now).await?;

        let mut flagged = 0u32;
        for request in candidates {
            match self.flag_one(&request).await {
                Ok(()) => flagged += 1,
                Err(e) => {
                    tracing::error!(
                        "Failed to flag request {} overdue: {}",
                        request.request_id,
                        e
                    );
                }
            }
        }
        Ok(flagged)
    }

    async fn flag_one(&self, request: &BorrowRequest) -> AppResult<()> {
        let mut tx = self.repository.pool.begin().await?;
        let now = Utc::now();

        let changed = self
            .repository
            .requests
            .mark_items_overdue(&mut tx, request.id, now)
            .await?;

        if changed == 0 {
            // Raced with a return between scan and transaction
            tx.rollback().await?;
            return Ok(());
        }

        let all = self.repository.requests.items_in_tx(&mut tx, request.id).await?;
        let statuses: Vec<LineItemStatus> = all.iter().map(|i| i.status).collect();
        let overall = derive_overall_status(&statuses);

        self.repository
            .requests
            .update_status_fields(&mut tx, request.id, overall, None, None, None, None)
            .await?;

        self.repository
            .requests
            .append_history(
                &mut tx,
                request.id,
                RequestStatus::Overdue,
                Some(request.user_id),
                Some("Return date passed"),
            )
            .await?;

        tx.commit().await?;
        tracing::info!(
            "Request {} flagged overdue ({} item(s))",
            request.request_id,
            changed
        );
        Ok(())
    }
}
