//! Consistency reconciler: recomputes `equipment.available` from the
//! ground truth (quantities held by active line items) and heals drift.
//!
//! Drift is not an error condition. Deleted requests bypass the release
//! path on purpose; this component exists to notice and correct that,
//! and it must never fail its caller.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{error::AppResult, repository::Repository};

/// Time source, injected so the throttle gate is testable
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// At-most-once-per-window gate. Acquiring advances the window
/// immediately so concurrent callers don't all fire.
struct ThrottleGate {
    window: Duration,
    clock: Arc<dyn Clock>,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ThrottleGate {
    fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            last: Mutex::new(None),
        }
    }

    fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut last = self.last.lock().unwrap();
        match *last {
            Some(prev) if now - prev < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Ground-truth `available` for an equipment item given the sum of
/// reserved units. Clamped at zero so a corrupt over-reservation never
/// produces a negative count.
fn correct_available(quantity: i32, reserved: i64) -> i32 {
    (quantity as i64 - reserved).max(0) as i32
}

#[derive(Debug, Clone, Copy, Default, Serialize, ToSchema)]
pub struct ReconcileSummary {
    /// Equipment items examined
    pub checked: u32,
    /// Items whose `available` was corrected
    pub fixed: u32,
}

pub struct ConsistencyReconciler {
    repository: Repository,
    gate: ThrottleGate,
}

impl ConsistencyReconciler {
    pub fn new(repository: Repository, throttle_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            gate: ThrottleGate::new(Duration::seconds(throttle_secs), clock),
        }
    }

    /// Throttle gate for the opportunistic pass before equipment reads.
    pub fn should_run(&self) -> bool {
        self.gate.try_acquire()
    }

    /// Full scan over every equipment item
    pub async fn reconcile_all(&self) -> ReconcileSummary {
        match self.run(None).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("Reconciler full scan failed: {}", e);
                ReconcileSummary::default()
            }
        }
    }

    /// On-demand pass over specific equipment ids (e.g. right after a
    /// request deletion)
    pub async fn reconcile_ids(&self, ids: &[i32]) -> ReconcileSummary {
        match self.run(Some(ids)).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("Reconciler pass over {:?} failed: {}", ids, e);
                ReconcileSummary::default()
            }
        }
    }

    async fn run(&self, ids: Option<&[i32]>) -> AppResult<ReconcileSummary> {
        let equipment = match ids {
            None => self.repository.equipment.list().await?,
            Some(ids) => {
                let mut rows = Vec::with_capacity(ids.len());
                for id in ids {
                    // Deleted equipment is simply skipped
                    if let Ok(e) = self.repository.equipment.get_by_id(*id).await {
                        rows.push(e);
                    }
                }
                rows
            }
        };

        let mut summary = ReconcileSummary::default();
        for item in equipment {
            summary.checked += 1;

            let reserved = self.repository.requests.reserved_quantity(item.id).await?;
            let correct = correct_available(item.quantity, reserved);

            if item.available != correct {
                tracing::warn!(
                    "Inventory drift on '{}' (id {}): available {} -> {}",
                    item.name,
                    item.id,
                    item.available,
                    correct
                );
                self.repository
                    .equipment
                    .set_available(item.id, correct)
                    .await?;
                summary.fixed += 1;
            }
        }

        if summary.fixed > 0 {
            tracing::info!(
                "Reconciler corrected {}/{} equipment item(s)",
                summary.fixed,
                summary.checked
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn new(t: DateTime<Utc>) -> Self {
            Self(Mutex::new(t))
        }
        fn advance(&self, d: Duration) {
            let mut t = self.0.lock().unwrap();
            *t = *t + d;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn throttle_gate_fires_once_per_window() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let gate = ThrottleGate::new(Duration::seconds(300), clock.clone());

        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());

        clock.advance(Duration::seconds(299));
        assert!(!gate.try_acquire());

        clock.advance(Duration::seconds(2));
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
    }

    #[test]
    fn gate_fires_on_first_call() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let gate = ThrottleGate::new(Duration::seconds(1), clock);
        assert!(gate.try_acquire());
    }

    #[test]
    fn available_is_quantity_minus_reserved() {
        assert_eq!(correct_available(10, 3), 7);
        assert_eq!(correct_available(10, 0), 10);
        assert_eq!(correct_available(10, 10), 0);
    }

    #[test]
    fn available_never_goes_negative() {
        assert_eq!(correct_available(5, 8), 0);
    }
}
