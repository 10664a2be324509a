//! Availability fan-out: when a release puts units back into the pool,
//! tell borrowers whose pending requests are waiting on that equipment.
//!
//! Fire-and-forget collaborator: callers spawn these notifications and
//! never see their failures, which are logged and swallowed here.

use std::collections::HashSet;

use crate::{repository::Repository, services::email::EmailService};

#[derive(Clone)]
pub struct AvailabilityNotifier {
    repository: Repository,
    email: EmailService,
}

impl AvailabilityNotifier {
    pub fn new(repository: Repository, email: EmailService) -> Self {
        Self { repository, email }
    }

    /// Notify waiting borrowers for each released equipment id.
    /// Duplicate ids are collapsed; one failed recipient never blocks the
    /// rest.
    pub async fn notify_equipment_available(&self, equipment_ids: &[i32]) {
        let unique: HashSet<i32> = equipment_ids.iter().copied().collect();

        for equipment_id in unique {
            let equipment = match self.repository.equipment.get_by_id(equipment_id).await {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(
                        "Availability fan-out: equipment {} lookup failed: {}",
                        equipment_id,
                        e
                    );
                    continue;
                }
            };

            let waiters = match self
                .repository
                .requests
                .pending_requesters_for_equipment(equipment_id)
                .await
            {
                Ok(w) => w,
                Err(e) => {
                    tracing::warn!(
                        "Availability fan-out: waiter lookup for equipment {} failed: {}",
                        equipment_id,
                        e
                    );
                    continue;
                }
            };

            for (name, email) in waiters {
                if let Err(e) = self
                    .email
                    .send_availability_notice(&email, &name, &equipment.name)
                    .await
                {
                    tracing::warn!("Availability notice to {} failed: {}", email, e);
                }
            }
        }
    }
}
