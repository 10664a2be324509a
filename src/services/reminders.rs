//! Reminder escalation scheduler: notifies borrowers of overdue (or
//! due-today) items on a decaying cadence without spamming.
//!
//! Cadence: day 0, 1, 3, 7, then every 7 days. Deduplication is durable:
//! the day of the last reminder is stored on the line item itself, so a
//! restart (or a second instance) never double-sends within a day.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tokio::time;

use crate::{
    config::SchedulerConfig,
    error::{AppError, AppResult},
    repository::Repository,
    services::email::EmailService,
};

/// Escalation cadence: send on the due day, days 1, 3 and 7, then weekly.
pub fn should_send_reminder(days_overdue: i64) -> bool {
    match days_overdue {
        0 | 1 | 3 | 7 => true,
        d if d > 7 => d % 7 == 0,
        _ => false,
    }
}

pub struct ReminderScheduler {
    repository: Repository,
    email: EmailService,
    schedule: Schedule,
    send_delay: time::Duration,
}

impl ReminderScheduler {
    pub fn new(
        repository: Repository,
        email: EmailService,
        config: &SchedulerConfig,
    ) -> AppResult<Self> {
        let schedule = Schedule::from_str(&config.reminder_cron).map_err(|e| {
            AppError::Internal(format!(
                "Invalid reminder cron expression '{}': {}",
                config.reminder_cron, e
            ))
        })?;
        Ok(Self {
            repository,
            email,
            schedule,
            send_delay: time::Duration::from_millis(config.reminder_send_delay_ms),
        })
    }

    /// Sleep until each cron fire time (UTC) and run a pass
    pub async fn run_loop(self: Arc<Self>) {
        tracing::info!("Reminder scheduler started ({})", self.schedule);
        loop {
            let next = match self.schedule.upcoming(Utc).next() {
                Some(t) => t,
                None => {
                    tracing::error!("Reminder cron schedule yields no upcoming fire time");
                    return;
                }
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            time::sleep(wait).await;

            let sent = self.run_once().await;
            tracing::info!("Reminder pass complete, {} reminder(s) sent", sent);
        }
    }

    /// One reminder pass. Also the manual trigger entry point. A failure
    /// for one recipient is logged and never blocks the rest.
    pub async fn run_once(&self) -> u32 {
        let today = Utc::now().date_naive();

        let candidates = match self.repository.requests.reminder_candidates(today).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Reminder scan failed: {}", e);
                return 0;
            }
        };

        let mut sent = 0u32;
        for candidate in candidates {
            let days_overdue = (today - candidate.return_date.date_naive()).num_days();
            if days_overdue < 0 || !should_send_reminder(days_overdue) {
                continue;
            }
            // Already reminded today (durable dedup)
            if candidate.last_reminder_date == Some(today) {
                continue;
            }

            match self
                .email
                .send_overdue_reminder(
                    &candidate.user_email,
                    &candidate.user_name,
                    &candidate.equipment_name,
                    &candidate.request_id,
                    days_overdue,
                )
                .await
            {
                Ok(()) => {
                    if let Err(e) = self
                        .repository
                        .requests
                        .set_last_reminder(candidate.item_id, today)
                        .await
                    {
                        tracing::error!(
                            "Failed to record reminder for item {}: {}",
                            candidate.item_id,
                            e
                        );
                    }
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Reminder to {} for request {} failed: {}",
                        candidate.user_email,
                        candidate.request_id,
                        e
                    );
                }
            }

            // Fixed delay between outbound emails for provider rate limits
            time::sleep(self.send_delay).await;
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_early_days() {
        assert!(should_send_reminder(0));
        assert!(should_send_reminder(1));
        assert!(!should_send_reminder(2));
        assert!(should_send_reminder(3));
        assert!(!should_send_reminder(4));
        assert!(!should_send_reminder(5));
        assert!(!should_send_reminder(6));
    }

    #[test]
    fn cadence_weekly_after_day_seven() {
        assert!(should_send_reminder(7));
        assert!(!should_send_reminder(8));
        assert!(!should_send_reminder(13));
        assert!(should_send_reminder(14));
        assert!(!should_send_reminder(20));
        assert!(should_send_reminder(21));
        assert!(should_send_reminder(70));
    }

    #[test]
    fn cadence_is_pure() {
        for d in [0, 1, 3, 7, 8, 14] {
            assert_eq!(should_send_reminder(d), should_send_reminder(d));
        }
    }

    #[test]
    fn negative_days_never_send() {
        assert!(!should_send_reminder(-1));
        assert!(!should_send_reminder(-7));
    }

    #[test]
    fn default_cron_expression_parses() {
        let schedule = Schedule::from_str("0 0 9 * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }
}
