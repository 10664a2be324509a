//! Business logic services

pub mod email;
pub mod equipment;
pub mod expiration;
pub mod notifications;
pub mod overdue;
pub mod reconciler;
pub mod reminders;
pub mod reservation;

use std::sync::Arc;

use crate::{
    config::{EmailConfig, SchedulerConfig},
    error::AppResult,
    repository::Repository,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub equipment: equipment::EquipmentService,
    pub reservations: reservation::ReservationService,
    pub reconciler: Arc<reconciler::ConsistencyReconciler>,
    pub expiration: Arc<expiration::ExpirationScheduler>,
    pub overdue: Arc<overdue::OverdueMonitor>,
    pub reminders: Arc<reminders::ReminderScheduler>,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(
        repository: Repository,
        email_config: EmailConfig,
        scheduler_config: SchedulerConfig,
    ) -> AppResult<Self> {
        let email = email::EmailService::new(email_config);
        let notifier = Arc::new(notifications::AvailabilityNotifier::new(
            repository.clone(),
            email.clone(),
        ));

        Ok(Self {
            equipment: equipment::EquipmentService::new(repository.clone()),
            reservations: reservation::ReservationService::new(
                repository.clone(),
                Arc::clone(&notifier),
                &scheduler_config,
            ),
            reconciler: Arc::new(reconciler::ConsistencyReconciler::new(
                repository.clone(),
                scheduler_config.reconcile_throttle_secs,
                Arc::new(reconciler::SystemClock),
            )),
            expiration: Arc::new(expiration::ExpirationScheduler::new(
                repository.clone(),
                notifier,
                scheduler_config.expiration_interval_secs,
            )),
            overdue: Arc::new(overdue::OverdueMonitor::new(
                repository.clone(),
                scheduler_config.overdue_interval_secs,
            )),
            reminders: Arc::new(reminders::ReminderScheduler::new(
                repository,
                email,
                &scheduler_config,
            )?),
        })
    }
}
