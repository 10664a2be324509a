//! Reservation protocol: the one place that moves requests and line
//! items through their lifecycle and keeps `equipment.available` in
//! lockstep.
//!
//! Every transition runs inside a single database transaction. Each line
//! item's reservation is taken exactly once (at creation) and released
//! exactly once (on reject, return, or expiry) across its lifetime.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    config::SchedulerConfig,
    error::{AppError, AppResult},
    models::{
        derive_overall_status,
        request::{LineItemStatus, RequestDetails, RequestStatus},
        user::UserClaims,
    },
    repository::Repository,
    services::notifications::AvailabilityNotifier,
};

/// Fallback when staff reject without giving a reason
const DEFAULT_REJECTION_REASON: &str = "No reason provided";

/// One requested line item in a create call
#[derive(Debug, Clone)]
pub struct RequestedItem {
    pub equipment: i32,
    pub quantity: i32,
    pub return_date: DateTime<Utc>,
}

/// Create call payload, already shape-validated at the API boundary
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub items: Vec<RequestedItem>,
    pub borrow_date: DateTime<Utc>,
    pub reason: String,
}

/// Staff decision on a pending or outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Approved,
    Rejected,
    Returned,
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub action: StatusAction,
    pub rejection_reason: Option<String>,
    pub approval_note: Option<String>,
    pub comment: Option<String>,
}

#[derive(Clone)]
pub struct ReservationService {
    repository: Repository,
    notifier: Arc<AvailabilityNotifier>,
    pending_ttl: Duration,
}

impl ReservationService {
    pub fn new(
        repository: Repository,
        notifier: Arc<AvailabilityNotifier>,
        scheduler: &SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            notifier,
            pending_ttl: Duration::hours(scheduler.pending_ttl_hours),
        }
    }

    /// Create a borrow request with soft reservations.
    ///
    /// Items are validated in array order; invalid ones become warnings.
    /// When no item survives validation the whole creation fails. Accepted
    /// items decrement `available` immediately via a guarded conditional
    /// update, and the request gets a 24-hour approval deadline.
    pub async fn create_request(
        &self,
        user_id: i32,
        payload: CreateRequest,
    ) -> AppResult<(RequestDetails, Vec<String>)> {
        if payload.items.is_empty() {
            return Err(AppError::Validation(
                "At least one item is required".to_string(),
            ));
        }

        let mut tx = self.repository.pool.begin().await?;
        let mut warnings: Vec<String> = Vec::new();
        // (equipment, quantity, return_date) accepted so far
        let mut accepted = Vec::new();

        for item in &payload.items {
            if item.quantity < 1 {
                warnings.push(format!(
                    "Equipment {}: quantity must be at least 1",
                    item.equipment
                ));
                continue;
            }
            if item.return_date <= payload.borrow_date {
                warnings.push(format!(
                    "Equipment {}: return date must be after the borrow date",
                    item.equipment
                ));
                continue;
            }

            let equipment = match self
                .repository
                .equipment
                .get_in_tx(&mut tx, item.equipment)
                .await?
            {
                Some(e) => e,
                None => {
                    warnings.push(format!("Equipment {} not found", item.equipment));
                    continue;
                }
            };

            // Overlap check across other active reservations for the same
            // window, before touching the counter itself
            let already_booked = self
                .repository
                .requests
                .overlapping_booked(&mut tx, equipment.id, payload.borrow_date, item.return_date)
                .await?;

            if (equipment.available as i64) - already_booked < item.quantity as i64 {
                warnings.push(format!(
                    "'{}': only {} unit(s) available for the selected dates",
                    equipment.name, equipment.available
                ));
                continue;
            }

            // Guarded decrement; a concurrent create may have consumed the
            // units between the check above and this write
            if !self
                .repository
                .equipment
                .reserve(&mut tx, equipment.id, item.quantity)
                .await?
            {
                warnings.push(format!(
                    "'{}': insufficient stock for {} unit(s)",
                    equipment.name, item.quantity
                ));
                continue;
            }

            accepted.push((equipment, item.quantity, item.return_date));
        }

        if accepted.is_empty() {
            tx.rollback().await?;
            return Err(AppError::Validation(format!(
                "No valid items in request: {}",
                warnings.join("; ")
            )));
        }

        let request_id = self.repository.requests.next_request_id(&mut tx).await?;
        let expires_at = Utc::now() + self.pending_ttl;
        let request = self
            .repository
            .requests
            .insert(
                &mut tx,
                &request_id,
                user_id,
                payload.borrow_date,
                &payload.reason,
                expires_at,
            )
            .await?;

        for (equipment, quantity, return_date) in &accepted {
            self.repository
                .requests
                .insert_item(
                    &mut tx,
                    request.id,
                    equipment.id,
                    &equipment.name,
                    equipment.category,
                    *quantity,
                    *return_date,
                )
                .await?;
        }

        self.repository
            .requests
            .append_history(
                &mut tx,
                request.id,
                RequestStatus::Pending,
                Some(user_id),
                Some("Request submitted"),
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            "Request {} created by user {} with {} item(s), {} warning(s)",
            request.request_id,
            user_id,
            accepted.len(),
            warnings.len()
        );

        let details = self.get_details(request.id).await?;
        Ok((details, warnings))
    }

    /// Apply a staff decision: approve, reject, or mark returned.
    pub async fn update_status(
        &self,
        request_pk: i32,
        actor: &UserClaims,
        update: StatusUpdate,
    ) -> AppResult<RequestDetails> {
        // 404 up front so the transaction only opens for real requests
        let request = self.repository.requests.get_by_id(request_pk).await?;

        let released = match update.action {
            StatusAction::Approved => self.approve(&request, actor, &update).await?,
            StatusAction::Rejected => self.reject(&request, actor, &update).await?,
            StatusAction::Returned => self.mark_returned(&request, actor, &update).await?,
        };

        if !released.is_empty() {
            let notifier = Arc::clone(&self.notifier);
            tokio::spawn(async move {
                notifier.notify_equipment_available(&released).await;
            });
        }

        self.get_details(request_pk).await
    }

    /// Approve: status flips only, inventory was reserved at creation
    async fn approve(
        &self,
        request: &crate::models::BorrowRequest,
        actor: &UserClaims,
        update: &StatusUpdate,
    ) -> AppResult<Vec<i32>> {
        let mut tx = self.repository.pool.begin().await?;

        let flipped = self
            .repository
            .requests
            .transition_items(
                &mut tx,
                request.id,
                &[LineItemStatus::Pending],
                LineItemStatus::Approved,
                None,
            )
            .await?;

        if flipped.is_empty() {
            tx.rollback().await?;
            return Err(AppError::BusinessRule(format!(
                "Request {} has no pending items to approve",
                request.request_id
            )));
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
                update.approval_note.as_deref(),
                None,
                None,
            )
            .await?;

        self.repository
            .requests
            .append_history(
                &mut tx,
                request.id,
                RequestStatus::Approved,
                Some(actor.user_id),
                update
                    .comment
                    .as_deref()
                    .or(update.approval_note.as_deref()),
            )
            .await?;

        tx.commit().await?;
        tracing::info!("Request {} approved by user {}", request.request_id, actor.user_id);
        Ok(Vec::new())
    }

    /// Reject: release the reservation of every pending/approved item
    async fn reject(
        &self,
        request: &crate::models::BorrowRequest,
        actor: &UserClaims,
        update: &StatusUpdate,
    ) -> AppResult<Vec<i32>> {
        let mut tx = self.repository.pool.begin().await?;

        let flipped = self
            .repository
            .requests
            .transition_items(
                &mut tx,
                request.id,
                &[LineItemStatus::Pending, LineItemStatus::Approved],
                LineItemStatus::Rejected,
                None,
            )
            .await?;

        if flipped.is_empty() {
            tx.rollback().await?;
            return Err(AppError::BusinessRule(format!(
                "Request {} has no items left to reject",
                request.request_id
            )));
        }

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

        let reason = update
            .rejection_reason
            .as_deref()
            .unwrap_or(DEFAULT_REJECTION_REASON);

        self.repository
            .requests
            .update_status_fields(&mut tx, request.id, overall, None, None, Some(reason), None)
            .await?;

        self.repository
            .requests
            .append_history(
                &mut tx,
                request.id,
                RequestStatus::Rejected,
                Some(actor.user_id),
                update.comment.as_deref().or(Some(reason)),
            )
            .await?;

        tx.commit().await?;
        tracing::info!("Request {} rejected by user {}", request.request_id, actor.user_id);
        Ok(released)
    }

    /// Return: release every approved/overdue item and stamp the date
    async fn mark_returned(
        &self,
        request: &crate::models::BorrowRequest,
        actor: &UserClaims,
        update: &StatusUpdate,
    ) -> AppResult<Vec<i32>> {
        let mut tx = self.repository.pool.begin().await?;
        let now = Utc::now();

        let flipped = self
            .repository
            .requests
            .transition_items(
                &mut tx,
                request.id,
                &[LineItemStatus::Approved, LineItemStatus::Overdue],
                LineItemStatus::Returned,
                Some(now),
            )
            .await?;

        if flipped.is_empty() {
            tx.rollback().await?;
            return Err(AppError::BusinessRule(format!(
                "Request {} has no outstanding items to return",
                request.request_id
            )));
        }

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
            .update_status_fields(&mut tx, request.id, overall, None, None, None, None)
            .await?;

        self.repository
            .requests
            .append_history(
                &mut tx,
                request.id,
                RequestStatus::Returned,
                Some(actor.user_id),
                update.comment.as_deref(),
            )
            .await?;

        tx.commit().await?;
        tracing::info!("Request {} returned (handled by user {})", request.request_id, actor.user_id);
        Ok(released)
    }

    /// Delete a request. Forbidden while approved (the audit trail of
    /// equipment that is physically out must survive). Does not release
    /// inventory inline; the caller runs an on-demand reconcile for the
    /// affected equipment afterwards.
    pub async fn delete_request(&self, request_pk: i32, actor: &UserClaims) -> AppResult<Vec<i32>> {
        let request = self.repository.requests.get_by_id(request_pk).await?;

        // Ownership violations read as not-found so existence never leaks
        if request.user_id != actor.user_id && !actor.is_admin() {
            return Err(AppError::NotFound(format!(
                "Request {} not found",
                request_pk
            )));
        }

        if request.status == RequestStatus::Approved {
            return Err(AppError::BadRequest(
                "Cannot delete an approved request while equipment is out".to_string(),
            ));
        }

        let equipment_ids = self.repository.requests.equipment_ids_of(request_pk).await?;
        self.repository.requests.delete(request_pk).await?;

        tracing::info!(
            "Request {} deleted by user {}",
            request.request_id,
            actor.user_id
        );
        Ok(equipment_ids)
    }

    /// Populated request, with ownership check: owners and staff see the
    /// request, everyone else gets a 404.
    pub async fn get_for(&self, request_pk: i32, actor: &UserClaims) -> AppResult<RequestDetails> {
        let details = self.get_details(request_pk).await?;
        if details.user_id != actor.user_id && !actor.is_staff() {
            return Err(AppError::NotFound(format!(
                "Request {} not found",
                request_pk
            )));
        }
        Ok(details)
    }

    /// Role-scoped listing: students see their own requests, staff see
    /// the working set (pending/approved/returned), admins see everything.
    pub async fn list_for(&self, actor: &UserClaims) -> AppResult<Vec<RequestDetails>> {
        use crate::models::Role;

        let requests = match actor.role {
            Role::Student => self.repository.requests.list_for_user(actor.user_id).await?,
            Role::Staff => {
                self.repository
                    .requests
                    .list_with_statuses(&[
                        RequestStatus::Pending,
                        RequestStatus::Approved,
                        RequestStatus::Returned,
                    ])
                    .await?
            }
            Role::Admin => self.repository.requests.list_all().await?,
        };

        let mut result = Vec::with_capacity(requests.len());
        for request in requests {
            let items = self.repository.requests.items(request.id).await?;
            let history = self.repository.requests.history(request.id).await?;
            result.push(RequestDetails::from_parts(request, items, history));
        }
        Ok(result)
    }

    /// Requests with at least one overdue line item (staff view)
    pub async fn list_overdue(&self) -> AppResult<Vec<RequestDetails>> {
        let requests = self.repository.requests.list_overdue().await?;
        let mut result = Vec::with_capacity(requests.len());
        for request in requests {
            let items = self.repository.requests.items(request.id).await?;
            let history = self.repository.requests.history(request.id).await?;
            result.push(RequestDetails::from_parts(request, items, history));
        }
        Ok(result)
    }

    async fn get_details(&self, request_pk: i32) -> AppResult<RequestDetails> {
        let request = self.repository.requests.get_by_id(request_pk).await?;
        let items = self.repository.requests.items(request_pk).await?;
        let history = self.repository.requests.history(request_pk).await?;
        Ok(RequestDetails::from_parts(request, items, history))
    }
}
