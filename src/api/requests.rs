//! Borrow request endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::request::RequestDetails,
    services::reservation::{CreateRequest, RequestedItem, StatusAction, StatusUpdate},
};

use super::AuthenticatedUser;

/// One requested line item
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct RequestedItemBody {
    /// Equipment ID
    pub equipment: i32,
    /// Units requested
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Planned return date, must be strictly after the borrow date
    pub return_date: DateTime<Utc>,
}

/// Create borrow request body
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRequestBody {
    #[validate(nested, length(min = 1))]
    pub items: Vec<RequestedItemBody>,
    /// Borrow date applying to all line items
    pub borrow_date: DateTime<Utc>,
    /// Justification for the request
    #[validate(length(min = 10, max = 500))]
    pub reason: String,
}

/// Staff decision values accepted by the status endpoint
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StatusActionBody {
    Approved,
    Rejected,
    Returned,
}

/// Status update body
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusBody {
    pub status: StatusActionBody,
    /// Mandatory for rejections at the UI level; defaults to a
    /// placeholder when absent
    pub rejection_reason: Option<String>,
    pub approval_note: Option<String>,
    pub comment: Option<String>,
}

/// Created request response
#[derive(Serialize, ToSchema)]
pub struct CreateRequestResponse {
    pub success: bool,
    pub request: RequestDetails,
    /// Per-item validation failures for items that were dropped
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Updated request response
#[derive(Serialize, ToSchema)]
pub struct RequestResponse {
    pub success: bool,
    pub request: RequestDetails,
}

/// Generic success response
#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// Manual reminder run response
#[derive(Serialize, ToSchema)]
pub struct ReminderRunResponse {
    pub success: bool,
    /// Reminders sent in this pass
    pub sent: u32,
}

/// Submit a borrow request
#[utoipa::path(
    post,
    path = "/requests",
    tag = "requests",
    security(("bearer_auth" = [])),
    request_body = CreateRequestBody,
    responses(
        (status = 201, description = "Request created, possibly with per-item warnings", body = CreateRequestResponse),
        (status = 400, description = "No items or all items failed validation")
    )
)]
pub async fn create_request(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(body): Json<CreateRequestBody>,
) -> AppResult<(StatusCode, Json<CreateRequestResponse>)> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let payload = CreateRequest {
        items: body
            .items
            .into_iter()
            .map(|i| RequestedItem {
                equipment: i.equipment,
                quantity: i.quantity,
                return_date: i.return_date,
            })
            .collect(),
        borrow_date: body.borrow_date,
        reason: body.reason,
    };

    let (request, warnings) = state
        .services
        .reservations
        .create_request(claims.user_id, payload)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRequestResponse {
            success: true,
            request,
            warnings,
        }),
    ))
}

/// Approve, reject, or return a request (staff)
#[utoipa::path(
    put,
    path = "/requests/{id}/status",
    tag = "requests",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Request ID")),
    request_body = UpdateStatusBody,
    responses(
        (status = 200, description = "Request updated", body = RequestResponse),
        (status = 400, description = "No items eligible for this transition"),
        (status = 404, description = "Request not found")
    )
)]
pub async fn update_request_status(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
    Json(body): Json<UpdateStatusBody>,
) -> AppResult<Json<RequestResponse>> {
    claims.require_staff()?;

    let update = StatusUpdate {
        action: match body.status {
            StatusActionBody::Approved => StatusAction::Approved,
            StatusActionBody::Rejected => StatusAction::Rejected,
            StatusActionBody::Returned => StatusAction::Returned,
        },
        rejection_reason: body.rejection_reason,
        approval_note: body.approval_note,
        comment: body.comment,
    };

    let request = state
        .services
        .reservations
        .update_status(id, &claims, update)
        .await?;

    Ok(Json(RequestResponse {
        success: true,
        request,
    }))
}

/// List requests, scoped by role
#[utoipa::path(
    get,
    path = "/requests",
    tag = "requests",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Requests visible to the caller", body = Vec<RequestDetails>)
    )
)]
pub async fn list_requests(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<RequestDetails>>> {
    let requests = state.services.reservations.list_for(&claims).await?;
    Ok(Json(requests))
}

/// Requests with overdue items (staff)
#[utoipa::path(
    get,
    path = "/requests/overdue",
    tag = "requests",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Requests holding overdue items", body = Vec<RequestDetails>),
        (status = 403, description = "Staff only")
    )
)]
pub async fn list_overdue_requests(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<RequestDetails>>> {
    claims.require_staff()?;
    let requests = state.services.reservations.list_overdue().await?;
    Ok(Json(requests))
}

/// Get a single request
#[utoipa::path(
    get,
    path = "/requests/{id}",
    tag = "requests",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request details", body = RequestDetails),
        (status = 404, description = "Not found, or not visible to the caller")
    )
)]
pub async fn get_request(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<RequestDetails>> {
    let request = state.services.reservations.get_for(id, &claims).await?;
    Ok(Json(request))
}

/// Delete a request (owner or admin; never while approved)
#[utoipa::path(
    delete,
    path = "/requests/{id}",
    tag = "requests",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request deleted", body = MessageResponse),
        (status = 400, description = "Request is approved"),
        (status = 404, description = "Not found, or not visible to the caller")
    )
)]
pub async fn delete_request(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<MessageResponse>> {
    let equipment_ids = state
        .services
        .reservations
        .delete_request(id, &claims)
        .await?;

    // Deletion bypasses the release path; heal the affected counters now
    if !equipment_ids.is_empty() {
        let reconciler = std::sync::Arc::clone(&state.services.reconciler);
        tokio::spawn(async move {
            reconciler.reconcile_ids(&equipment_ids).await;
        });
    }

    Ok(Json(MessageResponse {
        success: true,
        message: "Request deleted".to_string(),
    }))
}

/// Manually trigger a reminder pass (admin)
#[utoipa::path(
    post,
    path = "/requests/reminders/run",
    tag = "requests",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Reminder pass executed", body = ReminderRunResponse),
        (status = 403, description = "Admin only")
    )
)]
pub async fn run_reminders(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<ReminderRunResponse>> {
    claims.require_admin()?;
    let sent = state.services.reminders.run_once().await;
    Ok(Json(ReminderRunResponse {
        success: true,
        sent,
    }))
}
