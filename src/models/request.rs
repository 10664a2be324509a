//! Borrow request aggregate: request, line items, status history

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::equipment::EquipmentCategory;

/// Request-level status. A coarse summary of the line item statuses;
/// the stored value is a point-in-time snapshot computed by
/// [`derive_overall_status`], the per-item statuses are authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Returned,
    Partial,
    Expired,
    Overdue,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Returned => "returned",
            RequestStatus::Partial => "partial",
            RequestStatus::Expired => "expired",
            RequestStatus::Overdue => "overdue",
        };
        write!(f, "{}", label)
    }
}

/// Line item status. Pending and approved items hold a reservation
/// against inventory; every other status means the reservation has been
/// released (or, for overdue, that the units are legitimately still out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LineItemStatus {
    Pending,
    Approved,
    Rejected,
    Returned,
    Expired,
    Overdue,
}

impl LineItemStatus {
    /// Whether the item still counts against inventory or is outstanding
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LineItemStatus::Pending | LineItemStatus::Approved | LineItemStatus::Overdue
        )
    }
}

impl std::fmt::Display for LineItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LineItemStatus::Pending => "pending",
            LineItemStatus::Approved => "approved",
            LineItemStatus::Rejected => "rejected",
            LineItemStatus::Returned => "returned",
            LineItemStatus::Expired => "expired",
            LineItemStatus::Overdue => "overdue",
        };
        write!(f, "{}", label)
    }
}

/// Borrow request row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BorrowRequest {
    pub id: i32,
    /// Human-readable sequential identifier, format REQ-NNNNNN
    pub request_id: String,
    pub user_id: i32,
    pub borrow_date: DateTime<Utc>,
    pub status: RequestStatus,
    /// Free-text justification, 10-500 chars
    pub reason: String,
    /// Set only while the request is pending
    pub expires_at: Option<DateTime<Utc>>,
    pub approval_note: Option<String>,
    pub rejection_reason: Option<String>,
    pub expired_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Line item row
///
/// `equipment_name` and `equipment_category` are snapshots captured at
/// creation time so display survives later equipment deletion or rename.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LineItem {
    pub id: i32,
    pub request_id: i32,
    pub equipment_id: Option<i32>,
    pub equipment_name: String,
    pub equipment_category: EquipmentCategory,
    pub quantity: i32,
    pub return_date: DateTime<Utc>,
    pub status: LineItemStatus,
    /// Set only when the item is returned
    pub actual_return_date: Option<DateTime<Utc>>,
    /// Day of the last overdue reminder sent for this item
    pub last_reminder_date: Option<NaiveDate>,
}

/// Immutable audit trail entry, append-only
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct StatusHistoryEntry {
    pub id: i32,
    pub request_id: i32,
    pub status: RequestStatus,
    pub actor_id: Option<i32>,
    pub comment: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Fully populated request for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestDetails {
    pub id: i32,
    pub request_id: String,
    pub user_id: i32,
    pub borrow_date: DateTime<Utc>,
    pub status: RequestStatus,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub approval_note: Option<String>,
    pub rejection_reason: Option<String>,
    pub expired_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<LineItem>,
    pub status_history: Vec<StatusHistoryEntry>,
}

impl RequestDetails {
    pub fn from_parts(
        request: BorrowRequest,
        items: Vec<LineItem>,
        status_history: Vec<StatusHistoryEntry>,
    ) -> Self {
        Self {
            id: request.id,
            request_id: request.request_id,
            user_id: request.user_id,
            borrow_date: request.borrow_date,
            status: request.status,
            reason: request.reason,
            expires_at: request.expires_at,
            approval_note: request.approval_note,
            rejection_reason: request.rejection_reason,
            expired_reason: request.expired_reason,
            created_at: request.created_at,
            items,
            status_history,
        }
    }
}

/// Compute the request-level status summary from its line item statuses.
///
/// An overdue item dominates everything else; homogeneous item sets map
/// to the same request status; a mix of approved and rejected/expired
/// items is `partial`.
pub fn derive_overall_status(items: &[LineItemStatus]) -> RequestStatus {
    use LineItemStatus as S;

    if items.is_empty() {
        return RequestStatus::Pending;
    }
    if items.iter().any(|s| *s == S::Overdue) {
        return RequestStatus::Overdue;
    }
    if items.iter().all(|s| *s == S::Pending) {
        return RequestStatus::Pending;
    }
    if items.iter().all(|s| *s == S::Rejected) {
        return RequestStatus::Rejected;
    }
    if items.iter().all(|s| *s == S::Expired) {
        return RequestStatus::Expired;
    }
    if items
        .iter()
        .all(|s| matches!(s, S::Returned | S::Rejected | S::Expired))
    {
        // Everything is terminal; "returned" wins if anything came back
        if items.iter().any(|s| *s == S::Returned) {
            return RequestStatus::Returned;
        }
        return RequestStatus::Rejected;
    }
    if items.iter().all(|s| *s == S::Approved) {
        return RequestStatus::Approved;
    }
    RequestStatus::Partial
}

#[cfg(test)]
mod tests {
    use super::*;
    use LineItemStatus as S;

    #[test]
    fn empty_request_is_pending() {
        assert_eq!(derive_overall_status(&[]), RequestStatus::Pending);
    }

    #[test]
    fn homogeneous_items_map_directly() {
        assert_eq!(
            derive_overall_status(&[S::Pending, S::Pending]),
            RequestStatus::Pending
        );
        assert_eq!(
            derive_overall_status(&[S::Approved, S::Approved]),
            RequestStatus::Approved
        );
        assert_eq!(
            derive_overall_status(&[S::Rejected]),
            RequestStatus::Rejected
        );
        assert_eq!(derive_overall_status(&[S::Expired]), RequestStatus::Expired);
        assert_eq!(
            derive_overall_status(&[S::Returned, S::Returned]),
            RequestStatus::Returned
        );
    }

    #[test]
    fn overdue_dominates() {
        assert_eq!(
            derive_overall_status(&[S::Approved, S::Overdue, S::Returned]),
            RequestStatus::Overdue
        );
    }

    #[test]
    fn approved_and_rejected_mix_is_partial() {
        assert_eq!(
            derive_overall_status(&[S::Approved, S::Rejected]),
            RequestStatus::Partial
        );
        assert_eq!(
            derive_overall_status(&[S::Approved, S::Expired]),
            RequestStatus::Partial
        );
    }

    #[test]
    fn returned_wins_over_rejected_once_all_terminal() {
        assert_eq!(
            derive_overall_status(&[S::Returned, S::Rejected]),
            RequestStatus::Returned
        );
    }

    #[test]
    fn pending_mix_is_partial() {
        assert_eq!(
            derive_overall_status(&[S::Pending, S::Approved]),
            RequestStatus::Partial
        );
    }

    #[test]
    fn active_statuses() {
        assert!(S::Pending.is_active());
        assert!(S::Approved.is_active());
        assert!(S::Overdue.is_active());
        assert!(!S::Rejected.is_active());
        assert!(!S::Returned.is_active());
        assert!(!S::Expired.is_active());
    }
}
