//! Borrow request repository: request rows, line items, status history,
//! and the scan queries the background schedulers run on.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::{
        equipment::EquipmentCategory,
        request::{BorrowRequest, LineItem, LineItemStatus, RequestStatus, StatusHistoryEntry},
    },
};

/// Sequence name in the counters table for request identifiers
const REQUEST_ID_COUNTER: &str = "request_id";

/// Human-readable identifier built from the counter value, zero-padded
/// to six digits (REQ-000042). Values past 999999 simply grow wider.
fn format_request_id(value: i64) -> String {
    format!("REQ-{:06}", value)
}

/// Row for the reminder scheduler: one overdue (or due-today) line item
/// joined with its borrower.
#[derive(Debug, Clone, FromRow)]
pub struct ReminderCandidate {
    pub item_id: i32,
    pub request_id: String,
    pub user_name: String,
    pub user_email: String,
    pub equipment_name: String,
    pub return_date: DateTime<Utc>,
    pub last_reminder_date: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct RequestsRepository {
    pool: Pool<Postgres>,
}

impl RequestsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------

    /// Allocate the next human-readable request identifier (REQ-NNNNNN)
    /// from the atomic counter row. Values are strictly increasing and
    /// never reused, even under concurrent creates.
    pub async fn next_request_id(&self, tx: &mut Transaction<'_, Postgres>) -> AppResult<String> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO counters (name, value) VALUES ($1, 1)
            ON CONFLICT (name) DO UPDATE SET value = counters.value + 1
            RETURNING value
            "#,
        )
        .bind(REQUEST_ID_COUNTER)
        .fetch_one(&mut **tx)
        .await?;
        Ok(format_request_id(value))
    }

    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request_id: &str,
        user_id: i32,
        borrow_date: DateTime<Utc>,
        reason: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<BorrowRequest> {
        let row = sqlx::query_as::<_, BorrowRequest>(
            r#"
            INSERT INTO requests (request_id, user_id, borrow_date, status, reason, expires_at)
            VALUES ($1, $2, $3, 'pending', $4, $5)
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(user_id)
        .bind(borrow_date)
        .bind(reason)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    /// Insert a line item with its equipment snapshot fields
    pub async fn insert_item(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request_pk: i32,
        equipment_id: i32,
        equipment_name: &str,
        equipment_category: EquipmentCategory,
        quantity: i32,
        return_date: DateTime<Utc>,
    ) -> AppResult<LineItem> {
        let row = sqlx::query_as::<_, LineItem>(
            r#"
            INSERT INTO request_items
                (request_id, equipment_id, equipment_name, equipment_category, quantity, return_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING *
            "#,
        )
        .bind(request_pk)
        .bind(equipment_id)
        .bind(equipment_name)
        .bind(equipment_category)
        .bind(quantity)
        .bind(return_date)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row)
    }

    /// Append an audit trail entry. Entries are never updated or deleted.
    pub async fn append_history(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request_pk: i32,
        status: RequestStatus,
        actor_id: Option<i32>,
        comment: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO status_history (request_id, status, actor_id, comment, changed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(request_pk)
        .bind(status)
        .bind(actor_id)
        .bind(comment)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    pub async fn get_by_id(&self, id: i32) -> AppResult<BorrowRequest> {
        sqlx::query_as::<_, BorrowRequest>("SELECT * FROM requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Request {} not found", id)))
    }

    pub async fn items(&self, request_pk: i32) -> AppResult<Vec<LineItem>> {
        let rows = sqlx::query_as::<_, LineItem>(
            "SELECT * FROM request_items WHERE request_id = $1 ORDER BY id",
        )
        .bind(request_pk)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn items_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request_pk: i32,
    ) -> AppResult<Vec<LineItem>> {
        let rows = sqlx::query_as::<_, LineItem>(
            "SELECT * FROM request_items WHERE request_id = $1 ORDER BY id",
        )
        .bind(request_pk)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    pub async fn history(&self, request_pk: i32) -> AppResult<Vec<StatusHistoryEntry>> {
        let rows = sqlx::query_as::<_, StatusHistoryEntry>(
            "SELECT * FROM status_history WHERE request_id = $1 ORDER BY changed_at, id",
        )
        .bind(request_pk)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_all(&self) -> AppResult<Vec<BorrowRequest>> {
        let rows =
            sqlx::query_as::<_, BorrowRequest>("SELECT * FROM requests ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    pub async fn list_for_user(&self, user_id: i32) -> AppResult<Vec<BorrowRequest>> {
        let rows = sqlx::query_as::<_, BorrowRequest>(
            "SELECT * FROM requests WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_with_statuses(
        &self,
        statuses: &[RequestStatus],
    ) -> AppResult<Vec<BorrowRequest>> {
        let names: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query_as::<_, BorrowRequest>(
            "SELECT * FROM requests WHERE status = ANY($1) ORDER BY created_at DESC",
        )
        .bind(names)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Requests holding at least one overdue line item
    pub async fn list_overdue(&self) -> AppResult<Vec<BorrowRequest>> {
        let rows = sqlx::query_as::<_, BorrowRequest>(
            r#"
            SELECT r.* FROM requests r
            WHERE EXISTS (
                SELECT 1 FROM request_items ri
                WHERE ri.request_id = r.id AND ri.status = 'overdue'
            )
            ORDER BY r.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------
    // Reservation protocol helpers
    // -----------------------------------------------------------------

    /// Sum of quantities already booked for an equipment item by active
    /// (pending/approved) line items whose borrow/return window intersects
    /// the given window.
    pub async fn overlapping_booked(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        equipment_id: i32,
        borrow_date: DateTime<Utc>,
        return_date: DateTime<Utc>,
    ) -> AppResult<i64> {
        let booked: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(ri.quantity), 0)::bigint
            FROM request_items ri
            JOIN requests r ON r.id = ri.request_id
            WHERE ri.equipment_id = $1
              AND ri.status IN ('pending', 'approved')
              AND r.borrow_date <= $3
              AND ri.return_date >= $2
            "#,
        )
        .bind(equipment_id)
        .bind(borrow_date)
        .bind(return_date)
        .fetch_one(&mut **tx)
        .await?;
        Ok(booked)
    }

    /// Single accessor for line item status transitions. Moves every item
    /// of the request currently in one of `from` to `to`, optionally
    /// stamping the actual return date, and returns the affected rows so
    /// callers can release exactly those reservations.
    pub async fn transition_items(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request_pk: i32,
        from: &[LineItemStatus],
        to: LineItemStatus,
        actual_return_date: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<LineItem>> {
        let from_names: Vec<String> = from.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query_as::<_, LineItem>(
            r#"
            UPDATE request_items
            SET status = $3, actual_return_date = COALESCE($4, actual_return_date)
            WHERE request_id = $1 AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(request_pk)
        .bind(from_names)
        .bind(to)
        .bind(actual_return_date)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    /// Update the stored request-level summary after a transition.
    /// `expires_at` is always overwritten (cleared on every transition out
    /// of pending); the optional note fields are only set when provided.
    pub async fn update_status_fields(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request_pk: i32,
        status: RequestStatus,
        expires_at: Option<DateTime<Utc>>,
        approval_note: Option<&str>,
        rejection_reason: Option<&str>,
        expired_reason: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE requests
            SET status = $2,
                expires_at = $3,
                approval_note = COALESCE($4, approval_note),
                rejection_reason = COALESCE($5, rejection_reason),
                expired_reason = COALESCE($6, expired_reason)
            WHERE id = $1
            "#,
        )
        .bind(request_pk)
        .bind(status)
        .bind(expires_at)
        .bind(approval_note)
        .bind(rejection_reason)
        .bind(expired_reason)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Distinct equipment ids referenced by a request's line items
    pub async fn equipment_ids_of(&self, request_pk: i32) -> AppResult<Vec<i32>> {
        let ids: Vec<i32> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT equipment_id FROM request_items
            WHERE request_id = $1 AND equipment_id IS NOT NULL
            "#,
        )
        .bind(request_pk)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Delete a request. Line items and history cascade; inventory is NOT
    /// released here, the caller triggers an on-demand reconcile instead.
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Scheduler scans
    // -----------------------------------------------------------------

    /// Pending requests whose 24-hour window has elapsed
    pub async fn find_expired_pending(&self, now: DateTime<Utc>) -> AppResult<Vec<BorrowRequest>> {
        let rows = sqlx::query_as::<_, BorrowRequest>(
            "SELECT * FROM requests WHERE status = 'pending' AND expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Approved requests holding at least one approved item past its
    /// return date. Once flipped to overdue the items fall out of this
    /// query, so repeated scans do not reprocess them.
    pub async fn find_overdue_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<BorrowRequest>> {
        let rows = sqlx::query_as::<_, BorrowRequest>(
            r#"
            SELECT r.* FROM requests r
            WHERE r.status = 'approved'
              AND EXISTS (
                  SELECT 1 FROM request_items ri
                  WHERE ri.request_id = r.id
                    AND ri.status = 'approved'
                    AND ri.return_date < $1
              )
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Flip approved items past their return date to overdue
    pub async fn mark_items_overdue(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request_pk: i32,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE request_items
            SET status = 'overdue'
            WHERE request_id = $1 AND status = 'approved' AND return_date < $2
            "#,
        )
        .bind(request_pk)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Items due today or overdue, with their borrower, for the reminder
    /// scheduler.
    pub async fn reminder_candidates(&self, today: NaiveDate) -> AppResult<Vec<ReminderCandidate>> {
        let rows = sqlx::query_as::<_, ReminderCandidate>(
            r#"
            SELECT ri.id AS item_id, r.request_id,
                   u.name AS user_name, u.email AS user_email,
                   ri.equipment_name, ri.return_date, ri.last_reminder_date
            FROM request_items ri
            JOIN requests r ON r.id = ri.request_id
            JOIN users u ON u.id = r.user_id
            WHERE ri.status IN ('approved', 'overdue')
              AND ri.return_date::date <= $1
            ORDER BY ri.return_date
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Record that a reminder went out today for this item (durable dedup)
    pub async fn set_last_reminder(&self, item_id: i32, date: NaiveDate) -> AppResult<()> {
        sqlx::query("UPDATE request_items SET last_reminder_date = $2 WHERE id = $1")
            .bind(item_id)
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sum of quantities held by active line items for one equipment item.
    /// Overdue items are included: their units are still out, so they
    /// still count against `available`.
    pub async fn reserved_quantity(&self, equipment_id: i32) -> AppResult<i64> {
        let reserved: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::bigint
            FROM request_items
            WHERE equipment_id = $1 AND status IN ('pending', 'approved', 'overdue')
            "#,
        )
        .bind(equipment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(reserved)
    }

    /// Borrowers with a pending request touching this equipment, for the
    /// availability fan-out after a release.
    pub async fn pending_requesters_for_equipment(
        &self,
        equipment_id: i32,
    ) -> AppResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT DISTINCT u.name, u.email
            FROM request_items ri
            JOIN requests r ON r.id = ri.request_id
            JOIN users u ON u.id = r.user_id
            WHERE ri.equipment_id = $1 AND ri.status = 'pending'
            "#,
        )
        .bind(equipment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_zero_padded() {
        assert_eq!(format_request_id(1), "REQ-000001");
        assert_eq!(format_request_id(42), "REQ-000042");
        assert_eq!(format_request_id(999_999), "REQ-999999");
    }

    #[test]
    fn request_ids_widen_past_six_digits() {
        assert_eq!(format_request_id(1_000_000), "REQ-1000000");
    }
}
